//! Request resolution.
//!
//! [`MockServer`] is the per-request entry point: it routes the request to an
//! endpoint, extracts selector values, consults the scenario store, picks a
//! rule and builds the response.

use crate::config::{Endpoint, MockServerConfig};
use crate::error::MockError;
use crate::extract::extract_values;
use crate::matcher::{match_rules, match_rules_for_step};
use crate::random::{RandomSource, ThreadRandom};
use crate::request::MockRequest;
use crate::response::{BuiltResponse, ResponseBuilder, DEFAULT_CONTENT_TYPE};
use crate::router::Router;
use crate::scenario::ScenarioStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which part of an endpoint produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedRule {
    /// Index of the matching rule
    Rule(usize),
    /// The endpoint default
    Default,
}

impl fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedRule::Rule(i) => write!(f, "rule_{}", i),
            MatchedRule::Default => f.write_str("default"),
        }
    }
}

/// A scenario step change caused by a matched rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioTransition {
    pub scenario: String,
    pub partition: String,
    pub from: String,
    pub to: String,
}

/// Outcome of resolving one request, before any delay is applied.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub response: BuiltResponse,
    pub matched_rule: MatchedRule,
    /// File the body came from, for recorders
    pub response_file: Option<String>,
    pub transition: Option<ScenarioTransition>,
}

/// Finished response handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
    /// `None` for error responses
    pub matched_rule: Option<MatchedRule>,
    pub response_file: Option<String>,
}

impl From<Resolution> for MockResponse {
    fn from(resolution: Resolution) -> Self {
        let BuiltResponse {
            body,
            status,
            headers,
            content_type,
            ..
        } = resolution.response;

        Self {
            status,
            headers,
            content_type,
            body,
            matched_rule: Some(resolution.matched_rule),
            response_file: resolution.response_file,
        }
    }
}

/// Mock server core.
pub struct MockServer {
    config: MockServerConfig,
    router: Router,
    store: Arc<ScenarioStore>,
    responses: ResponseBuilder,
    /// Total requests resolved.
    requests_total: AtomicU64,
    /// Requests routed to an endpoint.
    requests_matched: AtomicU64,
    /// Requests with no endpoint.
    requests_unmatched: AtomicU64,
}

impl MockServer {
    /// Create a server with a fresh scenario store and thread-local randomness.
    pub fn new(config: MockServerConfig) -> Self {
        Self::with_parts(config, Arc::new(ScenarioStore::new()), Arc::new(ThreadRandom))
    }

    /// Create a server around an existing store and random source.
    pub fn with_parts(
        config: MockServerConfig,
        store: Arc<ScenarioStore>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        for warning in config.warnings() {
            warn!("{}", warning);
        }

        let router = Router::new(&config.endpoints);

        info!(endpoints = config.endpoints.len(), "Mock server initialized");

        Self {
            config,
            router,
            store,
            responses: ResponseBuilder::with_random(rng),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(Self::new(MockServerConfig::from_yaml(yaml)?))
    }

    pub fn config(&self) -> &MockServerConfig {
        &self.config
    }

    /// Shared scenario store, for admin surfaces.
    pub fn scenario_store(&self) -> Arc<ScenarioStore> {
        Arc::clone(&self.store)
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests routed to an endpoint.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests with no endpoint.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Route and resolve a request without applying its delay.
    pub fn resolve(&self, request: &MockRequest) -> Result<Resolution, MockError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let route = self
            .router
            .find(&self.config.endpoints, &request.method, &request.path);
        let Some(route) = route else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            if self.config.settings.log_unmatched {
                info!(method = %request.method, path = %request.path, "No endpoint matched");
            }
            return Err(MockError::NoEndpoint {
                method: request.method.clone(),
                path: request.path.clone(),
            });
        };

        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        let endpoint = &self.config.endpoints[route.index];
        self.resolve_endpoint(endpoint, request, &route.params)
    }

    /// Resolve a request against a known endpoint.
    ///
    /// Scenario transitions are applied before the response is built, so a
    /// failing response file still advances the step.
    pub fn resolve_endpoint(
        &self,
        endpoint: &Endpoint,
        request: &MockRequest,
        path_params: &HashMap<String, String>,
    ) -> Result<Resolution, MockError> {
        let values = extract_values(request, &endpoint.selectors, path_params);

        let (matched, transition) = match endpoint.scenario.as_deref() {
            Some(scenario) if !scenario.is_empty() => {
                let partition = endpoint
                    .scenario_key
                    .as_ref()
                    .and_then(|key| values.get(key))
                    .cloned()
                    .unwrap_or_default();
                let current = self.store.get_step(scenario, &partition);

                debug!(scenario, partition = %partition, step = %current, "Scenario lookup");

                let matched = match_rules_for_step(&values, &endpoint.rules, &current);

                let transition = matched
                    .as_ref()
                    .and_then(|m| m.rule.next_step.as_deref())
                    .filter(|next| !next.is_empty())
                    .map(|next| {
                        self.store.set_step(scenario, &partition, next);
                        info!(
                            scenario,
                            partition = %partition,
                            from = %current,
                            to = next,
                            "Scenario step changed"
                        );
                        ScenarioTransition {
                            scenario: scenario.to_string(),
                            partition: partition.clone(),
                            from: current.clone(),
                            to: next.to_string(),
                        }
                    });

                (matched, transition)
            }
            _ => (match_rules(&values, &endpoint.rules), None),
        };

        let (matched_rule, spec) = match &matched {
            Some(m) => (MatchedRule::Rule(m.index), &m.rule.response),
            None => (MatchedRule::Default, &endpoint.default),
        };

        if self.config.settings.log_matches {
            info!(
                endpoint = %endpoint.path,
                method = %request.method,
                matched_rule = %matched_rule,
                "Matched request"
            );
        }

        let response = self.responses.build(spec, &values)?;

        Ok(Resolution {
            response_file: response.source_file.clone(),
            response,
            matched_rule,
            transition,
        })
    }

    /// Resolve a request, apply its delay and map failures to error responses.
    pub async fn handle(&self, request: &MockRequest) -> MockResponse {
        match self.resolve(request) {
            Ok(resolution) => {
                let delay = resolution.response.delay;
                if !delay.is_zero() {
                    debug!(delay_ms = delay.as_millis() as u64, "Applying delay");
                    tokio::time::sleep(delay).await;
                }
                resolution.into()
            }
            Err(err) => {
                if matches!(err, MockError::ResponseFile { .. }) {
                    warn!(error = %err, "Failed to build response");
                }
                self.error_response(&err, request).await
            }
        }
    }

    async fn error_response(&self, err: &MockError, request: &MockRequest) -> MockResponse {
        let status = err.status();

        if let Some(file) = self.config.error_handling.custom_error_responses.get(&status) {
            match tokio::fs::read(file).await {
                Ok(body) => return error_body(status, body),
                Err(e) => debug!(file = %file, error = %e, "Custom error response unreadable"),
            }
        }

        let body = match err {
            MockError::NoEndpoint { .. } => serde_json::json!({
                "error": {
                    "code": "NOT_FOUND",
                    "message": "The requested resource was not found",
                    "path": request.path,
                }
            }),
            MockError::ResponseFile { .. } => {
                let mut body = serde_json::json!({
                    "error": {
                        "code": "INTERNAL_ERROR",
                        "message": "An internal error occurred",
                    }
                });
                if self.config.error_handling.show_details {
                    body["error"]["details"] = serde_json::Value::String(err.to_string());
                }
                body
            }
        };

        error_body(status, body.to_string().into_bytes())
    }
}

fn error_body(status: u16, body: Vec<u8>) -> MockResponse {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
    MockResponse {
        status,
        headers,
        content_type: DEFAULT_CONTENT_TYPE.to_string(),
        body,
        matched_rule: None,
        response_file: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;
    use crate::scenario::DEFAULT_STEP;
    use std::io::Write;
    use std::time::{Duration, Instant};

    const CHECKOUT_YAML: &str = r#"
endpoints:
  - path: /api/checkout
    method: POST
    scenario: checkout_flow
    scenario_key: session_id
    selectors:
      - name: session_id
        type: header
        key: X-Session-ID
    rules:
      - scenario_step: idle
        next_step: initiated
        response:
          body: '{"state":"initiated"}'
          status_code: 201
      - scenario_step: initiated
        next_step: paid
        response:
          body: '{"state":"paid"}'
      - scenario_step: any
        response:
          body: '{"state":"done"}'
    default:
      body: '{"state":"unknown"}'
"#;

    fn checkout(session: &str) -> MockRequest {
        MockRequest::new("POST", "/api/checkout").with_header("X-Session-ID", session)
    }

    fn body_str(resp: &MockResponse) -> &str {
        std::str::from_utf8(&resp.body).unwrap()
    }

    #[test]
    fn test_matched_rule_display() {
        assert_eq!(MatchedRule::Rule(2).to_string(), "rule_2");
        assert_eq!(MatchedRule::Default.to_string(), "default");
    }

    #[test]
    fn test_checkout_flow() {
        let server = MockServer::from_yaml(CHECKOUT_YAML).unwrap();
        let store = server.scenario_store();
        assert_eq!(store.get_step("checkout_flow", "sess-1"), DEFAULT_STEP);

        let first = server.resolve(&checkout("sess-1")).unwrap();
        assert_eq!(first.matched_rule, MatchedRule::Rule(0));
        assert_eq!(first.response.status, 201);
        assert_eq!(first.response.body, br#"{"state":"initiated"}"#);
        assert_eq!(
            first.transition,
            Some(ScenarioTransition {
                scenario: "checkout_flow".into(),
                partition: "sess-1".into(),
                from: "idle".into(),
                to: "initiated".into(),
            })
        );
        assert_eq!(store.get_step("checkout_flow", "sess-1"), "initiated");

        let second = server.resolve(&checkout("sess-1")).unwrap();
        assert_eq!(second.matched_rule, MatchedRule::Rule(1));
        assert_eq!(store.get_step("checkout_flow", "sess-1"), "paid");

        // No next_step, so the step stays
        let third = server.resolve(&checkout("sess-1")).unwrap();
        assert_eq!(third.matched_rule, MatchedRule::Rule(2));
        assert!(third.transition.is_none());
        assert_eq!(store.get_step("checkout_flow", "sess-1"), "paid");

        // Another session starts fresh
        let other = server.resolve(&checkout("sess-2")).unwrap();
        assert_eq!(other.matched_rule, MatchedRule::Rule(0));
    }

    #[test]
    fn test_reset_restarts_flow() {
        let server = MockServer::from_yaml(CHECKOUT_YAML).unwrap();
        server.resolve(&checkout("s")).unwrap();
        server.resolve(&checkout("s")).unwrap();

        server.scenario_store().reset_scenario("checkout_flow");
        let again = server.resolve(&checkout("s")).unwrap();
        assert_eq!(again.matched_rule, MatchedRule::Rule(0));
    }

    #[test]
    fn test_shared_store() {
        let config = MockServerConfig::from_yaml(CHECKOUT_YAML).unwrap();
        let store = Arc::new(ScenarioStore::new());
        store.set_step("checkout_flow", "s", "initiated");

        let server = MockServer::with_parts(config, Arc::clone(&store), Arc::new(SeededRandom::new(1)));
        let res = server.resolve(&checkout("s")).unwrap();
        assert_eq!(res.matched_rule, MatchedRule::Rule(1));
        assert_eq!(store.get_step("checkout_flow", "s"), "paid");
    }

    #[test]
    fn test_missing_partition_uses_empty_key() {
        let server = MockServer::from_yaml(CHECKOUT_YAML).unwrap();
        server
            .resolve(&MockRequest::new("POST", "/api/checkout"))
            .unwrap();
        assert_eq!(server.scenario_store().get_step("checkout_flow", ""), "initiated");
    }

    #[test]
    fn test_rules_and_default_without_scenario() {
        let yaml = r#"
endpoints:
  - path: /api/orders/:id
    method: GET
    selectors:
      - name: order_id
        type: path
        key: id
      - name: tier
        type: query
        key: tier
    rules:
      - conditions:
          - selector: order_id
            match_type: prefix
            value: VIP-
        response:
          body: '{"vip":true,"id":"{{.order_id}}"}'
          template:
            enabled: true
      - condition_logic: or
        conditions:
          - selector: tier
            value: gold
          - selector: tier
            value: silver
        response:
          body: '{"tier":"{{.tier}}"}'
          status_code: 202
          template:
            enabled: true
            engine: go
    default:
      body: '{"vip":false}'
"#;
        let server = MockServer::from_yaml(yaml).unwrap();

        let res = server
            .resolve(&MockRequest::new("GET", "/api/orders/VIP-7"))
            .unwrap();
        assert_eq!(res.matched_rule, MatchedRule::Rule(0));
        assert_eq!(res.response.body, br#"{"vip":true,"id":"VIP-7"}"#);

        let res = server
            .resolve(&MockRequest::new("GET", "/api/orders/1").with_query("tier=silver"))
            .unwrap();
        assert_eq!(res.matched_rule, MatchedRule::Rule(1));
        assert_eq!(res.response.status, 202);
        assert_eq!(res.response.body, br#"{"tier":"silver"}"#);

        let res = server
            .resolve(&MockRequest::new("GET", "/api/orders/1"))
            .unwrap();
        assert_eq!(res.matched_rule, MatchedRule::Default);
        assert_eq!(res.response.body, br#"{"vip":false}"#);
        assert!(res.transition.is_none());

        assert_eq!(server.total_requests(), 3);
        assert_eq!(server.total_matched(), 3);
    }

    #[test]
    fn test_response_file_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"name":"ada"}"#)
            .unwrap();

        let yaml = format!(
            "endpoints:\n  - path: /user\n    default:\n      response_file: \"{}\"\n",
            path.display()
        );
        let server = MockServer::from_yaml(&yaml).unwrap();
        let res = server.resolve(&MockRequest::new("GET", "/user")).unwrap();
        assert_eq!(res.response_file.as_deref(), Some(path.to_str().unwrap()));
        assert_eq!(res.response.body, br#"{"name":"ada"}"#);
    }

    #[tokio::test]
    async fn test_handle_not_found() {
        let server = MockServer::from_yaml(CHECKOUT_YAML).unwrap();
        let resp = server.handle(&MockRequest::new("GET", "/nope")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.content_type, "application/json");
        assert!(resp.matched_rule.is_none());

        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["path"], "/nope");

        assert_eq!(server.total_requests(), 1);
        assert_eq!(server.total_unmatched(), 1);
        assert_eq!(server.total_matched(), 0);
    }

    #[tokio::test]
    async fn test_handle_missing_file_is_500() {
        let yaml = r#"
error_handling:
  show_details: true
endpoints:
  - path: /broken
    default:
      response_file: /definitely/missing.json
"#;
        let server = MockServer::from_yaml(yaml).unwrap();
        let resp = server.handle(&MockRequest::new("GET", "/broken")).await;
        assert_eq!(resp.status, 500);

        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert!(json["error"]["details"]
            .as_str()
            .unwrap()
            .contains("/definitely/missing.json"));
    }

    #[tokio::test]
    async fn test_handle_hides_details_by_default() {
        let yaml = r#"
endpoints:
  - path: /broken
    default:
      response_file: /definitely/missing.json
"#;
        let server = MockServer::from_yaml(yaml).unwrap();
        let resp = server.handle(&MockRequest::new("GET", "/broken")).await;
        assert_eq!(resp.status, 500);
        let json: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert!(json["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_custom_not_found_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("404.json");
        std::fs::write(&path, r#"{"custom":true}"#).unwrap();

        let yaml = format!(
            "error_handling:\n  custom_error_responses:\n    404: \"{}\"\nendpoints: []\n",
            path.display()
        );
        let server = MockServer::from_yaml(&yaml).unwrap();
        let resp = server.handle(&MockRequest::new("GET", "/x")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(body_str(&resp), r#"{"custom":true}"#);
    }

    #[tokio::test]
    async fn test_handle_applies_delay() {
        let yaml = r#"
endpoints:
  - path: /slow
    default:
      body: ok
      content_type: text/plain
      delay_ms: 30
"#;
        let server = MockServer::from_yaml(yaml).unwrap();

        let start = Instant::now();
        let resp = server.handle(&MockRequest::new("GET", "/slow")).await;
        assert!(start.elapsed() >= Duration::from_millis(30));

        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "text/plain");
        assert_eq!(body_str(&resp), "ok");
        assert_eq!(resp.matched_rule, Some(MatchedRule::Default));
    }
}
