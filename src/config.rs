//! Configuration for the mock server.
//!
//! Defines endpoints, selectors, rules, response specifications and
//! server-wide settings. Everything here is plain data loaded from YAML;
//! the resolution pipeline never parses YAML itself.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Error page handling
    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// Endpoint definitions, matched in order
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Only structural problems that make an endpoint unusable are errors.
    /// Everything else is reported by [`MockServerConfig::warnings`].
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| anyhow::anyhow!("Endpoint {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Collect non-fatal configuration warnings.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (i, ep) in self.endpoints.iter().enumerate() {
            if ep.method.trim().is_empty() {
                warnings.push(format!("endpoint[{}]: method is empty", i));
            }

            let mut names = HashSet::new();
            for (j, sel) in ep.selectors.iter().enumerate() {
                if sel.name.is_empty() {
                    warnings.push(format!("endpoint[{}].selector[{}]: name is empty", i, j));
                }
                names.insert(sel.name.as_str());
                if let SourceType::Unknown(raw) = &sel.source {
                    warnings.push(format!(
                        "endpoint[{}].selector[{}]: invalid type '{}'",
                        i, j, raw
                    ));
                }
            }

            if let Some(key) = &ep.scenario_key {
                if !names.contains(key.as_str()) {
                    warnings.push(format!(
                        "endpoint[{}]: scenario_key '{}' does not name a selector",
                        i, key
                    ));
                }
            }

            for (j, rule) in ep.rules.iter().enumerate() {
                let grouped = rule.condition_groups.iter().flat_map(|g| g.conditions.iter());
                for (k, cond) in rule.conditions.iter().chain(grouped).enumerate() {
                    let at = format!("endpoint[{}].rule[{}].condition[{}]", i, j, k);
                    if !names.contains(cond.selector.as_str()) {
                        warnings.push(format!("{}: unknown selector '{}'", at, cond.selector));
                    }
                    if !cond.match_type.is_validated() {
                        warnings.push(format!(
                            "{}: invalid match_type '{}'",
                            at, cond.match_type
                        ));
                    }
                    if cond.match_type == MatchType::Regex {
                        if let Err(e) = regex::Regex::new(&cond.value) {
                            warnings.push(format!(
                                "{}: invalid regex '{}': {}",
                                at, cond.value, e
                            ));
                        }
                    }
                }
                if ep.scenario.is_none()
                    && (!rule.scenario_step.is_empty() || rule.next_step.is_some())
                {
                    warnings.push(format!(
                        "endpoint[{}].rule[{}]: scenario step set but endpoint has no scenario",
                        i, j
                    ));
                }
                rule.response
                    .missing_files(&format!("endpoint[{}].rule[{}]", i, j), &mut warnings);
            }

            ep.default
                .missing_files(&format!("endpoint[{}].default", i), &mut warnings);
        }

        let mut codes: Vec<_> = self.error_handling.custom_error_responses.iter().collect();
        codes.sort();
        for (code, file) in codes {
            if !Path::new(file).exists() {
                warnings.push(format!(
                    "error_handling.custom_error_responses[{}]: file not found: {}",
                    code, file
                ));
            }
        }

        warnings
    }
}

/// A mock endpoint: a route plus the rules deciding its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// Path pattern (`/users/:id`, `/files/*path`)
    pub path: String,

    /// HTTP method, or `ANY`
    #[serde(default = "default_method")]
    pub method: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Value extractors referenced by rule conditions
    #[serde(default)]
    pub selectors: Vec<SelectorDef>,

    /// Ordered rules; the first satisfied rule wins
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Response when no rule matches
    #[serde(default)]
    pub default: ResponseSpec,

    /// Scenario name for stateful endpoints
    #[serde(default)]
    pub scenario: Option<String>,

    /// Selector whose value partitions the scenario state
    #[serde(default)]
    pub scenario_key: Option<String>,
}

fn default_method() -> String {
    "ANY".to_string()
}

impl Endpoint {
    /// Validate the endpoint definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.is_empty() {
            anyhow::bail!("path cannot be empty");
        }

        let mut seen = HashSet::new();
        for sel in &self.selectors {
            if !seen.insert(sel.name.as_str()) {
                anyhow::bail!("duplicate selector name '{}'", sel.name);
            }
        }

        for (i, rule) in self.rules.iter().enumerate() {
            rule.response
                .validate()
                .map_err(|e| anyhow::anyhow!("rule {}: {}", i, e))?;
        }
        self.default
            .validate()
            .map_err(|e| anyhow::anyhow!("default: {}", e))?;
        Ok(())
    }

    /// Whether the endpoint accepts the given request method.
    pub fn accepts_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case("ANY") || self.method.eq_ignore_ascii_case(method)
    }
}

/// Named extractor pulling one comparable value out of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorDef {
    /// Name referenced by conditions
    pub name: String,

    /// Where the value comes from
    #[serde(rename = "type")]
    pub source: SourceType,

    /// JSON path, header name, query key or path parameter
    #[serde(default)]
    pub key: String,
}

/// Request part a selector reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Body,
    Header,
    Query,
    Path,
    /// Unrecognised type; always extracts the empty string
    Unknown(String),
}

impl SourceType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "body" => SourceType::Body,
            "header" => SourceType::Header,
            "query" => SourceType::Query,
            "path" => SourceType::Path,
            _ => SourceType::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Body => "body",
            SourceType::Header => "header",
            SourceType::Query => "query",
            SourceType::Path => "path",
            SourceType::Unknown(raw) => raw,
        }
    }
}

impl From<String> for SourceType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<SourceType> for String {
    fn from(source: SourceType) -> Self {
        source.as_str().to_string()
    }
}

/// A single test of one extracted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Selector name whose value is tested
    pub selector: String,

    /// How the value is compared
    #[serde(default)]
    pub match_type: MatchType,

    /// Literal to compare against
    #[serde(default)]
    pub value: String,
}

/// Comparison performed by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    #[default]
    Exact,
    Prefix,
    Suffix,
    Contains,
    Regex,
    /// Numeric interval such as `[1, 100)`
    Range,
    /// Unrecognised type; evaluated as exact equality
    Unknown(String),
}

impl MatchType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "exact" => MatchType::Exact,
            "prefix" => MatchType::Prefix,
            "suffix" => MatchType::Suffix,
            "contains" => MatchType::Contains,
            "regex" => MatchType::Regex,
            "range" => MatchType::Range,
            _ => MatchType::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Prefix => "prefix",
            MatchType::Suffix => "suffix",
            MatchType::Contains => "contains",
            MatchType::Regex => "regex",
            MatchType::Range => "range",
            MatchType::Unknown(raw) => raw,
        }
    }

    /// Whether the config validator accepts this match type.
    ///
    /// `contains` is evaluated at request time but is not on the validated
    /// list, so configs using it load with a warning.
    pub fn is_validated(&self) -> bool {
        matches!(
            self,
            MatchType::Exact
                | MatchType::Prefix
                | MatchType::Suffix
                | MatchType::Regex
                | MatchType::Range
        )
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MatchType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<MatchType> for String {
    fn from(match_type: MatchType) -> Self {
        match_type.as_str().to_string()
    }
}

/// How a list of conditions is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl From<String> for Logic {
    fn from(raw: String) -> Self {
        if raw.eq_ignore_ascii_case("or") {
            Logic::Or
        } else {
            Logic::And
        }
    }
}

impl From<Logic> for String {
    fn from(logic: Logic) -> Self {
        match logic {
            Logic::And => "and".to_string(),
            Logic::Or => "or".to_string(),
        }
    }
}

/// Nested conditions with their own logic, ANDed with the rule's conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: Logic,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A condition set plus the response to emit when it holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Logic applied to `conditions`
    #[serde(default)]
    pub condition_logic: Logic,

    /// Direct conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Nested groups, each of which must hold
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,

    /// Step filter: empty = always, `any` = every step, otherwise exact step
    #[serde(default)]
    pub scenario_step: String,

    /// Step to move to after this rule matches
    #[serde(default)]
    pub next_step: Option<String>,

    /// Response to return
    #[serde(default)]
    pub response: ResponseSpec,
}

/// Response specification shared by rules and endpoint defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseSpec {
    /// File holding the response body
    #[serde(default)]
    pub response_file: Option<String>,

    /// Inline body; wins over `response_file`
    #[serde(default)]
    pub body: Option<String>,

    /// HTTP status code (200 when unset)
    #[serde(default)]
    pub status_code: Option<u16>,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Content type (`application/json` when unset)
    #[serde(default)]
    pub content_type: Option<String>,

    /// Artificial delay in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Template settings
    #[serde(default)]
    pub template: Option<TemplateConfig>,

    /// Weighted random choice among response files
    #[serde(default)]
    pub random_responses: Option<RandomResponses>,
}

impl ResponseSpec {
    /// Validate the response specification.
    pub fn validate(&self) -> anyhow::Result<()> {
        let statuses = self
            .status_code
            .into_iter()
            .chain(self.weighted().iter().filter_map(|w| w.status_code));
        for status in statuses {
            if !(100..=599).contains(&status) {
                anyhow::bail!("Invalid status code: {}", status);
            }
        }
        Ok(())
    }

    /// Weighted candidates, if random responses are enabled.
    pub fn weighted(&self) -> &[WeightedResponse] {
        match &self.random_responses {
            Some(rr) if rr.enabled => &rr.files,
            _ => &[],
        }
    }

    /// Template engine to run, if templating is enabled.
    pub fn template_engine(&self) -> Option<TemplateEngineKind> {
        self.template
            .as_ref()
            .filter(|t| t.enabled)
            .map(|t| t.engine)
    }

    fn missing_files(&self, at: &str, warnings: &mut Vec<String>) {
        if let Some(file) = &self.response_file {
            if !Path::new(file).exists() {
                warnings.push(format!("{}: response_file not found: {}", at, file));
            }
        }
        for (i, w) in self.weighted().iter().enumerate() {
            if !Path::new(&w.file).exists() {
                warnings.push(format!(
                    "{}.random_responses[{}]: file not found: {}",
                    at, i, w.file
                ));
            }
        }
    }
}

/// Template settings for a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub engine: TemplateEngineKind,
}

/// Template engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TemplateEngineKind {
    /// Literal `{{.name}}` substitution
    #[default]
    Simple,
    /// Handlebars with helper functions, falling back to `Simple`
    Go,
}

impl From<String> for TemplateEngineKind {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "go" | "handlebars" => TemplateEngineKind::Go,
            _ => TemplateEngineKind::Simple,
        }
    }
}

impl From<TemplateEngineKind> for String {
    fn from(kind: TemplateEngineKind) -> Self {
        match kind {
            TemplateEngineKind::Simple => "simple".to_string(),
            TemplateEngineKind::Go => "go".to_string(),
        }
    }
}

/// Weighted random response list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomResponses {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub files: Vec<WeightedResponse>,
}

/// One candidate in a weighted random list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightedResponse {
    pub file: String,

    #[serde(default)]
    pub weight: u32,

    #[serde(default)]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub delay_ms: u64,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched rules
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests with no endpoint
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Error response settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandling {
    /// Include error details in 500 bodies
    #[serde(default)]
    pub show_details: bool,

    /// Status code to body file overrides (404, 500)
    #[serde(default)]
    pub custom_error_responses: HashMap<u16, String>,
}
