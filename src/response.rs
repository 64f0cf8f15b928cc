//! Response synthesis.
//!
//! Turns a [`ResponseSpec`] plus extracted selector values into the body,
//! status, headers and delay to send. The delay is returned, not slept.

use crate::config::{ResponseSpec, WeightedResponse};
use crate::error::MockError;
use crate::random::{RandomSource, ThreadRandom};
use crate::template::TemplateEngine;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Content type used when a spec sets none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// A fully built response, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltResponse {
    pub body: Vec<u8>,
    pub status: u16,
    /// Headers including `Content-Type`
    pub headers: HashMap<String, String>,
    /// Effective content type (the `Content-Type` header value)
    pub content_type: String,
    /// Delay the caller should apply before responding
    pub delay: Duration,
    /// File the body was read from, if any
    pub source_file: Option<String>,
}

/// Builds responses from response specifications.
pub struct ResponseBuilder {
    templates: TemplateEngine,
    rng: Arc<dyn RandomSource>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::with_random(Arc::new(ThreadRandom))
    }

    /// Builder whose weighted choices and template helpers draw from `rng`.
    pub fn with_random(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            templates: TemplateEngine::with_random(Arc::clone(&rng)),
            rng,
        }
    }

    /// Build a response.
    ///
    /// Fails only when the response file cannot be read.
    pub fn build(
        &self,
        spec: &ResponseSpec,
        values: &HashMap<String, String>,
    ) -> Result<BuiltResponse, MockError> {
        let mut file = spec.response_file.as_deref();
        let mut status = spec.status_code;
        let mut delay_ms = spec.delay_ms;

        if let Some(choice) = select_weighted(spec.weighted(), self.rng.as_ref()) {
            debug!(file = %choice.file, weight = choice.weight, "Selected weighted response");
            file = Some(choice.file.as_str());
            status = choice.status_code;
            delay_ms = choice.delay_ms;
        }

        let (body, source_file) = match (&spec.body, file) {
            (Some(inline), _) => (inline.clone().into_bytes(), None),
            (None, Some(path)) => {
                let content = std::fs::read(path).map_err(|source| MockError::ResponseFile {
                    path: PathBuf::from(path),
                    source,
                })?;
                (content, Some(path.to_string()))
            }
            (None, None) => (Vec::new(), None),
        };

        let engine = spec.template_engine();

        let body = match engine {
            Some(kind) if !body.is_empty() => match String::from_utf8(body) {
                Ok(text) => self.templates.render(kind, &text, values).into_bytes(),
                Err(e) => {
                    debug!("Response body is not UTF-8, skipping template");
                    e.into_bytes()
                }
            },
            _ => body,
        };

        let mut headers = HashMap::with_capacity(spec.headers.len() + 1);
        headers.insert(
            "Content-Type".to_string(),
            spec.content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        );

        for (name, value) in &spec.headers {
            let value = match engine {
                Some(kind) => self.templates.render(kind, value, values),
                None => value.clone(),
            };
            if name.eq_ignore_ascii_case("content-type") {
                headers.remove("Content-Type");
            }
            headers.insert(name.clone(), value);
        }

        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Ok(BuiltResponse {
            body,
            status: status.unwrap_or(200),
            headers,
            content_type,
            delay: Duration::from_millis(delay_ms),
            source_file,
        })
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick one candidate in proportion to its weight.
///
/// All-zero weights fall back to a uniform choice.
pub fn select_weighted<'a>(
    candidates: &'a [WeightedResponse],
    rng: &dyn RandomSource,
) -> Option<&'a WeightedResponse> {
    if candidates.is_empty() {
        return None;
    }

    let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
    if total == 0 {
        let idx = rng.below(candidates.len() as u64) as usize;
        return candidates.get(idx);
    }

    let draw = rng.below(total);
    let mut cumulative = 0u64;
    for candidate in candidates {
        cumulative += u64::from(candidate.weight);
        if draw < cumulative {
            return Some(candidate);
        }
    }

    candidates.first()
}
