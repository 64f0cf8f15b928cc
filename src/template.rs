//! Template engines for dynamic responses.
//!
//! Two engines are available:
//!
//! - **simple**: literal replacement of `{{.name}}` placeholders.
//! - **go**: Handlebars with helper functions. Go-style leading-dot
//!   references (`{{.name}}`, `{{upper .name}}`) are accepted. Any parse or
//!   render error falls back to the simple engine on the same input.
//!
//! Handlebars syntax applies in the go engine. Go pipelines and
//! `{{if}}...{{end}}` blocks do not compile and fall back; use
//! `{{upper .name}}` and `{{#if (eq .tier "gold")}}...{{/if}}` instead. A leading-dot
//! reference always reads data, so `{{.uuid}}` is the built-in value while
//! `{{uuid}}` calls the helper.
//!
//! Both engines expose the selector values plus three built-ins:
//! `timestamp` (RFC 3339), `uuid`, and `request_id` (first UUID segment).
//!
//! # Helpers (go engine)
//!
//! `randomInt min max`, `randomFloat min max`, `randomChoice a b ...`,
//! `timestampMs`, `timestamp`, `uuid`, `base64Encode s`, `jsonEscape s`,
//! `add`, `sub`, `mul`, `div`, `mod`, `env NAME`, `upper`, `lower`, `trim`,
//! `replace s from to`, `sprintf fmt args...` (alias `printf`).

use crate::config::TemplateEngineKind;
use crate::random::{RandomSource, ThreadRandom};
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use handlebars::{Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, ScopedJson};
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static MUSTACHE_REGEX: OnceLock<Regex> = OnceLock::new();
static DOT_PATH_REGEX: OnceLock<Regex> = OnceLock::new();
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn mustache_regex() -> &'static Regex {
    MUSTACHE_REGEX.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").unwrap())
}

fn dot_path_regex() -> &'static Regex {
    // String literals are matched first so their contents are skipped
    DOT_PATH_REGEX.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|(^|[\s({~#=])\.([A-Za-z_][A-Za-z0-9_]*)"#).unwrap()
    })
}

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\{\{\.([^}]+)\}\}").unwrap())
}

/// Built-in variables, generated fresh for every render.
struct Builtins {
    timestamp: String,
    uuid: String,
    request_id: String,
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    rng: Arc<dyn RandomSource>,
}

impl TemplateEngine {
    /// Create a new template engine using thread-local randomness.
    pub fn new() -> Self {
        Self::with_random(Arc::new(ThreadRandom))
    }

    /// Create a template engine drawing randomness from `rng`.
    pub fn with_random(rng: Arc<dyn RandomSource>) -> Self {
        let mut handlebars = Handlebars::new();

        for (name, kind) in HELPERS {
            handlebars.register_helper(
                name,
                Box::new(BuiltinHelper {
                    kind: *kind,
                    rng: Arc::clone(&rng),
                }),
            );
        }

        // Responses are JSON/text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars, rng }
    }

    /// Render `content` with the selected engine. Never fails.
    pub fn render(
        &self,
        engine: TemplateEngineKind,
        content: &str,
        values: &HashMap<String, String>,
    ) -> String {
        match engine {
            TemplateEngineKind::Simple => self.render_simple(content, values),
            TemplateEngineKind::Go => match self.render_handlebars(content, values) {
                Ok(rendered) => rendered,
                Err(e) => {
                    debug!(error = %e, "Template render failed, using simple substitution");
                    self.render_simple(content, values)
                }
            },
        }
    }

    /// Literal `{{.name}}` substitution.
    pub fn render_simple(&self, content: &str, values: &HashMap<String, String>) -> String {
        let builtins = self.builtins();

        let mut result = content
            .replace("{{.timestamp}}", &builtins.timestamp)
            .replace("{{.uuid}}", &builtins.uuid)
            .replace("{{.request_id}}", &builtins.request_id);

        for (name, value) in values {
            result = result.replace(&format!("{{{{.{}}}}}", name), value);
        }

        result
    }

    /// Full Handlebars rendering; errors are returned, not masked.
    pub fn render_handlebars(
        &self,
        content: &str,
        values: &HashMap<String, String>,
    ) -> Result<String, RenderError> {
        let builtins = self.builtins();

        let mut data = serde_json::Map::new();
        data.insert("timestamp".into(), builtins.timestamp.into());
        data.insert("uuid".into(), builtins.uuid.into());
        data.insert("request_id".into(), builtins.request_id.into());
        for (name, value) in values {
            data.insert(name.clone(), JsonValue::String(value.clone()));
        }

        let source = rewrite_dot_paths(content);
        self.handlebars
            .render_template(&source, &JsonValue::Object(data))
    }

    fn builtins(&self) -> Builtins {
        let uuid = self.rng.uuid().to_string();
        let request_id = uuid.split('-').next().unwrap_or_default().to_string();
        Builtins {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            uuid,
            request_id,
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct `{{.name}}` placeholder names, in order of first appearance.
pub fn placeholders(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(content) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Turn Go-style `.name` references inside mustaches into `this.name`
/// paths, which Handlebars never resolves as helpers.
fn rewrite_dot_paths(content: &str) -> Cow<'_, str> {
    mustache_regex().replace_all(content, |caps: &Captures| {
        let inner = dot_path_regex().replace_all(&caps[1], |c: &Captures| match c.get(2) {
            Some(name) => format!("{}this.{}", &c[1], name.as_str()),
            None => c[0].to_string(),
        });
        format!("{{{{{}}}}}", inner)
    })
}

// Helpers

#[derive(Debug, Clone, Copy)]
enum HelperKind {
    RandomInt,
    RandomFloat,
    RandomChoice,
    TimestampMs,
    Timestamp,
    Uuid,
    Base64Encode,
    JsonEscape,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Env,
    Upper,
    Lower,
    Trim,
    Replace,
    Sprintf,
}

const HELPERS: &[(&str, HelperKind)] = &[
    ("randomInt", HelperKind::RandomInt),
    ("randomFloat", HelperKind::RandomFloat),
    ("randomChoice", HelperKind::RandomChoice),
    ("timestampMs", HelperKind::TimestampMs),
    ("timestamp", HelperKind::Timestamp),
    ("uuid", HelperKind::Uuid),
    ("base64Encode", HelperKind::Base64Encode),
    ("jsonEscape", HelperKind::JsonEscape),
    ("add", HelperKind::Add),
    ("sub", HelperKind::Sub),
    ("mul", HelperKind::Mul),
    ("div", HelperKind::Div),
    ("mod", HelperKind::Mod),
    ("env", HelperKind::Env),
    ("upper", HelperKind::Upper),
    ("lower", HelperKind::Lower),
    ("trim", HelperKind::Trim),
    ("replace", HelperKind::Replace),
    ("sprintf", HelperKind::Sprintf),
    ("printf", HelperKind::Sprintf),
];

struct BuiltinHelper {
    kind: HelperKind,
    rng: Arc<dyn RandomSource>,
}

impl HelperDef for BuiltinHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let value = match self.kind {
            HelperKind::RandomInt => {
                let min = param_i64(h, 0).unwrap_or(0);
                let max = param_i64(h, 1).unwrap_or(100);
                JsonValue::from(self.random_int(min, max))
            }
            HelperKind::RandomFloat => {
                let min = param_f64(h, 0).unwrap_or(0.0);
                let max = param_f64(h, 1).unwrap_or(1.0);
                let value = if max <= min {
                    min
                } else {
                    min + self.rng.unit_f64() * (max - min)
                };
                JsonValue::from(value)
            }
            HelperKind::RandomChoice => {
                let items: Vec<String> = h.params().iter().map(|p| json_to_string(p.value())).collect();
                if items.is_empty() {
                    JsonValue::from("")
                } else {
                    let idx = self.rng.below(items.len() as u64) as usize;
                    JsonValue::from(items[idx].clone())
                }
            }
            HelperKind::TimestampMs => JsonValue::from(Utc::now().timestamp_millis()),
            HelperKind::Timestamp => {
                JsonValue::from(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            HelperKind::Uuid => JsonValue::from(self.rng.uuid().to_string()),
            HelperKind::Base64Encode => JsonValue::from(
                base64::engine::general_purpose::STANDARD.encode(param_str(h, 0)),
            ),
            HelperKind::JsonEscape => JsonValue::from(json_escape(&param_str(h, 0))),
            HelperKind::Add => arithmetic(h, i64::wrapping_add),
            HelperKind::Sub => arithmetic(h, i64::wrapping_sub),
            HelperKind::Mul => arithmetic(h, i64::wrapping_mul),
            HelperKind::Div => arithmetic(h, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
            HelperKind::Mod => arithmetic(h, |a, b| if b == 0 { 0 } else { a.wrapping_rem(b) }),
            HelperKind::Env => JsonValue::from(std::env::var(param_str(h, 0)).unwrap_or_default()),
            HelperKind::Upper => JsonValue::from(param_str(h, 0).to_uppercase()),
            HelperKind::Lower => JsonValue::from(param_str(h, 0).to_lowercase()),
            HelperKind::Trim => JsonValue::from(param_str(h, 0).trim().to_string()),
            HelperKind::Replace => {
                JsonValue::from(param_str(h, 0).replace(&param_str(h, 1), &param_str(h, 2)))
            }
            HelperKind::Sprintf => {
                let args: Vec<&JsonValue> = h.params().iter().skip(1).map(|p| p.value()).collect();
                JsonValue::from(sprintf(&param_str(h, 0), &args))
            }
        };
        Ok(ScopedJson::Derived(value))
    }
}

impl BuiltinHelper {
    /// Uniform in `[min, max)`; `min` when the range is empty.
    fn random_int(&self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (i128::from(max) - i128::from(min)) as u64;
        (i128::from(min) + i128::from(self.rng.below(span))) as i64
    }
}

fn arithmetic(h: &Helper<'_>, op: impl Fn(i64, i64) -> i64) -> JsonValue {
    let a = param_i64(h, 0).unwrap_or(0);
    let b = param_i64(h, 1).unwrap_or(0);
    JsonValue::from(op(a, b))
}

fn param_str(h: &Helper<'_>, idx: usize) -> String {
    h.param(idx).map(|p| json_to_string(p.value())).unwrap_or_default()
}

fn param_i64(h: &Helper<'_>, idx: usize) -> Option<i64> {
    h.param(idx).and_then(|p| json_to_i64(p.value()))
}

fn param_f64(h: &Helper<'_>, idx: usize) -> Option<f64> {
    h.param(idx).and_then(|p| json_to_f64(p.value()))
}

fn json_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers and numeric strings; selector values always arrive as strings.
fn json_to_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_to_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JSON string escaping without the surrounding quotes.
fn json_escape(s: &str) -> String {
    let quoted = serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s));
    quoted[1..quoted.len() - 1].to_string()
}

/// Printf subset: flags `-`, `+`, `0`, a width, `.N` precision and the
/// verbs `%s %v %d %f %x %X %q %t %%`.
fn sprintf(format: &str, args: &[&JsonValue]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }

        let mut spec = FormatSpec::default();
        while let Some(flag) = chars.peek().copied() {
            match flag {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = take_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(take_number(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };

        let formatted = match verb {
            's' | 'v' => Some(json_to_string(arg)),
            'd' => json_to_i64(arg).map(|n| spec.signed(n.to_string(), n >= 0)),
            'f' => json_to_f64(arg).map(|f| {
                spec.signed(format!("{:.*}", spec.precision.unwrap_or(6), f), f >= 0.0)
            }),
            'x' | 'X' => Some(hex(arg, verb == 'X')),
            'q' => Some(serde_json::to_string(&json_to_string(arg)).unwrap_or_default()),
            't' => json_to_bool(arg).map(|b| b.to_string()),
            _ => None,
        };

        match formatted {
            Some(text) => out.push_str(&spec.pad(text, matches!(verb, 'd' | 'f' | 'x' | 'X'))),
            None => out.push_str(&format!("%!{}({})", verb, json_to_string(arg))),
        }
    }

    out
}

#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    plus: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl FormatSpec {
    fn signed(&self, text: String, non_negative: bool) -> String {
        if self.plus && non_negative {
            format!("+{}", text)
        } else {
            text
        }
    }

    /// Pad to the width; zero padding goes after the sign and only for numbers.
    fn pad(&self, text: String, numeric: bool) -> String {
        let len = text.chars().count();
        let Some(width) = self.width.filter(|w| *w > len) else {
            return text;
        };
        let fill = width - len;

        if self.left {
            format!("{}{}", text, " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match text.strip_prefix(['-', '+']) {
                Some(rest) => text.split_at(text.len() - rest.len()),
                None => ("", text.as_str()),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), text)
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
        digits.push(*d);
        chars.next();
    }
    digits.parse().ok()
}

/// Numbers print as hex integers, everything else hex-encodes its bytes.
fn hex(value: &JsonValue, upper: bool) -> String {
    let text = match value {
        JsonValue::Number(_) => match json_to_i64(value) {
            Some(n) if n < 0 => format!("-{:x}", n.unsigned_abs()),
            Some(n) => format!("{:x}", n),
            None => String::new(),
        },
        other => json_to_string(other)
            .bytes()
            .map(|b| format!("{:02x}", b))
            .collect(),
    };
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

fn json_to_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
