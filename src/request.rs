//! Inbound request view handed to the resolver by the transport layer.

use std::collections::HashMap;

/// Request data the resolution pipeline reads from.
///
/// The transport owns the real request; this is the subset the pipeline
/// needs. The body is held as bytes so it can be read any number of times.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Raw query string (without `?`)
    pub query_string: Option<String>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
    /// Path parameters already extracted by the transport's router
    pub path_params: HashMap<String, String>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed query parameters.
    pub fn query_params(&self) -> HashMap<String, String> {
        parse_query_string(self.query_string.as_deref().unwrap_or(""))
    }
}

/// Parse a query string into key-value pairs.
///
/// When a key repeats, the first value is kept.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(urlencoding_decode(key))
            .or_insert_with(|| urlencoding_decode(value));
    }

    params
}

/// Percent-decoding with `+` as space. Invalid escapes are kept verbatim.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));

        let params = parse_query_string("name=John%20Doe&city=New+York");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("city"), Some(&"New York".to_string()));
    }

    #[test]
    fn test_first_value_wins_and_flags() {
        let params = parse_query_string("a=1&a=2&flag");
        assert_eq!(params.get("a"), Some(&"1".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_decode_utf8_and_bad_escapes() {
        let params = parse_query_string("q=caf%C3%A9&bad=100%&odd=%zz");
        assert_eq!(params.get("q"), Some(&"café".to_string()));
        assert_eq!(params.get("bad"), Some(&"100%".to_string()));
        assert_eq!(params.get("odd"), Some(&"%zz".to_string()));
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let req = MockRequest::new("GET", "/").with_header("X-Session-ID", "abc");
        assert_eq!(req.header("x-session-id"), Some("abc"));
        assert_eq!(req.header("x-other"), None);
    }
}
