//! Per-request settings and how client defaults combine with call overrides.

use std::time::Duration;

/// Settings applied to a single API call.
///
/// A client holds one set of defaults; each call may pass its own set, and the
/// two are combined with [`RequestOptions::merged_with`] right before the request
/// is issued. Neither side is mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub request_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a header, replacing an existing one with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Combine `self` (defaults) with `overrides`. Scalar settings from
    /// `overrides` win when present; headers are unioned, with override headers
    /// replacing defaults of the same name (case-insensitive).
    pub fn merged_with(&self, overrides: &RequestOptions) -> RequestOptions {
        let mut headers = self.headers.clone();
        for (k, v) in &overrides.headers {
            set_header(&mut headers, k.clone(), v.clone());
        }
        RequestOptions {
            base_url: overrides.base_url.clone().or_else(|| self.base_url.clone()),
            headers,
            timeout: overrides.timeout.or(self.timeout),
            request_id: overrides
                .request_id
                .clone()
                .or_else(|| self.request_id.clone()),
            idempotency_key: overrides
                .idempotency_key
                .clone()
                .or_else(|| self.idempotency_key.clone()),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        Some(slot) => *slot = (name, value),
        None => headers.push((name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_and_defaults_fill_gaps() {
        let defaults = RequestOptions::new()
            .base_url("https://api.example")
            .timeout(Duration::from_secs(30))
            .request_id("client-rid");
        let call = RequestOptions::new().timeout(Duration::from_secs(5));

        let merged = defaults.merged_with(&call);
        assert_eq!(merged.base_url.as_deref(), Some("https://api.example"));
        assert_eq!(merged.timeout, Some(Duration::from_secs(5)));
        assert_eq!(merged.request_id.as_deref(), Some("client-rid"));
        assert_eq!(merged.idempotency_key, None);
    }

    #[test]
    fn headers_replace_case_insensitively() {
        let defaults = RequestOptions::new()
            .header("x-model-api-key", "client-key")
            .header("x-language", "rust");
        let call = RequestOptions::new()
            .header("X-Model-Api-Key", "call-key")
            .header("x-extra", "1");

        let merged = defaults.merged_with(&call);
        assert_eq!(merged.headers.len(), 3);
        assert_eq!(merged.header_value("x-model-api-key"), Some("call-key"));
        assert_eq!(merged.header_value("X-LANGUAGE"), Some("rust"));
        assert_eq!(merged.header_value("x-extra"), Some("1"));
    }

    #[test]
    fn merge_leaves_inputs_untouched() {
        let defaults = RequestOptions::new().header("a", "1");
        let call = RequestOptions::new().header("a", "2");
        let _ = defaults.merged_with(&call);
        assert_eq!(defaults.header_value("a"), Some("1"));
        assert_eq!(call.header_value("a"), Some("2"));
    }

    #[test]
    fn builder_header_replaces_same_name() {
        let opts = RequestOptions::new().header("a", "1").header("A", "2");
        assert_eq!(opts.headers, vec![("A".to_string(), "2".to_string())]);
    }
}
