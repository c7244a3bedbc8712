use serde::Deserialize;

/// Engine settings.
///
/// Every field has a default, so a host may deserialize a partial document
/// from whatever format it keeps its settings in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Match route paths case-sensitively.
    pub case_sensitive: bool,
    /// Prefix applied to relative redirect targets.
    pub base_url: Option<String>,
    /// Catch errors raised by handlers and render them through `error`.
    pub handle_errors: bool,
    pub log_errors: bool,
    /// Emit `Content-Length` when a response is sent.
    pub content_length: bool,
    /// Query parameter carrying the JSONP callback name.
    pub jsonp_param: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            base_url: None,
            handle_errors: true,
            log_errors: false,
            content_length: true,
            jsonp_param: "jsonp".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{ "case_sensitive": true, "base_url": "/app" }"#)
            .unwrap();
        assert!(config.case_sensitive);
        assert_eq!(config.base_url.as_deref(), Some("/app"));
        assert!(config.handle_errors);
        assert_eq!(config.jsonp_param, "jsonp");
    }
}
