use crate::context::Context;
use crate::middleware::{IntoMiddlewares, Middleware};
use crate::router::Params;

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub hsts: bool,
    pub xss_protection: bool,
    pub content_type_options: bool,
    pub frame_options: Option<String>,
    pub content_security_policy: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hsts: true,
            xss_protection: true,
            content_type_options: true,
            frame_options: Some("DENY".to_string()),
            content_security_policy: None,
        }
    }
}

/// After-hook middleware that stamps security headers on the response.
#[derive(Clone, Debug, Default)]
pub struct SecurityHeaders {
    config: SecurityConfig,
}

impl SecurityHeaders {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    fn apply(&self, ctx: &mut Context) {
        let config = &self.config;
        let response = &mut ctx.response;
        if config.hsts {
            response.header("Strict-Transport-Security", "max-age=31536000");
        }
        if config.xss_protection {
            response.header("X-XSS-Protection", "1; mode=block");
        }
        if config.content_type_options {
            response.header("X-Content-Type-Options", "nosniff");
        }
        if let Some(ref frame_options) = config.frame_options {
            response.header("X-Frame-Options", frame_options);
        }
        if let Some(ref content_security_policy) = config.content_security_policy {
            response.header("Content-Security-Policy", content_security_policy);
        }
    }
}

impl From<SecurityHeaders> for Middleware {
    fn from(headers: SecurityHeaders) -> Self {
        Middleware::after(move |ctx: &mut Context, _: &Params| headers.apply(ctx))
    }
}

impl IntoMiddlewares for SecurityHeaders {
    fn into_middlewares(self) -> Vec<Middleware> {
        vec![self.into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::http::Request;

    #[test]
    fn test_headers_added_after_handler() {
        let mut app = Application::new();
        app.route("/", |ctx: &mut Context, _: &Params| {
            ctx.response.write("home");
        })
        .unwrap()
        .add_middleware(SecurityHeaders::new(SecurityConfig {
            content_security_policy: Some("default-src 'self'".to_string()),
            ..SecurityConfig::default()
        }));

        let response = app.handle(Request::get("/")).unwrap();
        assert_eq!(response.body(), "home");
        assert_eq!(response.get_header("X-Frame-Options"), Some("DENY"));
        assert_eq!(response.get_header("X-Content-Type-Options"), Some("nosniff"));
        assert_eq!(
            response.get_header("Content-Security-Policy"),
            Some("default-src 'self'")
        );
    }
}
