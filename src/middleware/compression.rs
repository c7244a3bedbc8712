use crate::context::Context;
use crate::middleware::{IntoMiddlewares, Middleware};
use crate::router::Params;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression as Level;
use std::io::Write;

#[derive(Clone, Debug)]
pub struct CompressionConfig {
    pub level: Level,
    pub min_size: usize,
    pub skip_types: Vec<String>,
}

impl CompressionConfig {
    fn should_compress(&self, content_type: Option<&str>, content_length: usize) -> bool {
        if content_length < self.min_size {
            return false;
        }

        match content_type {
            Some(ct) => !self.skip_types.iter().any(|skip| ct.starts_with(skip.as_str())),
            None => true,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: Level::default(),
            min_size: 1024,
            skip_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "application/pdf".to_string(),
                "application/zip".to_string(),
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
}

/// After-hook middleware that encodes the body with gzip or deflate when
/// the client accepts it. Encoding happens at send time, as a body
/// callback.
#[derive(Clone, Debug, Default)]
pub struct Compression {
    config: CompressionConfig,
}

impl Compression {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    fn apply(&self, ctx: &mut Context) {
        let accepted = match ctx.request.get_header("accept-encoding") {
            Some(accepted) => accepted.to_lowercase(),
            None => return,
        };
        let encoding = if accepts(&accepted, "gzip") {
            Encoding::Gzip
        } else if accepts(&accepted, "deflate") {
            Encoding::Deflate
        } else {
            return;
        };

        let response = &mut ctx.response;
        if response.get_header("Content-Encoding").is_some()
            || !self
                .config
                .should_compress(response.get_header("Content-Type"), response.body().len())
        {
            return;
        }

        let level = self.config.level;
        match encoding {
            Encoding::Gzip => {
                response.header("Content-Encoding", "gzip");
                response.add_body_callback(move |body| {
                    let mut encoder = GzEncoder::new(Vec::new(), level);
                    encoder.write_all(&body)?;
                    encoder.finish()
                });
            }
            Encoding::Deflate => {
                response.header("Content-Encoding", "deflate");
                response.add_body_callback(move |body| {
                    let mut encoder = DeflateEncoder::new(Vec::new(), level);
                    encoder.write_all(&body)?;
                    encoder.finish()
                });
            }
        }
        response.header("Vary", "Accept-Encoding");
    }
}

/// Whether an `Accept-Encoding` value allows `coding` with a non-zero
/// quality. An explicit entry wins over `*`.
fn accepts(accepted: &str, coding: &str) -> bool {
    let mut wildcard = None;
    for entry in accepted.split(',') {
        let mut parts = entry.split(';');
        let name = parts.next().unwrap_or_default().trim();
        let quality = parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);

        if name == coding {
            return quality > 0.0;
        }
        if name == "*" {
            wildcard = Some(quality > 0.0);
        }
    }
    wildcard.unwrap_or(false)
}

impl From<Compression> for Middleware {
    fn from(compression: Compression) -> Self {
        Middleware::after(move |ctx: &mut Context, _: &Params| compression.apply(ctx))
    }
}

impl IntoMiddlewares for Compression {
    fn into_middlewares(self) -> Vec<Middleware> {
        vec![self.into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::handler::Control;
    use crate::http::Request;
    use flate2::read::GzDecoder;
    use rstest::rstest;
    use std::io::Read;

    fn small() -> Compression {
        Compression::new(CompressionConfig {
            min_size: 4,
            ..CompressionConfig::default()
        })
    }

    fn app(body: &'static str) -> Application {
        let mut app = Application::new();
        app.route("/", move |ctx: &mut Context, _: &Params| {
            ctx.response.header("Content-Type", "text/plain").write(body);
        })
        .unwrap()
        .add_middleware(small());
        app
    }

    #[test]
    fn test_gzip_body_on_send() {
        let response = app("hello world")
            .handle(Request::get("/").with_header("Accept-Encoding", "gzip, deflate"))
            .unwrap();
        assert_eq!(response.get_header("Content-Encoding"), Some("gzip"));
        assert_eq!(response.body(), "hello world");

        let encoded = response.encoded_body().unwrap();
        let mut decoded = String::new();
        GzDecoder::new(&encoded[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello world");
    }

    #[test]
    fn test_small_or_unaccepted_bodies_untouched() {
        let response = app("hi").handle(Request::get("/").with_header("Accept-Encoding", "gzip")).unwrap();
        assert!(response.get_header("Content-Encoding").is_none());

        let response = app("hello world").handle(Request::get("/")).unwrap();
        assert!(response.get_header("Content-Encoding").is_none());
        assert_eq!(response.encoded_body().unwrap(), b"hello world");
    }

    #[rstest]
    #[case("gzip, deflate", Some("gzip"))]
    #[case("gzip;q=0, deflate", Some("deflate"))]
    #[case("gzip; q=0.0, deflate;q=0", None)]
    #[case("*", Some("gzip"))]
    #[case("*;q=0.5, gzip;q=0", Some("deflate"))]
    #[case("identity", None)]
    fn test_quality_values(#[case] accepted: &str, #[case] expected: Option<&str>) {
        let response = app("hello world")
            .handle(Request::get("/").with_header("Accept-Encoding", accepted))
            .unwrap();
        assert_eq!(response.get_header("Content-Encoding"), expected);
    }

    #[test]
    fn test_not_found_after_pass_is_sent_plain() {
        let mut app = Application::new();
        app.route("/", |ctx: &mut Context, _: &Params| {
            ctx.write("passing through");
            Control::Pass
        })
        .unwrap()
        .add_middleware(small());

        let response = app
            .handle(Request::get("/").with_header("Accept-Encoding", "gzip"))
            .unwrap();
        assert_eq!(response.status(), 404);
        assert!(response.get_header("Content-Encoding").is_none());
        assert_eq!(response.encoded_body().unwrap(), response.body().as_bytes());
    }

    #[test]
    fn test_halt_after_compression_is_sent_plain() {
        let mut app = Application::new();
        app.group_with(
            "/admin",
            Middleware::after(|ctx: &mut Context, _: &Params| ctx.halt(401, "denied")),
            |group| {
                group
                    .map("/panel", |ctx: &mut Context, _: &Params| {
                        ctx.write("secret panel contents");
                    }, None)?
                    .add_middleware(small());
                Ok(())
            },
        )
        .unwrap();

        let response = app
            .handle(Request::get("/admin/panel").with_header("Accept-Encoding", "gzip"))
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(response.get_header("Content-Encoding").is_none());
        assert_eq!(response.encoded_body().unwrap(), b"denied");
    }
}
