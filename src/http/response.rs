use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;

/// Transformation applied to the encoded body right before it is sent.
pub type BodyCallback = Arc<dyn Fn(Vec<u8>) -> io::Result<Vec<u8>> + Send + Sync>;

/// The outgoing response, mutated in place by handlers and middleware.
///
/// Header names keep the case they were set with; lookups ignore case.
#[derive(Clone)]
pub struct Response {
    status: u16,
    headers: IndexMap<String, String>,
    body: String,
    callbacks: Vec<BodyCallback>,
    /// Emit a `Content-Length` header on send.
    pub content_length: bool,
    pub(crate) omit_body: bool,
    sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("callbacks", &self.callbacks.len())
            .field("sent", &self.sent)
            .finish()
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: IndexMap::new(),
            body: String::new(),
            callbacks: Vec::new(),
            content_length: true,
            omit_body: false,
            sent: false,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) -> Result<&mut Self> {
        if reason_phrase(status).is_none() {
            return Err(Error::InvalidStatus(status));
        }
        self.status = status;
        Ok(self)
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.remove_header(name.as_ref());
        self.headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self
    }

    /// Appends to the body.
    pub fn write<T: AsRef<str>>(&mut self, content: T) -> &mut Self {
        self.body.push_str(content.as_ref());
        self
    }

    /// Replaces the body.
    pub fn write_replace<T: AsRef<str>>(&mut self, content: T) -> &mut Self {
        self.body = content.as_ref().to_string();
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Resets status, headers, body and body callbacks.
    pub fn clear(&mut self) -> &mut Self {
        self.status = 200;
        self.headers.clear();
        self.body.clear();
        self.callbacks.clear();
        self
    }

    /// Sets caching headers. `None` disables caching altogether.
    pub fn cache(&mut self, expires: Option<SystemTime>) -> &mut Self {
        match expires {
            None => {
                self.header("Expires", "Mon, 26 Jul 1997 05:00:00 GMT")
                    .header(
                        "Cache-Control",
                        "no-store, no-cache, must-revalidate, post-check=0, pre-check=0, max-age=0",
                    )
                    .header("Pragma", "no-cache");
            }
            Some(expires) => {
                let max_age = expires
                    .duration_since(SystemTime::now())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                self.header("Expires", httpdate::fmt_http_date(expires))
                    .header("Cache-Control", format!("max-age={}", max_age))
                    .remove_header("Pragma");
            }
        }
        self
    }

    pub fn add_body_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Vec<u8>) -> io::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// The body as it will go on the wire, after every body callback.
    pub fn encoded_body(&self) -> io::Result<Vec<u8>> {
        self.callbacks
            .iter()
            .try_fold(self.body.as_bytes().to_vec(), |body, callback| callback(body))
    }

    pub fn sent(&self) -> bool {
        self.sent
    }

    /// Writes status line, headers and body. A response is sent at most once.
    pub fn send<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.sent {
            return Ok(());
        }

        // HEAD keeps the length the body would have had.
        let body = self.encoded_body()?;

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status).unwrap_or("Unknown")
        );
        for (name, value) in &self.headers {
            head += &format!("{}: {}\r\n", name, value);
        }
        if self.content_length && self.get_header("Content-Length").is_none() {
            head += &format!("Content-Length: {}\r\n", body.len());
        }
        head += "\r\n";

        out.write_all(head.as_bytes())?;
        if !self.omit_body {
            out.write_all(&body)?;
        }
        out.flush()?;
        self.sent = true;
        Ok(())
    }
}

pub fn reason_phrase(status: u16) -> Option<&'static str> {
    let phrase = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => return None,
    };
    Some(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_is_validated() {
        let mut response = Response::default();
        assert_eq!(response.status(), 200);
        assert!(matches!(response.set_status(999), Err(Error::InvalidStatus(999))));
        assert_eq!(response.status(), 200);
        response.set_status(404).unwrap();
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut response = Response::default();
        response.header("CoNtEnT-tYpE", "text/html");
        assert_eq!(response.get_header("content-type"), Some("text/html"));

        response.header("content-type", "text/plain");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers().get("content-type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_write_and_clear() {
        let mut response = Response::default();
        response.write("test").write(" more");
        assert_eq!(response.body(), "test more");
        response.write_replace("new");
        assert_eq!(response.body(), "new");

        response.set_status(404).unwrap();
        response.header("X-Test", "1");
        response.add_body_callback(|body| Ok(body.to_ascii_uppercase()));
        response.clear();
        assert_eq!(response.body(), "");
        assert_eq!(response.status(), 200);
        assert!(response.headers().is_empty());

        response.write("plain");
        assert_eq!(response.encoded_body().unwrap(), b"plain");
    }

    #[test]
    fn test_omitted_body_keeps_length() {
        let mut response = Response::default();
        response.omit_body = true;
        response.write("hello");
        response.add_body_callback(|mut body| {
            body.extend_from_slice(b"!!");
            Ok(body)
        });

        let mut out = Vec::new();
        response.send(&mut out).unwrap();
        let raw = String::from_utf8(out).unwrap();
        assert!(raw.contains("Content-Length: 7\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_cache_disabled() {
        let mut response = Response::default();
        response.cache(None);
        assert_eq!(response.get_header("Pragma"), Some("no-cache"));
        assert_eq!(response.get_header("Expires"), Some("Mon, 26 Jul 1997 05:00:00 GMT"));
    }

    #[test]
    fn test_cache_until_removes_pragma() {
        let mut response = Response::default();
        response.header("Pragma", "no-cache");
        response.cache(Some(SystemTime::now() + Duration::from_secs(3600)));
        assert!(response.get_header("Pragma").is_none());
        let control = response.get_header("Cache-Control").unwrap();
        assert!(control.starts_with("max-age="));
    }

    #[test]
    fn test_body_callbacks_apply_in_order_on_send() {
        let mut response = Response::default();
        response.write("test");
        response.add_body_callback(|body| Ok(body.to_ascii_uppercase()));
        response.add_body_callback(|mut body| {
            body.extend_from_slice(b"!");
            Ok(body)
        });

        let mut out = Vec::new();
        response.send(&mut out).unwrap();
        let raw = String::from_utf8(out).unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Length: 5\r\n"));
        assert!(raw.ends_with("\r\n\r\nTEST!"));
        assert!(response.sent());
        // body kept as written
        assert_eq!(response.body(), "test");
    }

    #[test]
    fn test_send_happens_once() {
        let mut response = Response::default();
        response.write("once");
        let mut first = Vec::new();
        response.send(&mut first).unwrap();
        let mut second = Vec::new();
        response.send(&mut second).unwrap();
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }
}
