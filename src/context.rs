//! The per-request context handed to handlers, middleware hooks and
//! dispatched operations.

use crate::app::Services;
use crate::config::Config;
use crate::dispatcher::{Args, Output};
use crate::error::{Error, Result};
use crate::http::{Method, Request, Response};
use crate::router::{Params, Route, Router};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct Matched {
    pub(crate) index: usize,
    pub(crate) params: Params,
    pub(crate) pass_route: bool,
}

/// Owns the request and response for the duration of one dispatch, and
/// a snapshot of the engine's registries taken when the request began.
pub struct Context {
    pub(crate) services: Arc<Services>,
    pub request: Request,
    pub response: Response,
    pub(crate) matched: Option<Matched>,
    pub(crate) halted: bool,
}

impl Context {
    pub(crate) fn new(services: Arc<Services>, request: Request) -> Self {
        let mut response = Response::default();
        response.content_length = services.config.content_length;
        response.omit_body = request.get_method() == Method::HEAD;

        Self {
            services,
            request,
            response,
            matched: None,
            halted: false,
        }
    }

    pub(crate) fn enter(&mut self, index: usize, params: Params, pass_route: bool) {
        self.matched = Some(Matched {
            index,
            params,
            pass_route,
        });
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn router(&self) -> &Router {
        &self.services.router
    }

    /// Parameters of the route currently being dispatched.
    pub fn params(&self) -> Option<&Params> {
        self.matched.as_ref().map(|m| &m.params)
    }

    /// The matched route, exposed only to routes registered with
    /// `pass_route`.
    pub fn route(&self) -> Option<&Route> {
        let matched = self.matched.as_ref().filter(|m| m.pass_route)?;
        self.services.router.routes().get(matched.index)
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.services.vars.get(key)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Dispatches `name` through the engine's dispatcher.
    pub fn call(&mut self, name: &str, args: Args) -> Result<Output> {
        let services = Arc::clone(&self.services);
        services.dispatcher.invoke(self, name, args)
    }

    /// Fetches the shared instance registered under `name`.
    pub fn instance<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Arc<T>> {
        let services = Arc::clone(&self.services);
        services.dispatcher.instance(self, name)
    }

    pub fn write<T: AsRef<str>>(&mut self, content: T) -> &mut Self {
        self.response.write(content);
        self
    }

    /// Replaces the response with `message` under `code` and stops routing.
    pub fn halt(&mut self, code: u16, message: &str) -> Result<()> {
        self.call("halt", vec![json!(code), json!(message)]).map(drop)
    }

    /// Stops routing, keeping whatever has been written.
    pub fn stop(&mut self, code: Option<u16>) -> Result<()> {
        self.call("stop", vec![json!(code)]).map(drop)
    }

    pub fn not_found(&mut self) -> Result<()> {
        self.call("notFound", Args::new()).map(drop)
    }

    pub fn error(&mut self, error: &Error) -> Result<()> {
        self.call("error", vec![json!(error.to_string()), json!(error.status_code())])
            .map(drop)
    }

    pub fn redirect(&mut self, url: &str) -> Result<()> {
        self.call("redirect", vec![json!(url)]).map(drop)
    }

    pub fn redirect_with(&mut self, url: &str, code: u16) -> Result<()> {
        self.call("redirect", vec![json!(url), json!(code)]).map(drop)
    }

    pub fn json<T: Serialize>(&mut self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.call("json", vec![data]).map(drop)
    }

    pub fn json_with<T: Serialize>(&mut self, data: &T, code: u16) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.call("json", vec![data, json!(code)]).map(drop)
    }

    /// JSON wrapped in the callback named by the configured query parameter.
    pub fn jsonp<T: Serialize>(&mut self, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.call("jsonp", vec![data]).map(drop)
    }

    pub fn etag(&mut self, id: &str) -> Result<()> {
        self.call("etag", vec![json!(id)]).map(drop)
    }

    pub fn etag_weak(&mut self, id: &str) -> Result<()> {
        self.call("etag", vec![json!(id), json!("weak")]).map(drop)
    }

    /// `time` is in seconds since the Unix epoch.
    pub fn last_modified(&mut self, time: u64) -> Result<()> {
        self.call("lastModified", vec![json!(time)]).map(drop)
    }

    pub fn render(&mut self, template: &str, data: Value) -> Result<()> {
        self.call("render", vec![json!(template), data]).map(drop)
    }

    /// Renders into request data under `key` instead of the response body.
    pub fn render_into(&mut self, template: &str, data: Value, key: &str) -> Result<()> {
        self.call("render", vec![json!(template), data, json!(key)])
            .map(drop)
    }

    /// Builds the URL of an aliased route through the `getUrl` operation.
    /// Parameters not supplied are taken from the current request's
    /// parameters.
    pub fn get_url<I, K, V>(&mut self, alias: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let supplied: Map<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.to_string())))
            .collect();

        match self.call("getUrl", vec![json!(alias), Value::Object(supplied)])?.into_value() {
            Some(Value::String(url)) => Ok(url),
            _ => Err(Error::handler("getUrl did not produce a string")),
        }
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;

    #[test]
    fn test_head_request_omits_body() {
        let app = Application::new();
        let ctx = app.context(Request::new(Method::HEAD, "/"));
        assert!(ctx.response.omit_body);

        let ctx = app.context(Request::get("/"));
        assert!(!ctx.response.omit_body);
    }

    #[test]
    fn test_content_length_follows_config() {
        let app = Application::with_config(Config {
            content_length: false,
            ..Config::default()
        });
        let ctx = app.context(Request::get("/"));
        assert!(!ctx.response.content_length);
    }

    #[test]
    fn test_route_hidden_without_pass_route() {
        let mut app = Application::new();
        app.route("/a", |_: &mut Context, _: &Params| ()).unwrap();
        let mut ctx = app.context(Request::get("/a"));

        ctx.enter(0, Params::default(), false);
        assert!(ctx.route().is_none());
        assert!(ctx.params().is_some());

        ctx.enter(0, Params::default(), true);
        assert_eq!(ctx.route().map(|r| r.pattern().as_str()), Some("/a"));
    }
}
