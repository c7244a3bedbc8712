//! Application is the main entry point of the framework.
//!
//! It owns the route table, the dispatcher of named operations, the view
//! and the engine variables, and turns a [`Request`] into a [`Response`].
//!
//! # Examples
//!
//! ```rust
//! use volant::app::Application;
//! use volant::context::Context;
//! use volant::http::Request;
//! use volant::router::Params;
//!
//! let mut app = Application::new();
//! app.route("/hello/@name", |ctx: &mut Context, params: &Params| {
//!     ctx.write(format!("Hello, {}!", params.get("name").unwrap_or("you")));
//! })
//! .unwrap();
//!
//! let response = app.handle(Request::get("/hello/bob")).unwrap();
//! assert_eq!(response.body(), "Hello, bob!");
//! ```

use crate::config::Config;
use crate::context::Context;
use crate::dispatcher::{Args, Dispatcher, IntoFlow, IntoOutput, Output};
use crate::error::{Error, Result};
use crate::handler::{Control, IntoControl};
use crate::http::{reason_phrase, Request, Response};
use crate::middleware::{Chain, ChainOutcome, IntoMiddlewares, Stage};
use crate::router::{Params, Route, RouteGroup, Router};
use crate::view::View;
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

lazy_static! {
    /// Names owned by the framework. They can be filtered but never bound
    /// by application code.
    static ref RESERVED: HashSet<&'static str> = [
        "map", "register", "unregister", "before", "after", "route", "group", "get", "post",
        "put", "patch", "delete", "getUrl", "set", "has", "clear", "request", "response",
        "router", "view", "handle", "reset",
    ]
    .into_iter()
    .collect();
}

const NOT_FOUND_BODY: &str =
    "<h1>404 Not Found</h1><h3>The page you have requested could not be found.</h3>";

/// Registries shared by every request. Mutated copy-on-write by the
/// [`Application`], read-only once captured by a [`Context`].
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) config: Config,
    pub(crate) router: Router,
    pub(crate) dispatcher: Dispatcher<Context>,
    pub(crate) view: Option<Arc<dyn View>>,
    pub(crate) vars: HashMap<String, Value>,
}

/// The orchestrating engine.
///
/// Every step of request handling is a named operation on the
/// dispatcher: `start` runs the routing loop, and `halt`, `stop`, `error`,
/// `notFound`, `redirect`, `json`, `jsonp`, `etag`, `lastModified` and
/// `render` shape the response. Each may be replaced with
/// [`Application::map`] or wrapped with [`Application::before`] and
/// [`Application::after`].
#[derive(Clone)]
pub struct Application {
    services: Arc<Services>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// Creates a new Application with default settings.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut router = Router::new();
        router.set_case_sensitive(config.case_sensitive);

        Self {
            services: Arc::new(Services {
                config,
                router,
                dispatcher: framework_dispatcher(),
                view: None,
                vars: HashMap::new(),
            }),
        }
    }

    fn services_mut(&mut self) -> &mut Services {
        Arc::make_mut(&mut self.services)
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn case_sensitive(&mut self, case_sensitive: bool) -> &mut Self {
        let services = self.services_mut();
        services.config.case_sensitive = case_sensitive;
        services.router.set_case_sensitive(case_sensitive);
        self
    }

    pub fn base_url(&mut self, base_url: Option<&str>) -> &mut Self {
        self.services_mut().config.base_url = base_url.map(String::from);
        self
    }

    pub fn handle_errors(&mut self, handle_errors: bool) -> &mut Self {
        self.services_mut().config.handle_errors = handle_errors;
        self
    }

    pub fn log_errors(&mut self, log_errors: bool) -> &mut Self {
        self.services_mut().config.log_errors = log_errors;
        self
    }

    pub fn router(&self) -> &Router {
        &self.services.router
    }

    pub fn dispatcher(&self) -> &Dispatcher<Context> {
        &self.services.dispatcher
    }

    /// Registers a route; the pattern may carry a method prefix such as
    /// `"GET|POST /users"`.
    pub fn route<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.route(pattern, handler)
    }

    /// Registers a route, optionally exposing the matched [`Route`] to the
    /// handler and naming it for [`Application::get_url`].
    pub fn route_with<F, R>(
        &mut self,
        pattern: &str,
        handler: F,
        pass_route: bool,
        alias: Option<&str>,
    ) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut()
            .router
            .route_with(pattern, handler, pass_route, alias)
    }

    /// Registers a GET route handler
    pub fn get<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.get(pattern, handler)
    }

    /// Registers a POST route handler
    pub fn post<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.post(pattern, handler)
    }

    /// Registers a PUT route handler
    pub fn put<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.put(pattern, handler)
    }

    /// Registers a PATCH route handler
    pub fn patch<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.patch(pattern, handler)
    }

    /// Registers a DELETE route handler
    pub fn delete<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.services_mut().router.delete(pattern, handler)
    }

    pub fn group<F>(&mut self, prefix: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        self.services_mut().router.group(prefix, callback)
    }

    pub fn group_with<F>(&mut self, prefix: &str, middleware: impl IntoMiddlewares, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        self.services_mut()
            .router
            .group_with(prefix, middleware, callback)
    }

    pub fn get_url<I, K, V>(&self, alias: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.context(Request::get("/")).get_url(alias, params)
    }

    /// Binds a named operation, replacing a previous binding. Framework
    /// names are rejected with [`Error::ReservedName`].
    pub fn map<F, R>(&mut self, name: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&mut Context, Args) -> R + Send + Sync + 'static,
        R: IntoOutput,
    {
        self.services_mut().dispatcher.map(name, f)?;
        Ok(self)
    }

    /// Binds `name` to a shared instance built on first use.
    pub fn register<T, F>(&mut self, name: &str, ctor: F, args: Args) -> Result<&mut Self>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        self.services_mut().dispatcher.register(name, ctor, args)?;
        Ok(self)
    }

    pub fn register_with<T, F, G>(&mut self, name: &str, ctor: F, args: Args, configure: G) -> Result<&mut Self>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
        G: Fn(&mut T) + Send + Sync + 'static,
    {
        self.services_mut()
            .dispatcher
            .register_with(name, ctor, args, configure)?;
        Ok(self)
    }

    pub fn before<F, R>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Context, &mut Args, &mut Output) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.services_mut().dispatcher.before(name, f);
        self
    }

    pub fn after<F, R>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Context, &mut Args, &mut Output) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        self.services_mut().dispatcher.after(name, f);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.services.dispatcher.has(name)
    }

    pub fn unregister(&mut self, name: &str) -> Result<&mut Self> {
        self.services_mut().dispatcher.unregister(name)?;
        Ok(self)
    }

    /// Drops every route, binding, filter, variable and the view, then
    /// reinstalls the framework operations. Settings are kept.
    pub fn reset(&mut self) {
        let config = self.services.config.clone();
        *self = Self::with_config(config);
    }

    pub fn set_var(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.services_mut().vars.insert(key.to_string(), value.into());
        self
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.services.vars.get(key)
    }

    pub fn has_var(&self, key: &str) -> bool {
        self.services.vars.contains_key(key)
    }

    pub fn clear_var(&mut self, key: &str) -> &mut Self {
        self.services_mut().vars.remove(key);
        self
    }

    pub fn clear_vars(&mut self) -> &mut Self {
        self.services_mut().vars.clear();
        self
    }

    pub fn view(&mut self, view: impl View) -> &mut Self {
        self.services_mut().view = Some(Arc::new(view));
        self
    }

    /// A fresh context over the current registries.
    pub fn context(&self, request: Request) -> Context {
        Context::new(Arc::clone(&self.services), request)
    }

    /// Runs `start` for `request` and returns the response.
    ///
    /// With `handle_errors` set, a failure is rendered through the `error`
    /// operation; otherwise it is returned as is.
    pub fn handle(&self, request: Request) -> Result<Response> {
        let mut ctx = self.context(request);

        if let Err(error) = run(&mut ctx) {
            if !self.services.config.handle_errors {
                return Err(error);
            }
            if self.services.config.log_errors {
                tracing::error!(%error, "request failed");
            }
            ctx.error(&error)?;
        }

        Ok(ctx.into_response())
    }

    /// Handles `request` and writes the response to `out`.
    pub fn respond<W: Write>(&self, request: Request, out: &mut W) -> Result<()> {
        let mut response = self.handle(request)?;
        response.send(out)?;
        Ok(())
    }
}

fn run(ctx: &mut Context) -> Result<()> {
    ctx.call("start", Args::new())?;
    if !ctx.is_halted() {
        ctx.stop(None)?;
    }
    Ok(())
}

fn framework_dispatcher() -> Dispatcher<Context> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.insert("start", start);
    dispatcher.insert("stop", stop);
    dispatcher.insert("halt", halt);
    dispatcher.insert("error", error);
    dispatcher.insert("notFound", not_found);
    dispatcher.insert("redirect", redirect);
    dispatcher.insert("json", json);
    dispatcher.insert("jsonp", jsonp);
    dispatcher.insert("etag", etag);
    dispatcher.insert("lastModified", last_modified);
    dispatcher.insert("render", render);
    dispatcher.insert("getUrl", get_url);
    for name in RESERVED.iter() {
        dispatcher.protect(name);
    }
    dispatcher
}

fn str_arg(args: &Args, index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

fn status_arg(args: &Args, index: usize, default: u16) -> u16 {
    args.get(index)
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(default)
}

/// The routing loop: dispatch the first matching route, moving on to the
/// next match whenever a handler passes.
fn start(ctx: &mut Context, _: Args) -> Result<()> {
    let services = Arc::clone(&ctx.services);
    let method = ctx.request.get_method();
    let path = ctx.request.path.clone();

    let mut from = 0;
    let mut dispatched = false;
    while let Some(found) = services.router.match_from(from, method, &path) {
        let route = found.route;
        ctx.enter(found.index, found.params.clone(), route.pass_route());

        match Chain::new(route.middleware()).run(ctx, &found.params, route.handler())? {
            ChainOutcome::Completed(Control::Pass) => {
                tracing::debug!(pattern = %route.pattern(), "handler passed");
                from = found.index + 1;
                continue;
            }
            ChainOutcome::Completed(Control::Done) | ChainOutcome::Halted => {}
            ChainOutcome::Denied(Stage::Before) => {
                tracing::warn!(pattern = %route.pattern(), "request denied by before hook");
                ctx.halt(403, "Forbidden")?;
            }
            ChainOutcome::Denied(Stage::After) => {
                tracing::warn!(pattern = %route.pattern(), "request denied by after hook");
                ctx.response.set_status(403)?;
                ctx.stop(None)?;
            }
        }
        dispatched = true;
        break;
    }

    if !dispatched {
        ctx.not_found()?;
    }
    Ok(())
}

fn stop(ctx: &mut Context, args: Args) -> Result<()> {
    if let Some(code) = args.first().and_then(Value::as_u64) {
        ctx.response.set_status(u16::try_from(code).unwrap_or(0))?;
    }
    ctx.halted = true;
    Ok(())
}

fn halt(ctx: &mut Context, args: Args) -> Result<()> {
    let code = status_arg(&args, 0, 200);
    let message = str_arg(&args, 1).unwrap_or_default();
    ctx.response.clear().set_status(code)?.write(message);
    ctx.halted = true;
    Ok(())
}

fn error(ctx: &mut Context, args: Args) -> Result<()> {
    let message = str_arg(&args, 0).unwrap_or_default();
    let code = Some(status_arg(&args, 1, 500))
        .filter(|code| reason_phrase(*code).is_some())
        .unwrap_or(500);
    let body = format!(
        "<h1>{} {}</h1><h3>{}</h3>",
        code,
        reason_phrase(code).unwrap_or("Internal Server Error"),
        message
    );
    ctx.response.clear().set_status(code)?.write(body);
    ctx.halted = true;
    Ok(())
}

fn not_found(ctx: &mut Context, _: Args) -> Result<()> {
    ctx.response.clear().set_status(404)?.write(NOT_FOUND_BODY);
    ctx.halted = true;
    Ok(())
}

fn redirect(ctx: &mut Context, args: Args) -> Result<()> {
    let url = str_arg(&args, 0).unwrap_or("/");
    let code = status_arg(&args, 1, 303);

    let location = match ctx.config().base_url.as_deref() {
        Some(base) if base != "/" && !url.contains("://") => {
            format!("{}{}", base.trim_end_matches('/'), collapse_slashes(&format!("/{}", url)))
        }
        _ => url.to_string(),
    };

    ctx.response
        .clear()
        .set_status(code)?
        .header("Location", location);
    ctx.halted = true;
    Ok(())
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

fn json(ctx: &mut Context, args: Args) -> Result<()> {
    let body = serde_json::to_string(args.first().unwrap_or(&Value::Null))?;
    let code = status_arg(&args, 1, 200);
    ctx.response
        .set_status(code)?
        .header("Content-Type", "application/json; charset=utf-8")
        .write(body);
    Ok(())
}

fn jsonp(ctx: &mut Context, args: Args) -> Result<()> {
    let body = serde_json::to_string(args.first().unwrap_or(&Value::Null))?;
    let param = str_arg(&args, 1)
        .map(String::from)
        .unwrap_or_else(|| ctx.config().jsonp_param.clone());
    let code = status_arg(&args, 2, 200);
    let callback = ctx.request.get_query(&param).unwrap_or_default().to_string();

    ctx.response
        .set_status(code)?
        .header("Content-Type", "application/javascript; charset=utf-8")
        .write(format!("{}({});", callback, body));
    Ok(())
}

fn etag(ctx: &mut Context, args: Args) -> Result<()> {
    let id = str_arg(&args, 0).unwrap_or_default().replace('"', "\\\"");
    let tag = match str_arg(&args, 1) {
        Some("weak") => format!("W/\"{}\"", id),
        _ => format!("\"{}\"", id),
    };

    ctx.response.header("ETag", &tag);
    let matched = ctx
        .request
        .get_header("if-none-match")
        .map_or(false, |candidate| candidate == tag || candidate == id);
    if matched {
        ctx.halt(304, "")?;
    }
    Ok(())
}

fn last_modified(ctx: &mut Context, args: Args) -> Result<()> {
    let seconds = args.first().and_then(Value::as_u64).unwrap_or_default();
    let time = UNIX_EPOCH + Duration::from_secs(seconds);

    ctx.response
        .header("Last-Modified", httpdate::fmt_http_date(time));
    let unchanged = ctx
        .request
        .get_header("if-modified-since")
        .and_then(|since| httpdate::parse_http_date(since).ok())
        .map_or(false, |since| since == time);
    if unchanged {
        ctx.halt(304, "")?;
    }
    Ok(())
}

fn render(ctx: &mut Context, args: Args) -> Result<()> {
    let view = ctx
        .services
        .view
        .clone()
        .ok_or_else(|| Error::handler("no view configured"))?;
    let template = str_arg(&args, 0).unwrap_or_default();
    let data = args.get(1).cloned().unwrap_or(Value::Null);

    let rendered = view.render(template, &data)?;
    match str_arg(&args, 2) {
        Some(key) => ctx.request.set_data(key, rendered),
        None => {
            ctx.response.write(rendered);
        }
    }
    Ok(())
}

/// Supplied parameters win; the rest come from the route being dispatched.
fn get_url(ctx: &mut Context, args: Args) -> Result<Value> {
    let alias = str_arg(&args, 0).unwrap_or_default();
    let supplied = args.get(1).and_then(Value::as_object);
    let current = ctx.params();

    let url = ctx.router().url_for(alias, |name| {
        supplied
            .and_then(|object| object.get(name))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .or_else(|| current.and_then(|p| p.get(name)).map(String::from))
    })?;
    Ok(json!(url))
}
