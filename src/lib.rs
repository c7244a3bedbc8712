//! # Volant
//!
//! A small, synchronous web framework core: pattern-based routing with
//! named parameters, route groups and aliases, per-route middleware, and a
//! dispatcher through which every framework operation can be replaced or
//! filtered.
//!
//! ## Features
//!
//! - Route patterns: `@name`, `@id:[0-9]+`, optional groups
//!   `(/@year(/@month))` and a trailing `*` wildcard
//! - Method prefixes (`"GET|POST /users"`), groups with inherited
//!   middleware, reverse routing through aliases
//! - Before/after middleware with short-circuiting
//! - Named operations (`notFound`, `json`, `redirect`, ...) that can be
//!   remapped or wrapped in filters
//! - Lazily built shared instances
//!
//! ## Quick Start
//!
//! ```rust
//! use volant::app::Application;
//! use volant::context::Context;
//! use volant::http::Request;
//! use volant::json;
//! use volant::router::Params;
//!
//! let mut app = Application::new();
//! app.route("GET /users/@id:[0-9]+", |ctx: &mut Context, params: &Params| {
//!     ctx.json(&json!({ "id": params.get("id") }))
//! })
//! .unwrap();
//!
//! let response = app.handle(Request::get("/users/42")).unwrap();
//! assert_eq!(response.body(), r#"{"id":"42"}"#);
//! ```
//!
//! ## Middleware Usage
//!
//! ```rust
//! use volant::app::Application;
//! use volant::context::Context;
//! use volant::middleware::{Middleware, SecurityHeaders};
//! use volant::router::Params;
//!
//! let mut app = Application::new();
//! let auth = Middleware::before(|ctx: &mut Context, _: &Params| {
//!     ctx.request.get_header("authorization").is_some()
//! });
//! app.group_with("/admin", vec![auth, SecurityHeaders::default().into()], |admin| {
//!     admin.get("/", |ctx: &mut Context, _: &Params| {
//!         ctx.write("dashboard");
//!     })?;
//!     Ok(())
//! })
//! .unwrap();
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub mod view;
pub extern crate serde_json;

// Reexport serde_json
pub use serde_json::{json, Value};
