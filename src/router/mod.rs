mod pattern;
mod route;

pub use pattern::{Params, RoutePattern};
pub use route::{Methods, Route};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{Handler, IntoControl};
use crate::http::Method;
use crate::middleware::{IntoMiddlewares, Middleware};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// A successful match: the first registered route that accepted the
/// request, and the parameters extracted from the path.
#[derive(Debug, Clone)]
pub struct MatchResult<'r> {
    pub route: &'r Route,
    pub params: Params,
    /// Position of the route in registration order.
    pub index: usize,
}

/// Ordered route table. Matching is first-registered-wins.
#[derive(Clone, Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
    aliases: HashMap<String, usize>,
    case_sensitive: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) -> &mut Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn clear(&mut self) {
        self.routes.clear();
        self.aliases.clear();
    }

    /// Registers `pattern` for every method. The pattern is taken
    /// verbatim: no method prefix is parsed.
    pub fn map<F, R>(&mut self, pattern: &str, handler: F, alias: Option<&str>) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Any, pattern, Arc::new(handler), false, alias, &[])
    }

    /// Registers a route. The pattern may start with method tokens, e.g.
    /// `"GET /users"` or `"GET|POST /users"`.
    pub fn route<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.route_with(pattern, handler, false, None)
    }

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
        let (methods, pattern) = split_methods(pattern)?;
        self.add(methods, pattern, Arc::new(handler), pass_route, alias, &[])
    }

    pub fn get<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::GET]), pattern, Arc::new(handler), false, None, &[])
    }

    pub fn post<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::POST]), pattern, Arc::new(handler), false, None, &[])
    }

    pub fn put<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::PUT]), pattern, Arc::new(handler), false, None, &[])
    }

    pub fn patch<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::PATCH]), pattern, Arc::new(handler), false, None, &[])
    }

    pub fn delete<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::DELETE]), pattern, Arc::new(handler), false, None, &[])
    }

    /// Registers the routes declared by `callback` under `prefix`.
    pub fn group<F>(&mut self, prefix: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        self.group_with(prefix, Vec::new(), callback)
    }

    /// Like [`Router::group`]; every route in the group inherits
    /// `middleware` ahead of its own.
    pub fn group_with<F>(&mut self, prefix: &str, middleware: impl IntoMiddlewares, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        let mut group = RouteGroup {
            router: self,
            prefix: prefix.to_string(),
            middleware: middleware.into_middlewares(),
        };
        tracing::debug!(prefix = %group.prefix, middleware = group.middleware.len(), "entering route group");
        callback(&mut group)
    }

    fn add(
        &mut self,
        methods: Methods,
        pattern: &str,
        handler: Arc<dyn Handler>,
        pass_route: bool,
        alias: Option<&str>,
        inherited: &[Middleware],
    ) -> Result<&mut Route> {
        if let Some(alias) = alias {
            if let Some(&existing) = self.aliases.get(alias) {
                return Err(Error::DuplicateAlias {
                    alias: alias.to_string(),
                    existing: self.routes[existing].pattern().to_string(),
                });
            }
        }

        let mut route = Route::new(pattern, methods, handler, pass_route, alias.map(String::from))?;
        route.add_middleware(inherited);

        tracing::debug!(
            pattern = %route.pattern(),
            methods = %route.methods(),
            alias = ?route.alias(),
            "route registered"
        );

        let index = self.routes.len();
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), index);
        }
        self.routes.push(route);
        Ok(&mut self.routes[index])
    }

    /// Finds the first route accepting `method` and `path`. A query string
    /// on `path` is ignored; the rest is percent-decoded before matching.
    pub fn match_route(&self, method: Method, path: &str) -> Option<MatchResult<'_>> {
        self.match_from(0, method, path)
    }

    /// Like [`Router::match_route`], considering only routes registered at
    /// or after `start`.
    pub fn match_from(&self, start: usize, method: Method, path: &str) -> Option<MatchResult<'_>> {
        let path = path.split('?').next().unwrap_or("/");
        let path = urlencoding::decode(path).unwrap_or(Cow::Borrowed(path));

        let found = self
            .routes
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, route)| route.methods().allows(method))
            .find_map(|(index, route)| {
                tracing::trace!(pattern = %route.pattern(), %path, "match attempt");
                route
                    .pattern()
                    .captures(&path, self.case_sensitive)
                    .map(|params| MatchResult { route, params, index })
            });

        match &found {
            Some(m) => tracing::debug!(%method, %path, pattern = %m.route.pattern(), "route matched"),
            None => tracing::debug!(%method, %path, "no route matched"),
        }
        found
    }

    /// Like [`Router::match_route`], reporting a miss as
    /// [`Error::RouteNotFound`].
    pub fn resolve(&self, method: Method, path: &str) -> Result<MatchResult<'_>> {
        self.match_route(method, path).ok_or_else(|| Error::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    pub fn find_alias(&self, alias: &str) -> Option<&Route> {
        self.aliases.get(alias).map(|&index| &self.routes[index])
    }

    /// Builds the URL of the route registered under `alias`.
    ///
    /// Values are substituted as given; they are not checked against the
    /// parameter's constraint.
    pub fn get_url<I, K, V>(&self, alias: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let params: HashMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        self.url_for(alias, |name| params.get(name).cloned())
    }

    pub(crate) fn url_for<F>(&self, alias: &str, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let route = self.find_alias(alias).ok_or_else(|| Error::AliasNotFound {
            alias: alias.to_string(),
            suggestion: self.closest_alias(alias),
        })?;

        route
            .pattern()
            .hydrate(lookup)
            .map_err(|name| Error::MissingParameter {
                alias: alias.to_string(),
                name,
            })
    }

    fn closest_alias(&self, alias: &str) -> Option<String> {
        self.aliases
            .keys()
            .min_by_key(|candidate| (strsim::levenshtein(alias, candidate), (*candidate).clone()))
            .cloned()
    }
}

/// Registration context handed to a group callback: carries the
/// accumulated prefix and inherited middleware.
pub struct RouteGroup<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Middleware>,
}

impl<'r> RouteGroup<'r> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    fn add(
        &mut self,
        methods: Methods,
        pattern: &str,
        handler: Arc<dyn Handler>,
        pass_route: bool,
        alias: Option<&str>,
    ) -> Result<&mut Route> {
        let pattern = join_paths(&self.prefix, pattern);
        self.router
            .add(methods, &pattern, handler, pass_route, alias, &self.middleware)
    }

    pub fn map<F, R>(&mut self, pattern: &str, handler: F, alias: Option<&str>) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Any, pattern, Arc::new(handler), false, alias)
    }

    pub fn route<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.route_with(pattern, handler, false, None)
    }

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
        let (methods, pattern) = split_methods(pattern)?;
        self.add(methods, pattern, Arc::new(handler), pass_route, alias)
    }

    pub fn get<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::GET]), pattern, Arc::new(handler), false, None)
    }

    pub fn post<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::POST]), pattern, Arc::new(handler), false, None)
    }

    pub fn put<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::PUT]), pattern, Arc::new(handler), false, None)
    }

    pub fn patch<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::PATCH]), pattern, Arc::new(handler), false, None)
    }

    pub fn delete<F, R>(&mut self, pattern: &str, handler: F) -> Result<&mut Route>
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoControl + 'static,
    {
        self.add(Methods::Only(vec![Method::DELETE]), pattern, Arc::new(handler), false, None)
    }

    pub fn group<F>(&mut self, prefix: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        self.group_with(prefix, Vec::new(), callback)
    }

    /// Nested group: prefixes concatenate and the outer middleware keeps
    /// running ahead of `middleware`.
    pub fn group_with<F>(&mut self, prefix: &str, middleware: impl IntoMiddlewares, callback: F) -> Result<()>
    where
        F: FnOnce(&mut RouteGroup<'_>) -> Result<()>,
    {
        let mut inherited = self.middleware.clone();
        inherited.extend(middleware.into_middlewares());

        let mut group = RouteGroup {
            router: &mut *self.router,
            prefix: join_paths(&self.prefix, prefix),
            middleware: inherited,
        };
        tracing::debug!(prefix = %group.prefix, middleware = group.middleware.len(), "entering route group");
        callback(&mut group)
    }
}

/// Splits leading method tokens off a pattern. Method tokens are separated
/// by whitespace or `|`; the pattern starts at the first token that opens
/// with `/`, `(`, `*` or `@`, and is kept whole from there.
fn split_methods(pattern: &str) -> Result<(Methods, &str)> {
    let mut rest = pattern.trim();
    let mut methods = Vec::new();

    while let Some((head, tail)) = rest.split_once(char::is_whitespace) {
        if head.starts_with(|c: char| matches!(c, '/' | '(' | '*' | '@')) {
            break;
        }
        for token in head.split('|').filter(|token| !token.is_empty()) {
            methods.push(token.parse::<Method>()?);
        }
        rest = tail.trim_start();
    }

    if methods.is_empty() {
        Ok((Methods::Any, rest))
    } else {
        Ok((Methods::Only(methods), rest))
    }
}

fn join_paths(prefix: &str, pattern: &str) -> String {
    if prefix.is_empty() {
        return pattern.to_string();
    }
    if pattern.is_empty() || pattern == "/" {
        return prefix.to_string();
    }

    let prefix = prefix.trim_end_matches('/');
    if pattern.starts_with('(') {
        format!("{}{}", prefix, pattern)
    } else {
        format!("{}/{}", prefix, pattern.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn noop(_: &mut Context, _: &Params) {}

    #[rstest]
    #[case("/a", "/b", "/a/b")]
    #[case("/a/", "/b", "/a/b")]
    #[case("/a", "b", "/a/b")]
    #[case("/a/", "/", "/a/")]
    #[case("/a", "", "/a")]
    #[case("", "/b", "/b")]
    #[case("/", "/b", "/b")]
    #[case("/blog", "(/@year)", "/blog(/@year)")]
    fn test_join_paths(#[case] prefix: &str, #[case] pattern: &str, #[case] expected: &str) {
        assert_eq!(join_paths(prefix, pattern), expected);
    }

    #[test]
    fn test_split_methods() {
        let (methods, path) = split_methods("GET|POST /users").unwrap();
        assert_eq!(methods, Methods::Only(vec![Method::GET, Method::POST]));
        assert_eq!(path, "/users");

        let (methods, path) = split_methods("PUT  PATCH /users/@id").unwrap();
        assert_eq!(methods, Methods::Only(vec![Method::PUT, Method::PATCH]));
        assert_eq!(path, "/users/@id");

        assert_eq!(split_methods("/plain").unwrap(), (Methods::Any, "/plain"));
        assert!(matches!(split_methods("FETCH /x"), Err(Error::UnknownMethod(_))));

        let (methods, path) = split_methods("GET /q/@term:[a-z ]+").unwrap();
        assert_eq!(methods, Methods::Only(vec![Method::GET]));
        assert_eq!(path, "/q/@term:[a-z ]+");
        assert_eq!(
            split_methods("/tags/@name:[a-z ]+").unwrap(),
            (Methods::Any, "/tags/@name:[a-z ]+")
        );
    }

    #[test]
    fn test_match_user_name() {
        let mut router = Router::new();
        router.route("/user/@name", noop).unwrap();

        let found = router.match_route(Method::GET, "/user/alice").unwrap();
        assert_eq!(found.params.get("name"), Some("alice"));
        assert!(router.match_route(Method::GET, "/user/alice/extra").is_none());
    }

    #[test]
    fn test_method_restriction_falls_through() {
        let mut router = Router::new();
        router.route("POST /items", noop).unwrap();
        router.route("GET /items", noop).unwrap();

        let found = router.match_route(Method::GET, "/items").unwrap();
        assert_eq!(found.index, 1);
        assert!(router.match_route(Method::DELETE, "/items").is_none());
        assert_eq!(router.match_route(Method::HEAD, "/items").unwrap().index, 1);
    }

    #[test]
    fn test_first_registered_wins() {
        let mut router = Router::new();
        router.route("GET|POST /items/@id", noop).unwrap();
        router.route("GET /items/@id", noop).unwrap();
        router.route("/items/special", noop).unwrap();

        assert_eq!(router.match_route(Method::GET, "/items/7").unwrap().index, 0);
        // the earlier parameter route shadows the literal one
        assert_eq!(router.match_route(Method::GET, "/items/special").unwrap().index, 0);
        assert_eq!(router.match_from(1, Method::GET, "/items/7").unwrap().index, 1);
    }

    #[test]
    fn test_resolve_reports_misses() {
        let mut router = Router::new();
        router.get("/only-get", noop).unwrap();

        assert!(router.resolve(Method::GET, "/only-get").is_ok());
        let err = router.resolve(Method::POST, "/only-get").unwrap_err();
        assert_eq!(err.to_string(), "no route matches POST /only-get");
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_query_string_ignored_and_path_decoded() {
        let mut router = Router::new();
        router.route("/search/@term", noop).unwrap();

        let found = router.match_route(Method::GET, "/search/hello%20world?page=2").unwrap();
        assert_eq!(found.params.get("term"), Some("hello world"));
    }

    #[test]
    fn test_case_sensitivity_is_configurable() {
        let mut router = Router::new();
        router.route("/About", noop).unwrap();
        assert!(router.match_route(Method::GET, "/about").is_some());

        router.set_case_sensitive(true);
        assert!(router.match_route(Method::GET, "/about").is_none());
        assert!(router.match_route(Method::GET, "/About").is_some());
    }

    #[test]
    fn test_duplicate_alias_rejected_eagerly() {
        let mut router = Router::new();
        router.route_with("/a", noop, false, Some("home")).unwrap();
        let err = router.route_with("/b", noop, false, Some("home")).unwrap_err();
        assert!(matches!(err, Error::DuplicateAlias { ref existing, .. } if existing == "/a"));
        assert_eq!(router.routes().len(), 1);
    }

    #[test]
    fn test_get_url() {
        let mut router = Router::new();
        router
            .route_with("/path1/@param:[0-9]{3}", noop, false, Some("path1"))
            .unwrap();

        assert_eq!(router.get_url("path1", [("param", 123)]).unwrap(), "/path1/123");
        // values are not validated against the constraint
        assert_eq!(router.get_url("path1", [("param", "abcd")]).unwrap(), "/path1/abcd");
    }

    #[test]
    fn test_get_url_failures() {
        let mut router = Router::new();
        router.route_with("/user/@id", noop, false, Some("user")).unwrap();

        let err = router.get_url("usr", [("id", 1)]).unwrap_err();
        assert!(matches!(
            err,
            Error::AliasNotFound { ref suggestion, .. } if suggestion.as_deref() == Some("user")
        ));

        let err = router.get_url::<_, &str, &str>("user", []).unwrap_err();
        assert!(matches!(err, Error::MissingParameter { ref name, .. } if name == "id"));
    }

    #[test]
    fn test_nested_groups() {
        let mut router = Router::new();
        router
            .group("/a", |a| {
                a.group("/b", |b| {
                    b.route("/c", noop)?;
                    Ok(())
                })?;
                a.route("GET /d", noop)?;
                Ok(())
            })
            .unwrap();

        let patterns: Vec<_> = router.routes().iter().map(|r| r.pattern().as_str()).collect();
        assert_eq!(patterns, vec!["/a/b/c", "/a/d"]);
        assert!(router.match_route(Method::GET, "/a/b/c").is_some());
        assert!(router.match_route(Method::POST, "/a/d").is_none());
    }

    #[test]
    fn test_group_middleware_precedes_route_middleware() {
        let outer = Middleware::before(|ctx: &mut Context, _: &Params| {
            ctx.response.write("outer ");
        });
        let inner = Middleware::before(|ctx: &mut Context, _: &Params| {
            ctx.response.write("inner ");
        });

        let mut router = Router::new();
        router
            .group_with("/a", outer, |a| {
                a.group_with("/b", inner, |b| {
                    b.route("/c", noop)?.add_middleware(Middleware::new());
                    Ok(())
                })
            })
            .unwrap();

        let route = &router.routes()[0];
        assert_eq!(route.middleware().len(), 3);
        assert!(route.middleware()[0].has_before());
        assert!(route.middleware()[1].has_before());
        assert!(!route.middleware()[2].has_before());
    }

    #[test]
    fn test_duplicate_parameter_is_a_registration_error() {
        let mut router = Router::new();
        assert!(matches!(
            router.route("/a/@id/@id", noop),
            Err(Error::DuplicateParameter { .. })
        ));
    }
}
