use crate::error::Result;
use crate::handler::Handler;
use crate::http::Method;
use crate::middleware::{IntoMiddlewares, Middleware};
use crate::router::pattern::RoutePattern;
use std::fmt;
use std::sync::Arc;

/// The methods a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Methods {
    Any,
    Only(Vec<Method>),
}

impl Methods {
    /// HEAD is accepted wherever GET is.
    pub fn allows(&self, method: Method) -> bool {
        match self {
            Methods::Any => true,
            Methods::Only(methods) => {
                methods.contains(&method)
                    || (method == Method::HEAD && methods.contains(&Method::GET))
            }
        }
    }
}

impl fmt::Display for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Methods::Any => f.write_str("*"),
            Methods::Only(methods) => {
                let names: Vec<_> = methods.iter().map(Method::as_str).collect();
                f.write_str(&names.join("|"))
            }
        }
    }
}

#[derive(Clone)]
pub struct Route {
    pattern: RoutePattern,
    methods: Methods,
    handler: Arc<dyn Handler>,
    alias: Option<String>,
    middleware: Vec<Middleware>,
    pass_route: bool,
}

impl Route {
    pub(crate) fn new(
        pattern: &str,
        methods: Methods,
        handler: Arc<dyn Handler>,
        pass_route: bool,
        alias: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            pattern: RoutePattern::compile(pattern)?,
            methods,
            handler,
            alias,
            middleware: Vec::new(),
            pass_route,
        })
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn methods(&self) -> &Methods {
        &self.methods
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn pass_route(&self) -> bool {
        self.pass_route
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    /// Appends one middleware or an ordered list of them.
    pub fn add_middleware(&mut self, middleware: impl IntoMiddlewares) -> &mut Self {
        self.middleware.extend(middleware.into_middlewares());
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("alias", &self.alias)
            .field("middleware", &self.middleware.len())
            .field("pass_route", &self.pass_route)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::router::Params;

    fn noop() -> Arc<dyn Handler> {
        Arc::new(|_: &mut Context, _: &Params| ())
    }

    #[test]
    fn test_head_follows_get() {
        let methods = Methods::Only(vec![Method::GET]);
        assert!(methods.allows(Method::GET));
        assert!(methods.allows(Method::HEAD));
        assert!(!methods.allows(Method::POST));
        assert!(Methods::Any.allows(Method::DELETE));
    }

    #[test]
    fn test_add_middleware_is_cumulative() {
        let mut route = Route::new("/a", Methods::Any, noop(), false, None).unwrap();
        route
            .add_middleware(Middleware::new())
            .add_middleware(vec![Middleware::new(), Middleware::new()]);
        assert_eq!(route.middleware().len(), 3);
        assert_eq!(route.methods().to_string(), "*");
    }
}
