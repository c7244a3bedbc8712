//! Route middleware and the chain executor.
//!
//! A [`Middleware`] carries an optional before-hook and an optional
//! after-hook. For a matched route the [`Chain`] runs every before-hook in
//! attachment order, then the handler, then every after-hook in reverse
//! attachment order. A hook that returns [`Verdict::Deny`] (or `false`)
//! short-circuits the chain.

mod compression;
mod security;

pub use compression::{Compression, CompressionConfig};
pub use security::{SecurityConfig, SecurityHeaders};

use crate::context::Context;
use crate::error::Result;
use crate::handler::{Control, Handler};
use crate::router::Params;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Deny,
}

pub trait IntoVerdict {
    fn into_verdict(self) -> Result<Verdict>;
}

impl IntoVerdict for () {
    fn into_verdict(self) -> Result<Verdict> {
        Ok(Verdict::Continue)
    }
}

impl IntoVerdict for bool {
    fn into_verdict(self) -> Result<Verdict> {
        Ok(if self { Verdict::Continue } else { Verdict::Deny })
    }
}

impl IntoVerdict for Verdict {
    fn into_verdict(self) -> Result<Verdict> {
        Ok(self)
    }
}

impl<T: IntoVerdict> IntoVerdict for Result<T> {
    fn into_verdict(self) -> Result<Verdict> {
        self.and_then(IntoVerdict::into_verdict)
    }
}

pub type Hook = Arc<dyn Fn(&mut Context, &Params) -> Result<Verdict> + Send + Sync>;

fn hook<F, R>(f: F) -> Hook
where
    F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
    R: IntoVerdict,
{
    Arc::new(move |ctx: &mut Context, params: &Params| f(ctx, params).into_verdict())
}

/// A before/after hook pair. Either side may be absent.
///
/// Cloning shares the hooks; it never copies the underlying closures.
#[derive(Clone, Default)]
pub struct Middleware {
    before: Option<Hook>,
    after: Option<Hook>,
}

impl Middleware {
    /// A middleware with no hooks; see [`Middleware::with_before`] and
    /// [`Middleware::with_after`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain callable middleware: before-hook only.
    pub fn before<F, R>(f: F) -> Self
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        Self::new().with_before(f)
    }

    pub fn after<F, R>(f: F) -> Self
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        Self::new().with_after(f)
    }

    pub fn with_before<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        self.before = Some(hook(f));
        self
    }

    pub fn with_after<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
        R: IntoVerdict,
    {
        self.after = Some(hook(f));
        self
    }

    pub fn has_before(&self) -> bool {
        self.before.is_some()
    }

    pub fn has_after(&self) -> bool {
        self.after.is_some()
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("before", &self.has_before())
            .field("after", &self.has_after())
            .finish()
    }
}

/// Anything accepted by `add_middleware`: one middleware or an ordered list.
pub trait IntoMiddlewares {
    fn into_middlewares(self) -> Vec<Middleware>;
}

impl IntoMiddlewares for Middleware {
    fn into_middlewares(self) -> Vec<Middleware> {
        vec![self]
    }
}

impl IntoMiddlewares for Vec<Middleware> {
    fn into_middlewares(self) -> Vec<Middleware> {
        self
    }
}

impl<const N: usize> IntoMiddlewares for [Middleware; N] {
    fn into_middlewares(self) -> Vec<Middleware> {
        self.into()
    }
}

impl IntoMiddlewares for &[Middleware] {
    fn into_middlewares(self) -> Vec<Middleware> {
        self.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    RunningBefore,
    RunningHandler,
    RunningAfter,
    Done,
    ShortCircuited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed(Control),
    /// A hook denied access during the given stage.
    Denied(Stage),
    /// A hook or the handler halted the request; nothing else ran.
    Halted,
}

/// Runs one route's middleware around its handler.
///
/// Errors from hooks or the handler propagate unchanged; once one has been
/// raised no further hook runs.
pub struct Chain<'a> {
    middleware: &'a [Middleware],
    state: ChainState,
}

impl<'a> Chain<'a> {
    pub fn new(middleware: &'a [Middleware]) -> Self {
        Self {
            middleware,
            state: ChainState::Pending,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    fn transition(&mut self, next: ChainState) {
        tracing::trace!(from = ?self.state, to = ?next, "middleware chain");
        self.state = next;
    }

    pub fn run(
        &mut self,
        ctx: &mut Context,
        params: &Params,
        handler: &dyn Handler,
    ) -> Result<ChainOutcome> {
        self.transition(ChainState::RunningBefore);
        for before in self.middleware.iter().filter_map(|m| m.before.as_ref()) {
            if before(ctx, params)? == Verdict::Deny {
                self.transition(ChainState::ShortCircuited);
                return Ok(ChainOutcome::Denied(Stage::Before));
            }
            if ctx.is_halted() {
                self.transition(ChainState::ShortCircuited);
                return Ok(ChainOutcome::Halted);
            }
        }

        self.transition(ChainState::RunningHandler);
        let control = handler.call(ctx, params)?;
        if ctx.is_halted() {
            self.transition(ChainState::ShortCircuited);
            return Ok(ChainOutcome::Halted);
        }

        self.transition(ChainState::RunningAfter);
        for after in self.middleware.iter().rev().filter_map(|m| m.after.as_ref()) {
            if after(ctx, params)? == Verdict::Deny {
                self.transition(ChainState::ShortCircuited);
                return Ok(ChainOutcome::Denied(Stage::After));
            }
            if ctx.is_halted() {
                self.transition(ChainState::ShortCircuited);
                return Ok(ChainOutcome::Halted);
            }
        }

        self.transition(ChainState::Done);
        Ok(ChainOutcome::Completed(control))
    }
}
