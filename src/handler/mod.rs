use crate::context::Context;
use crate::error::Result;
use crate::router::Params;

/// What the router should do once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The request has been handled.
    Done,
    /// Hand the request on to the next matching route.
    Pass,
}

pub trait IntoControl {
    fn into_control(self) -> Result<Control>;
}

impl IntoControl for () {
    fn into_control(self) -> Result<Control> {
        Ok(Control::Done)
    }
}

impl IntoControl for Control {
    fn into_control(self) -> Result<Control> {
        Ok(self)
    }
}

impl<T: IntoControl> IntoControl for Result<T> {
    fn into_control(self) -> Result<Control> {
        self.and_then(IntoControl::into_control)
    }
}

pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: &mut Context, params: &Params) -> Result<Control>;
}

impl<F, R> Handler for F
where
    F: Fn(&mut Context, &Params) -> R + Send + Sync + 'static,
    R: IntoControl,
{
    fn call(&self, ctx: &mut Context, params: &Params) -> Result<Control> {
        (self)(ctx, params).into_control()
    }
}
