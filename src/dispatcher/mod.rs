//! Named-callable dispatcher.
//!
//! Every framework operation is looked up by name at call time, so an
//! application may replace one (`map`), bind a lazily built shared
//! instance to one (`register`), or wrap one in filters (`before` and
//! `after`). Names marked protected can be filtered but never rebound.

use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Arguments passed to a dispatched name.
pub type Args = Vec<Value>;

type Instance = Arc<dyn Any + Send + Sync>;

/// What a dispatched name produced: a plain value, or the shared instance
/// of a registered name.
#[derive(Clone)]
pub enum Output {
    Value(Value),
    Instance(Instance),
}

impl Output {
    pub fn null() -> Self {
        Output::Value(Value::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            Output::Instance(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(value) => Some(value),
            Output::Instance(_) => None,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(self) -> Option<Arc<T>> {
        match self {
            Output::Instance(instance) => instance.downcast().ok(),
            Output::Value(_) => None,
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::null()
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

pub trait IntoOutput {
    fn into_output(self) -> Result<Output>;
}

impl IntoOutput for () {
    fn into_output(self) -> Result<Output> {
        Ok(Output::null())
    }
}

impl IntoOutput for Value {
    fn into_output(self) -> Result<Output> {
        Ok(Output::Value(self))
    }
}

impl IntoOutput for String {
    fn into_output(self) -> Result<Output> {
        Ok(Output::Value(Value::String(self)))
    }
}

impl IntoOutput for Output {
    fn into_output(self) -> Result<Output> {
        Ok(self)
    }
}

impl<T: IntoOutput> IntoOutput for Result<T> {
    fn into_output(self) -> Result<Output> {
        self.and_then(IntoOutput::into_output)
    }
}

/// How a filter steers the rest of a dispatch.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Keep going.
    Next,
    /// Skip the remaining filters of this chain.
    Break,
    /// Before a target: skip it and use this output instead. After a
    /// target: replace its output and skip the remaining after-filters.
    Return(Output),
}

pub trait IntoFlow {
    fn into_flow(self) -> Result<Flow>;
}

impl IntoFlow for () {
    fn into_flow(self) -> Result<Flow> {
        Ok(Flow::Next)
    }
}

impl IntoFlow for bool {
    fn into_flow(self) -> Result<Flow> {
        Ok(if self { Flow::Next } else { Flow::Break })
    }
}

impl IntoFlow for Flow {
    fn into_flow(self) -> Result<Flow> {
        Ok(self)
    }
}

impl<T: IntoFlow> IntoFlow for Result<T> {
    fn into_flow(self) -> Result<Flow> {
        self.and_then(IntoFlow::into_flow)
    }
}

pub type Callable<C> = Arc<dyn Fn(&mut C, Args) -> Result<Output> + Send + Sync>;
pub type Filter<C> = Arc<dyn Fn(&mut C, &mut Args, &mut Output) -> Result<Flow> + Send + Sync>;

struct Factory {
    build: Box<dyn Fn() -> Result<Instance> + Send + Sync>,
    instance: OnceCell<Instance>,
}

impl Factory {
    fn instance(&self, name: &str) -> Result<Instance> {
        self.instance
            .get_or_try_init(|| {
                tracing::debug!(name, "constructing registered instance");
                (self.build)()
            })
            .cloned()
    }
}

enum Target<C> {
    Callable(Callable<C>),
    Factory(Arc<Factory>),
}

impl<C> Clone for Target<C> {
    fn clone(&self) -> Self {
        match self {
            Target::Callable(f) => Target::Callable(f.clone()),
            Target::Factory(f) => Target::Factory(f.clone()),
        }
    }
}

struct Entry<C> {
    target: Option<Target<C>>,
    before: Vec<Filter<C>>,
    after: Vec<Filter<C>>,
}

impl<C> Default for Entry<C> {
    fn default() -> Self {
        Self {
            target: None,
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

/// Name table of callables and registered instances, each with its own
/// before and after filters. `C` is the context threaded through every
/// call.
///
/// Cloning shares callables, filters and already-built instances.
pub struct Dispatcher<C> {
    entries: HashMap<String, Entry<C>>,
    reserved: HashSet<String>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            reserved: HashSet::new(),
        }
    }
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            reserved: self.reserved.clone(),
        }
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher")
            .field("names", &names)
            .field("reserved", &self.reserved.len())
            .finish()
    }
}

impl<C: 'static> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as a framework name: it can no longer be mapped,
    /// registered or unregistered. Filters may still be attached.
    pub fn protect(&mut self, name: &str) {
        self.reserved.insert(name.to_string());
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    fn check_reserved(&self, name: &str) -> Result<()> {
        if self.is_reserved(name) {
            tracing::warn!(name, "rejected rebinding of a protected name");
            return Err(Error::ReservedName(name.to_string()));
        }
        Ok(())
    }

    fn bind(&mut self, name: &str, target: Target<C>) {
        self.entries.entry(name.to_string()).or_default().target = Some(target);
    }

    /// Binds `name` to a callable, replacing any previous binding.
    /// Filters already attached to `name` are kept.
    pub fn map<F, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut C, Args) -> R + Send + Sync + 'static,
        R: IntoOutput,
    {
        self.check_reserved(name)?;
        self.insert(name, f);
        Ok(())
    }

    /// Binds without the protected-name check; used to install the
    /// framework's own operations.
    pub(crate) fn insert<F, R>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut C, Args) -> R + Send + Sync + 'static,
        R: IntoOutput,
    {
        tracing::debug!(name, "callable mapped");
        self.bind(
            name,
            Target::Callable(Arc::new(move |ctx: &mut C, args: Args| f(ctx, args).into_output())),
        );
    }

    /// Binds `name` to a shared instance built by `ctor(args)` on first
    /// use.
    pub fn register<T, F>(&mut self, name: &str, ctor: F, args: Args) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        self.register_with(name, ctor, args, |_: &mut T| {})
    }

    /// Like [`Dispatcher::register`]; `configure` runs once on the fresh
    /// instance before it is shared.
    pub fn register_with<T, F, G>(&mut self, name: &str, ctor: F, args: Args, configure: G) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
        G: Fn(&mut T) + Send + Sync + 'static,
    {
        self.check_reserved(name)?;

        let owner = name.to_string();
        let build = move || -> Result<Instance> {
            let mut instance = ctor(args.clone()).map_err(|e| Error::Construction {
                name: owner.clone(),
                reason: e.to_string(),
            })?;
            configure(&mut instance);
            Ok(Arc::new(instance))
        };

        tracing::debug!(name, "instance registered");
        self.bind(
            name,
            Target::Factory(Arc::new(Factory {
                build: Box::new(build),
                instance: OnceCell::new(),
            })),
        );
        Ok(())
    }

    /// Attaches a filter run, in attachment order, before `name`'s target.
    pub fn before<F, R>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut C, &mut Args, &mut Output) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        tracing::debug!(name, "before filter attached");
        self.entries
            .entry(name.to_string())
            .or_default()
            .before
            .push(filter(f));
    }

    /// Attaches a filter run after `name`'s target. After-filters run in
    /// reverse attachment order.
    pub fn after<F, R>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut C, &mut Args, &mut Output) -> R + Send + Sync + 'static,
        R: IntoFlow,
    {
        tracing::debug!(name, "after filter attached");
        self.entries
            .entry(name.to_string())
            .or_default()
            .after
            .push(filter(f));
    }

    /// True when `name` is bound to a callable or a registered instance.
    pub fn has(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map_or(false, |entry| entry.target.is_some())
    }

    /// Drops the binding and filters of `name`.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.check_reserved(name)?;
        self.entries.remove(name);
        Ok(())
    }

    /// Drops every binding and filter. Protected names stay protected.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Dispatches `name`: before-filters, target, then after-filters.
    pub fn invoke(&self, ctx: &mut C, name: &str, args: Args) -> Result<Output> {
        let (entry, target) = match self.entries.get(name) {
            Some(entry) => match entry.target.as_ref() {
                Some(target) => (entry, target),
                None => return Err(Error::UnboundName(name.to_string())),
            },
            None => return Err(Error::UnboundName(name.to_string())),
        };

        let mut args = args;
        let mut output = Output::null();
        let mut short_circuited = false;

        for before in &entry.before {
            match before(ctx, &mut args, &mut output)? {
                Flow::Next => {}
                Flow::Break => break,
                Flow::Return(substitute) => {
                    tracing::debug!(name, "target skipped by before filter");
                    output = substitute;
                    short_circuited = true;
                    break;
                }
            }
        }

        if !short_circuited {
            output = match target {
                Target::Callable(f) => f(ctx, args.clone())?,
                Target::Factory(factory) => Output::Instance(factory.instance(name)?),
            };
        }

        for after in entry.after.iter().rev() {
            match after(ctx, &mut args, &mut output)? {
                Flow::Next => {}
                Flow::Break => break,
                Flow::Return(substitute) => {
                    output = substitute;
                    break;
                }
            }
        }

        Ok(output)
    }

    /// Dispatches a registered name and hands back its shared instance.
    pub fn instance<T: Any + Send + Sync>(&self, ctx: &mut C, name: &str) -> Result<Arc<T>> {
        self.invoke(ctx, name, Args::new())?
            .downcast()
            .ok_or_else(|| Error::TypeMismatch(name.to_string()))
    }
}

fn filter<C, F, R>(f: F) -> Filter<C>
where
    F: Fn(&mut C, &mut Args, &mut Output) -> R + Send + Sync + 'static,
    R: IntoFlow,
{
    Arc::new(move |ctx: &mut C, args: &mut Args, output: &mut Output| f(ctx, args, output).into_flow())
}
