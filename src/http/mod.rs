pub(crate) mod request;
pub(crate) mod response;

pub use request::{Body, Method, Request};
pub use response::{reason_phrase, BodyCallback, Response};
