//! REST request pipeline.
//!
//! Service wrappers build a [`Request`], hand it to a [`RestConnector`] and
//! get a [`Response`] back through the request callback on their own tick.
//! Transport failures never surface as errors from `send`; they arrive as a
//! failed `Response`.

mod connector;
mod request;
mod response;


pub use connector::RestConnector;
pub use request::{Form, Request, ResponseCallback};
pub use response::Response;
