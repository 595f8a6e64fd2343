//! Remote compositing service: client, failure classes, and retry

pub mod compositor;
pub mod http;
pub mod retry;

pub use compositor::{Compositor, RemoteError, RemoteErrorKind};
pub use http::{classify_status, HttpCompositor};
pub use retry::RetryExecutor;
