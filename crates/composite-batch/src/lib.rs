//! composite-batch: batch compositing of foreground images onto a shared background
//!
//! A submitted batch is split into fixed-size chunks. For each chunk the
//! background is fitted to the remote pixel budget once, then every
//! foreground is fitted into the same output box and sent to the remote
//! compositor under a bounded worker width, with exponential backoff on
//! transient failures. Progress lives in a TTL-swept session store and the
//! finished outputs are served as a zip bundle.

pub mod config;
pub mod error;
pub mod imaging;
pub mod processing;
pub mod remote;
pub mod server;

pub use config::CompositeConfig;
pub use error::{Error, Result};
pub use imaging::{fit_dimensions, BackgroundSpec, BoundingBox, Fit};
pub use processing::{
    BatchDispatcher, BatchSubmission, BatchSubmitter, FileTask, Outcome, SessionStore, SessionView,
};
pub use remote::{Compositor, HttpCompositor, RemoteError, RemoteErrorKind, RetryExecutor};
pub use server::CompositeServer;
