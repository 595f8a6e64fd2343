//! Batch processing: sessions, chunked dispatch, and submission

mod dispatcher;
mod session;
mod submit;
mod sweeper;

pub use dispatcher::{
    output_name, output_names, BatchDispatcher, BatchRun, DispatchOptions, FileTask, FsOutputSink,
    OutputSink,
};
pub use session::{Outcome, OutcomeResult, SessionStore, SessionView};
pub use submit::{BatchSubmission, BatchSubmitter, SubmitReceipt};
pub use sweeper::{schedule_reclaim, spawn_sweeper};
