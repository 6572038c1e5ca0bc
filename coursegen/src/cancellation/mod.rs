//! Cooperative cancellation of pipeline runs.
//!
//! Cancelling a run stops new launches and retries; attempts already in
//! flight are left to finish and are recorded.

mod token;

pub use token::CancellationToken;
