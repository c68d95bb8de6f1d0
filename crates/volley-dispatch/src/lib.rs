//! The dispatch pipeline: due-order selection, execution locking, and
//! rate-gated broker calls with at-most-once semantics.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DispatchError, DispatchResult};
