//! Daemon runtime: one sync session plus the control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request_status, request_stop, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{run, start_blocking, DaemonStatus};
