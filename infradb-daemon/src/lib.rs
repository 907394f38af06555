//! infradb daemon: JSON-over-Unix-socket read API, queued sync processor and
//! optional periodic sync.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, request_sync, send_request, DaemonRequest,
    DaemonResponse, ResponseStatus,
};
pub use runtime::{dispatch_read, init_tracing, run, start_blocking};
