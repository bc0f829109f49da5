mod broker;
mod discovery;
mod error;
mod glob;
mod index;
mod refresh;
mod residency;

pub use broker::OutboundUpdate;
pub use discovery::{default_session_log_directories, discover, Candidate};
pub use error::{Error, Result};
pub use glob::glob_match;
pub use index::{PerformanceStats, TraceIndex};
