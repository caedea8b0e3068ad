//! Server side of cellsync: the canonical ordered sequence, the iteration
//! history with per-client watermarks, and the request dispatcher that ties
//! them together. Everything here is single-threaded; the owning actor
//! serializes requests through its mailbox.

mod history;
mod sequence;
mod service;

pub use history::HistoryLog;
pub use sequence::Sequence;
pub use service::{NopService, ServerService, Service};
