pub mod api;
pub mod buffer;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod schema;
pub mod sinks;
pub mod transform;

pub use buffer::{BatchSink, BufferDepth, IngestBuffer};
