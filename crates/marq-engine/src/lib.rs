pub mod annotate;
pub mod backend;
pub mod config;
pub mod extract;
pub mod oracle;
pub mod resolve;
pub mod score;
pub mod sink;
pub mod workflow;

pub use marq_common::error;
pub use marq_common::protocol;
