//! Batch submission, outcome collection and the channel entry point

pub mod channel;
pub mod collector;
pub mod types;

pub use channel::Channel;
pub use collector::ResponseCollector;
pub use types::{BatchAborted, BatchRequest, BatchResponse, Outcome, ResponseBody};
