//! Request execution engine
//!
//! This module provides the transport boundary, the request/response codec
//! and the scheduler that walks a request graph.

pub mod codec;
pub mod scheduler;
pub mod transport;

pub use codec::CodecError;
pub use scheduler::{AbortReason, AbortSignal, Scheduler};
pub use transport::{
    PreparedRequest, RawResponse, ReqwestTransport, Transport, TransportConfig, TransportError,
};
