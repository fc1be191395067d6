//! setu-plc - Control-signal exchange endpoint for robot cell controllers
//!
//! Hosts named scalar signals and exposes them to a supervisory controller
//! over two alternative wire protocols:
//!
//! - a UDP request/reply protocol with asynchronous change notifications
//!   pushed on request_port + 1
//! - a synchronous lock-step TCP protocol (one request, one reply, never
//!   pipelined)
//!
//! Both front-ends share a single [`memory::SignalStore`].

pub mod clock;
pub mod config;
pub mod error;
pub mod memory;
pub mod notify;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use memory::{ChangeEvent, SignalStore};
