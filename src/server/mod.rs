//! Protocol front-ends for the signal store
//!
//! - [`udp_responder::UdpResponder`]: UDP request/reply on the request port
//! - [`udp_notifier::UdpNotifier`]: change notifications on request_port + 1
//! - [`lockstep::LockstepServer`]: synchronous TCP request/reply

pub mod lockstep;
pub mod udp_notifier;
pub mod udp_responder;
pub mod wire;

pub use lockstep::LockstepServer;
pub use udp_notifier::UdpNotifier;
pub use udp_responder::UdpResponder;
pub use wire::MAX_MESSAGE_SIZE;
