//! The DNS module: wire codec, upstream resolver client, and the
//! service tying caches/policy/Nose together.

pub mod service;
pub mod transport;
pub mod wire;

pub use service::DnsService;
pub use transport::{Transport, UpstreamDescriptor};
