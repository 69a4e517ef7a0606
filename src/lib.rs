//! A censorship-circumvention network intermediary's core: the domain
//! policy engine, HTTP/TLS payload inspectors, the DNS module (cache,
//! Nose table, upstream resolver, lie-or-passthrough service), the PAC
//! emitter, and the boundary helpers consumed by the out-of-core
//! transport.
//!
//! Deliberately out of scope: the raw-socket packet forger, port
//! forwarders, SOCKS/redirect front-ends, the CLI, and platform-specific
//! interface enumeration.

pub mod boundary;
pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod hosts;
pub mod insecure_tls;
pub mod inspect;
pub mod nose;
pub mod options;
pub mod pac;
pub mod policy;
pub mod world;

pub use error::{Error, Result};
pub use world::World;
