//! This crate provides a client for the [Source RCON protocol], used to run console commands on
//! Source engine game servers and the many servers that speak the same protocol.
//!
//! Two front-ends are available:
//! - `sync` (enabled by default): blocking I/O, usable from any thread.
//! - `async`: the same client on top of [Tokio](https://tokio.rs/).
//!
//! Both share the packet codec in [`packet`] and the same protocol state machines, so they
//! behave identically on the wire.
//!
//! # Example
//! ```rust,no_run
//! use source_rcon_client::{connect, ConnectOptions};
//!
//! fn main() -> source_rcon_client::Result<()> {
//!     let client = connect("127.0.0.1:27015", ConnectOptions::new().password("hunter2"))?;
//!     println!("{}", client.send("status")?);
//!     client.close()
//! }
//! ```
//!
//! # Multi-packet responses
//! A response that does not fit in a single packet is split by the server, and the protocol
//! gives no indication of how many packets to expect. After every command the client sends an
//! empty "mirror" packet; the server's echo of it marks the end of the response. Commands on a
//! single client are serialized, so the mirror echo is never confused with another command's
//! traffic.
//!
//! [Source RCON protocol]: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol

mod auth;
mod command;
pub mod options;
pub mod packet;

#[cfg(feature = "async")]
pub mod r#async;
#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "sync")]
pub use self::sync::{connect, Client, ConnectOptions, Connection, DialFn};

/// Error type for RCON operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server address is empty")]
    MissingAddress,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed packet of {len} bytes")]
    MalformedPacket { len: usize },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("RCON is not initialized")]
    NotInitialized,

    #[error("invalid response type {0} from server")]
    InvalidResponseType(i32),

    #[error("invalid response id {0} from server")]
    InvalidResponseId(i32),

    #[error("invalid response trailer from server")]
    InvalidResponseTrailer,
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
