//! LEAP client protocol.
//!
//! A LEAP host (typically a viewer) launches a script and talks to it over a
//! duplex byte stream, usually the script's stdin/stdout. Every message is an
//! LLSD notation value wrapped in a `<len>:` frame.
//!
//! # Crate Structure
//!
//! - [`value`]: LLSD values and the notation encoder/decoder
//! - [`frame`]: `<len>:<payload>` framing, blocking and `tokio_util` codec
//! - [`client`]: async request/reply client with pump listeners (behind `client` feature)
//! - [`logging`]: stderr `tracing` setup for scripts (behind `logging` feature)

/// Re-export value types.
pub mod value {
    pub use leapwire_value::*;
}

/// Re-export frame types.
pub mod frame {
    pub use leapwire_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use leapwire_client::*;
}

#[cfg(feature = "logging")]
pub mod logging;
