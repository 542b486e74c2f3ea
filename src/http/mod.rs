//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection
//!     → request.rs (parse upgrade request, keep raw header lines)
//!     → upgrade.rs (is this a websocket upgrade at all?)
//!     → [tunnel layer forwards request.rs bytes to the target]
//!     → response.rs (parse target's answer, hand to filter, serialize)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Messages are re-serialized from their raw lines, never normalized
//! - Parsing never reads past the end of a message (codec.rs)
//! - After the handshake this layer is out of the picture entirely

pub mod codec;
pub mod request;
pub mod response;
pub mod upgrade;

pub use codec::{CodecError, CodecLimits, RawHeader};
pub use request::UpgradeRequest;
pub use response::HandshakeResponse;
pub use upgrade::{header_contains_token, is_upgrade_request};
