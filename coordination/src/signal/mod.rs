//! Reliable signal delivery with signed acknowledgements.
//!
//! Senders write signal envelopes into the shared store keyed by receiver
//! and type; receivers consume them and write back an HMAC-signed ACK. The
//! blocking send variant polls for that ACK with backoff, gives up at the
//! configured timeout, and cancels early when the bus announces the
//! receiver's death.

pub mod crypto;
pub mod protocol;
pub mod types;

pub use crypto::SignatureKey;
pub use protocol::{SignalProtocol, SharedSignalProtocol};
pub use types::{
    derive_message_id, AckEnvelope, DeliveryResult, SendReceipt, SignalEnvelope, SignalType,
};

use crate::identity::ValidationError;
use crate::store::StoreError;

/// Error type for signal operations
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no signal found at {key}")]
    SignalNotFound { key: String },

    #[error("acknowledgement signature verification failed for {message_id}")]
    InvalidAckSignature { message_id: String },

    #[error("no shared secret configured")]
    MissingSecret,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for signal operations
pub type SignalResult<T> = Result<T, SignalError>;
