//! Messaging between record-graph parties.
//!
//! A party is any registered [`Record`](party::Record). Parties may forward
//! everything addressed to them to other parties and may declare optional
//! recipient groups a sender can opt into. Sending resolves the addressed
//! parties down to terminal recipients ([`resolver`]), removes duplicates,
//! and writes one message per recipient plus a sender copy in a single
//! transaction ([`fanout`]).
//!
//! # SQLite Write Pattern
//!
//! Unlike the usual direct pool writes, every message of one send call is
//! inserted on the same transaction so a failing recipient leaves no trace.
//! Read-state and metadata updates go straight to the pool.

pub mod capability;
pub mod directory;
pub mod fanout;
pub mod message;
pub mod party;
pub mod resolver;
pub mod store;

pub use capability::{Accessor, MessagableOptions, OptionalRecipientGroup, Registry};
pub use directory::{InMemoryDirectory, PartyDirectory};
pub use fanout::{DeliveryPayload, Messenger, SendReport};
pub use message::{Message, MessageMetadata, NewMessage, OriginalRecipient};
pub use party::{MethodOutput, Party, PartyRef, RecipientSpec, Record};
pub use store::MessageStore;

/// Errors from the messaging subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message metadata could not be encoded or decoded.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A recipient, group member, or forward target is not messagable.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The sending record is not messagable.
    #[error("invalid sender: {0}")]
    InvalidSender(String),

    /// A requested optional-recipient group is not declared for the kind.
    #[error("optional recipient group {identifier:?} not found on {kind}")]
    OptionalRecipientGroupNotFound {
        /// Record kind that was asked.
        kind: String,
        /// The unknown identifier.
        identifier: String,
    },

    /// A forward chain leads back to a party already on it.
    #[error("forward cycle detected at {0}")]
    ForwardCycleDetected(PartyRef),

    /// A stored recipient reference points at a deleted record.
    #[error("recipient not found: {0}")]
    RecipientNotFound(PartyRef),

    /// Message creation or a custom handler failed; the send was rolled back.
    #[error("delivery to {recipient} failed: {reason}")]
    DeliveryFailed {
        /// Recipient whose delivery failed.
        recipient: PartyRef,
        /// Validation or handler failure.
        reason: String,
    },

    /// A named-method accessor is not answered by the record.
    #[error("{kind} does not answer method {method:?}")]
    UnknownMethod {
        /// Record kind.
        kind: String,
        /// Configured method name.
        method: String,
    },

    /// A named-method accessor returned a value of the wrong shape.
    #[error("{kind} method {method:?} returned an unexpected value")]
    MethodReturnType {
        /// Record kind.
        kind: String,
        /// Configured method name.
        method: String,
    },

    /// No message with this id exists.
    #[error("message not found: {0}")]
    MessageNotFound(i64),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),

    /// Caller-supplied metadata has the wrong shape.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}
