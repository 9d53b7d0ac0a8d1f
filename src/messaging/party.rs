//! Party handles, durable references, and recipient specifications.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A host entity that can take part in messaging.
///
/// Implemented by the application's own record types (users, groups,
/// courses, ...). Whether a record is actually messagable is decided by the
/// [`Registry`](super::capability::Registry): only kinds registered there are
/// valid senders and recipients.
pub trait Record: Send + Sync + fmt::Debug {
    /// Type name used in the durable `(kind, id)` encoding.
    fn kind(&self) -> &str;

    /// Row id of this record within its kind.
    fn id(&self) -> i64;

    /// Upcast used by typed capability callables.
    fn as_any(&self) -> &dyn Any;

    /// Answer a named-method call configured via
    /// [`Accessor::Method`](super::capability::Accessor::Method).
    ///
    /// Returns `None` when the record has no method with that name.
    fn invoke(&self, method: &str) -> Option<MethodOutput> {
        let _ = method;
        None
    }
}

/// Shared handle to a live record.
pub type Party = Arc<dyn Record>;

/// Value returned from a named record method.
#[derive(Debug, Clone)]
pub enum MethodOutput {
    /// A display string.
    Text(String),
    /// Zero or more parties.
    Parties(Vec<Party>),
    /// Zero or more recipient entries, possibly with optional groups.
    Recipients(Vec<RecipientSpec>),
    /// A boolean flag.
    Flag(bool),
    /// No value (e.g. a forward target that is not set).
    Nothing,
}

/// Durable `(kind, id)` reference to a record.
///
/// Serialized as the two-element array `["Kind", id]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyRef {
    /// Record type name.
    pub kind: String,
    /// Record id.
    pub id: i64,
}

impl PartyRef {
    /// Build a reference from its parts.
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Reference to a live party.
    pub fn of(party: &Party) -> Self {
        Self::new(party.kind(), party.id())
    }
}

impl fmt::Display for PartyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

impl Serialize for PartyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.kind, self.id).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PartyRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (kind, id) = <(String, i64)>::deserialize(deserializer)?;
        Ok(Self { kind, id })
    }
}

/// One entry of the recipient list handed to
/// [`Messenger::send`](super::fanout::Messenger::send).
#[derive(Debug, Clone)]
pub enum RecipientSpec {
    /// A party addressed directly.
    Party(Party),
    /// A party plus the identifiers of optional-recipient groups to include.
    WithGroups(Party, Vec<String>),
}

impl RecipientSpec {
    /// The addressed party (the "cause" of everything this entry resolves to).
    pub fn party(&self) -> &Party {
        match self {
            Self::Party(party) | Self::WithGroups(party, _) => party,
        }
    }

    /// Requested optional-recipient group identifiers (empty for bare entries).
    pub fn groups(&self) -> &[String] {
        match self {
            Self::Party(_) => &[],
            Self::WithGroups(_, groups) => groups,
        }
    }
}

impl From<Party> for RecipientSpec {
    fn from(party: Party) -> Self {
        Self::Party(party)
    }
}

impl<S: Into<String>> From<(Party, Vec<S>)> for RecipientSpec {
    fn from((party, groups): (Party, Vec<S>)) -> Self {
        Self::WithGroups(party, groups.into_iter().map(Into::into).collect())
    }
}
