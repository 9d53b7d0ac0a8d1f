//! Message records and the recipient provenance stored in their metadata.
//!
//! Metadata is persisted as JSON. Recipient references use the
//! `["Kind", id]` pair encoding; original recipients that requested
//! optional groups are stored as `[["Kind", id], ["group", ...]]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use super::capability::Registry;
use super::directory::PartyDirectory;
use super::party::{Party, PartyRef, RecipientSpec};
use super::MessagingError;

/// Metadata keys owned by the messaging system; callers cannot override them
/// through extra fields.
pub const RESERVED_METADATA_KEYS: [&str; 3] = ["original_recipients", "additional_recipients", "url"];

/// Stored form of one entry of the original recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OriginalRecipient {
    /// A party addressed directly.
    Bare(PartyRef),
    /// A party addressed together with optional-recipient groups.
    WithGroups(PartyRef, Vec<String>),
}

impl OriginalRecipient {
    /// Encode a live recipient specification entry.
    pub fn from_spec(spec: &RecipientSpec) -> Self {
        match spec {
            RecipientSpec::Party(party) => Self::Bare(PartyRef::of(party)),
            RecipientSpec::WithGroups(party, groups) => {
                Self::WithGroups(PartyRef::of(party), groups.clone())
            }
        }
    }

    /// The addressed party.
    pub fn party_ref(&self) -> &PartyRef {
        match self {
            Self::Bare(party) | Self::WithGroups(party, _) => party,
        }
    }

    /// Requested optional-recipient groups.
    pub fn groups(&self) -> &[String] {
        match self {
            Self::Bare(_) => &[],
            Self::WithGroups(_, groups) => groups,
        }
    }
}

/// Free-form metadata attached to every message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The recipient list exactly as given to the send call.
    #[serde(default)]
    pub original_recipients: Vec<OriginalRecipient>,
    /// Other recipients visible to this message's recipient.
    #[serde(default)]
    pub additional_recipients: Vec<PartyRef>,
    /// Optional link associated with the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Caller-supplied extra fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageMetadata {
    /// Build metadata from caller extras, moving `url` into its own field and
    /// dropping the other reserved keys.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidMetadata`] if `url` is present but is
    /// neither a string nor null.
    pub fn from_extra(extra: &Map<String, Value>) -> Result<Self, MessagingError> {
        let mut extra = extra.clone();
        let url = match extra.remove("url") {
            None | Some(Value::Null) => None,
            Some(Value::String(url)) => Some(url),
            Some(other) => {
                return Err(MessagingError::InvalidMetadata(format!(
                    "url must be a string, got {other}"
                )))
            }
        };
        for key in RESERVED_METADATA_KEYS {
            extra.remove(key);
        }
        Ok(Self {
            url,
            extra,
            ..Self::default()
        })
    }

    /// Parse the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Metadata`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, MessagingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Metadata`] if serialization fails.
    pub fn to_json(&self) -> Result<String, MessagingError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Sending party.
    pub sender: PartyRef,
    /// Receiving party (the sender itself for the sender copy).
    pub recipient: PartyRef,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub content: String,
    /// Whether this is the sender's own archival copy.
    pub sender_copy: bool,
    /// Provenance and extra fields.
    pub metadata: MessageMetadata,
}

/// Display names of one original recipient entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientLabel {
    /// `recipient_name` of the addressed party.
    pub name: String,
    /// Current labels of the requested optional-recipient groups.
    pub groups: Vec<String>,
}

/// A persisted message.
#[derive(Debug)]
pub struct Message {
    /// Row id.
    pub id: i64,
    /// Sending party.
    pub sender: PartyRef,
    /// Receiving party.
    pub recipient: PartyRef,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub content: String,
    /// Whether this is the sender's own archival copy.
    pub sender_copy: bool,
    /// When the recipient read the message.
    pub read_at: Option<DateTime<Utc>>,
    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
    metadata: MessageMetadata,
    additional: OnceCell<Vec<Party>>,
}

impl Message {
    /// Assemble a message from its stored parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: i64,
        sender: PartyRef,
        recipient: PartyRef,
        subject: String,
        content: String,
        sender_copy: bool,
        read_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id,
            sender,
            recipient,
            subject,
            content,
            sender_copy,
            read_at,
            created_at,
            metadata,
            additional: OnceCell::new(),
        }
    }

    /// Stored metadata.
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// `true` once a read timestamp is set.
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// `true` while no read timestamp is set.
    pub fn is_unread(&self) -> bool {
        !self.is_read()
    }

    /// Link stored in the metadata.
    pub fn url(&self) -> Option<&str> {
        self.metadata.url.as_deref()
    }

    /// Replace the stored link. Persist with
    /// [`MessageStore::update_metadata`](super::store::MessageStore::update_metadata).
    pub fn set_url(&mut self, url: Option<String>) {
        self.metadata.url = url;
    }

    /// Decode the original recipient list into live parties.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] if a referenced record
    /// no longer exists.
    pub async fn original_recipients(
        &self,
        directory: &dyn PartyDirectory,
    ) -> Result<Vec<RecipientSpec>, MessagingError> {
        let mut specs = Vec::with_capacity(self.metadata.original_recipients.len());
        for original in &self.metadata.original_recipients {
            let party = directory.fetch(original.party_ref()).await?;
            specs.push(match original {
                OriginalRecipient::Bare(_) => RecipientSpec::Party(party),
                OriginalRecipient::WithGroups(_, groups) => {
                    RecipientSpec::WithGroups(party, groups.clone())
                }
            });
        }
        Ok(specs)
    }

    /// Encode and store the original recipient list.
    pub fn set_original_recipients(&mut self, recipients: &[RecipientSpec]) {
        self.metadata.original_recipients =
            recipients.iter().map(OriginalRecipient::from_spec).collect();
    }

    /// Decode the additional recipients, caching the result on this instance.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] if a referenced record
    /// no longer exists. Failures are not cached.
    pub async fn additional_recipients(
        &self,
        directory: &dyn PartyDirectory,
    ) -> Result<&[Party], MessagingError> {
        let parties = self
            .additional
            .get_or_try_init(|| async {
                let mut parties = Vec::with_capacity(self.metadata.additional_recipients.len());
                for reference in &self.metadata.additional_recipients {
                    parties.push(directory.fetch(reference).await?);
                }
                Ok::<_, MessagingError>(parties)
            })
            .await?;
        Ok(parties.as_slice())
    }

    /// Store the additional recipients and refresh the cache.
    pub fn set_additional_recipients(&mut self, parties: Vec<Party>) {
        self.metadata.additional_recipients = parties.iter().map(PartyRef::of).collect();
        self.additional = OnceCell::new_with(Some(parties));
    }

    /// `recipient_name` of every additional recipient.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] for deleted records or
    /// any error raised by a name accessor.
    pub async fn additional_recipient_names(
        &self,
        directory: &dyn PartyDirectory,
        registry: &Registry,
    ) -> Result<Vec<String>, MessagingError> {
        self.additional_recipients(directory)
            .await?
            .iter()
            .map(|party| registry.recipient_name(party))
            .collect()
    }

    /// Names of the original recipients, each with the current labels of the
    /// optional groups it was addressed with.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] for deleted records,
    /// [`MessagingError::OptionalRecipientGroupNotFound`] if a stored group
    /// identifier is no longer declared, or any accessor error.
    pub async fn original_recipient_names(
        &self,
        directory: &dyn PartyDirectory,
        registry: &Registry,
    ) -> Result<Vec<RecipientLabel>, MessagingError> {
        self.original_recipients(directory)
            .await?
            .iter()
            .map(|spec| {
                let party = spec.party();
                let groups = spec
                    .groups()
                    .iter()
                    .map(|identifier| registry.optional_recipient_label(party, identifier))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RecipientLabel {
                    name: registry.recipient_name(party)?,
                    groups,
                })
            })
            .collect()
    }

    /// `sender_name` of the sending party.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] if the sender is gone.
    pub async fn sender_name(
        &self,
        directory: &dyn PartyDirectory,
        registry: &Registry,
    ) -> Result<String, MessagingError> {
        let sender = directory.fetch(&self.sender).await?;
        registry.sender_name(&sender)
    }

    /// `recipient_name` of the receiving party.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] if the recipient is gone.
    pub async fn recipient_name(
        &self,
        directory: &dyn PartyDirectory,
        registry: &Registry,
    ) -> Result<String, MessagingError> {
        let recipient = directory.fetch(&self.recipient).await?;
        registry.recipient_name(&recipient)
    }
}
