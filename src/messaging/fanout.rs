//! Fan-out: turn one send call into per-recipient deliveries plus a sender copy.
//!
//! Planning ([`plan`]) is pure: it resolves every top-level entry, removes
//! duplicates across entries (the first entry reaching a party is its cause),
//! and decides which other recipients each delivery may see. [`Messenger::send`]
//! then executes the plan inside a single SQLite transaction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::capability::{Handler, Registry};
use super::message::{MessageMetadata, NewMessage, OriginalRecipient};
use super::party::{Party, PartyRef, RecipientSpec};
use super::resolver::{dedup_parties, resolve};
use super::store::MessageStore;
use super::MessagingError;

/// What a custom handler receives instead of a stored message.
#[derive(Debug, Clone)]
pub struct DeliveryPayload {
    /// Subject line.
    pub subject: String,
    /// Body.
    pub content: String,
    /// The recipient list exactly as given to the send call.
    pub original_recipients: Vec<RecipientSpec>,
    /// Other recipients visible to this recipient, when attached.
    pub additional_recipients: Option<Vec<Party>>,
    /// Caller-supplied extra fields.
    pub extra: Map<String, Value>,
}

/// One planned delivery.
#[derive(Clone)]
pub struct Delivery {
    /// Terminal recipient.
    pub recipient: Party,
    /// Other recipients this recipient may see, or `None` when nothing is attached.
    pub additional_recipients: Option<Vec<Party>>,
    /// Handler replacing message creation for the recipient's kind.
    pub handler: Option<Handler>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("recipient", &PartyRef::of(&self.recipient))
            .field(
                "additional_recipients",
                &self
                    .additional_recipients
                    .as_ref()
                    .map(|parties| parties.iter().map(PartyRef::of).collect::<Vec<_>>()),
            )
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Result of planning a send call.
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    /// Deliveries in creation order, one per distinct terminal recipient.
    pub deliveries: Vec<Delivery>,
    /// Every distinct terminal recipient, in discovery order.
    pub all_recipients: Vec<Party>,
}

/// Resolved recipients of one top-level entry.
struct Cause {
    recipients: Vec<Party>,
    store_additionals: bool,
}

/// Plan the deliveries for `recipients`.
///
/// # Errors
///
/// Propagates resolution errors (see [`resolve`]) and accessor errors.
pub fn plan(registry: &Registry, recipients: &[RecipientSpec]) -> Result<DeliveryPlan, MessagingError> {
    let mut causes = Vec::with_capacity(recipients.len());
    let mut everyone = Vec::new();

    for entry in recipients {
        let local = dedup_parties(resolve(registry, std::slice::from_ref(entry))?);
        let store_additionals =
            registry.store_additional_recipients(entry.party())? && local.len() > 1;
        everyone.extend(local.iter().cloned());
        causes.push(Cause {
            recipients: local,
            store_additionals,
        });
    }

    let all_recipients = dedup_parties(everyone);
    let mut processed = HashSet::new();
    let mut deliveries = Vec::with_capacity(all_recipients.len());

    for cause in &causes {
        for recipient in &cause.recipients {
            let key = PartyRef::of(recipient);
            if !processed.insert(key.clone()) {
                continue;
            }

            let additional_recipients = if cause.store_additionals {
                Some(without(&cause.recipients, &key))
            } else if registry.store_additional_recipients(recipient)? && all_recipients.len() > 1 {
                Some(without(&all_recipients, &key))
            } else {
                None
            };

            deliveries.push(Delivery {
                recipient: Arc::clone(recipient),
                additional_recipients,
                handler: registry.handler(recipient)?,
            });
        }
    }

    Ok(DeliveryPlan {
        deliveries,
        all_recipients,
    })
}

fn without(parties: &[Party], excluded: &PartyRef) -> Vec<Party> {
    parties
        .iter()
        .filter(|party| PartyRef::of(party) != *excluded)
        .cloned()
        .collect()
}

fn refs(parties: &[Party]) -> Vec<PartyRef> {
    parties.iter().map(PartyRef::of).collect()
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Ids of the recipient messages, in creation order.
    pub message_ids: Vec<i64>,
    /// Id of the sender copy.
    pub sender_copy_id: i64,
    /// Recipients served by a custom handler.
    pub handled: Vec<PartyRef>,
}

/// Sends messages between registered parties.
#[derive(Debug, Clone)]
pub struct Messenger {
    registry: Registry,
    store: MessageStore,
}

impl Messenger {
    /// Messenger over the given registry and store.
    pub fn new(registry: Registry, store: MessageStore) -> Self {
        Self { registry, store }
    }

    /// Registered messagable kinds.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Underlying message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Send a message from `sender` to `recipients`.
    ///
    /// All deliveries and the sender copy are written in one transaction:
    /// either everything persists or nothing does. Handlers run inside that
    /// scope, before the commit.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::InvalidSender`] if `sender` is not messagable.
    /// - [`MessagingError::InvalidMetadata`] if `extra` holds a non-string `url`.
    /// - Resolution errors (see [`resolve`]), raised before anything is written.
    /// - [`MessagingError::DeliveryFailed`] if a message fails validation or a
    ///   handler fails.
    /// - [`MessagingError::Database`] on SQLite failure.
    pub async fn send(
        &self,
        sender: &Party,
        recipients: &[RecipientSpec],
        subject: &str,
        content: &str,
        extra: &Map<String, Value>,
    ) -> Result<SendReport, MessagingError> {
        if !self.registry.is_messagable(sender) {
            return Err(MessagingError::InvalidSender(format!("{sender:?}")));
        }

        let plan = plan(&self.registry, recipients)?;
        let sender_ref = PartyRef::of(sender);
        let original_recipients: Vec<OriginalRecipient> =
            recipients.iter().map(OriginalRecipient::from_spec).collect();
        let mut metadata = MessageMetadata::from_extra(extra)?;
        metadata.original_recipients = original_recipients.clone();

        let mut tx = self.store.pool().begin().await?;
        let mut message_ids = Vec::with_capacity(plan.deliveries.len());
        let mut handled = Vec::new();

        for delivery in &plan.deliveries {
            let recipient = PartyRef::of(&delivery.recipient);

            if let Some(handler) = &delivery.handler {
                let payload = DeliveryPayload {
                    subject: subject.to_owned(),
                    content: content.to_owned(),
                    original_recipients: recipients.to_vec(),
                    additional_recipients: delivery.additional_recipients.clone(),
                    extra: extra.clone(),
                };
                handler(sender, &payload).map_err(|err| match err {
                    err @ MessagingError::DeliveryFailed { .. } => err,
                    other => MessagingError::DeliveryFailed {
                        recipient: recipient.clone(),
                        reason: other.to_string(),
                    },
                })?;
                debug!(recipient = %recipient, "delivered via handler");
                handled.push(recipient);
                continue;
            }

            let mut message_metadata = metadata.clone();
            message_metadata.additional_recipients = delivery
                .additional_recipients
                .as_deref()
                .map(refs)
                .unwrap_or_default();
            let id = self
                .store
                .create(
                    &mut *tx,
                    &NewMessage {
                        sender: sender_ref.clone(),
                        recipient: recipient.clone(),
                        subject: subject.to_owned(),
                        content: content.to_owned(),
                        sender_copy: false,
                        metadata: message_metadata,
                    },
                )
                .await?;
            debug!(message_id = id, recipient = %recipient, "delivered");
            message_ids.push(id);
        }

        // The sender copy carries provenance only, never the caller's extras.
        let copy_metadata = MessageMetadata {
            original_recipients,
            additional_recipients: refs(&plan.all_recipients),
            ..MessageMetadata::default()
        };
        let sender_copy_id = self
            .store
            .create(
                &mut *tx,
                &NewMessage {
                    sender: sender_ref.clone(),
                    recipient: sender_ref.clone(),
                    subject: subject.to_owned(),
                    content: content.to_owned(),
                    sender_copy: true,
                    metadata: copy_metadata,
                },
            )
            .await?;

        tx.commit().await?;

        info!(
            sender = %sender_ref,
            entries = recipients.len(),
            recipients = plan.all_recipients.len(),
            stored = message_ids.len(),
            handled = handled.len(),
            "message sent"
        );

        Ok(SendReport {
            message_ids,
            sender_copy_id,
            handled,
        })
    }
}
