//! Per-type messagable configuration and the typed registry that holds it.
//!
//! Each record kind that wants to send or receive messages registers a
//! [`MessagableOptions`] value with a [`Registry`]. Every configurable option
//! is an [`Accessor`]: a fixed value, the name of a method answered by
//! [`Record::invoke`], or a callable bound to the typed record.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::fanout::DeliveryPayload;
use super::party::{MethodOutput, Party, RecipientSpec, Record};
use super::MessagingError;

/// Callable option bound to a typed record.
pub type Callable<R, T> = Arc<dyn Fn(&R) -> Result<T, MessagingError> + Send + Sync>;

/// Custom delivery replacing message creation for a recipient kind.
///
/// Receives the sender and the delivery payload. An `Err` aborts the whole
/// send.
pub type Handler = Arc<dyn Fn(&Party, &DeliveryPayload) -> Result<(), MessagingError> + Send + Sync>;

/// Conversion from a named-method result into an option's value type.
pub trait FromMethodOutput: Sized {
    /// Convert, or `None` if the output has the wrong shape.
    fn from_output(output: MethodOutput) -> Option<Self>;
}

impl FromMethodOutput for String {
    fn from_output(output: MethodOutput) -> Option<Self> {
        match output {
            MethodOutput::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl FromMethodOutput for bool {
    fn from_output(output: MethodOutput) -> Option<Self> {
        match output {
            MethodOutput::Flag(flag) => Some(flag),
            MethodOutput::Nothing => Some(false),
            _ => None,
        }
    }
}

impl FromMethodOutput for Vec<Party> {
    fn from_output(output: MethodOutput) -> Option<Self> {
        match output {
            MethodOutput::Parties(parties) => Some(parties),
            MethodOutput::Nothing => Some(Vec::new()),
            _ => None,
        }
    }
}

impl FromMethodOutput for Option<Vec<RecipientSpec>> {
    fn from_output(output: MethodOutput) -> Option<Self> {
        match output {
            MethodOutput::Parties(parties) => {
                Some(Some(parties.into_iter().map(RecipientSpec::Party).collect()))
            }
            MethodOutput::Recipients(entries) => Some(Some(entries)),
            MethodOutput::Nothing => Some(None),
            _ => None,
        }
    }
}

/// A configurable option: fixed value, named method, or callable.
pub enum Accessor<R, T> {
    /// Returned as-is for every instance.
    Value(T),
    /// Name of a method answered by [`Record::invoke`].
    Method(String),
    /// Callable evaluated against the instance.
    Callable(Callable<R, T>),
}

impl<R, T> Accessor<R, T> {
    /// Named-method accessor.
    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    /// Infallible callable accessor.
    pub fn callable(f: impl Fn(&R) -> T + Send + Sync + 'static) -> Self {
        Self::Callable(Arc::new(move |record| Ok(f(record))))
    }

    /// Fallible callable accessor.
    pub fn try_callable(
        f: impl Fn(&R) -> Result<T, MessagingError> + Send + Sync + 'static,
    ) -> Self {
        Self::Callable(Arc::new(f))
    }
}

impl<R: Record, T: Clone + FromMethodOutput> Accessor<R, T> {
    /// Invoke-or-return: the single place options are evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::UnknownMethod`] if a named method is not
    /// answered by the record, [`MessagingError::MethodReturnType`] if it
    /// answers with the wrong shape, or whatever a callable returns.
    pub fn evaluate(&self, record: &R) -> Result<T, MessagingError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Method(name) => {
                let output =
                    record
                        .invoke(name)
                        .ok_or_else(|| MessagingError::UnknownMethod {
                            kind: record.kind().to_owned(),
                            method: name.clone(),
                        })?;
                T::from_output(output).ok_or_else(|| MessagingError::MethodReturnType {
                    kind: record.kind().to_owned(),
                    method: name.clone(),
                })
            }
            Self::Callable(f) => f(record),
        }
    }
}

impl<R, T: Clone> Clone for Accessor<R, T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Method(name) => Self::Method(name.clone()),
            Self::Callable(f) => Self::Callable(Arc::clone(f)),
        }
    }
}

impl<R, T: fmt::Debug> fmt::Debug for Accessor<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Method(name) => f.debug_tuple("Method").field(name).finish(),
            Self::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl<R, T> From<T> for Accessor<R, T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<R> From<&str> for Accessor<R, String> {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

/// An evaluated optional-recipient group.
#[derive(Debug, Clone)]
pub struct OptionalRecipientGroup {
    /// Identifier used in [`RecipientSpec::WithGroups`](super::party::RecipientSpec::WithGroups).
    pub identifier: String,
    /// Parties produced by the group's selector.
    pub recipients: Vec<Party>,
    /// Display label.
    pub label: String,
}

struct OptionalGroupConfig<R> {
    identifier: String,
    selector: Accessor<R, Vec<Party>>,
    label: Accessor<R, String>,
}

/// Messaging options for one record kind.
pub struct MessagableOptions<R> {
    sender_name: Option<Accessor<R, String>>,
    recipient_name: Option<Accessor<R, String>>,
    forward_to: Option<Accessor<R, Option<Vec<RecipientSpec>>>>,
    optional_recipients: Vec<OptionalGroupConfig<R>>,
    store_additional_recipients: Accessor<R, bool>,
    handler: Option<Handler>,
}

impl<R> Default for MessagableOptions<R> {
    fn default() -> Self {
        Self {
            sender_name: None,
            recipient_name: None,
            forward_to: None,
            optional_recipients: Vec::new(),
            store_additional_recipients: Accessor::Value(false),
            handler: None,
        }
    }
}

impl<R> MessagableOptions<R> {
    /// Options with defaults: terminal, no groups, no CC storage,
    /// names rendered as `"<Kind>: <id>"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name used when the record sends.
    pub fn sender_name(mut self, accessor: impl Into<Accessor<R, String>>) -> Self {
        self.sender_name = Some(accessor.into());
        self
    }

    /// Display name used when the record receives.
    pub fn recipient_name(mut self, accessor: impl Into<Accessor<R, String>>) -> Self {
        self.recipient_name = Some(accessor.into());
        self
    }

    /// Forward everything addressed to the record.
    ///
    /// Targets are recipient entries, so a forward may opt into the target's
    /// optional groups. An accessor yielding `None` leaves that instance
    /// terminal.
    pub fn forward_to(mut self, accessor: impl Into<Accessor<R, Option<Vec<RecipientSpec>>>>) -> Self {
        self.forward_to = Some(accessor.into());
        self
    }

    /// Declare an optional-recipient group. Identifiers are unique per kind;
    /// a later declaration replaces an earlier one with the same identifier.
    pub fn optional_recipient(
        mut self,
        identifier: impl Into<String>,
        selector: impl Into<Accessor<R, Vec<Party>>>,
        label: impl Into<Accessor<R, String>>,
    ) -> Self {
        let identifier = identifier.into();
        self.optional_recipients
            .retain(|group| group.identifier != identifier);
        self.optional_recipients.push(OptionalGroupConfig {
            identifier,
            selector: selector.into(),
            label: label.into(),
        });
        self
    }

    /// Whether deliveries store the other recipients as additional recipients.
    pub fn store_additional_recipients(mut self, accessor: impl Into<Accessor<R, bool>>) -> Self {
        self.store_additional_recipients = accessor.into();
        self
    }

    /// Deliver through `handler` instead of creating message records.
    pub fn handler(
        mut self,
        handler: impl Fn(&Party, &DeliveryPayload) -> Result<(), MessagingError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

/// Type-erased view of [`MessagableOptions`] used by the registry.
trait Capability: Send + Sync {
    fn sender_name(&self, record: &dyn Record) -> Result<String, MessagingError>;
    fn recipient_name(&self, record: &dyn Record) -> Result<String, MessagingError>;
    fn forward_to(&self, record: &dyn Record) -> Result<Option<Vec<RecipientSpec>>, MessagingError>;
    fn optional_recipients(
        &self,
        record: &dyn Record,
    ) -> Result<Vec<OptionalRecipientGroup>, MessagingError>;
    fn optional_recipient_group(
        &self,
        record: &dyn Record,
        identifier: &str,
    ) -> Result<OptionalRecipientGroup, MessagingError>;
    fn optional_recipient_label(
        &self,
        record: &dyn Record,
        identifier: &str,
    ) -> Result<String, MessagingError>;
    fn store_additional_recipients(&self, record: &dyn Record) -> Result<bool, MessagingError>;
    fn handler(&self) -> Option<Handler>;
}

fn default_name(record: &dyn Record) -> String {
    format!("{}: {}", record.kind(), record.id())
}

fn group_not_found(record: &dyn Record, identifier: &str) -> MessagingError {
    MessagingError::OptionalRecipientGroupNotFound {
        kind: record.kind().to_owned(),
        identifier: identifier.to_owned(),
    }
}

impl<R: Record + 'static> MessagableOptions<R> {
    fn typed<'a>(&self, record: &'a dyn Record) -> Result<&'a R, MessagingError> {
        record
            .as_any()
            .downcast_ref::<R>()
            .ok_or_else(|| MessagingError::InvalidRecipient(format!("{record:?}")))
    }

    fn group(&self, record: &dyn Record, identifier: &str) -> Result<&OptionalGroupConfig<R>, MessagingError> {
        self.optional_recipients
            .iter()
            .find(|group| group.identifier == identifier)
            .ok_or_else(|| group_not_found(record, identifier))
    }
}

impl<R: Record + 'static> Capability for MessagableOptions<R> {
    fn sender_name(&self, record: &dyn Record) -> Result<String, MessagingError> {
        match &self.sender_name {
            Some(accessor) => accessor.evaluate(self.typed(record)?),
            None => Ok(default_name(record)),
        }
    }

    fn recipient_name(&self, record: &dyn Record) -> Result<String, MessagingError> {
        match &self.recipient_name {
            Some(accessor) => accessor.evaluate(self.typed(record)?),
            None => Ok(default_name(record)),
        }
    }

    fn forward_to(&self, record: &dyn Record) -> Result<Option<Vec<RecipientSpec>>, MessagingError> {
        match &self.forward_to {
            Some(accessor) => accessor.evaluate(self.typed(record)?),
            None => Ok(None),
        }
    }

    fn optional_recipients(
        &self,
        record: &dyn Record,
    ) -> Result<Vec<OptionalRecipientGroup>, MessagingError> {
        let typed = self.typed(record)?;
        self.optional_recipients
            .iter()
            .map(|group| {
                Ok(OptionalRecipientGroup {
                    identifier: group.identifier.clone(),
                    recipients: group.selector.evaluate(typed)?,
                    label: group.label.evaluate(typed)?,
                })
            })
            .collect()
    }

    fn optional_recipient_group(
        &self,
        record: &dyn Record,
        identifier: &str,
    ) -> Result<OptionalRecipientGroup, MessagingError> {
        let typed = self.typed(record)?;
        let group = self.group(record, identifier)?;
        Ok(OptionalRecipientGroup {
            identifier: group.identifier.clone(),
            recipients: group.selector.evaluate(typed)?,
            label: group.label.evaluate(typed)?,
        })
    }

    fn optional_recipient_label(
        &self,
        record: &dyn Record,
        identifier: &str,
    ) -> Result<String, MessagingError> {
        let typed = self.typed(record)?;
        self.group(record, identifier)?.label.evaluate(typed)
    }

    fn store_additional_recipients(&self, record: &dyn Record) -> Result<bool, MessagingError> {
        self.store_additional_recipients.evaluate(self.typed(record)?)
    }

    fn handler(&self) -> Option<Handler> {
        self.handler.clone()
    }
}

/// Registry of messagable record kinds.
///
/// A record is messagable exactly when its kind is registered here.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: HashMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.kinds.keys().collect();
        kinds.sort();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the options for `kind`.
    ///
    /// Records of this kind must be instances of `R`.
    pub fn register<R: Record + 'static>(
        &mut self,
        kind: impl Into<String>,
        options: MessagableOptions<R>,
    ) -> &mut Self {
        self.kinds.insert(kind.into(), Arc::new(options));
        self
    }

    /// Whether `party`'s kind is registered.
    pub fn is_messagable(&self, party: &Party) -> bool {
        self.kinds.contains_key(party.kind())
    }

    fn capability_of(&self, party: &Party) -> Result<&dyn Capability, MessagingError> {
        self.kinds
            .get(party.kind())
            .map(|cap| cap.as_ref())
            .ok_or_else(|| MessagingError::InvalidRecipient(format!("{party:?}")))
    }

    /// Display name of `party` as a sender.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn sender_name(&self, party: &Party) -> Result<String, MessagingError> {
        self.capability_of(party)?.sender_name(party.as_ref())
    }

    /// Display name of `party` as a recipient.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn recipient_name(&self, party: &Party) -> Result<String, MessagingError> {
        self.capability_of(party)?.recipient_name(party.as_ref())
    }

    /// Forward targets of `party`, or `None` when it is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn forward_to(&self, party: &Party) -> Result<Option<Vec<RecipientSpec>>, MessagingError> {
        self.capability_of(party)?.forward_to(party.as_ref())
    }

    /// All optional-recipient groups of `party`, evaluated in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn optional_recipients(
        &self,
        party: &Party,
    ) -> Result<Vec<OptionalRecipientGroup>, MessagingError> {
        self.capability_of(party)?.optional_recipients(party.as_ref())
    }

    /// One optional-recipient group of `party`.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::OptionalRecipientGroupNotFound`] if `party`'s
    /// kind declares no group named `identifier`.
    pub fn optional_recipient_group(
        &self,
        party: &Party,
        identifier: &str,
    ) -> Result<OptionalRecipientGroup, MessagingError> {
        self.capability_of(party)?
            .optional_recipient_group(party.as_ref(), identifier)
    }

    /// Current label of one optional-recipient group, without running its selector.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::OptionalRecipientGroupNotFound`] if `party`'s
    /// kind declares no group named `identifier`.
    pub fn optional_recipient_label(
        &self,
        party: &Party,
        identifier: &str,
    ) -> Result<String, MessagingError> {
        self.capability_of(party)?
            .optional_recipient_label(party.as_ref(), identifier)
    }

    /// Whether deliveries involving `party` store additional recipients.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn store_additional_recipients(&self, party: &Party) -> Result<bool, MessagingError> {
        self.capability_of(party)?
            .store_additional_recipients(party.as_ref())
    }

    /// Custom delivery handler of `party`'s kind, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidRecipient`] for unregistered kinds.
    pub fn handler(&self, party: &Party) -> Result<Option<Handler>, MessagingError> {
        Ok(self.capability_of(party)?.handler())
    }
}
