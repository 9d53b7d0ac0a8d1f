//! Recipient resolution: optional-group expansion and forward-chain following.
//!
//! Turns a recipient specification into the flat list of terminal parties
//! that actually receive a message. Output order is depth-first pre-order:
//! for a [`RecipientSpec::WithGroups`] entry the group members come first,
//! then whatever the addressed party itself resolves to. Duplicates are kept;
//! callers dedup with [`dedup_parties`].
//!
//! Forward targets are entries too: a party may forward to another party
//! together with some of that party's optional groups.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use super::capability::Registry;
use super::party::{Party, PartyRef, RecipientSpec};
use super::MessagingError;

/// Resolve `entries` into terminal parties.
///
/// # Errors
///
/// - [`MessagingError::InvalidRecipient`] if an entry, group member, or forward
///   target is not a registered messagable kind.
/// - [`MessagingError::OptionalRecipientGroupNotFound`] for an unknown group
///   identifier.
/// - [`MessagingError::ForwardCycleDetected`] if a forward chain loops back
///   onto itself.
/// - Any error raised by a configured accessor.
pub fn resolve(registry: &Registry, entries: &[RecipientSpec]) -> Result<Vec<Party>, MessagingError> {
    let mut resolved = Vec::new();
    let mut path = Vec::new();
    for entry in entries {
        resolve_entry(registry, entry, &mut path, &mut resolved)?;
    }
    Ok(resolved)
}

fn resolve_entry(
    registry: &Registry,
    entry: &RecipientSpec,
    path: &mut Vec<PartyRef>,
    out: &mut Vec<Party>,
) -> Result<(), MessagingError> {
    let party = entry.party();
    for identifier in entry.groups() {
        let group = registry.optional_recipient_group(party, identifier)?;
        trace!(
            party = %PartyRef::of(party),
            group = %identifier,
            members = group.recipients.len(),
            "expanding optional recipients"
        );
        for member in &group.recipients {
            resolve_party(registry, member, path, out)?;
        }
    }
    resolve_party(registry, party, path, out)
}

fn resolve_party(
    registry: &Registry,
    party: &Party,
    path: &mut Vec<PartyRef>,
    out: &mut Vec<Party>,
) -> Result<(), MessagingError> {
    if !registry.is_messagable(party) {
        return Err(MessagingError::InvalidRecipient(format!("{party:?}")));
    }

    let key = PartyRef::of(party);
    if path.contains(&key) {
        return Err(MessagingError::ForwardCycleDetected(key));
    }

    let Some(targets) = registry.forward_to(party)? else {
        out.push(Arc::clone(party));
        return Ok(());
    };

    trace!(party = %key, targets = targets.len(), "following forward");
    path.push(key);
    for target in &targets {
        resolve_entry(registry, target, path, out)?;
    }
    path.pop();
    Ok(())
}

/// Remove repeated parties, keeping the first occurrence of each `(kind, id)`.
pub fn dedup_parties(parties: impl IntoIterator<Item = Party>) -> Vec<Party> {
    let mut seen = HashSet::new();
    parties
        .into_iter()
        .filter(|party| seen.insert(PartyRef::of(party)))
        .collect()
}
