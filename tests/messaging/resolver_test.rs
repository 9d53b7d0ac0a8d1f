//! Tests for `src/messaging/resolver.rs`.

use std::sync::Arc;

use messagable::messaging::resolver::{dedup_parties, resolve};
use messagable::messaging::{MessagingError, Party, PartyRef, RecipientSpec};

use crate::support::{group, party, refs, registry, user, Outsider};

fn bare(party: &Party) -> RecipientSpec {
    RecipientSpec::Party(Arc::clone(party))
}

#[test]
fn terminal_party_resolves_to_itself() {
    let v = user(2, "Vera");
    let resolved = resolve(&registry(), &[bare(&v)]).expect("resolve");
    assert_eq!(refs(&resolved), vec![PartyRef::new("User", 2)]);
}

#[test]
fn forwarding_party_is_replaced_by_its_targets() {
    let g = group(10, "Seminar");
    g.forward_to(vec![user(1, "Tutor One"), user(2, "Tutor Two")]);

    let resolved = resolve(&registry(), &[bare(&party(&g))]).expect("resolve");

    assert_eq!(
        refs(&resolved),
        vec![PartyRef::new("User", 1), PartyRef::new("User", 2)]
    );
}

#[test]
fn forward_chains_are_followed_to_the_end() {
    let a = group(1, "A");
    let b = group(2, "B");
    let c = user(3, "Carol");
    b.forward_to(vec![Arc::clone(&c)]);
    a.forward_to(vec![party(&b)]);

    let resolved = resolve(&registry(), &[bare(&party(&a))]).expect("resolve");
    let direct = resolve(&registry(), &[bare(&c)]).expect("resolve");

    assert_eq!(refs(&resolved), refs(&direct));
    assert!(!refs(&resolved).contains(&PartyRef::new("Group", 1)));
    assert!(!refs(&resolved).contains(&PartyRef::new("Group", 2)));
}

#[test]
fn optional_group_members_come_before_the_addressed_party() {
    let g = group(10, "Seminar");
    g.forward_to(vec![user(1, "Student One"), user(2, "Student Two")]);
    g.set_tutors(vec![user(7, "Tutor")]);

    let spec = RecipientSpec::from((party(&g), vec!["tutors"]));
    let resolved = resolve(&registry(), &[spec]).expect("resolve");

    assert_eq!(
        refs(&resolved),
        vec![
            PartyRef::new("User", 7),
            PartyRef::new("User", 1),
            PartyRef::new("User", 2),
        ]
    );
}

#[test]
fn optional_group_members_are_resolved_recursively() {
    let staff = group(20, "Staff");
    staff.forward_to(vec![user(5, "Lead A"), user(6, "Lead B")]);
    let g = group(10, "Seminar");
    g.set_leads(vec![party(&staff)]);

    let spec = RecipientSpec::from((party(&g), vec!["leads"]));
    let resolved = resolve(&registry(), &[spec]).expect("resolve");

    // The seminar itself is terminal here, so it is delivered to as well.
    assert_eq!(
        refs(&resolved),
        vec![
            PartyRef::new("User", 5),
            PartyRef::new("User", 6),
            PartyRef::new("Group", 10),
        ]
    );
}

#[test]
fn resolved_parties_never_forward() {
    let registry = registry();
    let inner = group(2, "Inner");
    inner.forward_to(vec![user(3, "C"), user(4, "D")]);
    let outer = group(1, "Outer");
    outer.forward_to(vec![party(&inner), user(5, "E")]);
    outer.set_tutors(vec![party(&inner)]);

    let resolved = resolve(
        &registry,
        &[
            RecipientSpec::from((party(&outer), vec!["tutors"])),
            bare(&user(6, "F")),
        ],
    )
    .expect("resolve");

    assert!(!resolved.is_empty());
    for recipient in &resolved {
        assert!(registry
            .forward_to(recipient)
            .expect("forward_to")
            .is_none());
    }
}

#[test]
fn forwarding_to_nobody_resolves_to_nothing() {
    let g = group(1, "Empty");
    g.forward_to(Vec::new());
    let resolved = resolve(&registry(), &[bare(&party(&g))]).expect("resolve");
    assert!(resolved.is_empty());
}

#[test]
fn unknown_optional_group_is_an_error() {
    let g = group(1, "Seminar");
    let spec = RecipientSpec::from((party(&g), vec!["assistants"]));
    let err = resolve(&registry(), &[spec]).expect_err("should fail");
    assert!(matches!(
        err,
        MessagingError::OptionalRecipientGroupNotFound { ref identifier, .. } if identifier == "assistants"
    ));
}

#[test]
fn unregistered_party_is_an_invalid_recipient() {
    let outsider: Party = Arc::new(Outsider { id: 1 });
    let err = resolve(&registry(), &[bare(&outsider)]).expect_err("should fail");
    assert!(matches!(err, MessagingError::InvalidRecipient(_)));
}

#[test]
fn unregistered_forward_target_is_an_invalid_recipient() {
    let g = group(1, "Seminar");
    g.forward_to(vec![user(2, "Ok"), Arc::new(Outsider { id: 9 })]);
    let err = resolve(&registry(), &[bare(&party(&g))]).expect_err("should fail");
    assert!(matches!(err, MessagingError::InvalidRecipient(_)));
}

#[test]
fn forward_cycle_is_detected() {
    let a = group(1, "A");
    let b = group(2, "B");
    a.forward_to(vec![party(&b)]);
    b.forward_to(vec![party(&a)]);

    let err = resolve(&registry(), &[bare(&party(&a))]).expect_err("should fail");
    assert!(matches!(
        err,
        MessagingError::ForwardCycleDetected(ref at) if *at == PartyRef::new("Group", 1)
    ));
}

#[test]
fn self_forward_is_a_cycle() {
    let a = group(1, "A");
    a.forward_to(vec![party(&a)]);
    let err = resolve(&registry(), &[bare(&party(&a))]).expect_err("should fail");
    assert!(matches!(err, MessagingError::ForwardCycleDetected(_)));
}

#[test]
fn shared_target_through_two_paths_is_not_a_cycle() {
    let shared = user(9, "Shared");
    let left = group(2, "Left");
    let right = group(3, "Right");
    left.forward_to(vec![Arc::clone(&shared)]);
    right.forward_to(vec![Arc::clone(&shared)]);
    let top = group(1, "Top");
    top.forward_to(vec![party(&left), party(&right)]);

    let resolved = resolve(&registry(), &[bare(&party(&top))]).expect("resolve");

    assert_eq!(
        refs(&resolved),
        vec![PartyRef::new("User", 9), PartyRef::new("User", 9)]
    );
    assert_eq!(refs(&dedup_parties(resolved)), vec![PartyRef::new("User", 9)]);
}

#[test]
fn dedup_keeps_first_occurrence_order() {
    let a = user(1, "A");
    let b = user(2, "B");
    let deduped = dedup_parties(vec![
        Arc::clone(&b),
        Arc::clone(&a),
        Arc::clone(&b),
        Arc::clone(&a),
    ]);
    assert_eq!(
        refs(&deduped),
        vec![PartyRef::new("User", 2), PartyRef::new("User", 1)]
    );
}

#[test]
fn forward_target_can_request_optional_groups() {
    let seminar = group(10, "Seminar");
    seminar.forward_to(vec![user(1, "Student")]);
    seminar.set_tutors(vec![user(7, "Tutor")]);
    let office = group(20, "Office");
    office.forward_to_entries(vec![RecipientSpec::from((party(&seminar), vec!["tutors"]))]);

    let resolved = resolve(&registry(), &[bare(&party(&office))]).expect("resolve");

    assert_eq!(
        refs(&resolved),
        vec![PartyRef::new("User", 7), PartyRef::new("User", 1)]
    );
}

#[test]
fn forward_target_with_unknown_group_is_an_error() {
    let seminar = group(10, "Seminar");
    let office = group(20, "Office");
    office.forward_to_entries(vec![RecipientSpec::from((party(&seminar), vec!["assistants"]))]);

    let err = resolve(&registry(), &[bare(&party(&office))]).expect_err("should fail");
    assert!(matches!(
        err,
        MessagingError::OptionalRecipientGroupNotFound { ref kind, .. } if kind == "Group"
    ));
}

#[test]
fn cycle_through_a_forwarded_group_is_detected() {
    let a = group(1, "A");
    let b = group(2, "B");
    b.set_tutors(vec![party(&a)]);
    b.forward_to(vec![user(3, "C")]);
    a.forward_to_entries(vec![RecipientSpec::from((party(&b), vec!["tutors"]))]);

    let err = resolve(&registry(), &[bare(&party(&a))]).expect_err("should fail");
    assert!(matches!(
        err,
        MessagingError::ForwardCycleDetected(ref at) if *at == PartyRef::new("Group", 1)
    ));
}
