//! Tests for `src/messaging/store.rs`.

use std::sync::Arc;

use serde_json::{json, Map};

use messagable::config::MessagesConfig;
use messagable::messaging::store::connect;
use messagable::messaging::{
    MessageMetadata, MessageStore, MessagingError, NewMessage, PartyRef, RecipientSpec,
};

use crate::support::{registry, setup_messenger, setup_pool, user};

fn new_message(recipient: PartyRef, subject: &str) -> NewMessage {
    NewMessage {
        sender: PartyRef::new("User", 1),
        recipient,
        subject: subject.to_owned(),
        content: "Body".to_owned(),
        sender_copy: false,
        metadata: MessageMetadata::default(),
    }
}

async fn insert(store: &MessageStore, message: &NewMessage) -> Result<i64, MessagingError> {
    let mut conn = store.pool().acquire().await.expect("acquire");
    store.create(&mut *conn, message).await
}

#[tokio::test]
async fn create_and_find_round_trip_fields() {
    let store = MessageStore::new(setup_pool().await);
    let mut message = new_message(PartyRef::new("User", 2), "Hello");
    message.metadata.extra.insert("priority".to_owned(), json!("high"));

    let id = insert(&store, &message).await.expect("create");
    let found = store.find(id).await.expect("find");

    assert_eq!(found.id, id);
    assert_eq!(found.sender, PartyRef::new("User", 1));
    assert_eq!(found.recipient, PartyRef::new("User", 2));
    assert_eq!(found.subject, "Hello");
    assert!(!found.sender_copy);
    assert!(found.is_unread());
    let age = chrono::Utc::now().signed_duration_since(found.created_at);
    assert!(age.num_seconds() >= 0 && age.num_minutes() < 5);
    assert_eq!(found.metadata().extra.get("priority"), Some(&json!("high")));
}

#[tokio::test]
async fn find_missing_message_is_not_found() {
    let store = MessageStore::new(setup_pool().await);
    let err = store.find(404).await.expect_err("should fail");
    assert!(matches!(err, MessagingError::MessageNotFound(404)));
}

#[tokio::test]
async fn mark_as_read_moves_message_between_lists() {
    let store = MessageStore::new(setup_pool().await);
    let vera = PartyRef::new("User", 2);
    let id = insert(&store, &new_message(vera.clone(), "Hello"))
        .await
        .expect("create");

    assert_eq!(store.unread_messages(&vera, 10).await.expect("unread").len(), 1);
    assert!(store.read_messages(&vera, 10).await.expect("read").is_empty());

    let mut message = store.find(id).await.expect("find");
    store.mark_as_read(&mut message).await.expect("mark");
    let first = message.read_at.expect("read_at set");

    let reloaded = store.find(id).await.expect("find");
    assert_eq!(reloaded.read_at, Some(first));
    assert!(store.unread_messages(&vera, 10).await.expect("unread").is_empty());
    assert_eq!(store.read_messages(&vera, 10).await.expect("read").len(), 1);

    store.mark_as_read(&mut message).await.expect("mark again");
    let second = message.read_at.expect("read_at set");
    assert!(second >= first);
    assert_eq!(store.find(id).await.expect("find").read_at, Some(second));
}

#[tokio::test]
async fn mark_as_read_skips_validation() {
    let store = MessageStore::new(setup_pool().await);
    let id = insert(&store, &new_message(PartyRef::new("User", 2), "Hello"))
        .await
        .expect("create");

    let strict = store.clone().with_validator(|_| Err("frozen".to_owned()));
    let mut message = strict.find(id).await.expect("find");
    strict.mark_as_read(&mut message).await.expect("mark");
    assert!(message.is_read());
}

#[tokio::test]
async fn mark_as_read_on_deleted_row_is_not_found() {
    let store = MessageStore::new(setup_pool().await);
    let id = insert(&store, &new_message(PartyRef::new("User", 2), "Hello"))
        .await
        .expect("create");
    let mut message = store.find(id).await.expect("find");

    sqlx::query("DELETE FROM messages WHERE id = ?1")
        .bind(id)
        .execute(store.pool())
        .await
        .expect("delete");

    let err = store.mark_as_read(&mut message).await.expect_err("should fail");
    assert!(matches!(err, MessagingError::MessageNotFound(_)));
}

#[tokio::test]
async fn inbox_excludes_sender_copies_and_sent_lists_them() {
    let messenger = setup_messenger(registry()).await;
    let uma = user(1, "Uma");
    let vera = user(2, "Vera");

    for subject in ["First", "Second"] {
        messenger
            .send(
                &uma,
                &[RecipientSpec::Party(Arc::clone(&vera))],
                subject,
                "Body",
                &Map::new(),
            )
            .await
            .expect("send should succeed");
    }

    let store = messenger.store();
    let uma_ref = PartyRef::new("User", 1);
    let vera_ref = PartyRef::new("User", 2);

    let inbox = store.received_messages(&vera_ref, 10).await.expect("inbox");
    let subjects: Vec<&str> = inbox.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Second", "First"]);

    assert!(store
        .received_messages(&uma_ref, 10)
        .await
        .expect("inbox")
        .is_empty());

    let sent = store.sent_messages(&uma_ref, 1).await.expect("sent");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].sender_copy);
    assert_eq!(sent[0].recipient, uma_ref);
    assert_eq!(sent[0].subject, "Second");
}

#[tokio::test]
async fn blank_subject_is_rejected() {
    let store = MessageStore::new(setup_pool().await);
    let err = insert(&store, &new_message(PartyRef::new("User", 2), "   "))
        .await
        .expect_err("should fail");
    assert!(matches!(err, MessagingError::DeliveryFailed { .. }));
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn size_limits_are_enforced() {
    let store = MessageStore::new(setup_pool().await).with_limits(MessagesConfig {
        max_subject_len: 5,
        max_content_size: 8,
    });

    let long_subject = new_message(PartyRef::new("User", 2), "Too long");
    assert!(matches!(
        store.validate(&long_subject),
        Err(MessagingError::DeliveryFailed { ref reason, .. }) if reason.contains("subject")
    ));

    let mut big_body = new_message(PartyRef::new("User", 2), "Hi");
    big_body.content = "x".repeat(9);
    assert!(matches!(
        store.validate(&big_body),
        Err(MessagingError::DeliveryFailed { ref reason, .. }) if reason.contains("content")
    ));

    big_body.content = "x".repeat(8);
    assert!(store.validate(&big_body).is_ok());
}

#[tokio::test]
async fn malformed_url_is_rejected() {
    let store = MessageStore::new(setup_pool().await);
    let mut message = new_message(PartyRef::new("User", 2), "Hello");
    message.metadata.url = Some("not a url".to_owned());
    assert!(matches!(
        store.validate(&message),
        Err(MessagingError::DeliveryFailed { ref reason, .. }) if reason.contains("url")
    ));

    message.metadata.url = Some("https://example.org/threads/7".to_owned());
    assert!(store.validate(&message).is_ok());
}

#[tokio::test]
async fn custom_validator_reason_is_reported() {
    let store = MessageStore::new(setup_pool().await)
        .with_validator(|m| {
            if m.content.contains("spam") {
                Err("content flagged".to_owned())
            } else {
                Ok(())
            }
        });
    let mut message = new_message(PartyRef::new("User", 2), "Hello");
    message.content = "buy spam".to_owned();

    let err = insert(&store, &message).await.expect_err("should fail");
    assert!(matches!(
        err,
        MessagingError::DeliveryFailed { ref recipient, ref reason }
            if *recipient == PartyRef::new("User", 2) && reason == "content flagged"
    ));
}

#[tokio::test]
async fn update_metadata_persists_url() {
    let store = MessageStore::new(setup_pool().await);
    let id = insert(&store, &new_message(PartyRef::new("User", 2), "Hello"))
        .await
        .expect("create");

    let mut message = store.find(id).await.expect("find");
    assert!(message.url().is_none());
    message.set_url(Some("https://example.org/m/1".to_owned()));
    store.update_metadata(&message).await.expect("update");

    let reloaded = store.find(id).await.expect("find");
    assert_eq!(reloaded.url(), Some("https://example.org/m/1"));
}

#[tokio::test]
async fn connect_creates_file_database_with_schema() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("messages.db");

    let pool = connect(&path, 2).await.expect("connect");
    assert!(path.exists());

    let store = MessageStore::new(pool.clone());
    insert(&store, &new_message(PartyRef::new("User", 2), "Hello"))
        .await
        .expect("create");
    pool.close().await;

    // Reconnecting applies the schema again without losing rows.
    let reopened = MessageStore::new(connect(&path, 1).await.expect("reconnect"));
    assert_eq!(reopened.count().await.expect("count"), 1);
}
