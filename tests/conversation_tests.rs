// Conversation directory tests: creation, membership filtering, sort
// order, and the documented absence of duplicate-pair detection.

mod common;
use common::{buyer_vendor_names, recv_next, TestRig, ALICE, BOB, CAROL};

use std::collections::HashMap;

use marketchat::backend::ChatBackend;
use marketchat::models::MessageKind;
use serde_json::json;

#[tokio::test]
async fn test_new_conversation_starts_empty() {
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);

    let id = alice
        .directory
        .create_conversation(
            &[ALICE.to_string(), BOB.to_string()],
            &buyer_vendor_names(),
        )
        .await
        .expect("create failed");

    let mut sub = alice.directory.subscribe_conversations(ALICE).await;
    let list = recv_next(&mut sub).await;
    assert_eq!(list.len(), 1);

    let conv = &list[0];
    assert_eq!(conv.id, id);
    assert_eq!(conv.participants.len(), 2);
    assert_eq!(conv.last_message, "");
    assert_eq!(conv.last_message_at, 0);
    assert_eq!(conv.unread_for(ALICE), 0);
    assert_eq!(conv.unread_for(BOB), 0);
    assert_eq!(conv.display_name(BOB), "Bob's Woodshop");
}

#[tokio::test]
async fn test_create_requires_exactly_two_participants() {
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);
    let names = HashMap::new();

    let one = alice
        .directory
        .create_conversation(&[ALICE.to_string()], &names)
        .await;
    assert!(one.is_err());

    let three = alice
        .directory
        .create_conversation(
            &[ALICE.to_string(), BOB.to_string(), CAROL.to_string()],
            &names,
        )
        .await;
    assert!(three.is_err());
}

#[tokio::test]
async fn test_directory_filters_by_membership() {
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);
    let bob = rig.client_for(BOB);
    let names = HashMap::new();

    alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &names)
        .await
        .expect("create failed");
    bob.directory
        .create_conversation(&[BOB.to_string(), CAROL.to_string()], &names)
        .await
        .expect("create failed");

    let mut alice_sub = alice.directory.subscribe_conversations(ALICE).await;
    assert_eq!(recv_next(&mut alice_sub).await.len(), 1);

    let mut bob_sub = bob.directory.subscribe_conversations(BOB).await;
    assert_eq!(recv_next(&mut bob_sub).await.len(), 2);

    let mut carol_sub = bob.directory.subscribe_conversations(CAROL).await;
    assert_eq!(recv_next(&mut carol_sub).await.len(), 1);
}

#[tokio::test]
async fn test_directory_sorted_by_latest_message() {
    let rig = TestRig::with_ticking_clock(4_102_444_800_000);
    let alice = rig.client_for(ALICE);
    let names = HashMap::new();

    let first = alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &names)
        .await
        .unwrap();
    let second = alice
        .directory
        .create_conversation(&[ALICE.to_string(), CAROL.to_string()], &names)
        .await
        .unwrap();

    // Messages land in `first`, then `second`; the directory surfaces
    // the most recently active conversation on top each time.
    alice
        .messages
        .send_message(&first, ALICE, "ping", MessageKind::Text, None)
        .await
        .unwrap();
    alice
        .messages
        .send_message(&second, ALICE, "pong", MessageKind::Text, None)
        .await
        .unwrap();

    let mut sub = alice.directory.subscribe_conversations(ALICE).await;
    let list = recv_next(&mut sub).await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, second);
    assert_eq!(list[1].id, first);

    // Another message in `first` reorders the next delivery
    alice
        .messages
        .send_message(&first, ALICE, "again", MessageKind::Text, None)
        .await
        .unwrap();
    let list = recv_next(&mut sub).await;
    assert_eq!(list[0].id, first);
}

#[tokio::test]
async fn test_full_list_redelivered_on_every_change() {
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);
    let names = HashMap::new();

    let mut sub = alice.directory.subscribe_conversations(ALICE).await;
    assert_eq!(recv_next(&mut sub).await.len(), 0);

    alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &names)
        .await
        .unwrap();
    assert_eq!(recv_next(&mut sub).await.len(), 1);

    alice
        .directory
        .create_conversation(&[ALICE.to_string(), CAROL.to_string()], &names)
        .await
        .unwrap();
    // Not a diff: the whole membership-filtered list arrives again
    assert_eq!(recv_next(&mut sub).await.len(), 2);
}

#[tokio::test]
async fn test_duplicate_pair_is_not_deduplicated() {
    // The directory performs no duplicate-pair lookup; callers that skip
    // the check get two parallel conversations. This pins that behavior.
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);
    let names = buyer_vendor_names();

    let first = alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &names)
        .await
        .unwrap();
    let second = alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &names)
        .await
        .unwrap();
    assert_ne!(first, second);

    let mut sub = alice.directory.subscribe_conversations(ALICE).await;
    assert_eq!(recv_next(&mut sub).await.len(), 2);
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let rig = TestRig::new();
    let alice = rig.client_for(ALICE);

    // A record with no participant set goes straight into the backend,
    // as a buggy writer or schema drift would produce
    rig.backend
        .insert_conversation("broken", json!({"id": "broken"}))
        .await
        .expect("raw insert failed");
    alice
        .directory
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], &HashMap::new())
        .await
        .unwrap();

    let mut sub = alice.directory.subscribe_conversations(ALICE).await;
    let list = recv_next(&mut sub).await;
    // The malformed record is dropped at the validation boundary
    assert_eq!(list.len(), 1);
    assert_ne!(list[0].id, "broken");
}
