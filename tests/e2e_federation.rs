//! E2E tests for page inboxes

mod common;

use common::{DOMAIN, RemoteActor, TestServer};
use serde_json::{Value, json};

const ALICE: &str = "https://remote.example/users/alice";
const INBOX: &str = "/pages/FrontPage/inbox";

async fn server_with_alice() -> (TestServer, RemoteActor) {
    let server = TestServer::new().await;
    let alice = RemoteActor::new(ALICE);
    server.register(&alice);
    (server, alice)
}

#[tokio::test]
async fn signed_follow_is_accepted_and_recorded() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");

    let response = server.signed_post(&alice, INBOX, &follow).await;

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"okay": "accepted"}));

    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].follower_actor_id, ALICE);
    assert_eq!(
        followers[0].accepted_from_request_id,
        "https://remote.example/follows/1"
    );

    let sent = server.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].origin_page, "FrontPage");
    assert_eq!(sent[0].inbox, alice.inbox);
    assert_eq!(sent[0].body["type"], "Accept");
    assert_eq!(
        sent[0].body["actor"],
        format!("https://{DOMAIN}/pages/FrontPage/actor")
    );
    assert_eq!(sent[0].body["object"]["id"], "https://remote.example/follows/1");

    assert!(
        server
            .state
            .processed
            .contains("https://remote.example/follows/1")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn resubmitted_follow_is_not_recorded_twice() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");

    let first = server.signed_post(&alice, INBOX, &follow).await;
    let second = server.signed_post(&alice, INBOX, &follow).await;

    assert_eq!(first.status(), 201);
    assert_eq!(second.status(), 201);
    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(server.delivery.sent().len(), 1);
}

#[tokio::test]
async fn undo_removes_follower() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");
    assert_eq!(server.signed_post(&alice, INBOX, &follow).await.status(), 201);

    let undo = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": "https://remote.example/undos/1",
        "type": "Undo",
        "actor": ALICE,
        "object": "https://remote.example/follows/1"
    });
    let response = server.signed_post(&alice, INBOX, &undo).await;

    assert_eq!(response.status(), 201);
    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert!(followers.is_empty());
}

#[tokio::test]
async fn unsigned_request_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");

    let response = server
        .client
        .post(server.url(INBOX))
        .header("Content-Type", "application/activity+json")
        .json(&follow)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(server.delivery.sent().is_empty());
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let signed = serde_json::to_vec(&alice.follow("https://remote.example/follows/1", "FrontPage"))
        .unwrap();
    let sent = serde_json::to_vec(&alice.follow("https://remote.example/follows/2", "FrontPage"))
        .unwrap();

    let response = server
        .signed_post_bytes(&alice, INBOX, &signed, &sent)
        .await;

    assert_eq!(response.status(), 400);
    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert!(followers.is_empty());
}

#[tokio::test]
async fn unknown_signer_is_rejected() {
    let server = TestServer::new().await;
    // Never registered, so its key cannot be fetched
    let mallory = RemoteActor::new("https://remote.example/users/mallory");
    let follow = mallory.follow("https://remote.example/follows/9", "FrontPage");

    let response = server.signed_post(&mallory, INBOX, &follow).await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn non_https_id_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("http://remote.example/follows/1", "FrontPage");

    let response = server.signed_post(&alice, INBOX, &follow).await;

    assert_eq!(response.status(), 400);
    assert!(
        !server
            .state
            .objects
            .has_object("http://remote.example/follows/1")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let body = b"{\"type\": \"Follow\"".to_vec();

    let response = server.signed_post_bytes(&alice, INBOX, &body, &body).await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_inbox_page_is_not_found() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "Missing");

    let response = server
        .signed_post(&alice, "/pages/Missing/inbox", &follow)
        .await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn follow_of_unknown_page_is_not_found() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "Missing");

    let response = server.signed_post(&alice, INBOX, &follow).await;

    assert_eq!(response.status(), 404);
    assert!(server.delivery.sent().is_empty());
}

#[tokio::test]
async fn unhandled_activity_is_server_error() {
    let (server, alice) = server_with_alice().await;
    let like = json!({
        "id": "https://remote.example/likes/1",
        "type": "Like",
        "actor": ALICE,
        "object": format!("https://{DOMAIN}/pages/FrontPage/actor")
    });

    let response = server.signed_post(&alice, INBOX, &like).await;

    assert_eq!(response.status(), 500);
    // Stored, but left for a later pass
    assert!(
        server
            .state
            .objects
            .has_object("https://remote.example/likes/1")
            .await
            .unwrap()
    );
    assert!(
        !server
            .state
            .processed
            .contains("https://remote.example/likes/1")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn created_note_is_attached_to_addressed_page() {
    let (server, alice) = server_with_alice().await;
    let page_actor = format!("https://{DOMAIN}/pages/FrontPage/actor");
    let create = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": "https://remote.example/creates/1",
        "type": "Create",
        "actor": ALICE,
        "to": [page_actor],
        "object": {
            "id": "https://remote.example/notes/1",
            "type": "Note",
            "attributedTo": ALICE,
            "content": "Nice page",
            "to": [page_actor],
            "cc": []
        }
    });

    let response = server.signed_post(&alice, INBOX, &create).await;

    assert_eq!(response.status(), 201);
    let notes = server.state.pages.page_notes("FrontPage").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, "https://remote.example/notes/1");
    assert_eq!(notes[0].content, "Nice page");
}

#[tokio::test]
async fn page_change_reaches_followers() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");
    assert_eq!(server.signed_post(&alice, INBOX, &follow).await.status(), 201);

    let report = server
        .state
        .publish_page_change("FrontPage", "42", "+ new line", None)
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    let sent = server.delivery.sent();
    assert_eq!(sent.len(), 2);
    let create = &sent[1].body;
    assert_eq!(create["type"], "Create");
    assert_eq!(sent[1].inbox, alice.inbox);
    assert_eq!(
        create["object"]["id"],
        format!("https://{DOMAIN}/pages/FrontPage/history/42/diff")
    );
    assert_eq!(create["object"]["summary"], "Page Changes for FrontPage");
    assert_eq!(create["object"]["content"], "+ new line");
}

#[tokio::test]
async fn note_with_plain_http_id_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let page_actor = format!("https://{DOMAIN}/pages/FrontPage/actor");
    let create = json!({
        "id": "https://remote.example/creates/2",
        "type": "Create",
        "actor": ALICE,
        "to": [page_actor],
        "object": {
            "id": "http://remote.example/notes/2",
            "type": "Note",
            "content": "Sneaky",
            "to": [page_actor]
        }
    });

    let response = server.signed_post(&alice, INBOX, &create).await;

    assert_eq!(response.status(), 400);
    assert!(server.state.pages.page_notes("FrontPage").await.unwrap().is_empty());
}

#[tokio::test]
async fn follow_from_plain_http_actor_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let mut follow = alice.follow("https://remote.example/follows/1", "FrontPage");
    follow["actor"] = json!("http://remote.example/users/alice");

    let response = server.signed_post(&alice, INBOX, &follow).await;

    assert_eq!(response.status(), 400);
    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert!(followers.is_empty());
    assert!(server.delivery.sent().is_empty());
}

#[tokio::test]
async fn undo_of_plain_http_reference_is_rejected() {
    let (server, alice) = server_with_alice().await;
    let follow = alice.follow("https://remote.example/follows/1", "FrontPage");
    assert_eq!(server.signed_post(&alice, INBOX, &follow).await.status(), 201);

    let undo = json!({
        "id": "https://remote.example/undos/2",
        "type": "Undo",
        "actor": ALICE,
        "object": "http://remote.example/follows/1"
    });
    let response = server.signed_post(&alice, INBOX, &undo).await;

    assert_eq!(response.status(), 400);
    let followers = server
        .state
        .followers
        .active_followers("FrontPage")
        .await
        .unwrap();
    assert_eq!(followers.len(), 1);
}
