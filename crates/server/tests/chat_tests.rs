mod common;

use std::time::Duration;

use common::{spawn_app, spawn_app_on_disk};
use serde_json::{json, Value};

#[tokio::test]
async fn create_or_get_returns_the_same_chat() {
    let app = spawn_app().await;
    let alice = app.create_user("alice@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("bob@example.com", "MASTER", "Bob").await;

    let first: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    // Either side opening the conversation lands in the same chat
    let second: Value = app
        .post_json(&bob, "/api/chat", json!({ "participantId": alice.id }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["participants"].as_array().unwrap().len(), 2);

    let chats: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(chats, 1);

    let own = app
        .post_json(&alice, "/api/chat", json!({ "participantId": alice.id }))
        .await;
    assert_eq!(own.status().as_u16(), 400);

    let missing = app
        .post_json(&alice, "/api/chat", json!({ "participantId": "ghost" }))
        .await;
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn concurrent_messages_are_both_stored_in_order() {
    let app = spawn_app_on_disk().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;

    let chat: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    let (first, second) = tokio::join!(
        app.post_json(&alice, "/api/chat/messages", json!({ "chatId": chat_id, "content": "hello" })),
        app.post_json(&bob, "/api/chat/messages", json!({ "chatId": chat_id, "content": "hi there" })),
    );
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 200);

    let messages: Value = app
        .get(&bob, &format!("/api/chat/messages?chatId={chat_id}"))
        .await
        .json()
        .await
        .unwrap();
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0]["createdAt"].as_str() <= messages[1]["createdAt"].as_str());

    // Bob's read marks Alice's message as read
    let from_alice = messages.iter().find(|m| m["senderId"] == alice.id.as_str()).unwrap();
    assert_eq!(from_alice["read"], true);
    assert_eq!(from_alice["sender"]["name"], "Alice");
}

#[tokio::test]
async fn simultaneous_first_contact_yields_one_chat() {
    let app = spawn_app_on_disk().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;

    let (from_alice, from_bob) = tokio::join!(
        app.post_json(&alice, "/api/chat", json!({ "participantId": bob.id })),
        app.post_json(&bob, "/api/chat", json!({ "participantId": alice.id })),
    );
    assert_eq!(from_alice.status().as_u16(), 200);
    assert_eq!(from_bob.status().as_u16(), 200);

    let from_alice: Value = from_alice.json().await.unwrap();
    let from_bob: Value = from_bob.json().await.unwrap();
    assert_eq!(from_alice["id"], from_bob["id"]);

    let chats: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(chats, 1);
}

#[tokio::test]
async fn chat_list_puts_latest_activity_first() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;
    let carol = app.create_user("c@example.com", "SHOP", "Carol").await;

    let with_bob: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let with_carol: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": carol.id }))
        .await
        .json()
        .await
        .unwrap();

    let chats: Value = app.get(&alice, "/api/chat").await.json().await.unwrap();
    assert_eq!(chats[0]["id"], with_carol["id"]);
    assert_eq!(chats[1]["id"], with_bob["id"]);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let sent = app
        .post_json(
            &alice,
            "/api/chat/messages",
            json!({ "chatId": with_bob["id"], "content": "still free on Friday?" }),
        )
        .await;
    assert_eq!(sent.status().as_u16(), 200);

    let chats: Value = app.get(&alice, "/api/chat").await.json().await.unwrap();
    let chats = chats.as_array().unwrap();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0]["id"], with_bob["id"]);
    assert_eq!(chats[1]["id"], with_carol["id"]);
}

#[tokio::test]
async fn outsiders_cannot_read_or_write() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;
    let mallory = app.create_user("m@example.com", "CLIENT", "Mallory").await;

    let chat: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    let read = app.get(&mallory, &format!("/api/chat/messages?chatId={chat_id}")).await;
    assert_eq!(read.status().as_u16(), 403);

    let write = app
        .post_json(&mallory, "/api/chat/messages", json!({ "chatId": chat_id, "content": "psst" }))
        .await;
    assert_eq!(write.status().as_u16(), 403);

    let empty = app
        .post_json(&alice, "/api/chat/messages", json!({ "chatId": chat_id, "content": "  " }))
        .await;
    assert_eq!(empty.status().as_u16(), 400);
}

#[tokio::test]
async fn clearing_keeps_the_chat() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;

    let chat: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    for content in ["one", "two", "three"] {
        app.post_json(&alice, "/api/chat/messages", json!({ "chatId": chat_id, "content": content }))
            .await;
    }

    let cleared = app
        .client
        .delete(app.url("/api/chat/messages"))
        .bearer_auth(&bob.token)
        .json(&json!({ "chatId": chat_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status().as_u16(), 200);

    let messages: Value = app
        .get(&alice, &format!("/api/chat/messages?chatId={chat_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert!(messages.as_array().unwrap().is_empty());

    let chats: Value = app.get(&alice, "/api/chat").await.json().await.unwrap();
    let chats = chats.as_array().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["participants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn typing_status_expires() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "MASTER", "Bob").await;

    let chat: Value = app
        .post_json(&alice, "/api/chat", json!({ "participantId": bob.id }))
        .await
        .json()
        .await
        .unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    let set = app
        .post_json(&alice, "/api/chat/typing", json!({ "chatId": chat_id }))
        .await;
    assert_eq!(set.status().as_u16(), 200);

    let seen_by_bob: Value = app
        .get(&bob, &format!("/api/chat/typing?chatId={chat_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(seen_by_bob["typingUsers"][0]["userId"], alice.id.as_str());

    // Nobody sees their own typing indicator
    let seen_by_alice: Value = app
        .get(&alice, &format!("/api/chat/typing?chatId={chat_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert!(seen_by_alice["typingUsers"].as_array().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;

    let expired: Value = app
        .get(&bob, &format!("/api/chat/typing?chatId={chat_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert!(expired["typingUsers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn global_chat_round_trip() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;
    let bob = app.create_user("b@example.com", "SHOP", "Bob's Hardware").await;

    let created = app
        .post_json(&alice, "/api/global-chat", json!({ "content": "Anyone know a good tiler?" }))
        .await;
    assert_eq!(created.status().as_u16(), 201);
    let created: Value = created.json().await.unwrap();
    assert_eq!(created["sender"]["name"], "Alice");

    app.post_json(&bob, "/api/global-chat", json!({ "content": "Try the masters search" }))
        .await;

    let history: Value = app.get(&alice, "/api/global-chat").await.json().await.unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], created["id"]);
    assert_eq!(history[1]["sender"]["role"], "SHOP");

    let blank = app
        .post_json(&alice, "/api/global-chat", json!({ "content": "" }))
        .await;
    assert_eq!(blank.status().as_u16(), 400);
}

#[tokio::test]
async fn global_chat_returns_the_latest_hundred_oldest_first() {
    let app = spawn_app().await;
    let alice = app.create_user("a@example.com", "CLIENT", "Alice").await;

    for i in 0..105 {
        let response = app
            .post_json(&alice, "/api/global-chat", json!({ "content": format!("m{i}") }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
    }

    let history: Value = app.get(&alice, "/api/global-chat").await.json().await.unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 100);
    assert_eq!(history[0]["content"], "m5");
    assert_eq!(history[99]["content"], "m104");
}
