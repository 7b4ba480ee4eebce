mod common;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use airweave_common::{EntityKind, Error};
use airweave_sync::SyncConfig;

use common::*;

fn value(items: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"value": items}))
}

fn delta_page(items: Value, delta_link: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"value": items, "@odata.deltaLink": delta_link}))
}

async fn mount(server: &MockServer, route: &str, body: ResponseTemplate) {
    Mock::given(method("GET")).and(path(route)).respond_with(body).mount(server).await;
}

async fn mount_folders(server: &MockServer, folders: Value) {
    Mock::given(method("GET"))
        .and(path("/me/mailFolders"))
        .and(query_param("$skip", "0"))
        .respond_with(value(folders))
        .mount(server)
        .await;
}

fn inbox() -> Value {
    json!({"id": "inbox", "displayName": "Inbox", "childFolderCount": 0})
}

fn link(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.uri(), route)
}

#[tokio::test]
async fn test_full_sync_records_folder_delta_link() {
    let server = MockServer::start().await;
    mount_folders(&server, json!([inbox()])).await;
    mount(
        &server,
        "/me/mailFolders/inbox/messages/delta",
        delta_page(
            json!([
                {"id": "m1", "subject": "Quarterly report", "hasAttachments": true},
                {"id": "m2", "subject": "Lunch?"}
            ]),
            link(&server, "/delta/inbox/1"),
        ),
    )
    .await;
    mount(
        &server,
        "/me/messages/m1/attachments",
        value(json!([{"id": "att1", "name": "report.xlsx", "size": 2048}])),
    )
    .await;

    let cursor = cursor_with(json!({}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1", "att1", "m2"]);
    assert_eq!(find(&entities, "att1").kind(), EntityKind::Attachment);
    assert_eq!(trail_ids(find(&entities, "att1")), vec!["inbox", "m1"]);
    assert_eq!(trail_ids(find(&entities, "m2")), vec!["inbox"]);

    assert_eq!(
        cursor.get_field("folder_delta_links"),
        Some(json!({"inbox": link(&server, "/delta/inbox/1")}))
    );
}

#[tokio::test]
async fn test_malformed_message_does_not_block_folder_link() {
    let server = MockServer::start().await;
    mount_folders(&server, json!([inbox()])).await;
    mount(
        &server,
        "/me/mailFolders/inbox/messages/delta",
        delta_page(json!([{"id": "m1", "subject": "Hi"}, {"id": 42}]), link(&server, "/delta/inbox/1")),
    )
    .await;

    let cursor = cursor_with(json!({}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1"]);
    assert_eq!(
        cursor.get_field("folder_delta_links"),
        Some(json!({"inbox": link(&server, "/delta/inbox/1")}))
    );
}

#[tokio::test]
async fn test_incremental_sync_emits_tombstones() {
    let server = MockServer::start().await;
    mount_folders(&server, json!([inbox()])).await;
    mount(
        &server,
        "/delta/inbox/1",
        delta_page(
            json!([
                {"id": "m1", "@removed": {"reason": "deleted"}},
                {"id": "m3", "subject": "New thread"}
            ]),
            link(&server, "/delta/inbox/2"),
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/me/mailFolders/inbox/messages/delta"))
        .respond_with(value(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let cursor = cursor_with(json!({"folder_delta_links": {"inbox": link(&server, "/delta/inbox/1")}}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1", "m3"]);
    let removed = find(&entities, "m1");
    assert!(removed.is_deletion());
    assert_eq!(removed.kind(), EntityKind::Message);
    assert_eq!(trail_ids(removed), vec!["inbox"]);
    assert!(!find(&entities, "m3").is_deletion());

    assert_eq!(
        cursor.get_field("folder_delta_links").unwrap()["inbox"],
        json!(link(&server, "/delta/inbox/2"))
    );
}

#[tokio::test]
async fn test_failed_folder_keeps_its_link_while_others_advance() {
    let server = MockServer::start().await;
    mount_folders(
        &server,
        json!([inbox(), {"id": "sent", "displayName": "Sent Items", "childFolderCount": 0}]),
    )
    .await;
    mount(
        &server,
        "/me/mailFolders/inbox/messages/delta",
        delta_page(json!([{"id": "m1", "subject": "Hi"}]), link(&server, "/delta/inbox/1")),
    )
    .await;
    mount(&server, "/delta/sent/old", ResponseTemplate::new(503)).await;

    let cursor = cursor_with(json!({"folder_delta_links": {"sent": link(&server, "/delta/sent/old")}}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1", "sent"]);
    assert_eq!(
        cursor.get_field("folder_delta_links"),
        Some(json!({
            "inbox": link(&server, "/delta/inbox/1"),
            "sent": link(&server, "/delta/sent/old")
        }))
    );
}

#[tokio::test]
async fn test_expired_delta_link_walks_folder_again() {
    let server = MockServer::start().await;
    mount_folders(&server, json!([inbox()])).await;
    mount(
        &server,
        "/delta/inbox/stale",
        ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": "syncStateNotFound", "message": "The sync state is expired"}
        })),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/me/mailFolders/inbox/messages/delta"))
        .respond_with(delta_page(
            json!([{"id": "m1", "subject": "Hi"}]),
            link(&server, "/delta/inbox/fresh"),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let cursor = cursor_with(json!({"folder_delta_links": {"inbox": link(&server, "/delta/inbox/stale")}}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1"]);
    assert_eq!(
        cursor.get_field("folder_delta_links").unwrap()["inbox"],
        json!(link(&server, "/delta/inbox/fresh"))
    );
}

#[tokio::test]
async fn test_legacy_token_is_migrated_with_full_walk() {
    let server = MockServer::start().await;
    mount_folders(&server, json!([inbox()])).await;
    mount(
        &server,
        "/me/mailFolders/inbox/messages/delta",
        delta_page(json!([{"id": "m1", "subject": "Hi"}]), link(&server, "/delta/inbox/1")),
    )
    .await;

    let cursor = cursor_with(json!({"delta_token": "mailbox-wide-token"}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1"]);
    let data = cursor.get_cursor_data();
    assert!(!data.contains_key("delta_token"));
    assert_eq!(data["folder_delta_links"]["inbox"], json!(link(&server, "/delta/inbox/1")));
}

#[tokio::test]
async fn test_child_folders_follow_parent_messages() {
    let server = MockServer::start().await;
    mount_folders(
        &server,
        json!([{"id": "inbox", "displayName": "Inbox", "childFolderCount": 1}]),
    )
    .await;
    mount(
        &server,
        "/me/mailFolders/inbox/messages/delta",
        delta_page(json!([{"id": "m1", "subject": "Hi"}]), link(&server, "/delta/inbox/1")),
    )
    .await;
    mount(
        &server,
        "/me/mailFolders/inbox/childFolders",
        value(json!([{"id": "receipts", "displayName": "Receipts", "childFolderCount": 0}])),
    )
    .await;
    mount(
        &server,
        "/me/mailFolders/receipts/messages/delta",
        delta_page(json!([{"id": "m7", "subject": "Your order"}]), link(&server, "/delta/receipts/1")),
    )
    .await;

    let cursor = cursor_with(json!({}));
    let source = connector("outlook_mail", &server, cursor.clone(), fast_config());
    let entities = collect(source.as_ref()).await;

    assert_eq!(ids(&entities), vec!["inbox", "m1", "receipts", "m7"]);
    assert_eq!(trail_ids(find(&entities, "m7")), vec!["inbox", "receipts"]);

    let links = cursor.get_field("folder_delta_links").unwrap();
    assert!(links.get("inbox").is_some());
    assert!(links.get("receipts").is_some());
}

#[tokio::test]
async fn test_mismatched_cursor_field_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(value(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let config = SyncConfig {
        cursor_field: Some("deltaToken".to_string()),
        ..fast_config()
    };
    let source = connector("outlook_mail", &server, cursor_with(json!({})), config);
    assert!(matches!(source.generate_entities(), Err(Error::Config(_))));
}
