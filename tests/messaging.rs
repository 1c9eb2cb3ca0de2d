//! Messaging collaborator tests against a mock HTTP server.

use std::sync::Arc;

use botflow::config::Settings;
use botflow::messaging::{MessagingClient, TELEGRAM_BOT_TOKEN};
use botflow::stores::{MemoryStore, SettingStore};
use botflow::types::ChannelType;
use httpmock::prelude::*;
use serde_json::json;

fn settings_for(server: &MockServer) -> Settings {
    Settings {
        telegram_api_base: server.base_url(),
        whatsapp_api_url: Some(server.base_url()),
        whatsapp_instance_id: Some("1101".to_string()),
        whatsapp_access_token: Some("wa-token".to_string()),
        ..Settings::default()
    }
}

#[tokio::test]
async fn telegram_send_posts_the_bot_api_payload() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/botTOKEN123/sendMessage")
                .json_body(json!({
                    "chat_id": "chat-42",
                    "text": "Hi",
                    "parse_mode": "HTML",
                }));
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    store
        .set_setting(TELEGRAM_BOT_TOKEN, "TOKEN123")
        .await
        .unwrap();
    let client = MessagingClient::new(store, settings_for(&server));

    assert!(client.send(&ChannelType::Telegram, "chat-42", "Hi").await);
    mock.assert_async().await;
}

#[tokio::test]
async fn env_token_is_the_fallback_when_no_setting_exists() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/botENVTOKEN/sendMessage");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let settings = Settings {
        telegram_bot_token: Some("ENVTOKEN".to_string()),
        ..settings_for(&server)
    };
    let client = MessagingClient::new(Arc::new(MemoryStore::new()), settings);

    assert!(client.send(&ChannelType::Telegram, "chat-1", "Hi").await);
    mock.assert_async().await;
}

#[tokio::test]
async fn api_rejection_returns_false_without_raising() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(500).body("internal error");
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    store.set_setting(TELEGRAM_BOT_TOKEN, "T").await.unwrap();
    let client = MessagingClient::new(store, settings_for(&server));

    assert!(!client.send(&ChannelType::Telegram, "chat-1", "Hi").await);
}

#[tokio::test]
async fn missing_credentials_drop_the_message_without_a_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200);
        })
        .await;

    // No token in store or environment settings.
    let settings = Settings {
        telegram_api_base: server.base_url(),
        ..Settings::default()
    };
    let client = MessagingClient::new(Arc::new(MemoryStore::new()), settings);

    assert!(!client.send(&ChannelType::Telegram, "chat-1", "Hi").await);
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn whatsapp_send_uses_the_gateway_path_shape() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/waInstance1101/sendMessage/wa-token")
                .json_body(json!({
                    "chatId": "79991234567@c.us",
                    "message": "Hi",
                }));
            then.status(200).json_body(json!({"idMessage": "x"}));
        })
        .await;

    let client = MessagingClient::new(Arc::new(MemoryStore::new()), settings_for(&server));

    assert!(
        client
            .send(&ChannelType::Whatsapp, "79991234567", "Hi")
            .await
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn channel_dispatcher_renders_options_and_reports_failures() {
    use botflow::dispatch::{ChannelDispatcher, DispatchError, Dispatcher, OutboundMessage};
    use botflow::graph::ChoiceOption;
    use botflow::session::Respondent;

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/botT/sendMessage")
                .json_body(json!({
                    "chat_id": "chat-42",
                    "text": "Pick one\n\n- Yes\n- No",
                    "parse_mode": "HTML",
                }));
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let store = Arc::new(MemoryStore::new());
    store.set_setting(TELEGRAM_BOT_TOKEN, "T").await.unwrap();
    let dispatcher = ChannelDispatcher::new(MessagingClient::new(store, settings_for(&server)));

    let respondent = Respondent {
        id: 1,
        bot_id: 1,
        channel: ChannelType::Telegram,
        external_id: "chat-42".to_string(),
        profile: json!({}),
        created_at: chrono::Utc::now(),
    };
    let message = OutboundMessage::with_options(
        "Pick one",
        vec![
            ChoiceOption {
                label: "Yes".into(),
                value: None,
            },
            ChoiceOption {
                label: "No".into(),
                value: None,
            },
        ],
    );

    dispatcher.deliver(&respondent, &message).await.unwrap();
    mock.assert_async().await;

    // A channel without a sender surfaces as a typed delivery error.
    let stray = Respondent {
        channel: ChannelType::Other("viber".into()),
        ..respondent
    };
    assert!(matches!(
        dispatcher.deliver(&stray, &message).await.unwrap_err(),
        DispatchError::Delivery { .. }
    ));
}

#[tokio::test]
async fn unknown_channels_are_dropped() {
    let server = MockServer::start_async().await;
    let client = MessagingClient::new(Arc::new(MemoryStore::new()), settings_for(&server));
    assert!(
        !client
            .send(&ChannelType::Other("viber".into()), "x", "Hi")
            .await
    );
    // Web sends are a successful no-op: the transcript already holds them.
    assert!(client.send(&ChannelType::Web, "x", "Hi").await);
}
