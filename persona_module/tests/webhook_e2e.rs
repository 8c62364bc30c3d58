mod test_support;

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use mockito::{Matcher, Server};
use persona_module::service::{build_router, route_event_at, AppState, EventResponse};
use sha2::Sha256;
use tempfile::TempDir;

use test_support::{event_callback, test_config, OPERATOR_ID, PERSONA_ID};

fn status(body: &'static str) -> (StatusCode, EventResponse) {
    (StatusCode::OK, EventResponse::Status(body))
}

fn slack_signed_headers(secret: &str, timestamp: i64, body: &[u8]) -> HeaderMap {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    let signature = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-slack-request-timestamp",
        HeaderValue::from_str(&timestamp.to_string()).unwrap(),
    );
    headers.insert("x-slack-signature", HeaderValue::from_str(&signature).unwrap());
    headers
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();

    let result = route_event_at(
        &state,
        &HeaderMap::new(),
        br#"{"type":"url_verification","challenge":"abc123"}"#,
        Utc::now(),
    );
    assert_eq!(
        result,
        (StatusCode::OK, EventResponse::Challenge("abc123".to_string()))
    );
    control.stop_and_join().await;
}

#[tokio::test]
async fn message_and_mention_pair_generates_once() {
    let mut server = Server::new_async().await;
    let completion = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::Regex("what is our risk exposure".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Concentrated in one channel."}}]}"#)
        .expect(1)
        .create_async()
        .await;
    let slack = server
        .mock("POST", "/chat.postMessage")
        .match_header("authorization", "Bearer xoxb-test")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "channel": "C123",
            "text": "Concentrated in one channel.",
            "thread_ts": "1700000000.000100"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok":true,"ts":"1700000001.000100"}"#)
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, &server.url(), 3, 0)).unwrap();
    let text = format!("<@{}> what is our risk exposure?", PERSONA_ID);
    let headers = HeaderMap::new();

    let message = event_callback("message", "U1", &text, "1700000000.000100", None);
    let mention = event_callback("app_mention", "U1", &text, "1700000000.000100", None);

    assert_eq!(
        route_event_at(&state, &headers, &message, Utc::now()),
        status("processing")
    );
    assert_eq!(
        route_event_at(&state, &headers, &mention, Utc::now()),
        status("duplicate")
    );
    assert_eq!(
        route_event_at(&state, &headers, &mention, Utc::now()),
        status("duplicate")
    );

    control.stop_and_join().await;
    completion.assert_async().await;
    slack.assert_async().await;

    let thread = state.store.thread("1700000000.000100").unwrap();
    assert_eq!(thread.turn_count, 1);
    assert!(state.store.cooldown().last_response_at.contains_key("roman"));
}

#[tokio::test]
async fn failed_generation_leaves_counters_untouched() {
    let mut server = Server::new_async().await;
    let completion = server
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;
    let slack = server
        .mock("POST", "/chat.postMessage")
        .expect(0)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, &server.url(), 3, 60)).unwrap();
    let body = event_callback(
        "app_mention",
        "U1",
        &format!("<@{}> strategy check", PERSONA_ID),
        "1700000000.000200",
        None,
    );

    assert_eq!(
        route_event_at(&state, &HeaderMap::new(), &body, Utc::now()),
        status("processing")
    );
    control.stop_and_join().await;
    completion.assert_async().await;
    slack.assert_async().await;

    let thread = state.store.thread("1700000000.000200").unwrap();
    assert_eq!(thread.turn_count, 0);
    assert!(state.store.cooldown().paused_until.is_none());
}

#[tokio::test]
async fn thread_turn_limit_stops_further_replies() {
    let mut server = Server::new_async().await;
    let completion = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"On it."}}]}"#)
        .expect(1)
        .create_async()
        .await;
    let slack = server
        .mock("POST", "/chat.postMessage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, &server.url(), 1, 0)).unwrap();
    let headers = HeaderMap::new();
    let text = format!("<@{}> status?", PERSONA_ID);

    let first = event_callback("app_mention", OPERATOR_ID, &text, "1700000000.000301", Some("1700000000.000300"));
    assert_eq!(
        route_event_at(&state, &headers, &first, Utc::now()),
        status("processing")
    );
    let store = state.store.clone();
    wait_for(|| {
        store
            .thread("1700000000.000300")
            .is_some_and(|thread| thread.turn_count == 1)
    })
    .await;

    let second = event_callback("app_mention", OPERATOR_ID, &text, "1700000000.000302", Some("1700000000.000300"));
    assert_eq!(
        route_event_at(&state, &headers, &second, Utc::now()),
        status("max_turns")
    );

    control.stop_and_join().await;
    completion.assert_async().await;
    slack.assert_async().await;
    assert_eq!(state.store.thread("1700000000.000300").unwrap().turn_count, 1);
}

#[tokio::test]
async fn filtered_events_still_get_200() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();
    let headers = HeaderMap::new();
    let now = Utc::now();

    assert_eq!(
        route_event_at(&state, &headers, b"not json", now),
        status("invalid_payload")
    );

    let bot = br#"{"token":"verify-token","type":"event_callback","event":{"type":"message","text":"<@UCEO> risk","channel":"C123","ts":"1.1","bot_id":"B1"}}"#;
    assert_eq!(route_event_at(&state, &headers, bot, now), status("ignored_bot"));

    let edited = br#"{"token":"verify-token","type":"event_callback","event":{"type":"message","subtype":"message_changed","channel":"C123","ts":"1.2"}}"#;
    assert_eq!(route_event_at(&state, &headers, edited, now), status("ignored_subtype"));

    let reaction = br#"{"token":"verify-token","type":"event_callback","event":{"type":"reaction_added","user":"U1"}}"#;
    assert_eq!(route_event_at(&state, &headers, reaction, now), status("not_relevant_event"));

    let untagged = event_callback("message", "U1", "big strategy shift today", "1.3", None);
    assert_eq!(route_event_at(&state, &headers, &untagged, now), status("not_for_this_bot"));

    let other_persona = event_callback("message", OPERATOR_ID, "<@UCFO> what's the risk?", "1.4", None);
    assert_eq!(route_event_at(&state, &headers, &other_persona, now), status("not_addressed"));

    let chatter = event_callback("message", "UCFO", "<@UCEO> lunch?", "1.5", None);
    assert_eq!(route_event_at(&state, &headers, &chatter, now), status("irrelevant"));

    let missing_ts = br#"{"token":"verify-token","type":"event_callback","event":{"type":"app_mention","text":"<@UROMAN> hi","channel":"C123"}}"#;
    assert_eq!(route_event_at(&state, &headers, missing_ts, now), status("invalid_payload"));

    control.stop_and_join().await;
    assert_eq!(state.store.thread_count(), 0);
}

#[tokio::test]
async fn other_channels_are_ignored_but_dms_are_not() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();
    let headers = HeaderMap::new();
    let now = Utc::now();

    let elsewhere = br#"{"token":"verify-token","type":"event_callback","event":{"type":"app_mention","user":"U1","text":"<@UROMAN> risk","channel":"C999","ts":"2.1"}}"#;
    assert_eq!(route_event_at(&state, &headers, elsewhere, now), status("other_channel"));

    let dm_chatter = br#"{"token":"verify-token","type":"event_callback","event":{"type":"message","user":"U1","text":"<@UCEO> lunch?","channel":"D42","ts":"2.2"}}"#;
    assert_eq!(route_event_at(&state, &headers, dm_chatter, now), status("irrelevant"));

    control.stop_and_join().await;
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();

    let body = br#"{"token":"forged","type":"event_callback","event":{"type":"app_mention","user":"U1","text":"<@UROMAN> hi","channel":"C123","ts":"3.1"}}"#;
    assert_eq!(
        route_event_at(&state, &HeaderMap::new(), body, Utc::now()),
        (StatusCode::UNAUTHORIZED, EventResponse::Status("invalid_token"))
    );
    control.stop_and_join().await;
}

#[tokio::test]
async fn http_endpoints_serve_health_and_challenge() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "Roman bot is running.");

    let challenge = client
        .post(format!("http://{}/", addr))
        .header("content-type", "application/json")
        .body(r#"{"type":"url_verification","challenge":"abc123"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(challenge.status(), reqwest::StatusCode::OK);
    assert_eq!(challenge.text().await.unwrap(), "abc123");

    let status: serde_json::Value = client
        .get(format!("http://{}/status", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["persona"], "roman");
    assert_eq!(status["threads_tracked"], 0);

    server.abort();
    control.stop_and_join().await;
}

#[tokio::test]
async fn missing_token_without_signature_is_unauthorized() {
    let temp = TempDir::new().unwrap();
    let (state, control) =
        AppState::build(test_config(&temp, "http://127.0.0.1:9", 3, 0)).unwrap();

    let body = br#"{"type":"event_callback","event":{"type":"app_mention","user":"UEVIL","text":"<@UROMAN> hi","channel":"C123","ts":"5.1"}}"#;
    assert_eq!(
        route_event_at(&state, &HeaderMap::new(), body, Utc::now()),
        (StatusCode::UNAUTHORIZED, EventResponse::Status("missing_token"))
    );
    control.stop_and_join().await;
    assert_eq!(state.store.thread_count(), 0);
}

#[tokio::test]
async fn signed_request_may_omit_token() {
    let mut server = Server::new_async().await;
    let completion = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"Signed and sealed."}}]}"#)
        .expect(1)
        .create_async()
        .await;
    let slack = server
        .mock("POST", "/chat.postMessage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp, &server.url(), 3, 0);
    config.signing_secret = Some("shh".to_string());
    let (state, control) = AppState::build(config).unwrap();

    let now = Utc::now();
    let body = br#"{"type":"event_callback","event":{"type":"app_mention","user":"U1","text":"<@UROMAN> risk?","channel":"C123","ts":"6.1"}}"#;
    assert_eq!(
        route_event_at(&state, &HeaderMap::new(), body, now),
        (StatusCode::UNAUTHORIZED, EventResponse::Status("missing_signature"))
    );
    let headers = slack_signed_headers("shh", now.timestamp(), body);
    assert_eq!(route_event_at(&state, &headers, body, now), status("processing"));

    control.stop_and_join().await;
    completion.assert_async().await;
    slack.assert_async().await;
}

#[tokio::test]
async fn challenge_requires_signature_when_secret_is_set() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp, "http://127.0.0.1:9", 3, 0);
    config.signing_secret = Some("shh".to_string());
    let (state, control) = AppState::build(config).unwrap();

    let now = Utc::now();
    let body = br#"{"type":"url_verification","challenge":"abc123"}"#;
    assert_eq!(
        route_event_at(&state, &HeaderMap::new(), body, now),
        (StatusCode::UNAUTHORIZED, EventResponse::Status("missing_signature"))
    );

    let headers = slack_signed_headers("shh", now.timestamp(), body);
    assert_eq!(
        route_event_at(&state, &headers, body, now),
        (StatusCode::OK, EventResponse::Challenge("abc123".to_string()))
    );
    control.stop_and_join().await;
}
