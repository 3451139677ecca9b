mod support;

use chrono::{Duration, Utc};
use rulebook_chat::provider::{Error, RetryPolicy};
use rulebook_chat::session::{Message, Session};
use serde_json::{json, Value};
use support::{client, options, text_response, API_KEY, MODEL};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn generate_path() -> String {
    format!("/v1beta/models/{MODEL}:generateContent")
}

#[tokio::test]
async fn generate_concatenates_parts_and_echoes_cache() {
    let server = MockServer::start().await;
    let mut body = text_response(&["Roll ", "initiative."]);
    body["cachedContent"] = json!("cachedContents/c1");

    Mock::given(method("POST"))
        .and(path(generate_path()))
        .and(query_param("key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let gemini = client(options(&server));
    let out = gemini.generate(&Session::new(), "how do I start combat?").await.unwrap();

    assert_eq!(out.text, "Roll initiative.");
    assert_eq!(out.cache_id.as_deref(), Some("cachedContents/c1"));
}

#[tokio::test]
async fn generate_without_candidates_is_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let out = client(options(&server))
        .generate(&Session::new(), "")
        .await
        .unwrap();
    assert_eq!(out.text, "");
    assert!(out.cache_id.is_none());
}

#[tokio::test]
async fn generate_rejection_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(options(&server))
        .generate(&Session::new(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderRejected { .. }));
    assert_eq!(err.status().map(|s| s.as_u16()), Some(400));
}

#[tokio::test]
async fn transient_status_is_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&["ok"])))
        .mount(&server)
        .await;

    let mut opts = options(&server);
    opts.retry = RetryPolicy {
        max_retries: 3,
        base_delay: std::time::Duration::from_millis(1),
    };
    let out = client(opts).generate(&Session::new(), "hi").await.unwrap();

    assert_eq!(out.text, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn stalled_request_times_out_and_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_response(&["late"]))
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&["ok"])))
        .mount(&server)
        .await;

    let mut opts = options(&server);
    opts.request_timeout = Some(std::time::Duration::from_millis(100));
    opts.retry = RetryPolicy {
        max_retries: 1,
        base_delay: std::time::Duration::from_millis(1),
    };
    let out = client(opts).generate(&Session::new(), "hi").await.unwrap();

    assert_eq!(out.text, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn stalled_request_without_retries_surfaces_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_response(&["late"]))
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut opts = options(&server);
    opts.request_timeout = Some(std::time::Duration::from_millis(100));
    let err = client(opts).generate(&Session::new(), "hi").await.unwrap_err();

    match err {
        Error::Transport(e) => assert!(e.is_timeout(), "{e}"),
        other => panic!("expected transport timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn request_carries_window_cache_and_no_file_part() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&["a"])))
        .mount(&server)
        .await;

    let mut session = Session::new();
    for i in 0..4 {
        session.record_turn(Message::user(format!("q{i}")), Message::model(format!("a{i}")));
    }
    session.file_uri = Some("https://files/abc".into());
    session.cache_id = Some("cachedContents/live".into());
    session.cache_expires_at = Some(Utc::now() + Duration::minutes(30));

    let mut opts = options(&server);
    opts.history_turn_limit = 3;
    opts.system_instruction = Some("Quote page numbers.".into());
    client(opts).generate(&session, "next").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent: Value = requests[0].body_json().unwrap();
    let contents = sent["contents"].as_array().unwrap();

    assert_eq!(contents.len(), 3 * 2 + 1);
    assert_eq!(contents[0]["parts"][0]["text"], "q1");
    assert_eq!(contents[6]["parts"][0]["text"], "next");
    assert_eq!(contents[6]["parts"].as_array().unwrap().len(), 1);
    assert_eq!(sent["cachedContent"], "cachedContents/live");
    assert_eq!(sent["systemInstruction"]["parts"][0]["text"], "Quote page numbers.");
}

#[tokio::test]
async fn request_attaches_file_when_cache_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&["a"])))
        .mount(&server)
        .await;

    let mut session = Session::new();
    session.file_uri = Some("https://files/abc".into());
    session.cache_id = Some("cachedContents/stale".into());
    session.cache_expires_at = Some(Utc::now() - Duration::minutes(1));

    client(options(&server)).generate(&session, "hi").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent: Value = requests[0].body_json().unwrap();
    assert!(sent.get("cachedContent").is_none());
    assert_eq!(
        sent["contents"][0]["parts"][1]["fileData"],
        json!({ "mimeType": "application/pdf", "fileUri": "https://files/abc" })
    );
}

#[tokio::test]
async fn title_uses_title_model_and_is_tidied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/title-model:generateContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_response(&["\"Street Samurai Stakeout\"\n"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut opts = options(&server);
    opts.title_model = Some("title-model".into());
    let title = client(opts).generate_title(&Session::new(), "name it").await;
    assert_eq!(title.as_deref(), Some("Street Samurai Stakeout"));
}

#[tokio::test]
async fn title_failure_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let title = client(options(&server))
        .generate_title(&Session::new(), "name it")
        .await;
    assert!(title.is_none());
}
