use std::sync::Arc;
use std::time::{Duration, Instant};

use scenario_harness::gateway::completions::{ChatProvider, CompletionsAdapter};
use scenario_harness::gateway::{
    Attribution, ChatRequest, FinishReason, GatewayConfig, Message, NoopUsageSink, ProviderError,
    ProviderGateway,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> ChatRequest {
    ChatRequest::new(
        "gpt-4o",
        vec![Message::system("sys"), Message::user("hi")],
        Attribution::new("test"),
    )
}

fn ok_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 34 }
    })
}

fn gateway(server: &MockServer, config: GatewayConfig) -> ProviderGateway<NoopUsageSink> {
    ProviderGateway::connect(
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
        Arc::new(NoopUsageSink),
        config,
    )
    .unwrap()
}

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        network_base_delay: Duration::from_millis(10),
        network_max_delay: Duration::from_millis(20),
        jitter_seed: Some(7),
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn adapter_parses_content_usage_and_sends_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter =
        CompletionsAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter.chat(&request()).await.unwrap();
    assert_eq!(resp.content, "hello");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 12);
    assert_eq!(resp.output_tokens, 34);
}

#[tokio::test]
async fn payload_too_large_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(413).set_body_json(json!({
            "error": { "code": "tokens_limit_reached", "message": "Request body too large" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&server, fast_config()).chat(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestTooLarge { .. }), "{err:?}");
}

#[tokio::test]
async fn daily_quota_429_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "code": "RateLimitReached",
                "message": "Rate limit of 150 per 86400s exceeded for UserByModelByDay. Please wait 40000 seconds before retrying."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&server, fast_config()).chat(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::DailyQuotaExhausted { .. }), "{err:?}");
}

#[tokio::test]
async fn long_retry_after_fails_fast_without_sleeping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3600"))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    let err = gateway(&server, fast_config()).chat(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimitWaitTooLong { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn absurd_retry_after_fails_fast_instead_of_panicking() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e300"))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(&server, fast_config());
    let err = tokio::spawn(async move { gw.chat(request()).await })
        .await
        .expect("gateway task must not panic")
        .unwrap_err();
    assert!(matches!(err, ProviderError::RateLimitWaitTooLong { .. }), "{err:?}");
}

#[tokio::test]
async fn timed_out_call_is_retried_on_the_network_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
        .with_priority(2)
        .mount(&server)
        .await;

    let started = Instant::now();
    let resp = gateway(&server, fast_config())
        .chat(request().timeout(Duration::from_millis(300)))
        .await
        .unwrap();
    assert_eq!(resp.content, "ok");
    assert_eq!(resp.attempts, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn server_error_is_fatal_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&server, fast_config()).chat(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Provider { .. }), "{err:?}");
}

#[tokio::test]
async fn empty_api_key_is_a_config_error() {
    let err = CompletionsAdapter::with_config("", "http://localhost:1", Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, ProviderError::Config(_)), "{err:?}");
}
