//! Mock HTTP server tests for `OpenAiCompatModel::invoke()`.
//!
//! Uses [`wiremock`] to emulate an OpenAI-compatible chat completion
//! endpoint, exercising the full request/response path without a real API.

use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thoughtline_llm::error::LlmError;
use thoughtline_llm::openai_compat::{CORRELATION_HEADER, OpenAiCompatModel};
use thoughtline_llm::{InvokeConfig, LanguageModel};
use thoughtline_types::config::LlmConfig;

fn mock_config(server_url: &str) -> LlmConfig {
    LlmConfig {
        base_url: server_url.into(),
        model: "test-model".into(),
        api_key_env: "THOUGHTLINE_MOCK_UNUSED_KEY".into(),
        ..Default::default()
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test-001",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn invoke_returns_first_choice_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-mock-key"))
        .and(header_exists(CORRELATION_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\":true}")))
        .expect(1)
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "sk-mock-key");
    let text = model
        .invoke("classify this", &InvokeConfig::default())
        .await
        .unwrap();
    assert_eq!(text, "{\"ok\":true}");
}

#[tokio::test]
async fn correlation_id_differs_per_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi")))
        .expect(2)
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let cfg = InvokeConfig::default();
    model.invoke("a", &cfg).await.unwrap();
    model.invoke("b", &cfg).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first = requests[0].headers.get(CORRELATION_HEADER).unwrap();
    let second = requests[1].headers.get(CORRELATION_HEADER).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn request_body_carries_generation_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let cfg = InvokeConfig {
        max_tokens: 77,
        temperature: 0.0,
    };
    model.invoke("the prompt", &cfg).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["max_tokens"], 77);
    assert_eq!(body["messages"][0]["content"], "the prompt");
}

#[tokio::test]
async fn unauthorized_maps_to_auth_failed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "bad");
    let err = model
        .invoke("x", &InvokeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::AuthFailed(ref body) if body.contains("invalid api key")));
}

#[tokio::test]
async fn rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let err = model
        .invoke("x", &InvokeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::RateLimited(_)));
}

#[tokio::test]
async fn server_error_maps_to_request_failed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let err = model
        .invoke("x", &InvokeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::RequestFailed(ref msg) if msg.contains("500")));
}

#[tokio::test]
async fn empty_choices_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": []
        })))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let err = model
        .invoke("x", &InvokeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let model = OpenAiCompatModel::with_api_key(&mock_config(&server.uri()), "k");
    let err = model
        .invoke("x", &InvokeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}
