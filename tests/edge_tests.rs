//! Edge gateway tests: origin, rate and size guards, and the LLM passthrough

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{Request, StatusCode, header};
use futures::stream;
use mcp_tool_gateway::config::{LlmConfig, MarketConfig, RateLimitConfig, ServerConfig};
use mcp_tool_gateway::gateway::{AppState, EdgePolicy, LlmProxy, MarketMcp, create_router};
use mcp_tool_gateway::market::UpstreamClient;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVER_KEY: &str = "sk-server-side";

struct Setup {
    server: ServerConfig,
    llm_url: String,
    api_key: Option<String>,
}

impl Setup {
    fn new(llm_url: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            llm_url: llm_url.to_string(),
            api_key: Some(SERVER_KEY.to_string()),
        }
    }

    fn build(self) -> Router {
        let upstream = UpstreamClient::new(&MarketConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let llm = LlmProxy::new(&LlmConfig {
            base_url: self.llm_url,
            api_key: self.api_key,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        create_router(Arc::new(AppState {
            market: Arc::new(MarketMcp::new(Arc::new(upstream))),
            llm: Arc::new(llm),
            edge: Arc::new(EdgePolicy::from_config(&self.server)),
            static_root: None,
        }))
    }
}

fn ping() -> Body {
    Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
}

fn mcp_request() -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/api/mcp/jamaica-market")
        .header(header::CONTENT_TYPE, "application/json")
}

fn chat(model: &str) -> Body {
    Body::from(
        json!({
            "model": model,
            "stream": true,
            "messages": [{ "role": "user", "content": "hi" }]
        })
        .to_string(),
    )
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_origin_allow_list() {
    let mut setup = Setup::new("http://127.0.0.1:9");
    setup.server.allowed_origins = vec!["https://app.example".to_string()];
    let app = setup.build();

    let rejected = app
        .clone()
        .oneshot(
            mcp_request()
                .header(header::ORIGIN, "https://evil.example")
                .body(ping())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(rejected).await["error"]["message"], "Origin not allowed");

    let allowed = app
        .clone()
        .oneshot(
            mcp_request()
                .header(header::ORIGIN, "https://APP.example")
                .body(ping())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    // Non-browser clients send no Origin
    let no_origin = app
        .oneshot(mcp_request().body(ping()).unwrap())
        .await
        .unwrap();
    assert_eq!(no_origin.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_same_host_rule_without_allow_list() {
    let app = Setup::new("http://127.0.0.1:9").build();

    let same = app
        .clone()
        .oneshot(
            mcp_request()
                .header(header::HOST, "gateway.example:8787")
                .header(header::ORIGIN, "http://gateway.example:8787")
                .body(ping())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(same.status(), StatusCode::OK);

    let other = app
        .oneshot(
            mcp_request()
                .header(header::HOST, "gateway.example:8787")
                .header(header::ORIGIN, "http://elsewhere.example")
                .body(ping())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let mut setup = Setup::new("http://127.0.0.1:9");
    setup.server.rate_limit = RateLimitConfig {
        window: Duration::from_secs(60),
        max_requests: 2,
    };
    let app = setup.build();

    let send = |ip: &'static str| {
        let app = app.clone();
        async move {
            app.oneshot(
                mcp_request()
                    .header("x-forwarded-for", format!("{ip}, 10.0.0.1"))
                    .body(ping())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    assert_eq!(send("203.0.113.7").await.status(), StatusCode::OK);
    assert_eq!(send("203.0.113.7").await.status(), StatusCode::OK);

    let limited = send("203.0.113.7").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    assert_eq!(send("198.51.100.2").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_bodies_are_rejected() {
    let mut setup = Setup::new("http://127.0.0.1:9");
    setup.server.max_body_bytes = 64;
    let app = setup.build();

    let declared = app
        .clone()
        .oneshot(
            mcp_request()
                .header(header::CONTENT_LENGTH, "4096")
                .body(Body::from(vec![b' '; 4096]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(declared.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // No Content-Length: the cap applies while streaming
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        (0..10).map(|_| Ok(Bytes::from(vec![b' '; 16]))).collect();
    let streamed = app
        .clone()
        .oneshot(
            mcp_request()
                .body(Body::from_stream(stream::iter(chunks)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(streamed.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let small = app
        .oneshot(mcp_request().body(ping()).unwrap())
        .await
        .unwrap();
    assert_eq!(small.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_passthrough_injects_server_credential_and_streams() {
    let llm = MockServer::start().await;
    let events = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_eq("authorization", format!("Bearer {SERVER_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .expect(2)
        .mount(&llm)
        .await;

    let app = Setup::new(&llm.uri()).build();

    for credential in [None, Some("Bearer managed-access")] {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/openrouter/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(credential) = credential {
            request = request.header(header::AUTHORIZATION, credential);
        }
        let response = app
            .clone()
            .oneshot(request.body(chat("openai/gpt-4o-mini")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes, events.as_bytes());
    }
}

#[tokio::test]
async fn test_rejected_llm_requests_never_reach_upstream() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&llm)
        .await;

    let app = Setup::new(&llm.uri()).build();

    let cases = [
        ("authorization", "Bearer sk-user-key", "openai/gpt-4o-mini"),
        ("x-api-key", "sk-user-key", "openai/gpt-4o-mini"),
        ("x-api-key", "managed-access", "openai/gpt-5-pro"),
    ];
    for (name, value, model) in cases {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/openrouter/v1/responses")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(name, value)
                    .body(chat(model))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name}: {value}");
    }
}

#[tokio::test]
async fn test_missing_server_credential_is_unavailable() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&llm)
        .await;

    let mut setup = Setup::new(&llm.uri());
    setup.api_key = None;
    let app = setup.build();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/openrouter/v1/chat/completions")
                .body(chat("openai/gpt-4o-mini"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let health = json_body(health).await;
    assert_eq!(health["ok"], true);
    assert_eq!(health["openrouterConfigured"], false);
}

#[tokio::test]
async fn test_models_are_curated_and_ordered() {
    let llm = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header_eq("authorization", format!("Bearer {SERVER_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "vendor/unlisted" },
                { "id": "openai/gpt-4o-mini", "name": "GPT-4o mini" },
                { "id": "openai/gpt-4.1-mini", "name": "GPT-4.1 mini" }
            ]
        })))
        .expect(1)
        .mount(&llm)
        .await;

    let app = Setup::new(&llm.uri()).build();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/openrouter/v1/models")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ids: Vec<String> = json_body(response).await["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["openai/gpt-4.1-mini", "openai/gpt-4o-mini"]);
}

#[tokio::test]
async fn test_unknown_api_path_is_json_404() {
    let app = Setup::new("http://127.0.0.1:9").build();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
