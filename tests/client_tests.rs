//! Gateway client tests against mocked tool servers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mcp_tool_gateway::Error;
use mcp_tool_gateway::client::GatewayClient;
use mcp_tool_gateway::config::{ClientConfig, LlmConfig, MarketConfig, ServerConfig as EdgeConfig};
use mcp_tool_gateway::gateway::{AppState, EdgePolicy, LlmProxy, MarketMcp, create_router};
use mcp_tool_gateway::market::UpstreamClient;
use mcp_tool_gateway::registry::{MemoryStore, NewCustomServer, ServerRegistry};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn rpc_error(code: i32, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

/// Mount `initialize`, `notifications/initialized` and `tools/list` on a mock
/// tool server. `catalog_fetches` is the expected number of catalog loads.
async fn mount_catalog(server: &MockServer, tools: &[&str], catalog_fetches: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "initialize" })))
        .respond_with(rpc_result(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mock", "version": "1.0.0" }
        })))
        .expect(catalog_fetches)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .respond_with(ResponseTemplate::new(202))
        .expect(catalog_fetches)
        .mount(server)
        .await;
    let tools: Vec<Value> = tools
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("The {name} tool"),
                "inputSchema": { "type": "object" }
            })
        })
        .collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(rpc_result(json!({ "tools": tools })))
        .expect(catalog_fetches)
        .mount(server)
        .await;
}

fn tool_call(tool: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST")).and(body_partial_json(
        json!({ "method": "tools/call", "params": { "name": tool } }),
    ))
}

fn ok_result(text: &str) -> ResponseTemplate {
    rpc_result(json!({ "content": [{ "type": "text", "text": text }] }))
}

/// Registry with the managed server disabled and the given custom servers
fn registry(edge_base_url: &str, custom: &[(&str, &str)]) -> Arc<ServerRegistry> {
    let registry = ServerRegistry::new(Arc::new(MemoryStore::new()), edge_base_url).unwrap();
    registry.set_enabled("jamaica-market", false).unwrap();
    for (name, url) in custom {
        registry
            .add_custom(NewCustomServer {
                name: (*name).to_string(),
                url: (*url).to_string(),
                token: None,
                enabled: true,
            })
            .unwrap();
    }
    Arc::new(registry)
}

fn client(registry: Arc<ServerRegistry>) -> GatewayClient {
    GatewayClient::new(
        registry,
        &ClientConfig {
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        },
    )
}

#[tokio::test]
async fn test_status_is_offline_until_connect() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search", "fetch"], 1).await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));

    let before = client.status().unwrap();
    assert_eq!(before.len(), 2);
    assert!(!before[0].enabled);
    assert_eq!(before[1].id, "custom-alpha");
    assert_eq!(before[1].cached_tools, None);

    let entry = client.connect("alpha").await.unwrap();
    assert_eq!(entry.tools.len(), 2);
    assert!(!entry.proxied);

    let after = client.status().unwrap();
    assert_eq!(after[1].cached_tools, Some(2));

    // Served from cache: no further catalog fetch
    let cached = client.server("custom-alpha").await.unwrap();
    assert_eq!(cached.tools[0].name, "search");
}

#[tokio::test]
async fn test_disabled_and_unknown_servers() {
    let client = client(registry("http://127.0.0.1:9", &[]));

    assert!(matches!(
        client.connect("jamaica-market").await,
        Err(Error::ServerDisabled(_))
    ));
    assert!(matches!(
        client.tool("get_company", json!({}), Some("Jamaica Market"), None).await,
        Err(Error::ServerDisabled(_))
    ));
    assert!(matches!(
        client.server("nowhere").await,
        Err(Error::ServerNotFound(_))
    ));
}

#[tokio::test]
async fn test_ambiguous_tool_requires_server() {
    let alpha = MockServer::start().await;
    let beta = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 1).await;
    mount_catalog(&beta, &["search", "summarize"], 1).await;
    tool_call("search")
        .respond_with(ok_result("from alpha"))
        .expect(0)
        .mount(&alpha)
        .await;
    tool_call("search")
        .respond_with(ok_result("from beta"))
        .expect(1)
        .mount(&beta)
        .await;

    let client = client(registry(
        "http://127.0.0.1:9",
        &[("Alpha", &alpha.uri()), ("Beta", &beta.uri())],
    ));

    match client.tool("search", json!({"q": "x"}), None, None).await {
        Err(Error::AmbiguousTool { tool, candidates }) => {
            assert_eq!(tool, "search");
            assert_eq!(candidates, vec!["Alpha".to_string(), "Beta".to_string()]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    let executed = client
        .tool("search", json!({"q": "x"}), Some("beta"), None)
        .await
        .unwrap();
    assert_eq!(executed.server_name, "Beta");
    assert_eq!(executed.result.text(), "from beta");
    assert!(!executed.retried);

    // Unique names resolve without a server
    let summarize = client.describe("summarize", None).await.unwrap();
    assert_eq!(summarize.server_id, "custom-beta");
}

#[tokio::test]
async fn test_unknown_tool_is_not_found() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 1).await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));
    let err = client
        .tool("translate", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ToolNotFound(ref name) if name == "translate"));
    assert!(err.remediation_hint().contains("search"));
}

#[tokio::test]
async fn test_stale_catalog_refreshes_once_and_retries() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 2).await;
    tool_call("search")
        .respond_with(rpc_error(-32602, "Tool not found: search"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&alpha)
        .await;
    tool_call("search")
        .respond_with(ok_result("fresh"))
        .expect(1)
        .mount(&alpha)
        .await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));
    let executed = client
        .tool("search", json!({}), None, None)
        .await
        .unwrap();
    assert!(executed.retried);
    assert_eq!(executed.result.text(), "fresh");
}

#[tokio::test]
async fn test_second_stale_failure_propagates() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 2).await;
    tool_call("search")
        .respond_with(rpc_error(-32601, "Unknown tool: search"))
        .expect(2)
        .mount(&alpha)
        .await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));
    let err = client
        .tool("search", json!({}), Some("Alpha"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::JsonRpc { code: -32601, .. }));
}

#[tokio::test]
async fn test_terminal_failure_is_not_retried() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 1).await;
    tool_call("search")
        .respond_with(rpc_error(-32000, "Invalid arguments for search: q is required"))
        .expect(1)
        .mount(&alpha)
        .await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));
    let err = client
        .tool("search", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("q is required"));
}

#[tokio::test]
async fn test_tool_reported_error_is_tool_failed() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 1).await;
    tool_call("search")
        .respond_with(rpc_result(json!({
            "content": [{ "type": "text", "text": "quota exhausted" }],
            "isError": true
        })))
        .expect(1)
        .mount(&alpha)
        .await;

    let client = client(registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]));
    match client.tool("search", json!({}), None, None).await {
        Err(Error::ToolFailed { server, message, .. }) => {
            assert_eq!(server, "Alpha");
            assert_eq!(message, "quota exhausted");
        }
        other => panic!("expected tool failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_reports_unreachable_servers() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search", "fetch_page"], 1).await;

    let client = client(registry(
        "http://127.0.0.1:9",
        &[("Alpha", &alpha.uri()), ("Gone", "http://127.0.0.1:9/mcp")],
    ));

    let results = client.search("FETCH tool").await.unwrap();
    let names: Vec<&str> = results.matches.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["fetch_page"]);
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].server, "Gone");

    // Cached now: an empty query lists everything without refetching
    let all = client.search("").await.unwrap();
    assert_eq!(all.matches.len(), 2);
}

/// Serve the real router on an ephemeral port with the market data source
/// at `market_url`; returns the edge base URL
async fn spawn_edge(market_url: &str) -> String {
    let upstream = UpstreamClient::new(&MarketConfig {
        base_url: market_url.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let llm = LlmProxy::new(&LlmConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let app = create_router(Arc::new(AppState {
        market: Arc::new(MarketMcp::new(Arc::new(upstream))),
        llm: Arc::new(llm),
        edge: Arc::new(EdgePolicy::from_config(&EdgeConfig::default())),
        static_root: None,
    }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_managed_server_through_the_edge() {
    let market = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/companies/GK"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "symbol": "GK", "name": "GraceKennedy" })),
        )
        .expect(1)
        .mount(&market)
        .await;

    let edge = spawn_edge(&market.uri()).await;
    let registry = ServerRegistry::new(Arc::new(MemoryStore::new()), &edge).unwrap();
    let client = client(Arc::new(registry));

    let entry = client.connect("Jamaica Market").await.unwrap();
    assert!(entry.proxied);
    assert_eq!(entry.tools.len(), 5);

    let executed = client
        .tool("get_company", json!({ "symbol": "gk" }), None, None)
        .await
        .unwrap();
    assert_eq!(executed.server_id, "jamaica-market");
    assert_eq!(
        executed.result.structured_content,
        Some(json!({ "symbol": "GK", "name": "GraceKennedy" }))
    );

    let err = client
        .tool("get_company", json!({ "symbol": "??" }), None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid arguments for get_company"));
}

#[tokio::test]
async fn test_missing_company_is_not_retried() {
    let market = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/companies/ZZZ"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Company not found" })))
        .expect(1)
        .mount(&market)
        .await;

    let edge = spawn_edge(&market.uri()).await;
    let registry = ServerRegistry::new(Arc::new(MemoryStore::new()), &edge).unwrap();
    let client = client(Arc::new(registry));

    let err = client
        .tool("get_company", json!({ "symbol": "zzz" }), None, None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("HTTP 404"), "{message}");
    assert!(message.contains("Company not found"), "{message}");
}

#[tokio::test]
async fn test_disabling_a_server_drops_its_catalog() {
    let alpha = MockServer::start().await;
    mount_catalog(&alpha, &["search"], 1).await;

    let registry = registry("http://127.0.0.1:9", &[("Alpha", &alpha.uri())]);
    let client = client(Arc::clone(&registry));

    client.connect("Alpha").await.unwrap();
    assert_eq!(client.cache().tool_count("custom-alpha"), Some(1));

    registry.set_enabled("Alpha", false).unwrap();
    assert!(matches!(
        client.connect("Alpha").await,
        Err(Error::ServerDisabled(_))
    ));

    let status = client.status().unwrap();
    assert!(!status[1].enabled);
    assert_eq!(status[1].cached_tools, None);
}
