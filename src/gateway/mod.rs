//! Edge gateway: managed market endpoint, LLM passthrough and the guard in
//! front of both

pub mod edge;
pub mod llm_proxy;
pub mod market_mcp;
mod router;
mod server;

pub use edge::{EdgePolicy, edge_middleware};
pub use llm_proxy::{CURATED_MODELS, LlmProxy, MANAGED_ACCESS_SENTINEL, curate_models};
pub use market_mcp::{MarketMcp, summarize_payload};
pub use router::{AppState, MARKET_MCP_PATH, create_router};
pub use server::Gateway;
