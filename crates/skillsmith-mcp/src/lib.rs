//! Model Context Protocol tool surface for Skillsmith.
//!
//! [`server::SkillsmithMcpServer`] holds the business logic for every spec §6
//! operation; [`tools`] wires each one onto an `rmcp` [`rmcp::model::Tool`]
//! route, keeping a thick server struct behind thin `ToolRoute` adapters.
//! The transport that delivers these calls is explicitly out of scope, so
//! only the stdio transport is wired here — no HTTP/SSE streaming path.

pub mod response;
pub mod server;
pub mod tools;

use anyhow::Result;
use rmcp::handler::server::router::Router;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::ServiceExt;

pub use server::SkillsmithMcpServer;

impl ServerHandler for SkillsmithMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Skillsmith MCP server - discover, rank, and install agent skills. \
                 Use `analyze_codebase` or `recommend_skills` to find skills that fit a \
                 project's stack, `search` for anything else, and `install_skill` to add one. \
                 `check_conflicts` and `estimate_budget` are worth a look before installing."
                    .to_string(),
            ),
        }
    }
}

/// Runs the server over stdio until the client disconnects.
pub async fn run(server: SkillsmithMcpServer) -> Result<()> {
    tracing::info!("starting skillsmith MCP server on stdio transport");
    let router = tools::all_routes()
        .into_iter()
        .fold(Router::new(server), |r, route| r.with_tool(route));
    router.serve(stdio()).await?.waiting().await?;
    Ok(())
}
