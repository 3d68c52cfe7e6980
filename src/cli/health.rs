//! `a3sist health`: check every configured tool server

use crate::server::config::AppConfig;
use anyhow::Context;
use a3sist_tools::ToolOrchestrator;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    println!("🩺 a3sist tool server health\n");

    let tools = ToolOrchestrator::new(config.tools).context("Failed to create tool orchestrator")?;
    let results = tools.check_health().await;

    let mut healthy = 0;
    for server in tools.servers() {
        match results.get(&server.name) {
            Some(true) => {
                healthy += 1;
                println!("✅ {:<20} {}", server.name, server.endpoint);
            }
            _ => println!("❌ {:<20} {}", server.name, server.endpoint),
        }
    }

    let total = results.len();
    println!();
    if healthy == total {
        println!("All {} tool servers healthy.", total);
    } else {
        println!("⚠️  {} of {} tool servers unhealthy.", total - healthy, total);
        std::process::exit(1);
    }

    Ok(())
}
