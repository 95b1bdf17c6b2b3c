use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

use devpool::config::ManagerConfig;
use devpool::manager::{Domain, LocalChannelProvider, WorkerManager};
use devpool::payload::TaskPayload;
use devpool::pool::TaskSpec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries one JSON result per task.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ManagerConfig::from_env();

    eprintln!("devpool v{}", env!("CARGO_PKG_VERSION"));
    for domain in Domain::ALL {
        let state = if config.is_active(domain) {
            format!("{} workers", config.max_workers(domain))
        } else {
            "disabled".to_string()
        };
        eprintln!("   {domain}: {state}");
    }
    if config.is_active(Domain::Ai) {
        eprintln!("   AI model: {}", config.ai.model);
    }
    eprintln!("   Reading tasks from stdin, one JSON object per line.\n");

    let manager = Arc::new(WorkerManager::new(Arc::new(LocalChannelProvider)));
    manager
        .initialize(config)
        .await
        .context("failed to start worker pools")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let payload: TaskPayload = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping invalid task");
                println!(
                    "{}",
                    json!({ "line": line_no, "status": "error", "error": format!("invalid task: {e}") })
                );
                continue;
            }
        };

        let manager = manager.clone();
        let line = line_no;
        tasks.spawn(async move {
            let kind = payload.kind();
            let outcome = manager.submit(payload.domain(), TaskSpec::new(payload)).await;
            (line, kind, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (line, kind, outcome) = joined?;
        let record = match outcome {
            Ok(result) => json!({ "line": line, "type": kind, "status": "success", "result": result }),
            Err(e) => json!({ "line": line, "type": kind, "status": "error", "error": e.to_string() }),
        };
        println!("{record}");
    }

    let stats = manager.stats().await;
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);

    manager.shutdown().await;
    Ok(())
}
