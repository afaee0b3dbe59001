//! SiteSync Agent - headless field client.
//!
//! Reads newline-delimited JSON from stdin and feeds it to the sync engine:
//!
//! ```text
//! {"type":"ATTENDANCE","payload":{"date":"2026-03-02","present":true,"workers":12,"absent":1}}
//! {"type":"TASK_UPDATE","taskId":"task-17","payload":{"status":"COMPLETED"}}
//! {"command":"sync"}
//! {"command":"resume","token":"..."}
//! ```

use std::sync::Arc;

use serde::Deserialize;
use sitesync_client::{ConnectivityMonitor, EngineConfig, EngineHandle, HttpTransport, Target};
use sitesync_engine::{attendance_entity_id, MutationKind, MutationPayload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One stdin line.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Input {
    Command {
        command: AgentCommand,
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Change {
        #[serde(rename = "type")]
        kind: MutationKind,
        payload: serde_json::Value,
        #[serde(default)]
        task_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AgentCommand {
    Sync,
    Resume,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitesync_client=debug,sitesync_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env()?;

    tracing::info!(
        "Starting SiteSync agent against {} (db {})",
        config.server_url,
        config.database
    );

    let transport = Arc::new(HttpTransport::new(&config.server_url, config.batch_timeout)?);
    let monitor =
        ConnectivityMonitor::with_probe(transport.clone(), config.probe_interval, config.dwell);

    let (engine, task) = EngineHandle::start(config, transport, monitor.receiver()).await?;

    // Status and notice logging
    let mut status = engine.subscribe();
    tokio::spawn(async move {
        while let Some(session) = status.next().await {
            tracing::info!(
                "Status: {} {:?}, {} pending",
                session.connectivity,
                session.phase,
                session.queue_depth
            );
        }
    });
    let mut notices = engine.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match serde_json::to_string(&notice) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Cannot encode notice: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => handle_line(&engine, &line).await,
                None => {
                    tracing::info!("Input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    engine.shutdown().await?;
    task.await?;
    Ok(())
}

async fn handle_line(engine: &EngineHandle, line: &str) {
    let input: Input = match serde_json::from_str(line) {
        Ok(input) => input,
        Err(e) => {
            tracing::warn!("Ignoring malformed input: {}", e);
            return;
        }
    };

    match input {
        Input::Command {
            command: AgentCommand::Sync,
            ..
        } => match engine.sync_now().await {
            Ok(started) => tracing::info!("Manual sync started: {}", started),
            Err(e) => tracing::warn!("Manual sync failed: {}", e),
        },
        Input::Command {
            command: AgentCommand::Resume,
            token: Some(token),
        } => {
            if let Err(e) = engine.resume_session(token).await {
                tracing::warn!("Resume failed: {}", e);
            }
        }
        Input::Command {
            command: AgentCommand::Resume,
            token: None,
        } => tracing::warn!("resume needs a token"),
        Input::Change {
            kind,
            payload,
            task_id,
        } => {
            let payload = match MutationPayload::from_parts(kind, payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Rejected input: {}", e);
                    return;
                }
            };
            let target = match (&payload, task_id) {
                (MutationPayload::Attendance(a), _) => {
                    Target::Entity(attendance_entity_id(&a.date))
                }
                (MutationPayload::TaskUpdate(_), Some(id)) => Target::Entity(id),
                (MutationPayload::TaskUpdate(_), None) => {
                    tracing::warn!("TASK_UPDATE needs a taskId");
                    return;
                }
                _ => Target::New,
            };
            match engine.submit(target, payload).await {
                Ok(m) => tracing::info!("Queued {} {} for {}", m.kind(), m.id, m.entity_id),
                Err(e) => tracing::warn!("Could not queue {}: {}", kind, e),
            }
        }
    }
}
