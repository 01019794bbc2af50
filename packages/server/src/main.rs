use std::sync::Arc;

use actors::{CommandToolRunner, FfprobeDurationProbe, Pipeline, QueueSettings, start_queue};
use server::{AppState, Config, bootstrap, build_router};
use stem_core::Base36IdGenerator;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    bootstrap::prepare(&config).await?;

    let tools = CommandToolRunner::new(config.separator.clone(), config.archiver.clone())
        .with_timeout(config.tool_timeout);
    let probe = FfprobeDurationProbe::new(config.ffprobe.clone());
    let pipeline = Pipeline::new(Arc::new(tools), Arc::new(probe)).with_auth(config.auth.clone());

    let settings = QueueSettings::new(&config.output_dir);
    let (queue, queue_task) = start_queue(settings, pipeline, Arc::new(Base36IdGenerator)).await?;

    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = build_router(AppState::new(
        queue.clone(),
        config.input_dir.clone(),
        config.max_upload_bytes,
    ));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server started");

    let stopping = queue.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
            // Pending requests get their answer once the queue lets go of them.
            if let Err(e) = stopping.shutdown() {
                tracing::warn!("{}", e);
            }
        })
        .await?;

    queue_task.await?;
    Ok(())
}
