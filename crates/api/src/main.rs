use std::sync::Arc;

use anyhow::Context;

use fanout_infra::{DryRunDeliverer, FanoutConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fanout_observability::init();

    let config = FanoutConfig::from_env().context("invalid configuration")?;

    let services = Arc::new(
        fanout_api::app::build_services(&config)
            .await
            .context("failed to initialise execution store")?,
    );

    // The real delivery provider is wired by the deployment; dry-run otherwise.
    let pool = services.spawn_workers(&config, Arc::new(DryRunDeliverer));

    let app = fanout_api::app::build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let shutdown = Arc::clone(&services.shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
            shutdown.trigger_shutdown();
        })
        .await
        .context("http server failed")?;

    let report = pool.shutdown().await;
    tracing::info!(drained = report.drained, stuck = report.stuck, "shutdown complete");
    Ok(())
}
