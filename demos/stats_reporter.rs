//! Stats reporter demo
//!
//! Runs one shard against an aggregator: identifies, answers remote evals
//! with a canned value, and reports stats every five seconds until Ctrl-C.
//!
//! Run with:
//!
//! ```text
//! CLUSTERLINK_TOKEN=secret CLUSTERLINK_CLUSTER_ID=0 CLUSTERLINK_CLUSTER_COUNT=1 \
//!     cargo run --example stats_reporter
//! ```

use clusterlink::{ClientBuilder, ClientEvent, ConnectionState, EventKind};
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = ClientBuilder::from_env()?.build()?;
    let cluster_id = client.identity().cluster_id();

    client
        .on(EventKind::Ready, move |_| async move {
            tracing::info!(cluster_id, "Shard ready");
        })
        .await;

    client
        .on(EventKind::Error, |event| async move {
            if let ClientEvent::Error(error) = event {
                tracing::warn!(error = %error, "Link error, will retry");
            }
        })
        .await;

    client
        .on(EventKind::ClusterStatusUpdate, |event| async move {
            if let ClientEvent::ClusterStatusUpdate(healthy) = event {
                tracing::info!(healthy, "Cluster status update");
            }
        })
        .await;

    client
        .on(EventKind::RemoteEval, move |event| async move {
            if let ClientEvent::RemoteEval(request, reply) = event {
                tracing::info!(from = request.id, code = %request.data, "Remote eval");
                if let Err(e) = reply.send(Ok(json!({"cluster": cluster_id, "guilds": 0}))).await {
                    tracing::warn!(error = %e, "Failed to answer remote eval");
                }
            }
        })
        .await;

    client.connect().await?;

    let reporter = client.clone();
    let reporting = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let mut tick: u64 = 0;
        loop {
            interval.tick().await;
            if !reporter.is_ready() {
                continue;
            }
            tick += 1;
            let ping = 40.0 + (tick % 10) as f64;
            if let Err(e) = reporter.send_stats(tick * 10, 0.12, 256.0, ping).await {
                tracing::warn!(error = %e, "Failed to send stats");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    reporting.abort();

    client.disconnect(Some(false)).await;
    client.wait_for_state(ConnectionState::Idle).await?;
    tracing::info!("Shard stopped");
    Ok(())
}
