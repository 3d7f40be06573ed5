use futures::StreamExt;
use kube::Client;
use solrcloud_operator::{cloud_controller as cloudc, config::OperatorConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = OperatorConfig::from_env();
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        field_manager = %config.field_manager,
        "solrcloud-operator starting up"
    );

    let client = Client::try_default().await?;
    let ctx = Arc::new(cloudc::Ctx {
        client: client.clone(),
        config: config.clone(),
    });
    let controller = cloudc::controller(client, &config)
        .run(cloudc::reconcile, cloudc::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "solrcloud reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {},
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }
    Ok(())
}
