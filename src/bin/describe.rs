use std::{env, sync::Arc, time::Duration};

use anyhow::Context as _;
use kube::Client;
use kube_reconciler::{
    cluster::KubeCluster,
    context::{Settings, State},
    controllers, telemetry,
};

/// Overlay `RECONCILER_*` environment variables onto the default settings
fn settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(delay) = env::var("RECONCILER_WAIT_DELAY") {
        let seconds = delay
            .parse()
            .context("RECONCILER_WAIT_DELAY must be a number of seconds")?;
        settings.wait.delay = Duration::from_secs(seconds);
    }
    if let Ok(attempts) = env::var("RECONCILER_WAIT_MAX_ATTEMPTS") {
        settings.wait.max_attempts = attempts
            .parse()
            .context("RECONCILER_WAIT_MAX_ATTEMPTS must be a positive integer")?;
    }

    Ok(settings)
}

/// Export every kind the reconciler knows about as YAML that `present` accepts unchanged
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let client = Client::try_default()
        .await
        .context("could not connect to the cluster")?;
    let state = State::new(settings()?);
    let ctx = state.to_context(Arc::new(KubeCluster::new(client)));

    let described = controllers::describe_all(&ctx).await?;
    print!("{}", serde_yaml::to_string(&described)?);

    Ok(())
}
