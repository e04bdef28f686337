//! `metal serve`: run a conductor with an in-memory node store.

use color_eyre::eyre::eyre;
use mk_core::config::loader::load_config;
use mk_core::config::validate::validate_definitions;
use mk_core::drivers::DriverFactory;
use mk_core::store::MemoryNodeStore;
use mk_core::Conductor;
use mk_protocol::ipc::Event;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn handle(dir: &Path, bind: Option<String>) -> color_eyre::Result<()> {
    let mut config = load_config(dir).await?;
    if let Some(bind) = bind {
        config.conductor.api_bind = bind;
    }

    let registry = DriverFactory::create(&config.conductor).map_err(|e| eyre!(e))?;
    for issue in validate_definitions(&config, &registry) {
        tracing::warn!(%issue, "definition will be rejected when used");
    }

    let bind = config.conductor.api_bind.clone();
    let conductor = Conductor::new(
        config.conductor,
        Arc::new(MemoryNodeStore::new()),
        registry,
    );
    conductor
        .register_definitions(&config.runbooks, &config.deploy_templates)
        .await?;
    conductor.start().await?;

    let tasks = conductor.spawn_periodic_tasks();
    let events = tokio::spawn(log_events(conductor.clone()));

    let result = tokio::select! {
        result = mk_api::serve(conductor.clone(), &bind) => result.map_err(|e| eyre!(e)),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };

    for task in tasks {
        task.abort();
    }
    events.abort();
    conductor.stop().await?;
    result
}

async fn log_events(conductor: Conductor) {
    let mut rx = conductor.subscribe();
    loop {
        match rx.recv().await {
            Ok(Event::ProvisionStateChanged { node_id, from, to, .. }) => {
                tracing::info!(node = %node_id, %from, %to, "provision state changed");
            }
            Ok(Event::NodeFailed { node_id, state, error }) => {
                tracing::error!(node = %node_id, %state, %error, "node failed");
            }
            Ok(event) => tracing::debug!(?event, "conductor event"),
            Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
