use crate::{
    alert::AlertPolicy,
    config::Config,
    dispatch::AlertDispatcher,
    notifier::{Notifier, TelegramNotifier},
    ort_service::OrtClipModel,
    scorer::LabelScorer,
    server::{HttpServer, SharedState},
    storage,
    telemetry::Metrics,
};

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model = match OrtClipModel::new(&config.model) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::error!("Failed to load model {}: {:?}", config.model.model_id, e);
            return Err(Box::new(e));
        }
    };

    let scorer = match LabelScorer::new(model, &config.labels, config.model.prediction_threshold) {
        Ok(scorer) => Arc::new(scorer),
        Err(e) => {
            tracing::error!("Failed to embed label catalog: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!(
        "Scoring {} labels at threshold {}, falling back to `{}`",
        scorer.catalog().len(),
        scorer.threshold(),
        scorer.default_label()
    );

    let metrics = Arc::new(Metrics::new()?);

    let policy = Arc::new(AlertPolicy::new(
        config.labels.safe_labels.iter().cloned(),
        config.alerts.get_cooldown(),
    ));
    tracing::info!("Live alert cooldown is {:?}", policy.cooldown());
    let channel = TelegramNotifier::from_config(&config.telegram)?
        .map(|(notifier, chat_id)| (Arc::new(notifier) as Arc<dyn Notifier>, chat_id));
    let alerts = Arc::new(AlertDispatcher::new(policy, channel, metrics.clone()));

    let storage: Arc<dyn storage::TempStorage> = storage::from_config(&config.storage).await?.into();

    let state = SharedState {
        scorer,
        alerts,
        storage,
        metrics,
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server exited with error: {}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
