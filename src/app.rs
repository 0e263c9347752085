use crate::{
    catalog::ClassCatalog,
    config::Config,
    handler::DetectionHandler,
    ort_service::OrtDetector,
    retention,
    router::TaskRouter,
    server::HttpServer,
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let catalog = match &config.labels.labels_file {
        Some(path) => ClassCatalog::from_file(path)?,
        None => ClassCatalog::coco(),
    };
    if catalog.len() != config.model.num_classes {
        tracing::warn!(
            "Class catalog has {} entries but the model emits {} classes",
            catalog.len(),
            config.model.num_classes
        );
    }

    std::fs::create_dir_all(&config.handler.work_dir)?;
    std::fs::create_dir_all(config.handler.run_dir())?;

    let detector = match OrtDetector::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detection model: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new()?);
    let handler = DetectionHandler::new(config.handler.clone(), detector, Arc::new(catalog))
        .with_metrics(metrics.clone());

    let mut task_router = TaskRouter::new(reqwest::Client::builder().build()?);
    task_router.register(config.handler.func_key.as_deref(), Arc::new(handler));
    tracing::info!(
        "Registered {:?} handler for {}",
        config.handler.variant,
        config.handler.func_key.as_deref().unwrap_or("every task")
    );

    let server = HttpServer::new(Arc::new(task_router), metrics, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;
    let sweeper = config.handler.output_retention().map(|max_age| {
        retention::spawn_sweeper(config.handler.run_dir(), max_age, shutdown_tx.subscribe())
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
