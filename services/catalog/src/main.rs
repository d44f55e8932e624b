use album_catalog::handlers::router::image_channel;
use album_catalog::{
    ChangeNotifier, Config, DeletionHandler, IngressRouter, Mailer, MetadataUpdater,
    PgCatalogStore, PgChangeFeed, RejectionNotifier, S3ObjectStore, SmtpMailer, Validator,
};
use album_pipeline::{
    ConsumerSettings, MessageHandler, QueueClient, QueueConsumer, QueuePublisher,
    SqsQueueClient,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        channel = %config.service.channel_name,
        "Starting photo album catalog service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let catalog = Arc::new(
        PgCatalogStore::new(&config.database)
            .await
            .context("Failed to connect to catalog database")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        catalog
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let queues: Arc<dyn QueueClient> = Arc::new(
        SqsQueueClient::new(&config.aws)
            .await
            .with_visibility_timeout(config.consumer.visibility_timeout()),
    );
    let mailer: Arc<dyn Mailer> =
        Arc::new(SmtpMailer::from_config(&config.mail).context("Failed to initialize mailer")?);

    let channel = Arc::new(image_channel(
        queues.clone(),
        &config.service.channel_name,
        &config.queues,
    ));
    info!(subscriptions = ?channel.subscription_names(), "Image channel ready");

    let mut deletion = DeletionHandler::new(catalog.clone());
    if config.objects.delete_on_remove {
        deletion = deletion.with_object_store(Arc::new(
            S3ObjectStore::new(&config.aws, &config.objects).await,
        ));
    }

    // Spawn one consumer task per stage
    let settings = ConsumerSettings::from(&config.consumer);
    let urls = &config.queues;
    let stages = [
        start_stage(
            &queues,
            &urls.ingress,
            &settings,
            Arc::new(IngressRouter::new(channel)),
        ),
        start_stage(
            &queues,
            &urls.uploads,
            &settings,
            Arc::new(Validator::new(
                catalog.clone(),
                QueuePublisher::new(queues.clone()),
                urls.dead_letter.clone(),
            )),
        ),
        start_stage(
            &queues,
            &urls.metadata,
            &settings,
            Arc::new(MetadataUpdater::new(catalog.clone())),
        ),
        start_stage(&queues, &urls.deletions, &settings, Arc::new(deletion)),
        start_stage(
            &queues,
            &urls.dead_letter,
            &settings,
            Arc::new(RejectionNotifier::new(mailer.clone())),
        ),
    ];
    let (consumers, mut handles): (Vec<_>, Vec<_>) = stages.into_iter().unzip();

    // Spawn the change feed and the confirmation notifier
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let change_feed = Arc::new(PgChangeFeed::new(
        catalog.pool().clone(),
        config.listener_reconnect_delay(),
    ));
    let notifier = ChangeNotifier::new(mailer);

    let changes = change_feed.subscribe();
    let notifier_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        notifier.run(changes, notifier_shutdown).await;
    }));

    let feed_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        change_feed.run(feed_shutdown).await;
    }));

    info!(consumers = consumers.len(), "Catalog service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down catalog service");

    for consumer in &consumers {
        consumer.shutdown();
    }
    let _ = shutdown_tx.send(());

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Task ended abnormally");
        }
    }

    info!("Catalog service stopped");

    Ok(())
}

/// Spawn a consumer that feeds one queue to its handler
fn start_stage(
    queues: &Arc<dyn QueueClient>,
    queue_url: &str,
    settings: &ConsumerSettings,
    handler: Arc<dyn MessageHandler>,
) -> (Arc<QueueConsumer>, JoinHandle<()>) {
    let consumer = Arc::new(QueueConsumer::new(
        queues.clone(),
        queue_url,
        settings.clone(),
    ));

    let task_consumer = consumer.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_consumer.run(handler).await {
            error!(queue = %task_consumer.queue_url(), error = %e, "Queue consumer error");
        }
    });

    (consumer, handle)
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
