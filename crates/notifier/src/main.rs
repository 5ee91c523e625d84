use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use herald_common::clock::{Clock, SystemClock};
use herald_common::config::AppConfig;
use herald_common::db;
use herald_common::mutation_log::{MutationSink, StdoutMutationSink};
use herald_common::types::NotificationType;
use herald_notifier::handler::UnconfiguredChatClient;
use herald_notifier::{
    ChatMessageHandler, Dispatcher, NotificationWorker, PagePublishHandler, WorkerConfig,
};
use herald_publisher::backend::{GcsObjectStore, GcsTokenSource, S3ObjectStore};
use herald_publisher::snapshot::{FileSnapshotProvider, StaticSnapshotProvider};
use herald_publisher::{PagePublisher, PushMethod, SnapshotProvider};
use herald_queue::{
    InMemoryStore, NotificationQueue, NotificationStore, PgNotificationStore, RetryPolicy,
};

const OBJECT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_notifier=info,herald_queue=info,herald_publisher=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Herald notification worker starting...");

    let config = AppConfig::from_env()?.apply_args(std::env::args().skip(1))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mutations: Arc<dyn MutationSink> = Arc::new(StdoutMutationSink);

    let store: Arc<dyn NotificationStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.db_max_connections).await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            tracing::info!("Database migrations applied");
            Arc::new(PgNotificationStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory notification store");
            Arc::new(InMemoryStore::new())
        }
    };

    let queue = Arc::new(NotificationQueue::new(
        store,
        RetryPolicy::with_max_retries(config.max_retries)?,
        clock.clone(),
        mutations.clone(),
    ));

    let publisher = Arc::new(build_publisher(&config, clock, mutations).await?);

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        NotificationType::ChatMessage,
        Arc::new(ChatMessageHandler::new(Arc::new(UnconfiguredChatClient))),
    )?;
    dispatcher.register(
        NotificationType::PagePublish,
        Arc::new(PagePublishHandler::new(publisher)),
    )?;
    let missing = dispatcher.missing_types();
    if !missing.is_empty() {
        anyhow::bail!("No delivery handler registered for {missing:?}");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let worker = NotificationWorker::new(
        queue,
        Arc::new(dispatcher),
        WorkerConfig::from(&config),
        shutdown,
    );
    let stats = worker.run().await;

    tracing::info!(?stats, "Herald notification worker stopped.");
    Ok(())
}

async fn build_publisher(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
    mutations: Arc<dyn MutationSink>,
) -> anyhow::Result<PagePublisher> {
    let snapshots: Arc<dyn SnapshotProvider> = match &config.status_snapshot_path {
        Some(path) => Arc::new(FileSnapshotProvider::new(path.clone())),
        None => {
            tracing::warn!("STATUS_SNAPSHOT_PATH not set, status page will list no areas");
            Arc::new(StaticSnapshotProvider::default())
        }
    };

    let publisher = PagePublisher::new(
        config.static_page_push_method.clone(),
        config.static_page_push_target.clone(),
        snapshots,
        clock,
        mutations,
    );

    // An invalid method is reported by each push, so page_publish
    // notifications retry until the configuration is fixed.
    let publisher = match config.static_page_push_method.parse::<PushMethod>() {
        Ok(PushMethod::Local) => publisher,
        Ok(PushMethod::S3) => publisher.with_object_store(
            PushMethod::S3,
            Arc::new(S3ObjectStore::from_env(OBJECT_STORE_TIMEOUT).await),
        ),
        Ok(PushMethod::Gcs) => {
            let token_source = match &config.gcs_access_token {
                Some(token) => GcsTokenSource::Static(token.clone()),
                None => GcsTokenSource::MetadataServer,
            };
            publisher.with_object_store(
                PushMethod::Gcs,
                Arc::new(GcsObjectStore::new(token_source, OBJECT_STORE_TIMEOUT)?),
            )
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                "Static page pushes will fail until the push method is fixed"
            );
            publisher
        }
    };

    if publisher.target().is_empty() {
        tracing::warn!(
            "STATIC_PAGE_PUSH_TARGET not set, page_publish needs a per-notification target"
        );
    } else {
        tracing::info!(
            method = publisher.method(),
            target = publisher.target(),
            "Static page publisher configured"
        );
    }

    Ok(publisher)
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, stopping gracefully..."),
        _ = terminate => tracing::info!("Received SIGTERM, stopping gracefully..."),
    }
}
