//! Emojibot server entry point.
//!
//! Loads configuration once, builds every long-lived client and wires the
//! webhook routes to the configured queue backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use apalis::layers::retry::RetryPolicy;
use apalis::prelude::*;
use axum::Router;
use emojibot_api::{AppState, WebhookIngress, router};
use emojibot_common::{Config, QueueBackend, SignatureValidator};
use emojibot_core::{
    ChatPlatformService, DeadLetterService, DuplicateGuardService, ImagePostProcessor,
    JobQueueService, LoggingDeadLetterSink, ProviderFactory, SlackClient, strategy_for_tier,
};
use emojibot_queue::{
    DeliveryPolicy, EmojiJobStorage, EmojiWorker, InMemoryDuplicateGuard, InMemoryJobQueue,
    PUBLISH_TIMEOUT, PushDeadLetterSink, PushTopicQueue, RedisDeadLetterSink, RedisDuplicateGuard,
    RedisJobQueue, emoji_worker, run_in_memory_worker,
};
use fred::prelude::*;
use tokio::signal;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hard cap on any request body.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "emojibot=debug,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }
}

async fn connect_redis(url: &str) -> anyhow::Result<Arc<fred::clients::Client>> {
    let fred_config = fred::types::config::Config::from_url(url).context("Invalid redis.url")?;
    let client = fred::clients::Client::new(fred_config, None, None, None);
    client.connect();
    client
        .wait_for_connect()
        .await
        .context("Failed to connect to Redis")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(config.logging.json);

    info!(
        backend = ?config.queue.backend,
        tier = ?config.slack.workspace_tier,
        "Starting emojibot..."
    );

    // Long-lived clients
    let platform: ChatPlatformService = Arc::new(SlackClient::new(
        config.slack.bot_token.clone(),
        config.slack.api_base_url.clone(),
    )?);
    let providers = Arc::new(ProviderFactory::new(config.providers.clone())?);
    let default_provider = providers.default_provider()?;
    let publish_client = reqwest::Client::builder()
        .timeout(PUBLISH_TIMEOUT)
        .build()
        .context("Failed to build publish client")?;

    let redis = match config.redis.url.as_deref() {
        Some(url) => {
            let client = connect_redis(url).await?;
            info!("Connected to Redis");
            Some(client)
        }
        None => None,
    };

    let duplicates: DuplicateGuardService = match &redis {
        Some(client) => Arc::new(RedisDuplicateGuard::new(client.clone(), config.redis.prefix.clone())),
        None => {
            warn!("No Redis configured, duplicate suppression is per process");
            Arc::new(InMemoryDuplicateGuard::new())
        }
    };

    let build_worker = |dead_letters: DeadLetterService| EmojiWorker {
        providers: providers.clone(),
        platform: platform.clone(),
        sharing: strategy_for_tier(config.slack.workspace_tier, platform.clone()),
        post_processor: ImagePostProcessor::new(config.worker.max_output_bytes),
        dead_letters,
        duplicates: duplicates.clone(),
        job_timeout: Duration::from_secs(config.worker.job_timeout_secs),
        delivery_policy: DeliveryPolicy::new(config.queue.max_delivery_attempts),
    };

    // Queue backend
    let (queue, push_worker): (JobQueueService, Option<Arc<EmojiWorker>>) = match config.queue.backend {
        QueueBackend::Push => {
            let queue = PushTopicQueue::from_config(publish_client.clone(), &config.queue)?;
            let dead_letters: DeadLetterService =
                match PushDeadLetterSink::from_config(publish_client, &config.queue)? {
                    Some(sink) => Arc::new(sink),
                    None => {
                        warn!("No dead-letter topic configured, corrupted payloads are only logged");
                        Arc::new(LoggingDeadLetterSink)
                    }
                };
            info!("Push queue enabled, jobs arrive on POST /process");
            (Arc::new(queue), Some(Arc::new(build_worker(dead_letters))))
        }
        QueueBackend::Redis => {
            let url = config
                .redis
                .url
                .as_deref()
                .context("redis.url is required for the redis queue backend")?;
            let redis_client = redis::Client::open(url).context("Invalid redis.url")?;
            let redis_conn = redis::aio::ConnectionManager::new(redis_client)
                .await
                .context("Failed to connect to Redis job queue")?;
            let storage = EmojiJobStorage::new(redis_conn);

            let dead_letters: DeadLetterService = match &redis {
                Some(client) => Arc::new(RedisDeadLetterSink::new(client.clone(), &config.redis.prefix)),
                None => Arc::new(LoggingDeadLetterSink),
            };
            let worker = build_worker(dead_letters);
            let retries = worker.delivery_policy.retries();
            let worker_storage = storage.clone();

            // Spawn the worker in the background
            tokio::spawn(async move {
                let monitor = Monitor::new().register({
                    WorkerBuilder::new("emoji")
                        .retry(RetryPolicy::retries(retries))
                        .data(worker)
                        .backend(worker_storage)
                        .build_fn(emoji_worker)
                });

                if let Err(e) = monitor.run().await {
                    error!(error = %e, "Emoji worker failed");
                }
            });
            info!("Redis job queue and worker started");
            (Arc::new(RedisJobQueue::new(storage)), None)
        }
        QueueBackend::Memory => {
            let (queue, receiver) = InMemoryJobQueue::channel();
            tokio::spawn(run_in_memory_worker(
                receiver,
                build_worker(Arc::new(LoggingDeadLetterSink)),
            ));
            warn!("In-memory queue enabled, queued jobs are lost on restart");
            (Arc::new(queue), None)
        }
    };

    let state = AppState {
        signatures: Arc::new(SignatureValidator::with_replay_window(
            config.slack.signing_secret.clone(),
            Duration::from_secs(config.slack.replay_window_secs),
        )),
        ingress: WebhookIngress::new(
            queue,
            default_provider,
            Duration::from_millis(config.server.ingress_deadline_ms),
        ),
        worker: push_worker,
    };

    // Build router; /process may run for the whole job budget
    let request_timeout = Duration::from_secs(config.worker.job_timeout_secs + 30);
    let app: Router = router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http());

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
