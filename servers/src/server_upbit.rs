//! # Upbit Stream Broadcaster
//!
//! Subscribes to the Upbit trade stream for the current top-N KRW markets
//! by 24h turnover and republishes every trade, once, on a ZeroMQ PUB socket.
//!
//! ## Functionality:
//! - **Ranking**: fetches the top-N at startup and refreshes it on calendar
//!   boundaries, swapping the subscription without a gap when markets enter
//!   or leave the ranking.
//! - **Resilience**: the upstream session reconnects with exponential
//!   backoff; duplicates replayed across reconnects are dropped.
//! - **Notifications**: lifecycle events, failed swaps and ranking changes
//!   go to a Mattermost-compatible webhook when one is configured.
//! - **Status**: `/health` and `/status` over HTTP.
//! - **Graceful Shutdown**: `tokio-graceful` on Ctrl-C / SIGTERM, bounded to
//!   10 seconds.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_common::core::{ManagerOptions, SubscriptionManager, SymbolSet};
use lib_common::ingestors::{RankingPoller, UpbitConnector};
use lib_common::markets::{RankingSource, UpbitApi};
use lib_common::notify::{NotifierHandle, WebhookNotifier, spawn_notifier};
use lib_common::publish::{ZmqPublisher, tcp_endpoint};

mod upbit_logic;
use upbit_logic::config::{self, Settings};
use upbit_logic::logger;
use upbit_logic::status::{self, StatusState};

const SERVICE_NAME: &str = "upbit-stream-broadcaster";
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);
const PUBLISH_QUEUE: usize = 10_000;
const NOTIFY_QUEUE: usize = 64;

/// Everything the streaming task needs once startup has succeeded.
struct App {
    settings: Settings,
    manager: SubscriptionManager<UpbitConnector>,
    api: UpbitApi,
    initial: SymbolSet,
    notifier: NotifierHandle,
    publisher: ZmqPublisher,
    status_listener: Option<TcpListener>,
    /// Cancels the poller, the status server and the publisher.
    tasks: CancellationToken,
    /// Set when the streaming task gives up; triggers shutdown.
    fatal: CancellationToken,
    failure: Arc<OnceLock<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config().context("invalid configuration")?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level, "upbit_broadcaster")?;
    info!(?settings, "Configuration loaded");

    let notifier_cancel = CancellationToken::new();
    let (notifier, notifier_task) = match &settings.mattermost_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url.clone()).context("failed to build webhook client")?;
            let (handle, task) = spawn_notifier(webhook, NOTIFY_QUEUE, notifier_cancel.clone());
            (handle, Some(task))
        }
        None => {
            info!("No webhook configured, notifications disabled");
            (NotifierHandle::disabled(), None)
        }
    };
    notifier.notify(format!("start {SERVICE_NAME}:{}", settings.version));

    let outcome = startup(settings, notifier.clone()).await;
    let result = match outcome {
        Ok(app) => run(app).await,
        Err(e) => {
            error!(error = %e, "Startup failed");
            notifier.notify(format!("{SERVICE_NAME} failed to start: {e:#}"));
            Err(e)
        }
    };

    // Drain what is queued, bounded by the notifier's own per-message limit.
    notifier_cancel.cancel();
    drop(notifier);
    if let Some(task) = notifier_task {
        if tokio::time::timeout(SHUTDOWN_LIMIT, task).await.is_err() {
            warn!("Notifier did not drain in time");
        }
    }

    info!("Bye!");
    result
}

/// Binds the publisher and the status listener and fetches the initial
/// ranking. Any failure here aborts the process.
async fn startup(settings: Settings, notifier: NotifierHandle) -> Result<App> {
    let tasks = CancellationToken::new();

    let endpoint = tcp_endpoint(settings.zmq_port);
    let publisher = ZmqPublisher::bind(&endpoint, PUBLISH_QUEUE, tasks.child_token())
        .await
        .context("cannot bind the publish endpoint")?;

    let status_listener = if settings.status_port == 0 {
        None
    } else {
        let addr = format!("0.0.0.0:{}", settings.status_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind the status endpoint on {addr}"))?;
        Some(listener)
    };

    let api = UpbitApi::new(&settings.upbit_rest_url).context("invalid Upbit REST URL")?;
    let initial = api
        .fetch_top_n(settings.top_tickers)
        .await
        .context("initial top markets unavailable")?;
    info!(symbols = %initial, "Initial top markets");

    let manager = SubscriptionManager::new(
        UpbitConnector::new(settings.wss_config()),
        publisher.sink.clone(),
        initial.clone(),
        ManagerOptions {
            backoff: settings.backoff,
            ..ManagerOptions::default()
        },
    );
    {
        let notifier = notifier.clone();
        manager.set_alert(move |text| {
            notifier.notify(text);
        });
    }

    Ok(App {
        settings,
        manager,
        api,
        initial,
        notifier,
        publisher,
        status_listener,
        tasks,
        fatal: CancellationToken::new(),
        failure: Arc::new(OnceLock::new()),
    })
}

/// Runs the broadcaster under `tokio-graceful` until a signal arrives or the
/// streaming task fails.
async fn run(app: App) -> Result<()> {
    let fatal = app.fatal.clone();
    let failure = Arc::clone(&app.failure);

    let shutdown = Shutdown::new(async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = fatal.cancelled() => {}
        }
    });
    shutdown.spawn_task_fn(move |guard| stream(guard, app));

    match shutdown.shutdown_with_limit(SHUTDOWN_LIMIT).await {
        Ok(elapsed) => info!(
            "shutdown: gracefully {}s after shutdown signal received",
            elapsed.as_secs_f64()
        ),
        Err(e) => warn!("shutdown: forcefully due to timeout: {}", e),
    }

    match failure.get() {
        Some(reason) => Err(anyhow!("{reason}")),
        None => Ok(()),
    }
}

async fn stream(guard: ShutdownGuard, app: App) {
    let App {
        settings,
        manager,
        api,
        initial,
        notifier,
        publisher,
        status_listener,
        tasks,
        fatal,
        failure,
    } = app;

    let started = tokio::select! {
        _ = guard.cancelled() => None,
        started = manager.start() => Some(started),
    };
    match started {
        Some(Ok(())) => {
            info!(symbols = %initial, endpoint = %publisher.endpoint, "Broadcasting");
            notifier.notify(format!(
                "{SERVICE_NAME}:{} streaming {} markets to {}",
                settings.version,
                initial.len(),
                publisher.endpoint
            ));
        }
        Some(Err(e)) => {
            error!(error = %e, "Subscription manager failed to start");
            let _ = failure.set(format!("subscription manager failed to start: {e}"));
            fatal.cancel();
            manager.stop().await;
            tasks.cancel();
            return;
        }
        None => {
            manager.stop().await;
            tasks.cancel();
            return;
        }
    }

    let poller = RankingPoller::new(
        api,
        manager.clone(),
        notifier.clone(),
        settings.top_tickers,
        settings.minute_interval,
        initial,
    );
    let mut handles: Vec<JoinHandle<()>> = vec![tokio::spawn(poller.run(tasks.child_token()))];

    if let Some(listener) = status_listener {
        let state = StatusState {
            manager: manager.clone(),
            sink: publisher.sink.clone(),
            version: settings.version.clone(),
            started: Instant::now(),
        };
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Status endpoint listening");
        }
        handles.push(spawn_logged(
            "status server",
            status::serve(listener, state, tasks.child_token().cancelled_owned()),
        ));
    }

    guard.cancelled().await;
    info!("Signal received: initiate graceful shutdown");

    tasks.cancel();
    manager.stop().await;
    for handle in handles {
        let _ = handle.await;
    }
    let _ = publisher.task.await;

    let stats = manager.stats();
    info!(
        ?stats,
        published = publisher.sink.published(),
        dropped = publisher.sink.dropped(),
        "Broadcaster stopped"
    );
    notifier.notify(format!(
        "stop {SERVICE_NAME}:{} (forwarded {}, reconnects {}, swaps {})",
        settings.version, stats.forwarded, stats.reconnects, stats.swaps
    ));
}

fn spawn_logged<F>(what: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(error = %e, "{what} exited with an error");
        }
    })
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
    }
}
