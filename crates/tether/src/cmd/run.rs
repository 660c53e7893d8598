//! Run command - Start the agent
//!
//! Startup order:
//!
//! 1. wait until the account id and registration key are configured
//! 2. open the identity cache and start the synchronizer
//! 3. start producers (the health reporter emits `agent_status`)
//! 4. once the agent is registered and `agent_status` is resolved, open the
//!    broker session and start draining the outbound queue
//!
//! Shutdown stops the synchronizer and producers, flushes the queue, sends the
//! disconnect message (unless an upgrade is in progress) and closes the
//! broker connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tether_config::Config;
use tether_core::{
    AGENT_STATUS, Backoff, Discovery, IdentityCache, MetricFilter, SharedDiscovery, SyncSignals,
};
use tether_registry::{HttpRegistry, Registry};
use tether_sync::{Bootstrap, RegistrationSettings, SyncContext, Synchronizer, wait_for_settings};
use tether_transport::{
    DrainLoop, EventPump, MetricEmitter, QueueReceiver, Transport, TransportHandle,
    TransportMetrics, queue, session,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::facts::local_facts;
use crate::health::HealthReporter;
use crate::observer::AgentObserver;

/// Capacity of the channel from the MQTT event pump to the transport
const EVENT_CAPACITY: usize = 64;

/// Time given to the synchronizer and producers to stop
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the agent until SIGINT or SIGTERM
pub async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let config_display = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %config_display,
        "tether starting"
    );

    if let Err(e) = run_agent(config, config_path).await {
        error!(error = %e, "agent error");
        return Err(e);
    }

    info!("tether shutdown complete");
    Ok(())
}

/// Registration settings from a fresh read of the config file
///
/// A config file that became unreadable keeps the settings loaded at startup.
fn reload_settings(initial: &Config, path: Option<&Path>) -> Option<RegistrationSettings> {
    let reloaded = path.and_then(|path| match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "failed to reload configuration");
            None
        }
    });
    let config = reloaded.as_ref().unwrap_or(initial);

    config
        .registry
        .registration()
        .map(|(account_id, key)| RegistrationSettings {
            account_id: account_id.to_string(),
            registration_key: key.to_string(),
        })
}

/// Broker session tasks
struct Session {
    handle: TransportHandle,
    link_cancel: CancellationToken,
    drain: JoinHandle<()>,
    transport: JoinHandle<()>,
    pump: JoinHandle<()>,
}

struct SessionParts {
    cache: Arc<IdentityCache>,
    signals: Arc<SyncSignals>,
    discovery: Arc<dyn Discovery>,
    metrics: Arc<TransportMetrics>,
    queue: QueueReceiver,
}

/// Connect to the broker and start draining the queue
fn start_session(
    config: &Config,
    parts: SessionParts,
    cancel: &CancellationToken,
) -> Result<Session> {
    let credentials = parts.cache.credentials();
    let (Some(agent_id), Some(password)) = (credentials.agent_id, credentials.password) else {
        anyhow::bail!("agent credentials missing after registration");
    };

    let (link, eventloop) =
        session(&config.mqtt, &agent_id, &password).context("failed to configure MQTT client")?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
    let transport = Transport::new(
        Arc::new(link),
        &agent_id,
        &config.mqtt,
        events_rx,
        parts.signals,
        parts.discovery,
        Arc::clone(&parts.metrics),
    );
    let handle = transport.handle();
    let pump = EventPump::new(
        eventloop,
        events_tx,
        transport.in_flight(),
        &agent_id,
        &config.mqtt,
    );
    let drain = DrainLoop::new(
        parts.queue,
        parts.cache,
        handle.clone(),
        &config.queue,
        parts.metrics,
    );

    // The link outlives the drain loop so the final flush and the disconnect
    // message can still be acknowledged
    let link_cancel = CancellationToken::new();
    info!(
        agent_id = %agent_id,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "connecting to the broker"
    );

    Ok(Session {
        handle,
        transport: tokio::spawn(transport.run(link_cancel.clone())),
        pump: tokio::spawn(pump.run(link_cancel.clone())),
        drain: tokio::spawn(drain.run(cancel.clone())),
        link_cancel,
    })
}

async fn run_agent(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    // Create cancellation token for coordinated shutdown
    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            info!("shutdown signal received, stopping agent...");
            cancel.cancel();
        })
    };

    let backoff = Backoff::new(config.sync.config_wait_initial, config.sync.config_wait_max);
    let reload = || reload_settings(&config, config_path.as_deref());
    let Some(settings) = wait_for_settings(reload, backoff, &cancel).await else {
        info!("stopped before registration settings were configured");
        return Ok(());
    };

    let cache = Arc::new(
        IdentityCache::open(&config.agent.state_file).context("failed to open state file")?,
    );
    let signals = Arc::new(SyncSignals::new());
    let discovery = Arc::new(SharedDiscovery::new(Arc::clone(&signals)));
    discovery.set_facts(local_facts(config.agent.fqdn.as_deref()));

    let whitelist = config
        .metric
        .alerting_metrics
        .iter()
        .cloned()
        .chain(std::iter::once(AGENT_STATUS.to_string()));
    let filter = Arc::new(MetricFilter::new(whitelist));

    let registry: Arc<dyn Registry> = Arc::new(
        HttpRegistry::new(&config.registry.api_base, config.registry.request_timeout)
            .context("failed to create registry client")?,
    );

    let ctx = SyncContext {
        cache: Arc::clone(&cache),
        registry,
        discovery: Arc::clone(&discovery) as Arc<dyn Discovery>,
        observer: Arc::new(AgentObserver::new(Arc::clone(&discovery))),
        signals: Arc::clone(&signals),
        filter: Arc::clone(&filter),
        account_id: settings.account_id.clone(),
    };
    let bootstrap = Bootstrap::new(settings, config.agent.fqdn.clone());
    let synchronizer = Synchronizer::new(ctx, bootstrap, &config.sync);
    let mut ready = synchronizer.readiness();
    let sync_task = tokio::spawn(synchronizer.run(cancel.clone()));

    // Producers may emit from now on; points wait in the queue
    let metrics = Arc::new(TransportMetrics::new());
    let (queue_tx, queue_rx) = queue(config.queue.capacity, Arc::clone(&metrics));
    let emitter = MetricEmitter::new(
        Arc::clone(&cache),
        filter,
        Arc::clone(&signals),
        queue_tx,
        Arc::clone(&metrics),
    );
    let transport_slot = Arc::new(OnceLock::new());
    let health = HealthReporter::new(
        Arc::clone(&cache),
        emitter,
        Arc::clone(&metrics),
        Arc::clone(&transport_slot),
        config.agent.health_interval,
    );
    let health_task = tokio::spawn(health.run(cancel.clone()));

    info!("waiting for registration before connecting to the broker");
    let is_ready = tokio::select! {
        _ = cancel.cancelled() => false,
        changed = ready.wait_for(|ready| *ready) => changed.is_ok(),
    };

    let session = if is_ready {
        let parts = SessionParts {
            cache: Arc::clone(&cache),
            signals,
            discovery: discovery as Arc<dyn Discovery>,
            metrics: Arc::clone(&metrics),
            queue: queue_rx,
        };
        match start_session(&config, parts, &cancel) {
            Ok(session) => {
                let _ = transport_slot.set(session.handle.clone());
                Some(session)
            }
            Err(e) => {
                cancel.cancel();
                shutdown_task("synchronizer", sync_task, TASK_SHUTDOWN_TIMEOUT).await;
                shutdown_task("health reporter", health_task, TASK_SHUTDOWN_TIMEOUT).await;
                signal_task.abort();
                return Err(e);
            }
        }
    } else {
        None
    };

    info!("tether running");
    cancel.cancelled().await;

    shutdown_task("synchronizer", sync_task, TASK_SHUTDOWN_TIMEOUT).await;
    shutdown_task("health reporter", health_task, TASK_SHUTDOWN_TIMEOUT).await;

    if let Some(session) = session {
        // The drain loop bounds its own flush with the shutdown grace period
        let flush_timeout = config.queue.shutdown_grace + Duration::from_secs(1);
        shutdown_task("drain loop", session.drain, flush_timeout).await;

        let announce = !config.agent.upgrade_file.exists();
        if !announce {
            info!(
                upgrade_file = %config.agent.upgrade_file.display(),
                "upgrade in progress, not announcing disconnection"
            );
        }
        session
            .handle
            .shutdown(announce, config.mqtt.ack_timeout)
            .await;

        session.link_cancel.cancel();
        shutdown_task("transport", session.transport, TASK_SHUTDOWN_TIMEOUT).await;
        shutdown_task("mqtt event pump", session.pump, TASK_SHUTDOWN_TIMEOUT).await;
    }

    let snapshot = metrics.snapshot();
    info!(
        points_sent = snapshot.points_sent,
        points_lost = snapshot.points_lost(),
        points_pending = snapshot.points_pending,
        "final transport counters"
    );

    signal_task.abort();
    Ok(())
}

/// Wait for a task to stop, warning on timeout or panic
async fn shutdown_task(name: &str, task: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "task panicked during shutdown"),
        Err(_) => warn!(task = name, "task did not finish within timeout, continuing shutdown"),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
