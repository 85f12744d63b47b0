//! Daemon wiring
//!
//! One registry behind a std mutex is shared by the request server and the
//! stale sweep. Every change resolves a fresh presence and drops it into a
//! `watch` channel that the publisher task drains.

use crate::client::DaemonClient;
use crate::clock::{Clock, SystemClock};
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::liveness::{ProcessProbe, SignalProbe};
use crate::publisher;
use crate::registry::SessionRegistry;
use crate::resolver::{self, Activity};
use crate::server::{self, ServerState};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Resolve presence on every registry change and publish it into `presence`.
///
/// Unchanged presences are not re-sent.
pub fn attach_presence(
    registry: &mut SessionRegistry,
    clock: Arc<dyn Clock>,
    presence: watch::Sender<Option<Activity>>,
) {
    registry.on_change(move |sessions| {
        let next = resolver::resolve(sessions, clock.now_ms());
        presence.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(sessions = sessions.len(), ?next, "presence changed");
            *current = next;
            true
        });
    });
}

/// Run the stale sweep every `interval` until the task is aborted.
pub fn spawn_sweep(
    registry: Arc<Mutex<SessionRegistry>>,
    interval: Duration,
    idle_timeout: Duration,
    remove_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let summary = match registry.lock() {
                Ok(mut reg) => reg.check_stale_sessions(idle_timeout, remove_timeout),
                Err(_) => {
                    warn!("Session registry lock poisoned, skipping sweep");
                    continue;
                }
            };
            if summary.changed() {
                info!(
                    dead = summary.dead.len(),
                    expired = summary.expired.len(),
                    idled = summary.idled.len(),
                    "stale sweep"
                );
            }
        }
    })
}

/// Resolves once `stop` flips to true (or its sender is gone)
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Refuse to start when the PID file names a live daemon.
///
/// A live pid alone is not enough, since pids get reused: the process must
/// also answer `/health` on `port`. Otherwise the file is stale and will be
/// overwritten.
async fn ensure_single_instance(pid_path: &Path, port: u16, probe: &dyn ProcessProbe) -> Result<()> {
    let Some(pid) = config::read_pid_file(pid_path) else {
        return Ok(());
    };
    if pid == std::process::id() || !probe.is_alive(pid) {
        return Ok(());
    }
    match DaemonClient::new(port).health().await {
        Ok(_) => Err(Error::AlreadyRunning(pid)),
        Err(e) => {
            warn!(pid, "Ignoring stale PID file, nothing answers on port {}: {}", port, e);
            Ok(())
        }
    }
}

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let pid_path = config::pid_file_path();
    if let Some(path) = &pid_path {
        ensure_single_instance(path, config.daemon_port, &SignalProbe).await?;
    }

    let listener = server::bind(config.daemon_port).await?;
    if let Some(path) = &pid_path {
        config::write_pid_file(path, std::process::id())?;
    }

    let (presence_tx, presence_rx) = watch::channel(None);
    let mut registry = SessionRegistry::new();
    attach_presence(&mut registry, Arc::new(SystemClock), presence_tx);
    let registry = Arc::new(Mutex::new(registry));
    let connected = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = watch::channel(false);

    let sweep = spawn_sweep(
        Arc::clone(&registry),
        config.stale_check_interval(),
        config.idle_timeout(),
        config.remove_timeout(),
    );

    #[cfg(unix)]
    let publisher_task = tokio::spawn(publisher::run(
        publisher::discord::DiscordIpc::new(config.discord_client_id.clone()),
        presence_rx,
        Arc::clone(&connected),
        publisher::RECONNECT_INTERVAL,
        stopped(stop_rx.clone()),
    ));
    #[cfg(not(unix))]
    let publisher_task = {
        warn!("Presence publishing is not supported on this platform");
        drop(presence_rx);
        tokio::spawn(async {})
    };

    let state = ServerState::new(Arc::clone(&registry), Arc::clone(&connected));
    let server_task = tokio::spawn(server::serve(listener, state, stopped(stop_rx)));

    info!(port = config.daemon_port, "Daemon started");
    shutdown_signal().await;
    info!("Shutting down");

    sweep.abort();
    stop_tx.send_replace(true);
    if let Err(e) = server_task.await {
        warn!("Request server task failed: {}", e);
    }
    if let Err(e) = publisher_task.await {
        warn!("Publisher task failed: {}", e);
    }
    if let Some(path) = &pid_path {
        config::remove_pid_file(path);
    }
    Ok(())
}
