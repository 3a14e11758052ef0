//! Tunnel supervisor
//!
//! Maintains a local forwarding endpoint to the remote SQL host over SSH.
//! The SQL adapter never opens SSH itself; it dials the local endpoint.
//!
//! State machine: idle -> connecting -> active -> {degraded -> connecting}
//! -> stopped. A heartbeat probes the local endpoint; two consecutive
//! failures degrade the tunnel, and auto-restart re-enters connecting with
//! exponential backoff.

use crate::config::TunnelConfig;
use crate::metrics;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

/// Supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Idle,
    Connecting,
    Active,
    Degraded,
    Stopped,
}

impl TunnelState {
    fn as_metric(&self) -> u8 {
        match self {
            TunnelState::Idle => 0,
            TunnelState::Connecting => 1,
            TunnelState::Active => 2,
            TunnelState::Degraded => 3,
            TunnelState::Stopped => 4,
        }
    }
}

/// Restart backoff schedule: 5s / 15s / 45s, capped at 5 minutes
fn restart_delay(attempt: u32) -> Duration {
    let secs = 5u64.saturating_mul(3u64.saturating_pow(attempt));
    Duration::from_secs(secs.min(300))
}

/// Supervises one SSH forwarding process
pub struct TunnelSupervisor {
    config: TunnelConfig,
    state_tx: watch::Sender<TunnelState>,
    shutdown: Arc<Notify>,
}

impl TunnelSupervisor {
    pub fn new(config: TunnelConfig) -> (Arc<Self>, watch::Receiver<TunnelState>) {
        let (state_tx, state_rx) = watch::channel(TunnelState::Idle);
        (
            Arc::new(Self {
                config,
                state_tx,
                shutdown: Arc::new(Notify::new()),
            }),
            state_rx,
        )
    }

    /// Current state
    pub fn state(&self) -> TunnelState {
        *self.state_tx.borrow()
    }

    /// Request the supervisor to stop
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Wait until the tunnel reaches `Active`, bounded by `timeout`
    pub async fn wait_active(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *rx.borrow() == TunnelState::Active {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return false,
            }
        }
    }

    fn set_state(&self, state: TunnelState) {
        metrics::record_tunnel_state(state.as_metric());
        let _ = self.state_tx.send(state);
    }

    fn spawn_ssh(&self) -> std::io::Result<Child> {
        let forward = format!(
            "127.0.0.1:{}:{}",
            self.config.local_port, self.config.remote_bind
        );
        Command::new("ssh")
            .arg("-N")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ExitOnForwardFailure=yes")
            .arg("-o")
            .arg("ServerAliveInterval=30")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-i")
            .arg(&self.config.key_path)
            .arg("-p")
            .arg(self.config.ssh_port.to_string())
            .arg("-L")
            .arg(forward)
            .arg(format!("{}@{}", self.config.user, self.config.host))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    /// Probe the local forwarded endpoint
    async fn probe(&self) -> bool {
        let addr = format!("127.0.0.1:{}", self.config.local_port);
        matches!(
            tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// Run the supervision loop until shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut restarts: u32 = 0;
            loop {
                self.set_state(TunnelState::Connecting);
                info!(
                    host = %self.config.host,
                    local_port = self.config.local_port,
                    "Opening SSH tunnel"
                );

                let mut child = match self.spawn_ssh() {
                    Ok(child) => child,
                    Err(e) => {
                        error!(error = %e, "Failed to spawn ssh");
                        if !self.backoff_or_stop(&mut restarts).await {
                            return;
                        }
                        continue;
                    }
                };

                // Give the forward a few seconds to come up
                let mut came_up = false;
                for _ in 0..10 {
                    if self.probe().await {
                        came_up = true;
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }

                if !came_up {
                    warn!("Tunnel endpoint did not come up");
                    let _ = child.kill().await;
                    self.set_state(TunnelState::Degraded);
                    if !self.backoff_or_stop(&mut restarts).await {
                        return;
                    }
                    continue;
                }

                restarts = 0;
                self.set_state(TunnelState::Active);
                info!("Tunnel active");

                // Heartbeat until two consecutive failures or child exit
                let mut failures = 0u32;
                let heartbeat = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(heartbeat) => {
                            if self.probe().await {
                                failures = 0;
                            } else {
                                failures += 1;
                                warn!(failures, "Tunnel heartbeat failed");
                                if failures >= 2 {
                                    break;
                                }
                            }
                        }
                        status = child.wait() => {
                            warn!(?status, "Tunnel process exited");
                            break;
                        }
                        _ = self.shutdown.notified() => {
                            let _ = child.kill().await;
                            self.set_state(TunnelState::Stopped);
                            info!("Tunnel stopped");
                            return;
                        }
                    }
                }

                let _ = child.kill().await;
                self.set_state(TunnelState::Degraded);
                if !self.backoff_or_stop(&mut restarts).await {
                    return;
                }
            }
        })
    }

    /// Sleep through the restart backoff; false means stop was requested
    /// or auto-restart is disabled
    async fn backoff_or_stop(&self, restarts: &mut u32) -> bool {
        if !self.config.auto_restart {
            self.set_state(TunnelState::Stopped);
            return false;
        }
        let delay = restart_delay(*restarts);
        *restarts += 1;
        warn!(delay_secs = delay.as_secs(), "Tunnel restarting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.notified() => {
                self.set_state(TunnelState::Stopped);
                false
            }
        }
    }
}
