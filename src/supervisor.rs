//! Multi-process cluster mode.
//!
//! The supervisor re-executes the current binary once per worker slot, with
//! [`WORKER_ENV`] set to the slot number. Each worker runs the same `main`,
//! sees the variable, and serves on a listener bound with `SO_REUSEPORT` so
//! the kernel spreads connections across workers.
//!
//! A worker that exits for any reason is restarted after the configured
//! delay. On SIGTERM or Ctrl-C the supervisor kills every worker and returns.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;

/// Environment variable that marks a process as a cluster worker.
pub const WORKER_ENV: &str = "AZURA_WORKER_ID";

/// Slot number of this process when it runs as a cluster worker.
pub fn worker_id() -> Option<usize> {
    parse_worker_id(std::env::var(WORKER_ENV).ok().as_deref())
}

fn parse_worker_id(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse().ok()
}

/// Binds `addr` with `SO_REUSEPORT` so several processes can accept on the
/// same port.
pub fn bind_shared(addr: &str) -> io::Result<TcpListener> {
    let addr = resolve(addr)?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("`{addr}` resolved to no address"))
    })
}

/// Spawns and babysits worker processes.
#[derive(Debug)]
pub struct Supervisor {
    workers: usize,
    restart_delay: Duration,
    program: PathBuf,
    args: Vec<String>,
}

impl Supervisor {
    /// A supervisor that re-runs the current executable with its current
    /// arguments.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let program = std::env::current_exe()?;
        let args = std::env::args().skip(1).collect();
        Ok(Self::new(program, args, config.worker_count(), config.restart_delay()))
    }

    pub fn new(program: PathBuf, args: Vec<String>, workers: usize, restart_delay: Duration) -> Self {
        Self { workers: workers.max(1), restart_delay, program, args }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs until SIGTERM or Ctrl-C.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(crate::server::shutdown_signal()).await
    }

    /// Runs until `signal` resolves, then kills every worker and waits for
    /// the slot tasks to finish.
    pub async fn run_until<S>(self, signal: S) -> Result<(), Error>
    where
        S: std::future::Future<Output = ()>,
    {
        info!(workers = self.workers, pid = std::process::id(), "supervisor started");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut slots = tokio::task::JoinSet::new();

        for id in 0..self.workers {
            let slot = Slot {
                id,
                program: self.program.clone(),
                args: self.args.clone(),
                restart_delay: self.restart_delay,
            };
            slots.spawn(slot.run(shutdown_rx.clone()));
        }

        signal.await;
        info!("shutdown signal received, stopping workers");
        let _ = shutdown_tx.send(true);

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                error!("worker slot task failed: {e}");
            }
        }

        info!("supervisor stopped");
        Ok(())
    }
}

/// One worker position. Keeps a process alive in it until shutdown.
struct Slot {
    id: usize,
    program: PathBuf,
    args: Vec<String>,
    restart_delay: Duration,
}

impl Slot {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let mut child = match self.command().spawn() {
                Ok(child) => child,
                Err(e) => {
                    error!(worker = self.id, "failed to spawn worker: {e}");
                    if self.pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };
            info!(worker = self.id, pid = child.id(), "worker started");

            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => warn!(worker = self.id, %status, "worker exited, restarting"),
                        Err(e) => error!(worker = self.id, "failed to wait on worker: {e}"),
                    }
                    if self.pause(&mut shutdown).await {
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    if let Err(e) = child.kill().await {
                        warn!(worker = self.id, "failed to kill worker: {e}");
                    }
                    info!(worker = self.id, "worker stopped");
                    return;
                }
            }
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(WORKER_ENV, self.id.to_string())
            .kill_on_drop(true);
        command
    }

    /// Waits out the restart delay. Returns `true` if shutdown arrived first.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.restart_delay) => *shutdown.borrow(),
            _ = shutdown.changed() => true,
        }
    }
}
