//! Duplex byte copier.
//!
//! # Responsibilities
//! - Move bytes client → target and target → client, uninterpreted
//! - End the tunnel as soon as either direction stops
//! - Say why it stopped: which peer closed, or which I/O error, or idleness
//!
//! # Design Decisions
//! - Each direction is its own task; the first to finish decides the end
//! - The losing task is aborted and joined before `run` returns, so both
//!   connections are dropped (closed) by then and nothing lingers
//! - Idleness is judged across both directions: a one-way stream that
//!   keeps flowing is not idle
//! - Byte counts live in atomics so an aborted task's progress still counts

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::observability::metrics;

/// Read buffer per direction.
pub const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Longest wait for a write half to shut down after its source hit EOF.
/// A TLS peer that stopped reading can hold the close_notify flush forever.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToTarget => "client_to_target",
            Direction::TargetToClient => "target_to_client",
        }
    }
}

/// Why a tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// The client closed its side.
    ClientClosed,
    /// The target closed its side.
    TargetClosed,
    /// A read or write failed in `direction`.
    NetworkError {
        direction: Direction,
        kind: io::ErrorKind,
    },
    /// Neither direction moved a byte for the configured idle period.
    IdleTimeout,
}

impl TunnelEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelEnd::ClientClosed => "client_closed",
            TunnelEnd::TargetClosed => "target_closed",
            TunnelEnd::NetworkError { .. } => "network_error",
            TunnelEnd::IdleTimeout => "idle_timeout",
        }
    }
}

/// Summary of a finished tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplexReport {
    pub end: TunnelEnd,
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Last time any byte moved, as millis since `origin`.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn quiet_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// How one copy direction failed.
#[derive(Debug)]
enum CopyFailure {
    Read(io::Error),
    Write(io::Error),
}

async fn copy<R, W>(
    mut reader: R,
    mut writer: W,
    counter: Arc<AtomicU64>,
    activity: Arc<Activity>,
) -> Result<(), CopyFailure>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(CopyFailure::Read)?;
        if n == 0 {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
            return Ok(());
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(CopyFailure::Write)?;
        writer.flush().await.map_err(CopyFailure::Write)?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

async fn idle_watchdog(activity: &Activity, limit: Duration) {
    loop {
        let quiet = activity.quiet_for();
        if quiet >= limit {
            return;
        }
        tokio::time::sleep(limit - quiet).await;
    }
}

type CopyTask = JoinHandle<Result<(), CopyFailure>>;

enum First {
    Copy(Direction, Result<Result<(), CopyFailure>, tokio::task::JoinError>),
    Idle,
}

fn classify(
    direction: Direction,
    outcome: Result<Result<(), CopyFailure>, tokio::task::JoinError>,
) -> TunnelEnd {
    let source_closed = match direction {
        Direction::ClientToTarget => TunnelEnd::ClientClosed,
        Direction::TargetToClient => TunnelEnd::TargetClosed,
    };
    match outcome {
        Ok(Ok(())) => source_closed,
        // TLS peers that vanish without close_notify surface as UnexpectedEof.
        Ok(Err(CopyFailure::Read(e))) if e.kind() == io::ErrorKind::UnexpectedEof => source_closed,
        Ok(Err(CopyFailure::Read(e))) | Ok(Err(CopyFailure::Write(e))) => TunnelEnd::NetworkError {
            direction,
            kind: e.kind(),
        },
        Err(_) => TunnelEnd::NetworkError {
            direction,
            kind: io::ErrorKind::Other,
        },
    }
}

/// Cancel a copy task and wait for it to release its halves.
async fn stop(task: CopyTask) {
    task.abort();
    let _ = task.await;
}

/// Relay bytes between `client` and `target` until either direction ends.
///
/// Both streams are closed when this returns.
pub async fn run<C, T>(client: C, target: T, idle: Option<Duration>) -> DuplexReport
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (target_read, target_write) = tokio::io::split(target);

    let up_bytes = Arc::new(AtomicU64::new(0));
    let down_bytes = Arc::new(AtomicU64::new(0));
    let activity = Arc::new(Activity::new());

    let mut upstream: CopyTask = tokio::spawn(copy(
        client_read,
        target_write,
        Arc::clone(&up_bytes),
        Arc::clone(&activity),
    ));
    let mut downstream: CopyTask = tokio::spawn(copy(
        target_read,
        client_write,
        Arc::clone(&down_bytes),
        Arc::clone(&activity),
    ));

    let first = tokio::select! {
        res = &mut upstream => First::Copy(Direction::ClientToTarget, res),
        res = &mut downstream => First::Copy(Direction::TargetToClient, res),
        _ = idle_watchdog(&activity, idle.unwrap_or_default()), if idle.is_some() => First::Idle,
    };

    let end = match first {
        First::Copy(direction @ Direction::ClientToTarget, res) => {
            stop(downstream).await;
            classify(direction, res)
        }
        First::Copy(direction @ Direction::TargetToClient, res) => {
            stop(upstream).await;
            classify(direction, res)
        }
        First::Idle => {
            stop(upstream).await;
            stop(downstream).await;
            TunnelEnd::IdleTimeout
        }
    };

    let report = DuplexReport {
        end,
        client_to_target: up_bytes.load(Ordering::Relaxed),
        target_to_client: down_bytes.load(Ordering::Relaxed),
    };

    metrics::record_bytes(Direction::ClientToTarget.as_str(), report.client_to_target);
    metrics::record_bytes(Direction::TargetToClient.as_str(), report.target_to_client);

    match end {
        TunnelEnd::ClientClosed | TunnelEnd::TargetClosed => tracing::debug!(
            end = end.as_str(),
            client_to_target = report.client_to_target,
            target_to_client = report.target_to_client,
            "Tunnel closed"
        ),
        TunnelEnd::NetworkError { direction, kind } => tracing::warn!(
            direction = direction.as_str(),
            error_kind = %kind,
            client_to_target = report.client_to_target,
            target_to_client = report.target_to_client,
            "Tunnel broken by I/O error"
        ),
        TunnelEnd::IdleTimeout => tracing::info!(
            idle_secs = idle.unwrap_or_default().as_secs_f64(),
            client_to_target = report.client_to_target,
            target_to_client = report.target_to_client,
            "Tunnel idle, closing"
        ),
    }

    report
}
