//! Readiness gate
//!
//! Blocks startup until a dependency accepts connections. The gate has no
//! retry cap and no timeout of its own: it polls with a fixed backoff until
//! the probe succeeds, and only external termination (operator, liveness or
//! startup probe) ends it early.

use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ConnectionParameters;

/// Result of a single probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Unready(String),
}

/// A dependency the gate can poll
pub trait Probe {
    /// Human-readable dependency name used in log lines
    fn name(&self) -> &str;

    /// Make one connection attempt. Must not retry internally.
    fn probe(&self) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Summary of a gate that has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateReport {
    /// Total attempts, including the successful one
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Fixed-backoff polling loop around a [`Probe`]
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    retry_interval: Duration,
}

impl ReadinessGate {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    /// Poll `probe` until it reports ready
    pub async fn wait<P: Probe>(&self, probe: &P) -> GateReport {
        self.wait_observed(probe, |_| {}).await
    }

    /// Like [`wait`](Self::wait), handing every attempt's outcome to
    /// `observe` before acting on it
    pub async fn wait_observed<P, F>(&self, probe: &P, mut observe: F) -> GateReport
    where
        P: Probe,
        F: FnMut(&ProbeOutcome),
    {
        let start = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            debug!("Probing {} (attempt {})", probe.name(), attempts);

            let outcome = probe.probe().await;
            observe(&outcome);

            match outcome {
                ProbeOutcome::Ready => {
                    let report = GateReport {
                        attempts,
                        elapsed: start.elapsed(),
                    };
                    info!(
                        "✓ {} is up (attempt {}, waited {:.1}s)",
                        probe.name(),
                        attempts,
                        report.elapsed.as_secs_f64()
                    );
                    return report;
                }
                ProbeOutcome::Unready(reason) => {
                    warn!(
                        "{} is unavailable (attempt {}): {} - retrying in {}s",
                        probe.name(),
                        attempts,
                        reason,
                        self.retry_interval.as_secs_f64()
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Opens one connection, pings it and closes it
pub struct PostgresProbe {
    options: PgConnectOptions,
    connect_timeout: Duration,
    target: String,
}

impl PostgresProbe {
    pub fn new(params: &ConnectionParameters, connect_timeout: Duration) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port);

        if !params.user.is_empty() {
            options = options.username(&params.user);
        }
        if !params.password.is_empty() {
            options = options.password(&params.password);
        }
        if !params.name.is_empty() {
            options = options.database(&params.name);
        }

        Self {
            options,
            connect_timeout,
            target: format!("{}:{}/{}", params.host, params.port, params.name),
        }
    }

    /// `host:port/database`, safe to log
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Probe for PostgresProbe {
    fn name(&self) -> &str {
        "PostgreSQL"
    }

    async fn probe(&self) -> ProbeOutcome {
        let attempt = async {
            let mut conn = PgConnection::connect_with(&self.options).await?;
            // A connection that drops before the ping counts as a failure
            conn.ping().await?;
            conn.close().await
        };

        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(())) => ProbeOutcome::Ready,
            Ok(Err(e)) => ProbeOutcome::Unready(e.to_string()),
            Err(_) => ProbeOutcome::Unready(format!(
                "connection timed out after {}s",
                self.connect_timeout.as_secs()
            )),
        }
    }
}

// =============================================================================
// TCP (Kafka brokers)
// =============================================================================

/// Ready when every address accepts a TCP connection
pub struct TcpProbe {
    name: String,
    addresses: Vec<String>,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, addresses: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            addresses,
            connect_timeout,
        }
    }
}

impl Probe for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> ProbeOutcome {
        for address in &self.addresses {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address.as_str()))
                .await
            {
                Ok(Ok(_stream)) => {}
                Ok(Err(e)) => return ProbeOutcome::Unready(format!("{}: {}", address, e)),
                Err(_) => {
                    return ProbeOutcome::Unready(format!(
                        "{}: connection timed out after {}s",
                        address,
                        self.connect_timeout.as_secs()
                    ))
                }
            }
        }
        ProbeOutcome::Ready
    }
}
