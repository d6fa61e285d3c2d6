//! Fixed-size worker pool that fans one operation out to many hosts.

use crate::client::{find_operation, ProtocolClient};
use crate::error::DispatchError;
use crate::params::{Params, Payload};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pool size used when the configured worker count is zero or negative.
pub const DEFAULT_WORKERS: usize = 10;

/// Result of running one job against one host.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub host: IpAddr,
    pub port: u16,
    pub operation: String,
    pub result: Result<Payload, DispatchError>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.result.as_ref().err()
    }
}

/// All outcomes of one run, in completion order. One outcome per submitted host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    outcomes: Vec<Outcome>,
}

impl Report {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outcome> {
        self.outcomes.iter()
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.len() - self.successes()
    }
}

impl From<Vec<Outcome>> for Report {
    fn from(outcomes: Vec<Outcome>) -> Self {
        Report { outcomes }
    }
}

impl IntoIterator for Report {
    type Item = Outcome;
    type IntoIter = std::vec::IntoIter<Outcome>;
    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

impl<'a> IntoIterator for &'a Report {
    type Item = &'a Outcome;
    type IntoIter = std::slice::Iter<'a, Outcome>;
    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

struct Job {
    host: IpAddr,
    port: u16,
    operation: Arc<str>,
    params: Arc<Params>,
}

pub struct Dispatcher {
    client: Arc<dyn ProtocolClient>,
    workers: usize,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ProtocolClient>, workers: i64) -> Self {
        let workers = match usize::try_from(workers) {
            Ok(0) => DEFAULT_WORKERS,
            Ok(w) => w,
            Err(_) if workers > 0 => usize::MAX,
            Err(_) => DEFAULT_WORKERS,
        };
        Dispatcher { client, workers }
    }

    /// Effective pool size after coercion.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    /// Run `operation` against every host and collect one outcome per host.
    ///
    /// Never fails as a whole: per-host errors, including cancellation observed before a
    /// call starts, end up in that host's outcome. Calls already in flight when `cancel`
    /// fires run until the client's own timeout.
    pub async fn run(&self, cancel: &CancellationToken, hosts: &[IpAddr], port: u16, operation: &str, params: Params) -> Report {
        if hosts.is_empty() {
            return Report::default();
        }
        let started = Instant::now();
        let (job_tx, job_rx) = mpsc::channel::<Job>(hosts.len());
        let (result_tx, mut result_rx) = mpsc::channel::<Outcome>(hosts.len());
        let job_rx = Arc::new(Mutex::new(job_rx));

        // a worker beyond the job count would only wait on a closed queue
        let spawned = self.workers.min(hosts.len());
        let mut handles = Vec::with_capacity(spawned);
        for id in 0..spawned {
            handles.push(tokio::spawn(worker(id, self.client.clone(), cancel.clone(), job_rx.clone(), result_tx.clone())));
        }
        drop(result_tx);

        let operation: Arc<str> = Arc::from(operation);
        let params = Arc::new(params);
        for &host in hosts {
            let job = Job { host, port, operation: operation.clone(), params: params.clone() };
            // queue capacity equals the job count, so this never waits on a worker
            if job_tx.send(job).await.is_err() {
                warn!("all workers exited before the queue was filled");
                break;
            }
        }
        drop(job_tx);

        for h in handles {
            if let Err(e) = h.await {
                warn!(error = %e, "worker task failed");
            }
        }

        let mut outcomes = Vec::with_capacity(hosts.len());
        while let Some(o) = result_rx.recv().await {
            outcomes.push(o);
        }
        let report = Report::from(outcomes);
        info!(
            protocol = self.client.protocol(),
            operation = %operation,
            hosts = hosts.len(),
            workers = self.workers,
            ok = report.successes(),
            failed = report.failures(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        report
    }
}

async fn worker(
    id: usize,
    client: Arc<dyn ProtocolClient>,
    cancel: CancellationToken,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<Outcome>,
) {
    loop {
        let next = { jobs.lock().await.recv().await };
        let Some(job) = next else { break };
        let outcome = if cancel.is_cancelled() {
            Outcome {
                host: job.host,
                port: job.port,
                operation: job.operation.to_string(),
                result: Err(DispatchError::Cancelled),
                elapsed: Duration::ZERO,
            }
        } else {
            execute(&client, job).await
        };
        debug!(worker = id, host = %outcome.host, ok = outcome.is_success(), elapsed_ms = outcome.elapsed.as_millis() as u64, "job done");
        if results.send(outcome).await.is_err() {
            break;
        }
    }
}

async fn execute(client: &Arc<dyn ProtocolClient>, job: Job) -> Outcome {
    let start = Instant::now();
    let result = if find_operation(client.operations(), &job.operation).is_none() {
        Err(DispatchError::UnknownOperation(job.operation.to_string()))
    } else {
        // own task, so a panicking client costs only this host's outcome
        let call = tokio::spawn({
            let client = client.clone();
            let (host, port) = (job.host, job.port);
            let (operation, params) = (job.operation.clone(), job.params.clone());
            async move { client.invoke(host, port, &operation, &params).await }
        });
        match call.await {
            Ok(r) => r,
            Err(e) => {
                warn!(host = %job.host, error = %e, "protocol client task failed");
                Err(DispatchError::transport(format!("client panicked: {}", e)))
            }
        }
    };
    Outcome {
        host: job.host,
        port: job.port,
        operation: job.operation.to_string(),
        result,
        elapsed: start.elapsed(),
    }
}
