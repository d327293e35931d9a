//! Graphite plaintext publisher
//!
//! A scrape loop snapshots the [`MetricStore`] once per poll interval and
//! queues the encoded batch; a sender loop drains the queue over a single TCP
//! connection to the collector. Delivery is best effort: a failed batch is
//! logged and dropped, and the next interval is the retry.

use crate::config::PublisherConfig;
use crate::error::Result;
use crate::metrics::{CounterSample, MetricStore};
use crate::publish::schedule::{BackgroundTask, Shutdown};
use crate::publish::Publisher;
use std::fmt::Write as _;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GraphitePublisher {
    store: Arc<MetricStore>,
    runtime: Option<Handle>,
    task: Mutex<Option<BackgroundTask>>,
}

impl GraphitePublisher {
    /// Publishes from a dedicated thread.
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            runtime: None,
            task: Mutex::new(None),
        }
    }

    /// Publishes from a task on the given runtime.
    pub fn with_runtime(store: Arc<MetricStore>, runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            ..Self::new(store)
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Publisher for GraphitePublisher {
    fn start(&self, config: &PublisherConfig) -> Result<()> {
        config.validate()?;
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            debug!("Graphite publisher already running; ignoring start");
            return Ok(());
        }

        let store = self.store.clone();
        let config = config.clone();
        *task = Some(BackgroundTask::spawn(
            "graphite-publisher",
            self.runtime.as_ref(),
            move |shutdown| run(store, config, shutdown),
        )?);
        Ok(())
    }

    fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop();
            info!("Graphite publisher stopped");
        }
    }
}

async fn run(store: Arc<MetricStore>, config: PublisherConfig, shutdown: Shutdown) {
    let (tx, rx) = mpsc::channel::<String>(config.queue_size.max(1));
    let sender = GraphiteSender::new(config.address());

    tokio::join!(
        scrape_loop(store, tx, config.poll_interval, config.send_as_rate, shutdown),
        sender.run(rx)
    );
}

/// Queues one encoded batch per poll interval until shutdown. A batch that
/// finds the queue full is dropped; the counters it carried are not re-sent.
async fn scrape_loop(
    store: Arc<MetricStore>,
    tx: mpsc::Sender<String>,
    poll_interval: Duration,
    send_as_rate: bool,
    mut shutdown: Shutdown,
) {
    let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            _ = ticker.tick() => {
                let samples = store.snapshot();
                if samples.is_empty() {
                    continue;
                }
                let timestamp = chrono::Utc::now().timestamp();
                let batch = encode_plaintext(&samples, timestamp, poll_interval, send_as_rate);
                match tx.try_send(batch) {
                    Ok(()) => debug!(counters = samples.len(), "Queued metrics batch"),
                    Err(TrySendError::Full(_)) => {
                        warn!(counters = samples.len(), "Outbound metrics queue full; dropping batch")
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    // Dropping `tx` lets the sender drain what is queued and exit.
}

/// Encodes samples as Graphite plaintext lines: `<path> <value> <timestamp>`.
///
/// With `as_rate` each value is divided by the interval, giving events per second.
pub fn encode_plaintext(
    samples: &[CounterSample],
    timestamp: i64,
    interval: Duration,
    as_rate: bool,
) -> String {
    let mut out = String::new();
    for sample in samples {
        if as_rate {
            let rate = sample.value as f64 / interval.as_secs_f64();
            let _ = writeln!(out, "{} {} {}", sample.path, rate, timestamp);
        } else {
            let _ = writeln!(out, "{} {} {}", sample.path, sample.value, timestamp);
        }
    }
    out
}

struct GraphiteSender {
    address: String,
    connection: Option<TcpStream>,
}

impl GraphiteSender {
    fn new(address: String) -> Self {
        Self {
            address,
            connection: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<String>) {
        while let Some(batch) = rx.recv().await {
            if let Err(e) = self.transmit(&batch).await {
                // Reconnect on the next batch.
                self.connection = None;
                warn!(address = %self.address, "Failed to publish metrics to Graphite: {}", e);
            }
        }
        debug!(address = %self.address, "Graphite sender finished");
    }

    async fn transmit(&mut self, batch: &str) -> io::Result<()> {
        if self.connection.is_none() {
            let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
                .await
                .map_err(|_| timed_out("connect"))??;
            debug!(address = %self.address, "Connected to Graphite");
            self.connection = Some(stream);
        }
        let Some(stream) = self.connection.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no Graphite connection"));
        };

        time::timeout(WRITE_TIMEOUT, async {
            stream.write_all(batch.as_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| timed_out("write"))?
    }
}

fn timed_out(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("Graphite {operation} timed out"),
    )
}
