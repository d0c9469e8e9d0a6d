//! Client statistics publisher adapter (C8, spec.md §4.9): batches counters
//! and hands them to an external publisher under a fixed partition/row-key
//! contract. The wire format is the compatibility contract, not an
//! implementation detail, so it is reproduced here exactly.

use crate::error::ClientError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use time::macros::format_description;
use time::OffsetDateTime;

/// A single counter sample handed to the publisher, after the `"0"`-skip
/// and partition/row-key stamping have been applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRow {
    pub partition_key: String,
    pub row_key: String,
    pub value: String,
}

/// External sink for batched telemetry (spec.md §6). Object-safe so
/// deployments can swap providers and tests can capture emitted batches.
#[async_trait]
pub trait StatisticsPublisher: Send + Sync {
    async fn init_table(&self) -> Result<(), ClientError>;
    async fn bulk_insert(&self, rows: Vec<TelemetryRow>) -> Result<(), ClientError>;
}

/// Lets the lifecycle manager hold `Arc<dyn StatisticsPublisher>` while
/// still driving it through the generic [`StatisticsAdapter<P>`].
#[async_trait]
impl<T: StatisticsPublisher + ?Sized> StatisticsPublisher for Arc<T> {
    async fn init_table(&self) -> Result<(), ClientError> {
        (**self).init_table().await
    }

    async fn bulk_insert(&self, rows: Vec<TelemetryRow>) -> Result<(), ClientError> {
        (**self).bulk_insert(rows).await
    }
}

/// One raw counter sample as produced by the runtime, before batching.
pub struct CounterSample {
    pub name: String,
    /// Serialized value. A literal `"0"` is dropped (§4.9, R7).
    pub value: String,
}

/// Produces the raw counter samples the periodic flush loop batches and
/// publishes (spec.md §4.9: "periodically batches counters"). Out of scope
/// per spec.md §1 beyond this narrow seam — counter collection itself
/// belongs to the instrumented call sites, not to this crate.
pub trait CounterSource: Send + Sync {
    fn sample(&self) -> Vec<CounterSample>;
}

/// The default when no counters are wired up: nothing to publish, so the
/// flush loop simply never emits a batch.
#[derive(Default)]
pub struct NoopCounterSource;

impl CounterSource for NoopCounterSource {
    fn sample(&self) -> Vec<CounterSample> {
        Vec::new()
    }
}

/// Batches [`CounterSample`]s into [`TelemetryRow`]s and flushes them to a
/// [`StatisticsPublisher`] respecting the external bulk-write row cap.
///
/// Row keys are `name[":" clientEpoch] ":" seq6`, with `seq6` a zero-padded
/// six-digit monotonic counter scoped to this publisher's lifetime; the
/// partition key is `deploymentId ":" date` with an ISO `YYYY-MM-DD` date in
/// a locale-invariant (proleptic Gregorian, UTC) calendar.
pub struct StatisticsAdapter<P> {
    publisher: P,
    deployment_id: String,
    /// `Some(epoch)` for client publishers; `None` for silo publishers,
    /// which omit the epoch segment from the row key.
    client_epoch: Option<u64>,
    bulk_cap: usize,
    next_seq: AtomicU32,
}

const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

impl<P: StatisticsPublisher> StatisticsAdapter<P> {
    pub fn new(publisher: P, deployment_id: String, client_epoch: Option<u64>, bulk_cap: usize) -> Self {
        Self {
            publisher,
            deployment_id,
            client_epoch,
            bulk_cap,
            next_seq: AtomicU32::new(0),
        }
    }

    fn partition_key(&self, now: OffsetDateTime) -> String {
        let date = now
            .format(DATE_FORMAT)
            .unwrap_or_else(|_| "0000-00-00".to_string());
        format!("{}:{}", self.deployment_id, date)
    }

    fn row_key(&self, name: &str) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.client_epoch {
            Some(epoch) => format!("{name}:{epoch}:{seq:06}"),
            None => format!("{name}:{seq:06}"),
        }
    }

    /// Drops `"0"`-valued samples, stamps the rest with the partition/row
    /// key contract, and flushes to the publisher in batches no larger
    /// than `bulk_cap`, emitting an intermediate batch as soon as the cap
    /// is reached (spec.md §4.9, R7, scenario 6).
    pub async fn publish(&self, now: OffsetDateTime, samples: Vec<CounterSample>) -> Result<(), ClientError> {
        let partition_key = self.partition_key(now);
        let mut batch = Vec::with_capacity(self.bulk_cap.min(samples.len()));
        for sample in samples {
            if sample.value == "0" {
                continue;
            }
            batch.push(TelemetryRow {
                partition_key: partition_key.clone(),
                row_key: self.row_key(&sample.name),
                value: sample.value,
            });
            if batch.len() >= self.bulk_cap {
                let flushed = std::mem::take(&mut batch);
                self.publisher.bulk_insert(flushed).await?;
            }
        }
        if !batch.is_empty() {
            self.publisher.bulk_insert(batch).await?;
        }
        Ok(())
    }
}

/// In-memory double for tests: captures every flushed batch in order.
pub struct RecordingStatisticsPublisher {
    batches: Mutex<Vec<Vec<TelemetryRow>>>,
}

impl RecordingStatisticsPublisher {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<TelemetryRow>> {
        self.batches.lock().expect("recording publisher lock poisoned").clone()
    }
}

impl Default for RecordingStatisticsPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatisticsPublisher for RecordingStatisticsPublisher {
    async fn init_table(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn bulk_insert(&self, rows: Vec<TelemetryRow>) -> Result<(), ClientError> {
        self.batches.lock().expect("recording publisher lock poisoned").push(rows);
        Ok(())
    }
}
