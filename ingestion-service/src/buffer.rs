//! In-process staging buffer between request acceptance and the database.
//!
//! Records accumulate per device class and are flushed in large batches on
//! whichever fires first: the class reaching `flush_size`, or the global
//! interval timer. The swap of the buffer vector is the only critical
//! section; the database write always runs with no lock held.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fleet_client::domain::{MeterReading, VehicleReading};
use serde::Serialize;
use tokio::task::JoinHandle;

/// Atomic dual-write of one batch: every record lands in both the historical
/// and the current table, or none does.
#[async_trait::async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn ingest_batch(&self, batch: &[T]) -> Result<(), sqlx::Error>;
}

/// One class's staging area. Pushes append; a flush swaps the vector for an
/// empty one and hands the detached batch to the sink, so new records keep
/// accumulating while the database round-trip is in flight.
struct ClassBuffer<T> {
    records: Mutex<Vec<T>>,
}

impl<T> ClassBuffer<T> {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append one record. When this push makes the length reach exactly
    /// `flush_size`, the whole batch is detached and returned inside the same
    /// lock hold, so racing pushes across the threshold yield at most one
    /// size-triggered batch.
    fn push(&self, record: T, flush_size: usize) -> Option<Vec<T>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(record);
        if records.len() == flush_size {
            Some(std::mem::take(&mut *records))
        } else {
            None
        }
    }

    fn take(&self) -> Vec<T> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *records)
    }

    /// Put a failed batch back at the front, ahead of anything that arrived
    /// while the flush was in flight, so the retry preserves arrival order.
    fn requeue(&self, mut batch: Vec<T>) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        batch.append(&mut records);
        *records = batch;
    }

    fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Per-class staging depth, also the payload of `GET /buffer/status`.
/// Sustained growth means the database cannot keep up and load must be shed
/// upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferDepth {
    pub vehicles: usize,
    pub meters: usize,
}

pub struct IngestBuffer {
    vehicles: Arc<ClassBuffer<VehicleReading>>,
    meters: Arc<ClassBuffer<MeterReading>>,
    vehicle_sink: Arc<dyn BatchSink<VehicleReading>>,
    meter_sink: Arc<dyn BatchSink<MeterReading>>,
    flush_size: usize,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl IngestBuffer {
    pub fn new(
        vehicle_sink: Arc<dyn BatchSink<VehicleReading>>,
        meter_sink: Arc<dyn BatchSink<MeterReading>>,
        flush_size: usize,
    ) -> Self {
        Self {
            vehicles: Arc::new(ClassBuffer::new()),
            meters: Arc::new(ClassBuffer::new()),
            vehicle_sink,
            meter_sink,
            flush_size,
            timer: Mutex::new(None),
        }
    }

    /// Stage one vehicle reading. Never awaits the database: if the push
    /// crosses the size trigger, the detached batch is flushed on a spawned
    /// task and this call returns immediately.
    pub fn push_vehicle(&self, reading: VehicleReading) {
        if let Some(batch) = self.vehicles.push(reading, self.flush_size) {
            metrics::counter!("buffer_size_flushes_total", "class" => "vehicle").increment(1);
            let buffer = Arc::clone(&self.vehicles);
            let sink = Arc::clone(&self.vehicle_sink);
            tokio::spawn(async move {
                flush_batch(batch, &*buffer, &*sink, "vehicle").await;
            });
        }
    }

    pub fn push_meter(&self, reading: MeterReading) {
        if let Some(batch) = self.meters.push(reading, self.flush_size) {
            metrics::counter!("buffer_size_flushes_total", "class" => "meter").increment(1);
            let buffer = Arc::clone(&self.meters);
            let sink = Arc::clone(&self.meter_sink);
            tokio::spawn(async move {
                flush_batch(batch, &*buffer, &*sink, "meter").await;
            });
        }
    }

    /// Flush whatever both classes have staged. The classes are independent;
    /// either flush may commit first.
    pub async fn flush_all(&self) {
        tokio::join!(
            flush_batch(
                self.vehicles.take(),
                &*self.vehicles,
                &*self.vehicle_sink,
                "vehicle"
            ),
            flush_batch(self.meters.take(), &*self.meters, &*self.meter_sink, "meter"),
        );
    }

    /// Start the global interval timer driving both classes. Idempotent in
    /// effect: a second call replaces the previous timer.
    pub fn start_timer(self: &Arc<Self>, interval: Duration) {
        let buffer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                buffer.flush_all().await;
            }
        });
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn depth(&self) -> BufferDepth {
        BufferDepth {
            vehicles: self.vehicles.len(),
            meters: self.meters.len(),
        }
    }

    /// Teardown: stop the timer, then one best-effort drain of both classes.
    /// Records still staged after the drain are lost (acceptance is
    /// at-most-once) and reported by count only.
    pub async fn shutdown(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }

        self.flush_all().await;

        let depth = self.depth();
        if depth.vehicles > 0 || depth.meters > 0 {
            tracing::error!(
                vehicles = depth.vehicles,
                meters = depth.meters,
                "final drain failed; discarding staged readings"
            );
        }
    }
}

/// Hand one detached batch to the sink. On failure the entire batch goes
/// back to the front of its class buffer and the next trigger retries it.
async fn flush_batch<T: Send>(
    batch: Vec<T>,
    buffer: &ClassBuffer<T>,
    sink: &dyn BatchSink<T>,
    class: &'static str,
) {
    if batch.is_empty() {
        return;
    }
    let len = batch.len();

    match sink.ingest_batch(&batch).await {
        Ok(()) => {
            tracing::debug!(class, len, "flushed batch");
        }
        Err(err) => {
            // Record contents are never logged; at this rate they would
            // swamp the log stream.
            tracing::warn!(class, len, error = %err, "flush failed, re-queueing batch");
            metrics::counter!("buffer_flush_errors_total", "class" => class).increment(1);
            buffer.requeue(batch);
        }
    }
    metrics::gauge!("buffer_depth", "class" => class).set(buffer.len() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn vehicle(id: &str, recorded_at: OffsetDateTime) -> VehicleReading {
        VehicleReading {
            recorded_at,
            vehicle_id: id.to_string(),
            soc: dec!(55.50),
            kwh_delivered_dc: dec!(1.2500),
            battery_temp: dec!(21.00),
            ingested_at: recorded_at,
        }
    }

    fn meter(id: &str, recorded_at: OffsetDateTime) -> MeterReading {
        MeterReading {
            recorded_at,
            meter_id: id.to_string(),
            kwh_consumed_ac: dec!(1.4000),
            voltage: dec!(230.10),
            ingested_at: recorded_at,
        }
    }

    /// Sink that records every successful batch and fails the first
    /// `failures` calls.
    struct MockSink<T> {
        batches: Mutex<Vec<Vec<T>>>,
        calls: AtomicUsize,
        failures: usize,
    }

    impl<T> MockSink<T> {
        fn new() -> Arc<Self> {
            Self::failing(0)
        }

        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                failures,
            })
        }

        fn batches(&self) -> Vec<Vec<T>>
        where
            T: Clone,
        {
            self.batches.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl<T: Clone + Send + Sync> BatchSink<T> for MockSink<T> {
        async fn ingest_batch(&self, batch: &[T]) -> Result<(), sqlx::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(sqlx::Error::PoolTimedOut);
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn buffer_with(
        vehicle_sink: Arc<MockSink<VehicleReading>>,
        meter_sink: Arc<MockSink<MeterReading>>,
        flush_size: usize,
    ) -> Arc<IngestBuffer> {
        Arc::new(IngestBuffer::new(vehicle_sink, meter_sink, flush_size))
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    const T0: OffsetDateTime = datetime!(2026-08-01 10:00:00 UTC);

    #[tokio::test]
    async fn size_trigger_flushes_exactly_one_batch() {
        let vsink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), MockSink::new(), 3);

        for i in 0..4 {
            buffer.push_vehicle(vehicle(&format!("V{i:03}"), T0));
        }

        eventually(|| vsink.batches().len() == 1).await;
        assert_eq!(vsink.batches()[0].len(), 3);
        // The record past the threshold waits for the next trigger.
        assert_eq!(buffer.depth().vehicles, 1);
    }

    #[tokio::test]
    async fn burst_of_501_at_default_flush_size_leaves_one_staged() {
        let vsink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), MockSink::new(), 500);

        for i in 0..501 {
            buffer.push_vehicle(vehicle(&format!("V{i:04}"), T0));
        }

        eventually(|| vsink.batches().len() == 1).await;
        assert_eq!(vsink.batches()[0].len(), 500);
        assert_eq!(buffer.depth().vehicles, 1);
    }

    #[tokio::test]
    async fn consecutive_thresholds_produce_consecutive_batches() {
        let vsink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), MockSink::new(), 3);

        for i in 0..6 {
            buffer.push_vehicle(vehicle(&format!("V{i:03}"), T0));
        }

        eventually(|| vsink.batches().len() == 2).await;
        assert!(vsink.batches().iter().all(|b| b.len() == 3));
        assert_eq!(buffer.depth().vehicles, 0);
    }

    #[tokio::test]
    async fn empty_flush_does_no_sink_work() {
        let vsink = MockSink::new();
        let msink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), msink.clone(), 10);

        buffer.flush_all().await;

        assert_eq!(vsink.calls(), 0);
        assert_eq!(msink.calls(), 0);
    }

    #[tokio::test]
    async fn timer_flushes_both_classes() {
        let vsink = MockSink::new();
        let msink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), msink.clone(), 100);

        buffer.push_vehicle(vehicle("V001", T0));
        buffer.push_meter(meter("M001", T0));
        buffer.start_timer(Duration::from_millis(20));

        eventually(|| vsink.batches().len() == 1 && msink.batches().len() == 1).await;
        assert_eq!(buffer.depth(), BufferDepth { vehicles: 0, meters: 0 });
        buffer.shutdown().await;
    }

    #[tokio::test]
    async fn failed_flush_requeues_whole_batch_in_order() {
        let vsink = MockSink::failing(1);
        let buffer = buffer_with(vsink.clone(), MockSink::new(), 100);

        buffer.push_vehicle(vehicle("V001", T0));
        buffer.push_vehicle(vehicle("V002", T0));

        buffer.flush_all().await;
        assert_eq!(vsink.batches().len(), 0);
        assert_eq!(buffer.depth().vehicles, 2);

        // A record arriving after the failure queues behind the retried batch.
        buffer.push_vehicle(vehicle("V003", T0));

        buffer.flush_all().await;
        let batches = vsink.batches();
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].iter().map(|r| r.vehicle_id.as_str()).collect();
        assert_eq!(ids, ["V001", "V002", "V003"]);
        assert_eq!(buffer.depth().vehicles, 0);
    }

    #[tokio::test]
    async fn transient_failure_loses_nothing_and_duplicates_nothing() {
        let vsink = MockSink::failing(1);
        let buffer = buffer_with(vsink.clone(), MockSink::new(), 1000);

        for i in 0..100 {
            buffer.push_vehicle(vehicle(&format!("V{i:03}"), T0));
        }

        buffer.flush_all().await; // fails
        buffer.flush_all().await; // succeeds

        let batches = vsink.batches();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 100);
        assert_eq!(buffer.depth().vehicles, 0);
    }

    #[tokio::test]
    async fn shutdown_drains_staged_records() {
        let vsink = MockSink::new();
        let msink = MockSink::new();
        let buffer = buffer_with(vsink.clone(), msink.clone(), 100);
        buffer.start_timer(Duration::from_secs(3600));

        buffer.push_vehicle(vehicle("V001", T0));
        buffer.push_meter(meter("M001", T0));
        buffer.shutdown().await;

        assert_eq!(vsink.batches().len(), 1);
        assert_eq!(msink.batches().len(), 1);
        assert_eq!(buffer.depth(), BufferDepth { vehicles: 0, meters: 0 });
    }

    #[tokio::test]
    async fn depth_reports_per_class_counts() {
        let buffer = buffer_with(MockSink::new(), MockSink::new(), 100);

        buffer.push_vehicle(vehicle("V001", T0));
        buffer.push_vehicle(vehicle("V002", T0));
        buffer.push_meter(meter("M001", T0));

        assert_eq!(buffer.depth(), BufferDepth { vehicles: 2, meters: 1 });
    }
}
