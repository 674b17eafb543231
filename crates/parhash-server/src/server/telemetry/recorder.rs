//! Call-volume and per-backend latency recording.
//!
//! The dispatcher reports to a [`Telemetry`] implementation at exactly two
//! points: once per top-level request ([`Telemetry::record_call`]) and once
//! per backend sub-call ([`Telemetry::record_latency`]). Sub-call latency is
//! measured by a [`LatencyTimer`] guard, so an observation is recorded
//! whether the sub-call succeeds, fails, or is cancelled.
//!
//! Latencies are reported in milliseconds. The OpenTelemetry histogram uses
//! [`LATENCY_BUCKET_COUNT`] exponentially growing boundaries from
//! [`LATENCY_MIN_MS`] to [`LATENCY_MAX_MS`].

use crate::server::backend::BackendHandle;
use core::time::Duration;
use std::sync::Arc;
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use crate::server::backend::BackendRegistry;
#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use parhash_core::types::{BACKEND_LABEL, METRICS_NAMESPACE};

/// Smallest latency bucket boundary, in milliseconds.
pub const LATENCY_MIN_MS: f64 = 0.1;
/// Largest latency bucket boundary, in milliseconds.
pub const LATENCY_MAX_MS: f64 = 10_000.0;
/// Number of latency bucket boundaries.
pub const LATENCY_BUCKET_COUNT: usize = 24;

/// Sink for fan-out telemetry. Implementations must tolerate concurrent calls
/// from every sub-call task without losing observations.
pub trait Telemetry: Send + Sync + 'static {
    /// Counts one top-level request.
    fn record_call(&self);

    /// Records the duration of one sub-call served by `backend`.
    fn record_latency(&self, backend: &BackendHandle, elapsed: Duration);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_call(&self) {}

    fn record_latency(&self, _backend: &BackendHandle, _elapsed: Duration) {}
}

/// OpenTelemetry-backed recorder.
///
/// Exposes `parhash.nr_requests` (counter) and `parhash.subquery_durations`
/// (histogram, `ms`, attribute `backend=<addr>`). The attribute set of each
/// backend is built once here and looked up by registry index afterwards.
#[cfg(feature = "metrics")]
pub struct OtelTelemetry {
    requests: Counter<u64>,
    subquery_durations: Histogram<f64>,
    backend_attributes: Vec<[KeyValue; 1]>,
}

#[cfg(feature = "metrics")]
impl OtelTelemetry {
    pub fn new(meter: &Meter, registry: &BackendRegistry) -> Self {
        let requests = meter
            .u64_counter(format!("{METRICS_NAMESPACE}.nr_requests"))
            .with_description("Total ParallelHash calls")
            .build();

        let subquery_durations = meter
            .f64_histogram(format!("{METRICS_NAMESPACE}.subquery_durations"))
            .with_unit("ms")
            .with_description("Duration of hash calls to individual backends")
            .with_boundaries(latency_buckets())
            .build();

        let backend_attributes = registry
            .iter()
            .map(|backend| [KeyValue::new(BACKEND_LABEL, backend.addr().to_string())])
            .collect();

        Self {
            requests,
            subquery_durations,
            backend_attributes,
        }
    }
}

#[cfg(feature = "metrics")]
impl Telemetry for OtelTelemetry {
    fn record_call(&self) {
        self.requests.add(1, &[]);
    }

    fn record_latency(&self, backend: &BackendHandle, elapsed: Duration) {
        let attributes = self
            .backend_attributes
            .get(backend.index())
            .map_or(&[][..], |attrs| &attrs[..]);
        self.subquery_durations
            .record(elapsed.as_secs_f64() * 1000.0, attributes);
    }
}

/// Histogram boundaries for sub-call latency, in milliseconds.
pub fn latency_buckets() -> Vec<f64> {
    exponential_buckets_range(LATENCY_MIN_MS, LATENCY_MAX_MS, LATENCY_BUCKET_COUNT)
}

/// Returns `count` boundaries growing by a constant factor from `min` to
/// `max`, both included.
///
/// # Panics
///
/// Panics if `count < 2`, `min <= 0`, or `max <= min`.
pub fn exponential_buckets_range(min: f64, max: f64, count: usize) -> Vec<f64> {
    assert!(count >= 2, "at least two buckets are required");
    assert!(min > 0.0 && max > min, "bucket range must be positive and increasing");

    let factor = (max / min).powf(1.0 / (count - 1) as f64);
    let mut bound = min;
    (0..count)
        .map(|_| {
            let current = bound;
            bound *= factor;
            current
        })
        .collect()
}

/// Records the time elapsed since [`start`](Self::start) against `backend`
/// when dropped.
pub struct LatencyTimer {
    telemetry: Arc<dyn Telemetry>,
    backend: Arc<BackendHandle>,
    start: Instant,
}

impl LatencyTimer {
    pub fn start(telemetry: Arc<dyn Telemetry>, backend: Arc<BackendHandle>) -> Self {
        Self {
            telemetry,
            backend,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.telemetry
            .record_latency(&self.backend, self.start.elapsed());
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::CountingTelemetry, *};
    use crate::server::backend::{BackendRegistry, HashBackend};
    use parhash_core::{
        Result,
        types::{Buffer, Hash},
    };

    struct Echo;

    #[tonic::async_trait]
    impl HashBackend for Echo {
        async fn hash(&self, buffer: Buffer) -> Result<Hash> {
            Ok(buffer)
        }
    }

    #[test]
    fn latency_buckets_span_tenth_of_ms_to_ten_seconds() {
        let buckets = latency_buckets();

        assert_eq!(buckets.len(), 24);
        assert!((buckets[0] - 0.1).abs() < 1e-12);
        assert!((buckets[23] - 10_000.0).abs() < 1e-6);
        for pair in buckets.windows(2) {
            assert!(pair[1] > pair[0]);
            // Constant growth factor: (10^5)^(1/23).
            assert!((pair[1] / pair[0] - 1.649_648).abs() < 1e-4);
        }
    }

    #[test]
    fn timer_records_on_drop_against_its_backend() {
        let registry = BackendRegistry::new(["a:1", "b:2"].map(|addr| {
            (addr.to_string(), Arc::new(Echo) as Arc<dyn HashBackend>)
        }))
        .unwrap();
        let counting = Arc::new(CountingTelemetry::new(2));
        let telemetry: Arc<dyn Telemetry> = counting.clone();

        {
            let _timer = LatencyTimer::start(Arc::clone(&telemetry), Arc::clone(registry.get(1)));
            assert_eq!(counting.observations(), vec![0, 0]);
        }

        assert_eq!(counting.observations(), vec![0, 1]);
        assert_eq!(counting.calls(), 0);
    }
}
