//! One measurement request: sample, translate, record.
//!
//! Measurements are serialized by a device-wide async mutex, so at most one
//! random source call is in flight at any time. The last reading and the
//! served counter live outside that mutex, so readers never wait on a slow
//! random source. The shared [`RegistrationState`] is updated after the lock
//! is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use reqwest::header::HeaderMap;
use tokio::sync::Mutex;

use crate::device::{DeviceConfig, DeviceReading, translate};
use crate::registration::RegistrationState;
use crate::source::{RandomSource, Sampler};

/// A served reading together with the provenance of its random sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub reading: DeviceReading,
    pub source_name: String,
    pub source_version: String,
}

/// Serves measurements for a single simulated device.
pub struct MeasurementService<S = RandomSource> {
    config: DeviceConfig,
    sampler: S,
    /// Held for the whole sample-and-translate step.
    sampling: Mutex<()>,
    current: RwLock<Option<DeviceReading>>,
    served: AtomicU64,
    registration: Arc<RegistrationState>,
}

impl<S: Sampler> MeasurementService<S> {
    pub fn new(config: DeviceConfig, sampler: S, registration: Arc<RegistrationState>) -> Self {
        Self {
            config,
            sampler,
            sampling: Mutex::new(()),
            current: RwLock::new(None),
            served: AtomicU64::new(0),
            registration,
        }
    }

    /// Take one measurement. A failed random source still yields a reading,
    /// derived from the sentinel value.
    pub async fn measure(&self, inbound: &HeaderMap) -> Measurement {
        let (reading, sample) = {
            let _device = self.sampling.lock().await;
            let sample = self.sampler.sample(inbound).await;
            let reading = translate(sample.value, &self.config);
            *self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reading.clone());
            self.served.fetch_add(1, Ordering::SeqCst);
            (reading, sample)
        };
        self.registration.mark_served();

        log::debug!(
            "{} '{}' measured {}{} from '{}@{}'.",
            self.config.kind,
            self.config.address,
            reading.formatted_value,
            reading.unit,
            sample.source_name,
            sample.source_version
        );

        Measurement {
            reading,
            source_name: sample.source_name,
            source_version: sample.source_version,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn registration(&self) -> &Arc<RegistrationState> {
        &self.registration
    }

    /// Most recent reading, if any measurement has been taken.
    pub fn current_reading(&self) -> Option<DeviceReading> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of measurements served so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::device::DeviceKind;
    use crate::source::RandomSample;

    /// Records how many samples run at the same time.
    #[derive(Default)]
    struct CountingSampler {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Sampler for CountingSampler {
        async fn sample(&self, _inbound: &HeaderMap) -> RandomSample {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            RandomSample {
                value: (call % 100) as i64,
                source_name: "counting".to_string(),
                source_version: "1".to_string(),
            }
        }
    }

    struct FailingSampler;

    impl Sampler for FailingSampler {
        async fn sample(&self, _inbound: &HeaderMap) -> RandomSample {
            RandomSample::failed()
        }
    }

    /// Takes far longer than any reader is willing to wait.
    struct SlowSampler;

    impl Sampler for SlowSampler {
        async fn sample(&self, _inbound: &HeaderMap) -> RandomSample {
            tokio::time::sleep(Duration::from_secs(5)).await;
            RandomSample {
                value: 50,
                source_name: "slow".to_string(),
                source_version: "1".to_string(),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_measurements_are_serialized() {
        let service = Arc::new(MeasurementService::new(
            DeviceConfig::hygrometer("h-1"),
            CountingSampler::default(),
            Arc::new(RegistrationState::new()),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.measure(&HeaderMap::new()).await })
            })
            .collect();
        for handle in handles {
            let measurement = handle.await.unwrap();
            assert_eq!(measurement.source_name, "counting");
        }

        assert_eq!(service.sampler().calls.load(Ordering::SeqCst), 16);
        assert_eq!(service.sampler().max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(service.served(), 16);
    }

    #[tokio::test]
    async fn measurement_marks_registration_state() {
        let registration = Arc::new(RegistrationState::new());
        let service = MeasurementService::new(
            DeviceConfig::thermometer("t-1"),
            CountingSampler::default(),
            Arc::clone(&registration),
        );
        assert!(!registration.has_served());

        service.measure(&HeaderMap::new()).await;
        assert!(registration.has_served());
        assert!(!registration.needs_registration_at(std::time::Instant::now()));
    }

    #[tokio::test]
    async fn failed_sample_still_yields_reading() {
        let service = MeasurementService::new(
            DeviceConfig::thermometer("t-1"),
            FailingSampler,
            Arc::new(RegistrationState::new()),
        );
        assert!(service.current_reading().is_none());

        let measurement = service.measure(&HeaderMap::new()).await;
        assert_eq!(measurement.source_name, "failed");
        assert_eq!(measurement.source_version, "n/a");
        assert_eq!(measurement.reading.kind, DeviceKind::Thermometer);
        assert_eq!(measurement.reading.value, service.device().minimum());
        assert_eq!(service.current_reading(), Some(measurement.reading));
    }

    #[tokio::test(start_paused = true)]
    async fn readers_do_not_wait_for_in_flight_sample() {
        let service = Arc::new(MeasurementService::new(
            DeviceConfig::hygrometer("h-1"),
            SlowSampler,
            Arc::new(RegistrationState::new()),
        ));

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.measure(&HeaderMap::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The sample is still in flight, readers answer immediately.
        assert!(!first.is_finished());
        assert_eq!(service.served(), 0);
        assert!(service.current_reading().is_none());

        let measurement = first.await.unwrap();
        assert_eq!(service.served(), 1);
        assert_eq!(service.current_reading(), Some(measurement.reading));
    }
}
