use crate::events::{DoorEvent, EventBus};
use crate::guard::{CyclePermit, TriggerSource};
use crate::recognition::RecognitionPipeline;
use crate::sensor::{DistanceSample, RangeFinder};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Polls the distance sensor and starts a recognition cycle when a visitor
/// steps inside the proximity threshold
pub struct PresenceMonitor {
    sensor: Arc<Mutex<Box<dyn RangeFinder>>>,
    pipeline: Arc<RecognitionPipeline>,
    event_bus: EventBus,
    poll_interval: Duration,
    threshold_cm: f64,
}

impl PresenceMonitor {
    pub fn new(
        sensor: Box<dyn RangeFinder>,
        pipeline: Arc<RecognitionPipeline>,
        event_bus: EventBus,
        poll_interval: Duration,
        threshold_cm: f64,
    ) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
            pipeline,
            event_bus,
            poll_interval,
            threshold_cm,
        }
    }

    /// Poll until cancelled. The ticker is held while a cycle runs and
    /// restarted afterwards.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            "Presence polling every {:?}, threshold {} cm",
            self.poll_interval, self.threshold_cm
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Presence loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let sample = self.measure().await;
                    if let Some(permit) = self.evaluate(sample.as_ref()) {
                        self.pipeline.run_guarded(permit).await;
                        ticker.reset();
                    }
                }
            }
        }
    }

    /// One measurement on the blocking pool; the sensor spins on the clock
    async fn measure(&self) -> Option<DistanceSample> {
        let sensor = Arc::clone(&self.sensor);
        match tokio::task::spawn_blocking(move || sensor.lock().measure()).await {
            Ok(sample) => Some(sample),
            Err(e) => {
                error!("Distance measurement aborted: {}", e);
                None
            }
        }
    }

    /// Apply one reading to the presence state. Returns a permit when the
    /// visitor just arrived and a cycle should run. `None` counts as no reading.
    pub fn evaluate(&self, sample: Option<&DistanceSample>) -> Option<CyclePermit> {
        let state = self.pipeline.state();

        match sample {
            Some(sample) if sample.is_within(self.threshold_cm) => {
                trace!("Visitor within range: {}", sample);
                if state.person_near() {
                    return None;
                }

                let permit = self.pipeline.try_begin(TriggerSource::Presence).ok()?;
                self.publish(DoorEvent::PresenceChanged {
                    near: true,
                    distance_cm: sample.distance_cm(),
                    timestamp: Utc::now(),
                });
                Some(permit)
            }
            other => {
                if state.clear_presence() {
                    self.publish(DoorEvent::PresenceChanged {
                        near: false,
                        distance_cm: other.and_then(|s| s.distance_cm()),
                        timestamp: Utc::now(),
                    });
                }
                None
            }
        }
    }

    fn publish(&self, event: DoorEvent) {
        if let Err(e) = self.event_bus.publish(event) {
            trace!("Presence event not delivered: {}", e);
        }
    }
}
