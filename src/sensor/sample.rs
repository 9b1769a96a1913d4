use crate::error::SensorError;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatus {
    Valid,
    Invalid(SensorError),
}

/// One distance measurement. Produced per poll and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSample {
    elapsed: Duration,
    distance_cm: Option<f64>,
    status: SampleStatus,
}

impl DistanceSample {
    pub fn valid(elapsed: Duration, distance_cm: f64) -> Self {
        Self {
            elapsed,
            distance_cm: Some(distance_cm),
            status: SampleStatus::Valid,
        }
    }

    pub fn invalid(elapsed: Duration, reason: SensorError) -> Self {
        Self {
            elapsed,
            distance_cm: None,
            status: SampleStatus::Invalid(reason),
        }
    }

    /// Round-trip echo time, or time spent waiting for an echo that never came
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Measured distance, `None` when there is no reading
    pub fn distance_cm(&self) -> Option<f64> {
        self.distance_cm
    }

    pub fn status(&self) -> &SampleStatus {
        &self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == SampleStatus::Valid
    }

    /// Valid and strictly closer than `threshold_cm`
    pub fn is_within(&self, threshold_cm: f64) -> bool {
        matches!(self.distance_cm, Some(d) if d < threshold_cm)
    }
}

impl fmt::Display for DistanceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, self.distance_cm) {
            (SampleStatus::Valid, Some(distance)) => write!(f, "{:.1} cm", distance),
            (SampleStatus::Invalid(reason), _) => write!(f, "no reading ({})", reason),
            (SampleStatus::Valid, None) => f.write_str("no reading"),
        }
    }
}
