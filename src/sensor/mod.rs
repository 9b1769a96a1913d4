mod sample;
mod ultrasonic;

pub use sample::{DistanceSample, SampleStatus};
pub use ultrasonic::{RangeFinder, UltrasonicSensor, UltrasonicTiming};
