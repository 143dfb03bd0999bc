//! Throughput of the camera prediction loop.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Frames predicted and time spent in the model since the last read.
#[derive(Default)]
pub struct Meter {
    frames: AtomicU64,
    predict_micros: AtomicU64,
}

/// Counts taken out of the meter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterReading {
    pub frames: u64,
    pub predict_time: Duration,
}

impl MeterReading {
    pub fn fps(&self, elapsed: Duration) -> f32 {
        self.frames as f32 / elapsed.as_secs_f32()
    }

    /// Mean time per prediction, `None` without frames.
    pub fn mean_predict_time(&self) -> Option<Duration> {
        u32::try_from(self.frames)
            .ok()
            .filter(|frames| *frames > 0)
            .map(|frames| self.predict_time / frames)
    }
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            frames: AtomicU64::new(0),
            predict_micros: AtomicU64::new(0),
        }
    }

    pub fn record_frame(&self, predict_time: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.predict_micros
            .fetch_add(predict_time.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn get_reset(&self) -> MeterReading {
        MeterReading {
            frames: self.frames.swap(0, Ordering::Relaxed),
            predict_time: Duration::from_micros(self.predict_micros.swap(0, Ordering::Relaxed)),
        }
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let reading = METER.get_reset();
            if let Some(mean) = reading.mean_predict_time() {
                log::info!(
                    "Predicted frames per second: {:.2}, {:.1} ms per prediction",
                    reading.fps(start.elapsed()),
                    mean.as_secs_f32() * 1000.0
                )
            }
        }
    })
}
