use std::time::{Duration, Instant};

/// Turns `-progress` key/value lines into throttled percentages.
#[derive(Debug)]
pub struct ProgressTracker {
    duration_secs: Option<f64>,
    interval: Duration,
    last_sent: Option<Instant>,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    pub fn new(duration_secs: Option<f64>, interval: Duration) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            interval,
            last_sent: None,
            last_percent: None,
        }
    }

    pub fn observe(&mut self, line: &str) -> Option<u8> {
        self.observe_at(line, Instant::now())
    }

    /// Percentage to publish for this line, if any is due.
    pub fn observe_at(&mut self, line: &str, now: Instant) -> Option<u8> {
        let duration = self.duration_secs?;
        let percent = match line.trim().split_once('=')? {
            // Both keys carry microseconds.
            ("out_time_us" | "out_time_ms", value) => {
                let micros = value.trim().parse::<i64>().ok()?;
                let done = micros.max(0) as f64 / 1_000_000.0;
                ((done / duration) * 100.0).min(100.0) as u8
            }
            ("progress", "end") => 100,
            _ => return None,
        };

        if self.last_percent == Some(percent) {
            return None;
        }
        let due = match self.last_sent {
            None => true,
            Some(at) => percent == 100 || now.duration_since(at) >= self.interval,
        };
        if !due {
            return None;
        }

        self.last_sent = Some(now);
        self.last_percent = Some(percent);
        Some(percent)
    }
}

/// Parse `ffprobe` duration output.
pub fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}
