use serde::Serialize;
use std::time::Instant;

/// Why a frame never reached the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The sample had no readable pixel buffer.
    InvalidBuffer,
    /// Binding, drawing or presenting failed.
    SurfaceFailure,
    /// The feed discarded a frame that was due while the previous one was
    /// still being processed.
    Late,
    /// Every pooled buffer was still in use.
    PoolExhausted,
}

/// Collects diagnostic statistics for a camera preview session.
pub struct DiagnosticStats {
    frame_count: u64,
    invalid_drops: u64,
    surface_drops: u64,
    late_drops: u64,
    pool_drops: u64,
    total_bytes: u64,
    start_time: Instant,
    latency_us: u64,
}

/// Snapshot of diagnostic stats for serialisation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub drop_count: u64,
    pub drop_rate: f64,
    pub invalid_drops: u64,
    pub surface_drops: u64,
    pub late_drops: u64,
    pub pool_drops: u64,
    pub latency_ms: f64,
    pub bandwidth_bps: u64,
}

impl DiagnosticStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            invalid_drops: 0,
            surface_drops: 0,
            late_drops: 0,
            pool_drops: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            latency_us: 0,
        }
    }

    /// Microseconds since these stats were created or reset. Capture
    /// timestamps are expressed on this clock.
    pub fn clock_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Record a presented frame.
    pub fn record_frame(&mut self, bytes: usize, capture_timestamp_us: u64) {
        self.frame_count += 1;
        self.total_bytes += bytes as u64;

        let now_us = self.clock_us();
        if capture_timestamp_us <= now_us {
            self.latency_us = now_us - capture_timestamp_us;
        }
    }

    /// Record a dropped frame.
    pub fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::InvalidBuffer => self.invalid_drops += 1,
            DropReason::SurfaceFailure => self.surface_drops += 1,
            DropReason::Late => self.late_drops += 1,
            DropReason::PoolExhausted => self.pool_drops += 1,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Total dropped frames across all reasons.
    pub fn drop_count(&self) -> u64 {
        self.invalid_drops + self.surface_drops + self.late_drops + self.pool_drops
    }

    /// Calculate current FPS based on elapsed time.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.frame_count as f64 / elapsed
    }

    /// Drop rate as a percentage (0.0 - 100.0).
    pub fn drop_rate(&self) -> f64 {
        let total = self.frame_count + self.drop_count();
        if total == 0 {
            return 0.0;
        }
        (self.drop_count() as f64 / total as f64) * 100.0
    }

    /// Latest capture-to-present latency in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency_us as f64 / 1000.0
    }

    /// Bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            frame_count: self.frame_count,
            drop_count: self.drop_count(),
            drop_rate: self.drop_rate(),
            invalid_drops: self.invalid_drops,
            surface_drops: self.surface_drops,
            late_drops: self.late_drops,
            pool_drops: self.pool_drops,
            latency_ms: self.latency_ms(),
            bandwidth_bps: self.bandwidth_bps(),
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}
