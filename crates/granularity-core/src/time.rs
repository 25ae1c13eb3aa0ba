//! Frame timing for the frame driver
//!
//! Produces the per-frame time step fed into `update_frame` and the rolling
//! frame statistics the driver logs.

use serde::{Deserialize, Serialize};

/// Configuration for frame timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// How many animation seconds pass per real second
    pub time_scale: f32,
    /// Maximum time step, avoids large animation jumps after stalls
    pub max_delta_time: f32,
    /// Length of the window frame statistics are averaged over (seconds)
    pub stats_interval: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_delta_time: 0.25,
            stats_interval: 1.0,
        }
    }
}

/// Averaged frame statistics for one stats window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub fps: f64,
    pub frame_time_ms: f64,
}

/// Frame time tracking
#[derive(Debug, Clone)]
pub struct FrameTimer {
    /// Configuration
    pub config: TimerConfig,
    /// Time since start in seconds
    pub total_time: f64,
    /// Scaled, clamped delta time for this frame
    pub delta_time: f32,
    /// Frame counter
    pub frame_count: u64,
    window_frames: u32,
    window_time: f64,
    last_stats: Option<FrameStats>,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}

impl FrameTimer {
    /// Create a new timer with custom config
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            total_time: 0.0,
            delta_time: 0.0,
            frame_count: 0,
            window_frames: 0,
            window_time: 0.0,
            last_stats: None,
        }
    }

    /// Advance with the raw delta from the previous frame.
    ///
    /// Returns fresh statistics whenever a stats window closes.
    pub fn tick(&mut self, raw_delta: f32) -> Option<FrameStats> {
        let clamped = raw_delta.clamp(0.0, self.config.max_delta_time);
        self.frame_count += 1;

        self.delta_time = clamped * self.config.time_scale;
        self.total_time += self.delta_time as f64;

        self.window_frames += 1;
        self.window_time += raw_delta.max(0.0) as f64;
        if self.window_time < self.config.stats_interval {
            return None;
        }

        let stats = FrameStats {
            fps: self.window_frames as f64 / self.window_time,
            frame_time_ms: 1000.0 * self.window_time / self.window_frames as f64,
        };
        self.window_frames = 0;
        self.window_time = 0.0;
        self.last_stats = Some(stats);
        Some(stats)
    }

    /// Statistics of the last closed window
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_scales_and_clamps() {
        let mut timer = FrameTimer::new(TimerConfig {
            time_scale: 2.0,
            ..Default::default()
        });
        timer.tick(0.016);
        assert!((timer.delta_time - 0.032).abs() < 1e-6);
        assert_eq!(timer.frame_count, 1);

        timer.tick(10.0);
        assert!((timer.delta_time - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stats_window() {
        let mut timer = FrameTimer::default();
        for _ in 0..3 {
            assert!(timer.tick(0.25).is_none());
        }
        let stats = timer.tick(0.25).expect("window should close after one second");
        assert!((stats.fps - 4.0).abs() < 1e-9);
        assert!((stats.frame_time_ms - 250.0).abs() < 1e-9);
        assert_eq!(timer.last_stats(), Some(stats));
    }
}
