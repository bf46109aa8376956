//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning without recompilation. Connection timeouts, backoff
//! schedules, buffer retention, and classifier thresholds are deployment
//! parameters, not fixed constants.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub buffer: BufferConfig,
    pub classifier: ClassifierConfig,
    pub annotation: AnnotationConfig,
}

/// Device connection and reconnect-backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Bounded timeout for a single pairing attempt
    pub connect_timeout_ms: u64,
    /// First reconnect delay after link loss
    pub reconnect_base_delay_ms: u64,
    /// Ceiling for the exponential reconnect delay
    pub reconnect_max_delay_ms: u64,
    /// Retry budget before the device is declared lost
    pub reconnect_max_attempts: u32,
    /// Random jitter applied to each reconnect delay (0.0 disables)
    pub reconnect_jitter_pct: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            reconnect_base_delay_ms: 250,
            reconnect_max_delay_ms: 4_000,
            reconnect_max_attempts: 5,
            // Spreads simultaneous reconnects from multiple wearables
            reconnect_jitter_pct: 0.2,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Sensor stream buffer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Retention window per device; older samples are evicted lazily
    pub retention_ms: u64,
    /// Hard cap on buffered samples per device
    pub max_samples_per_device: usize,
    /// How long a lost device's buffer is kept for in-flight annotation
    pub loss_grace_ms: u64,
    /// Number of pre-allocated raw payload buffers per ingest worker
    pub payload_pool_size: usize,
    /// Capacity of each raw payload buffer in bytes
    pub payload_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            retention_ms: 30_000,
            max_samples_per_device: 4_096,
            loss_grace_ms: 15_000,
            payload_pool_size: 64,
            payload_capacity: 256,
        }
    }
}

impl BufferConfig {
    pub fn retention_us(&self) -> u64 {
        self.retention_ms.saturating_mul(1_000)
    }

    pub fn loss_grace(&self) -> Duration {
        Duration::from_millis(self.loss_grace_ms)
    }
}

/// Activity classifier parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Labels scoring below this confidence are suppressed (unlabeled gap)
    pub confidence_threshold: f32,
    /// Minimum samples in a window before inference is attempted
    pub min_window_samples: usize,
    /// Segment length the heuristic model scores independently
    pub segment_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            min_window_samples: 32,
            segment_ms: 1_000,
        }
    }
}

impl ClassifierConfig {
    pub fn segment_us(&self) -> u64 {
        self.segment_ms.saturating_mul(1_000)
    }
}

/// Annotation session parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Open-session cap; a phone-class host should never need more
    pub max_open_sessions: usize,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            max_open_sessions: 16,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.connection.connect_timeout_ms, 5_000);
        assert_eq!(config.connection.reconnect_max_attempts, 5);
        assert_eq!(config.buffer.retention_ms, 30_000);
        assert_eq!(config.classifier.confidence_threshold, 0.5);
        assert_eq!(config.annotation.max_open_sessions, 16);
    }

    #[test]
    fn test_duration_accessors() {
        let config = EngineConfig::default();
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.buffer.retention_us(), 30_000_000);
        assert_eq!(config.classifier.segment_us(), 1_000_000);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.connection.reconnect_base_delay_ms,
            config.connection.reconnect_base_delay_ms
        );
        assert_eq!(
            parsed.classifier.min_window_samples,
            config.classifier.min_window_samples
        );
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = EngineConfig::load_from_file("/nonexistent/pitchlink.json");
        assert_eq!(config.buffer.retention_ms, 30_000);
    }
}
