use std::time::Duration;

/// The configuration of session synchronization
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far local playback may drift from the session position before it is force-seeked
    pub drift_threshold_in_seconds: f64,
    /// The length of generated invite tokens
    pub token_length: usize,
    /// The length of generated record ids
    pub record_id_length: usize,
    /// How many times token generation is retried when a token is already taken
    pub token_attempts: usize,
    /// The query parameter that carries the invite token in a link
    pub invite_query_parameter: String,
    /// How often the audio transport is polled for readiness before joining from a link
    pub readiness_poll_interval: Duration,
    /// How many readiness polls happen before giving up
    pub readiness_max_attempts: usize,
}

impl SyncConfig {
    /// Returns true if the difference between two positions warrants a corrective seek
    pub fn exceeds_drift(&self, local: f64, remote: f64) -> bool {
        (local - remote).abs() > self.drift_threshold_in_seconds
    }

    /// Total time spent waiting for transport readiness before giving up
    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_poll_interval * self.readiness_max_attempts as u32
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_in_seconds: 2.0,
            // 20 chars of a 62 symbol alphabet is ~119 bits
            token_length: 20,
            record_id_length: 15,
            token_attempts: 5,
            invite_query_parameter: "jam".to_string(),
            readiness_poll_interval: Duration::from_millis(500),
            readiness_max_attempts: 20,
        }
    }
}
