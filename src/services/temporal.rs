//! Time-window bias for known plates

/// `start <= timestamp <= end`, inclusive at both ends
#[inline]
pub fn in_window(timestamp: f64, start: f64, end: f64) -> bool {
    start <= timestamp && timestamp <= end
}

/// Multiplies a similarity score when the frame falls inside an entry's window
#[derive(Debug, Clone, Copy)]
pub struct TemporalBias {
    factor: f64,
}

impl TemporalBias {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Biased score, or the raw score outside the window
    #[inline]
    pub fn apply(&self, score: f64, timestamp: f64, start: f64, end: f64) -> f64 {
        if in_window(timestamp, start, end) {
            score * self.factor
        } else {
            score
        }
    }
}

impl Default for TemporalBias {
    fn default() -> Self {
        Self::new(1.30)
    }
}
