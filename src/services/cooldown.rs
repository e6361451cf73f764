//! Per-plate emission cooldown
//!
//! Suppresses repeat events for the same plate while it is still inside the
//! cooldown window of its last accepted emission (same physical pass).
//! Times are media seconds supplied by the caller.
//!
//! Stale entries are evicted once they are older than
//! `eviction_factor * cooldown` so the map does not grow without bound.

use crate::infra::config::Config;
use rustc_hash::FxHashMap;
use tracing::debug;

pub struct CooldownTracker {
    /// Last accepted emission time per canonical plate
    last_emission: FxHashMap<String, f64>,
    cooldown_seconds: f64,
    eviction_factor: f64,
    /// 0 = unbounded
    max_tracked: usize,
}

impl CooldownTracker {
    pub fn new(cooldown_seconds: f64) -> Self {
        Self {
            last_emission: FxHashMap::default(),
            cooldown_seconds,
            eviction_factor: 3.0,
            max_tracked: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cooldown_seconds())
            .with_eviction_factor(config.eviction_factor())
            .with_max_tracked(config.max_tracked_plates())
    }

    pub fn with_eviction_factor(mut self, factor: f64) -> Self {
        // never evict an entry that can still suppress
        self.eviction_factor = factor.max(1.0);
        self
    }

    pub fn with_max_tracked(mut self, max: usize) -> Self {
        self.max_tracked = max;
        self
    }

    pub fn cooldown_seconds(&self) -> f64 {
        self.cooldown_seconds
    }

    /// True if `plate` may produce a new event at `now`. Never mutates.
    pub fn should_emit(&self, plate: &str, now: f64) -> bool {
        match self.last_emission.get(plate) {
            Some(&last) => now - last >= self.cooldown_seconds,
            None => true,
        }
    }

    /// Record an accepted emission
    pub fn record_emission(&mut self, plate: &str, now: f64) {
        self.last_emission.insert(plate.to_string(), now);
        if self.max_tracked > 0 && self.last_emission.len() > self.max_tracked {
            self.evict_oldest();
        }
    }

    /// Seconds since the last accepted emission of `plate`
    pub fn since_last(&self, plate: &str, now: f64) -> Option<f64> {
        self.last_emission.get(plate).map(|&last| now - last)
    }

    /// Drop entries older than the eviction horizon, returns how many went
    pub fn evict(&mut self, now: f64) -> usize {
        let horizon = self.cooldown_seconds * self.eviction_factor;
        let before = self.last_emission.len();
        self.last_emission.retain(|_, last| now - *last <= horizon);
        let evicted = before - self.last_emission.len();
        if evicted > 0 {
            debug!(evicted = %evicted, remaining = %self.last_emission.len(), "cooldown_evicted");
        }
        evicted
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .last_emission
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(plate, _)| plate.clone());
        if let Some(plate) = oldest {
            self.last_emission.remove(&plate);
            debug!(plate = %plate, "cooldown_cap_evicted");
        }
    }

    /// Number of plates currently tracked
    pub fn tracked(&self) -> usize {
        self.last_emission.len()
    }
}
