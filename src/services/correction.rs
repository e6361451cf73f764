//! Plate correction engine
//!
//! Resolves noisy OCR text to a registered plate in two passes:
//! 1. Score every registry entry, boosting entries whose window contains the
//!    frame time. Accept the best if it clears the global threshold.
//! 2. Otherwise accept the first in-window entry whose unbiased score clears
//!    the (lower) local threshold.
//!
//! Ties in pass 1 go to the entry registered first.

use crate::domain::registry::KnownPlateRegistry;
use crate::domain::types::{CorrectedPlate, RawObservation};
use crate::infra::config::Config;
use crate::services::normalizer::{canonicalize, Normalizer};
use crate::services::similarity::SimilarityScorer;
use crate::services::temporal::{in_window, TemporalBias};
use std::sync::Arc;
use tracing::debug;

/// Correction thresholds
#[derive(Debug, Clone, Copy)]
pub struct CorrectionThresholds {
    pub global: f64,
    pub local: f64,
}

impl Default for CorrectionThresholds {
    fn default() -> Self {
        Self { global: 0.55, local: 0.40 }
    }
}

pub struct PlateCorrector {
    normalizer: Normalizer,
    scorer: SimilarityScorer,
    bias: TemporalBias,
    thresholds: CorrectionThresholds,
    registry: Arc<KnownPlateRegistry>,
    /// Registry plates with OCR confusions folded, same order as the registry
    folded: Vec<String>,
}

impl PlateCorrector {
    pub fn new(
        normalizer: Normalizer,
        scorer: SimilarityScorer,
        bias: TemporalBias,
        thresholds: CorrectionThresholds,
        registry: Arc<KnownPlateRegistry>,
    ) -> Self {
        let folded = registry.iter().map(|e| canonicalize(&e.plate)).collect();
        Self { normalizer, scorer, bias, thresholds, registry, folded }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Normalizer::new(config.min_text_length()),
            SimilarityScorer::new(config.similarity_metric()),
            TemporalBias::new(config.bias_factor()),
            CorrectionThresholds {
                global: config.global_threshold(),
                local: config.local_threshold(),
            },
            Arc::new(config.registry().clone()),
        )
    }

    pub fn registry(&self) -> &KnownPlateRegistry {
        &self.registry
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Resolve one OCR reading; readings without text are unreadable
    pub fn correct_observation(&self, observation: &RawObservation) -> Option<CorrectedPlate> {
        let text = observation.text.as_deref()?;
        self.correct(text, observation.frame_timestamp_seconds)
    }

    /// Resolve raw OCR text seen at `timestamp` (seconds) to a registered plate
    pub fn correct(&self, raw_text: &str, timestamp: f64) -> Option<CorrectedPlate> {
        let normalized = self.normalizer.normalize(raw_text)?;

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in self.registry.iter().enumerate() {
            let raw_score = self.scorer.score(&normalized, &self.folded[idx]);
            let score = self.bias.apply(
                raw_score,
                timestamp,
                entry.window_start_seconds,
                entry.window_end_seconds,
            );
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }

        if let Some((idx, score)) = best {
            if score >= self.thresholds.global {
                let plate = &self.registry.entries()[idx].plate;
                debug!(
                    raw = %raw_text,
                    normalized = %normalized,
                    plate = %plate,
                    score = %format!("{score:.3}"),
                    pass = 1,
                    "plate_corrected"
                );
                return Some(CorrectedPlate { canonical_text: plate.clone(), match_score: score });
            }
        }

        // In-window fallback with the plain score
        for (idx, entry) in self.registry.iter().enumerate() {
            if !in_window(timestamp, entry.window_start_seconds, entry.window_end_seconds) {
                continue;
            }
            let score = self.scorer.score(&normalized, &self.folded[idx]);
            if score > self.thresholds.local {
                debug!(
                    raw = %raw_text,
                    normalized = %normalized,
                    plate = %entry.plate,
                    score = %format!("{score:.3}"),
                    pass = 2,
                    "plate_corrected"
                );
                return Some(CorrectedPlate {
                    canonical_text: entry.plate.clone(),
                    match_score: score,
                });
            }
        }

        debug!(
            raw = %raw_text,
            normalized = %normalized,
            best_score = %format!("{:.3}", best.map(|(_, s)| s).unwrap_or(0.0)),
            "plate_uncorrectable"
        );
        None
    }
}
