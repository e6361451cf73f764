//! OCR text normalization
//!
//! Turns raw OCR output into a plate-like `A-Z0-9` string and folds the
//! letters OCR most often confuses with digits (O→0, I→1, S→5, Z→2).

/// Default minimum plate length after normalization
pub const DEFAULT_MIN_PLATE_LENGTH: usize = 6;

/// Fold confusable letters onto their digit lookalikes
#[inline]
pub fn fold_confusions(c: char) -> char {
    match c {
        'O' => '0',
        'I' => '1',
        'S' => '5',
        'Z' => '2',
        other => other,
    }
}

/// Uppercase, keep `A-Z0-9`, fold confusions. No length check.
pub fn canonicalize(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .map(fold_confusions)
        .collect()
}

/// Canonical plate text, or `None` when the input is empty or too short
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    min_length: usize,
}

impl Normalizer {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn normalize(&self, raw: &str) -> Option<String> {
        if raw.is_empty() {
            return None;
        }
        let text = canonicalize(raw);
        if text.len() < self.min_length {
            return None;
        }
        Some(text)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PLATE_LENGTH)
    }
}
