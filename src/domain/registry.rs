//! Known-plate registry
//!
//! An ordered table of plates expected to appear within a media-time window.
//! Order matters: when two entries score equally during correction, the one
//! registered first wins.
//!
//! Windows are written either as `"HH:MM:SS"` strings or as plain seconds:
//!
//! ```toml
//! [[plates]]
//! plate = "MH20GV3260"
//! vehicle = "White Car"
//! start = "00:00:23"
//! end = "00:00:30"
//! ```

use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

/// One registry row
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KnownPlateEntry {
    pub plate: String,
    #[serde(default, rename = "vehicle")]
    pub vehicle_label: String,
    #[serde(rename = "start", deserialize_with = "deserialize_window_time")]
    pub window_start_seconds: f64,
    #[serde(rename = "end", deserialize_with = "deserialize_window_time")]
    pub window_end_seconds: f64,
}

impl KnownPlateEntry {
    pub fn new(plate: &str, vehicle_label: &str, start: f64, end: f64) -> Self {
        Self {
            plate: plate.to_string(),
            vehicle_label: vehicle_label.to_string(),
            window_start_seconds: start,
            window_end_seconds: end,
        }
    }
}

/// Parse `HH:MM:SS` (or `MM:SS`, or bare seconds) into total seconds.
///
/// Minute and second fields after the leading one must be below 60.
pub fn parse_hms(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for (i, part) in parts.iter().enumerate() {
        let n: f64 = part.trim().parse().ok()?;
        if !n.is_finite() || n < 0.0 || (i > 0 && n >= 60.0) {
            return None;
        }
        total = total * 60.0 + n;
    }
    Some(total)
}

fn deserialize_window_time<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct WindowTimeVisitor;

    impl<'de> Visitor<'de> for WindowTimeVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an \"HH:MM:SS\" string or a number of seconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<f64, E>
        where
            E: de::Error,
        {
            parse_hms(value).ok_or_else(|| E::custom(format!("invalid window time '{value}'")))
        }

        fn visit_i64<E>(self, value: i64) -> Result<f64, E>
        where
            E: de::Error,
        {
            if value < 0 {
                return Err(E::custom("window time must not be negative"));
            }
            Ok(value as f64)
        }

        fn visit_u64<E>(self, value: u64) -> Result<f64, E>
        where
            E: de::Error,
        {
            Ok(value as f64)
        }

        fn visit_f64<E>(self, value: f64) -> Result<f64, E>
        where
            E: de::Error,
        {
            if !value.is_finite() {
                return Err(E::custom("window time must be finite"));
            }
            if value < 0.0 {
                return Err(E::custom("window time must not be negative"));
            }
            Ok(value)
        }
    }

    deserializer.deserialize_any(WindowTimeVisitor)
}

#[derive(Debug, Deserialize, Default)]
struct RegistryFile {
    #[serde(default)]
    plates: Vec<KnownPlateEntry>,
}

/// Immutable, ordered registry of known plates
#[derive(Debug, Clone, Default)]
pub struct KnownPlateRegistry {
    entries: Vec<KnownPlateEntry>,
}

impl KnownPlateRegistry {
    /// Build a registry, rejecting entries whose window ends before it starts
    pub fn new(entries: Vec<KnownPlateEntry>) -> anyhow::Result<Self> {
        for (idx, entry) in entries.iter().enumerate() {
            if entry.plate.trim().is_empty() {
                bail!("registry entry {idx} has an empty plate");
            }
            if !entry.window_start_seconds.is_finite() || !entry.window_end_seconds.is_finite() {
                bail!("registry entry {idx} ({}) has a non-finite window", entry.plate);
            }
            if entry.window_start_seconds > entry.window_end_seconds {
                bail!(
                    "registry entry {idx} ({}) has window start {} after end {}",
                    entry.plate,
                    entry.window_start_seconds,
                    entry.window_end_seconds
                );
            }
        }
        Ok(Self { entries })
    }

    /// Parse a registry from TOML text containing `[[plates]]` tables
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: RegistryFile = toml::from_str(content).context("Failed to parse plate registry")?;
        Self::new(file.plates)
    }

    /// Load a registry from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plate registry {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid plate registry {}", path.display()))
    }

    /// Entries in registration order
    pub fn entries(&self) -> &[KnownPlateEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KnownPlateEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:00:23"), Some(23.0));
        assert_eq!(parse_hms("00:02:55"), Some(175.0));
        assert_eq!(parse_hms("01:00:00"), Some(3600.0));
        assert_eq!(parse_hms("02:30"), Some(150.0));
        assert_eq!(parse_hms("42"), Some(42.0));
        assert_eq!(parse_hms("aa:bb:cc"), None);
        assert_eq!(parse_hms("1:2:3:4"), None);
    }

    #[test]
    fn test_parse_hms_rejects_out_of_range_fields() {
        assert_eq!(parse_hms("NaN"), None);
        assert_eq!(parse_hms("inf"), None);
        assert_eq!(parse_hms("00:00:inf"), None);
        assert_eq!(parse_hms("00:61:00"), None);
        assert_eq!(parse_hms("00:00:75"), None);
        assert_eq!(parse_hms("02:60"), None);
        assert_eq!(parse_hms("00:59:59.5"), Some(3599.5));
        // a lone field is plain seconds
        assert_eq!(parse_hms("75"), Some(75.0));
    }

    #[test]
    fn test_rejects_non_finite_window() {
        let result = KnownPlateRegistry::from_toml_str(
            r#"
[[plates]]
plate = "MH20GV3260"
start = nan
end = 30
"#,
        );
        assert!(result.is_err());

        let entry = KnownPlateEntry::new("MH20GV3260", "White Car", f64::NAN, 30.0);
        assert!(KnownPlateRegistry::new(vec![entry]).is_err());
    }

    #[test]
    fn test_from_toml_preserves_order() {
        let registry = KnownPlateRegistry::from_toml_str(
            r#"
[[plates]]
plate = "MH52A6707"
vehicle = "Black-Red Bike"
start = "00:07:10"
end = "00:07:14"

[[plates]]
plate = "MH20GV3260"
start = 23
end = 30.5

[[plates]]
plate = "MH52A6707"
vehicle = "Black-Red Bike"
start = "00:08:42"
end = "00:08:48"
"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 3);
        let plates: Vec<&str> = registry.iter().map(|e| e.plate.as_str()).collect();
        assert_eq!(plates, vec!["MH52A6707", "MH20GV3260", "MH52A6707"]);
        assert_eq!(registry.entries()[0].window_start_seconds, 430.0);
        assert_eq!(registry.entries()[1].window_end_seconds, 30.5);
        assert_eq!(registry.entries()[1].vehicle_label, "");
        assert_eq!(registry.entries()[2].window_end_seconds, 528.0);
    }

    #[test]
    fn test_rejects_inverted_window() {
        let result = KnownPlateRegistry::new(vec![KnownPlateEntry::new("MH20GV3260", "", 30.0, 23.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_time_string() {
        let result = KnownPlateRegistry::from_toml_str(
            r#"
[[plates]]
plate = "MH20GV3260"
start = "noon"
end = "00:00:30"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_registry() {
        let registry = KnownPlateRegistry::from_toml_str("").unwrap();
        assert!(registry.is_empty());
    }
}
