/*
 * Severity levels
 *
 * The eight RFC 5424 severities, ordered from most severe (Emergency) to
 * least severe (Debug). Names live in a fixed table so that lookups in both
 * directions never touch shared mutable state.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LogError;

/// Log severity, most severe first.
///
/// The derived ordering follows the discriminants, so `Emergency < Debug`.
/// Use [`Level::is_at_least`] rather than raw comparisons when checking a
/// threshold, it reads the right way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

const NAMES: [(Level, &str); 8] = [
    (Level::Emergency, "EMERGENCY"),
    (Level::Alert, "ALERT"),
    (Level::Critical, "CRITICAL"),
    (Level::Error, "ERROR"),
    (Level::Warning, "WARNING"),
    (Level::Notice, "NOTICE"),
    (Level::Info, "INFO"),
    (Level::Debug, "DEBUG"),
];

impl Level {
    pub const ALL: [Level; 8] = [
        Level::Emergency,
        Level::Alert,
        Level::Critical,
        Level::Error,
        Level::Warning,
        Level::Notice,
        Level::Info,
        Level::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        NAMES[*self as usize].1
    }

    /// True when `self` is as severe as `threshold` or more severe.
    pub fn is_at_least(self, threshold: Level) -> bool {
        self <= threshold
    }

    /// Lenient lookup: unknown names map to `Debug`.
    pub fn from_name(name: &str) -> Level {
        name.parse().unwrap_or(Level::Debug)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "warn" is accepted as a shorthand for "warning"
        if s.eq_ignore_ascii_case("warn") {
            return Ok(Level::Warning);
        }
        NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(level, _)| *level)
            .ok_or_else(|| LogError::Config {
                field: "level".to_string(),
                reason: format!("unknown level '{}'", s),
            })
    }
}

impl Serialize for Level {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// Separate implementation of Deserialize to handle case-insensitive values
impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            serde::de::Error::unknown_variant(
                &s,
                &[
                    "emergency", "alert", "critical", "error", "warning", "warn", "notice", "info",
                    "debug",
                ],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_accepts_more_severe_levels_only() {
        for threshold in Level::ALL {
            for level in Level::ALL {
                let expected = (level as u8) <= (threshold as u8);
                assert_eq!(
                    level.is_at_least(threshold),
                    expected,
                    "{level} against threshold {threshold}"
                );
            }
        }
    }

    #[test]
    fn names_round_trip_case_insensitively() {
        for level in Level::ALL {
            assert_eq!(level.as_str().to_lowercase().parse::<Level>().unwrap(), level);
        }
        assert_eq!("Warn".parse::<Level>().unwrap(), Level::Warning);
    }

    #[test]
    fn unknown_names() {
        assert!("verbose".parse::<Level>().is_err());
        assert_eq!(Level::from_name("verbose"), Level::Debug);
    }

    #[test]
    fn deserializes_from_toml_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: Level,
        }
        let w: Wrapper = toml::from_str("level = \"Critical\"").unwrap();
        assert_eq!(w.level, Level::Critical);
        assert!(toml::from_str::<Wrapper>("level = \"loud\"").is_err());
    }
}
