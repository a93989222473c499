use anyhow::{bail, Context};

use crate::attendance::DEFAULT_THRESHOLD;
use crate::classify::{AcademicCalendar, DEFAULT_ACADEMIC_START_MONTH};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Settings read from the environment once at startup and passed down
/// explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub threshold: u8,
    pub calendar: AcademicCalendar,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            threshold: DEFAULT_THRESHOLD,
            calendar: AcademicCalendar::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let threshold = match lookup("ATTENDANCE_THRESHOLD") {
            Some(raw) => {
                let value: u8 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("ATTENDANCE_THRESHOLD must be 0-100, got '{raw}'"))?;
                if value > 100 {
                    bail!("ATTENDANCE_THRESHOLD must be 0-100, got {value}");
                }
                value
            }
            None => defaults.threshold,
        };

        let start_month = match lookup("ACADEMIC_YEAR_START_MONTH") {
            Some(raw) => {
                let value: u32 = raw.trim().parse().with_context(|| {
                    format!("ACADEMIC_YEAR_START_MONTH must be 1-12, got '{raw}'")
                })?;
                if !(1..=12).contains(&value) {
                    bail!("ACADEMIC_YEAR_START_MONTH must be 1-12, got {value}");
                }
                value
            }
            None => DEFAULT_ACADEMIC_START_MONTH,
        };

        let max_connections = match lookup("ATTENDANCE_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!("ATTENDANCE_MAX_CONNECTIONS must be a positive integer, got '{raw}'")
            })?,
            None => defaults.max_connections,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections,
            threshold,
            calendar: AcademicCalendar { start_month },
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/college"),
            ("ATTENDANCE_THRESHOLD", "65"),
            ("ACADEMIC_YEAR_START_MONTH", "6"),
            ("ATTENDANCE_MAX_CONNECTIONS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/college");
        assert_eq!(config.threshold, 65);
        assert_eq!(config.calendar.start_month, 6);
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(AppConfig::from_lookup(lookup_from(&[("ATTENDANCE_THRESHOLD", "101")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("ACADEMIC_YEAR_START_MONTH", "13")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("ATTENDANCE_THRESHOLD", "high")])).is_err());
    }
}
