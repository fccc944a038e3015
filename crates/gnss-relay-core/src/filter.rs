//! Message type filtering and rate limiting.
//!
//! A [`MessageFilter`] is the allow-list configured for a converting output,
//! parsed from a string such as `"1004,1019(10),1033(30)"`: message types
//! with an optional minimum emission interval in seconds. Types that are not
//! listed are suppressed.
//!
//! The filter itself is immutable configuration; the per-output emission
//! history lives in a [`FilterGate`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::ConfigError;

/// Default filter used when none is configured.
pub const DEFAULT_MESSAGES: &str = "1004,1019";

/// One allowed message type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterEntry {
    pub msg_type: u16,
    /// Minimum spacing between two emissions, zero for every message.
    pub interval: Duration,
}

/// Ordered allow-list of message types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    entries: Vec<FilterEntry>,
}

fn entry_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{1,5})(?:\(\s*(\d+(?:\.\d*)?)\s*\))?$").ok())
        .as_ref()
}

impl MessageFilter {
    /// Create an empty filter (suppresses everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `type[(interval)][,type[(interval)]...]`.
    ///
    /// A later entry for the same type replaces the earlier one in place.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut filter = Self::new();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let caps = entry_pattern()
                .and_then(|pattern| pattern.captures(item))
                .ok_or_else(|| ConfigError::InvalidFilter(item.to_string()))?;
            let msg_type = caps[1]
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidFilter(item.to_string()))?;
            let interval = match caps.get(2) {
                Some(secs) => secs
                    .as_str()
                    .parse::<f64>()
                    .ok()
                    .and_then(|s| Duration::try_from_secs_f64(s).ok())
                    .ok_or_else(|| ConfigError::InvalidFilter(item.to_string()))?,
                None => Duration::ZERO,
            };
            filter.allow(msg_type, interval);
        }
        Ok(filter)
    }

    /// Allow a message type with the given minimum interval.
    pub fn allow(&mut self, msg_type: u16, interval: Duration) {
        match self.entries.iter_mut().find(|e| e.msg_type == msg_type) {
            Some(entry) => entry.interval = interval,
            None => self.entries.push(FilterEntry { msg_type, interval }),
        }
    }

    /// Minimum interval for a type, or `None` when the type is suppressed.
    pub fn interval_for(&self, msg_type: u16) -> Option<Duration> {
        self.entries
            .iter()
            .find(|e| e.msg_type == msg_type)
            .map(|e| e.interval)
    }

    /// Entries in configuration order.
    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a gate tracking emissions against this filter.
    pub fn gate(&self) -> FilterGate {
        FilterGate {
            filter: self.clone(),
            last_emitted: HashMap::new(),
        }
    }
}

impl FromStr for MessageFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageFilter::parse(s)
    }
}

impl fmt::Display for MessageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", entry.msg_type)?;
            if !entry.interval.is_zero() {
                write!(f, "({})", entry.interval.as_secs_f64())?;
            }
        }
        Ok(())
    }
}

/// Stateful admission check for one output.
#[derive(Debug, Clone)]
pub struct FilterGate {
    filter: MessageFilter,
    last_emitted: HashMap<u16, Instant>,
}

impl FilterGate {
    /// Decide whether a message of `msg_type` observed at `now` may be
    /// emitted, recording the emission when it is.
    pub fn admit(&mut self, msg_type: u16, now: Instant) -> bool {
        let Some(interval) = self.filter.interval_for(msg_type) else {
            return false;
        };
        if let Some(last) = self.last_emitted.get(&msg_type) {
            if now.saturating_duration_since(*last) < interval {
                return false;
            }
        }
        self.last_emitted.insert(msg_type, now);
        true
    }

    /// Forget the emission history (used after a reconnect).
    pub fn reset(&mut self) {
        self.last_emitted.clear();
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_filter() {
        let filter = MessageFilter::parse("1004, 1019(10),1033(0.5)").unwrap();
        assert_eq!(
            filter.entries(),
            &[
                FilterEntry { msg_type: 1004, interval: Duration::ZERO },
                FilterEntry { msg_type: 1019, interval: Duration::from_secs(10) },
                FilterEntry { msg_type: 1033, interval: Duration::from_millis(500) },
            ]
        );
        assert_eq!(filter.to_string(), "1004,1019(10),1033(0.5)");
    }

    #[test]
    fn test_duplicate_replaces_in_place() {
        let filter = MessageFilter::parse("1005(1),1004,1005(5)").unwrap();
        assert_eq!(filter.entries().len(), 2);
        assert_eq!(filter.entries()[0].msg_type, 1005);
        assert_eq!(filter.interval_for(1005), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_entries() {
        assert!(MessageFilter::parse("abc").is_err());
        assert!(MessageFilter::parse("1004(").is_err());
        assert!(MessageFilter::parse("1004(-1)").is_err());
        assert!(MessageFilter::parse("99999").is_err());
        assert!(MessageFilter::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_gate_rate_limits_and_suppresses() {
        let filter = MessageFilter::parse("1004(1)").unwrap();
        let mut gate = filter.gate();
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        assert!(gate.admit(1004, at(0)));
        assert!(!gate.admit(1004, at(500)));
        assert!(gate.admit(1004, at(1200)));

        for ms in [0, 500, 1200, 5000] {
            assert!(!gate.admit(1019, at(ms)));
        }
    }

    #[test]
    fn test_zero_interval_admits_everything() {
        let mut gate = MessageFilter::parse("1077").unwrap().gate();
        let now = Instant::now();
        assert!(gate.admit(1077, now));
        assert!(gate.admit(1077, now));
    }
}
