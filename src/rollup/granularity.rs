//! Time-bucket granularities and interval literals
//!
//! A [`Granularity`] is one of the fixed bucket widths a chain can be built
//! over. A [`GranularitySequence`] is the ordered list handed to the chain
//! builder and is guaranteed to be non-empty and strictly increasing.
//! [`Interval`] is a validated SQL interval literal such as `10 minutes`,
//! used by refresh policies and ad-hoc rollups.

use crate::rollup::error::{RollupError, RollupResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bucket widths, declared in increasing order of duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One second buckets
    Second,
    /// One minute buckets
    Minute,
    /// One hour buckets
    Hour,
    /// One day buckets
    Day,
    /// One week buckets
    Week,
    /// One calendar month buckets
    Month,
    /// One calendar year buckets
    Year,
}

impl Granularity {
    /// All granularities, finest first
    pub fn all() -> &'static [Granularity] {
        &[
            Granularity::Second,
            Granularity::Minute,
            Granularity::Hour,
            Granularity::Day,
            Granularity::Week,
            Granularity::Month,
            Granularity::Year,
        ]
    }

    /// Name used in table suffixes and configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Interval literal passed to `time_bucket`
    pub fn interval(&self) -> &'static str {
        match self {
            Self::Second => "1 second",
            Self::Minute => "1 minute",
            Self::Hour => "1 hour",
            Self::Day => "1 day",
            Self::Week => "1 week",
            Self::Month => "1 month",
            Self::Year => "1 year",
        }
    }

    /// Get the duration in seconds (approximate for calendar intervals)
    pub fn approx_duration_secs(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day => 24 * 3600,
            Self::Week => 7 * 24 * 3600,
            Self::Month => 30 * 24 * 3600,
            Self::Year => 365 * 24 * 3600,
        }
    }

    /// Render the bucketing call for `time_column`
    pub fn bucket_expr(&self, time_column: &str) -> String {
        format!("time_bucket('{}', {})", self.interval(), time_column)
    }
}

impl FromStr for Granularity {
    type Err = RollupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        // Accept "1 hour" as well as "hour"
        let unit = normalized.strip_prefix("1 ").unwrap_or(&normalized).trim();

        match unit {
            "second" | "seconds" | "s" => Ok(Self::Second),
            "minute" | "minutes" | "min" => Ok(Self::Minute),
            "hour" | "hours" | "h" => Ok(Self::Hour),
            "day" | "days" | "d" => Ok(Self::Day),
            "week" | "weeks" | "w" => Ok(Self::Week),
            "month" | "months" | "mon" => Ok(Self::Month),
            "year" | "years" | "y" => Ok(Self::Year),
            _ => Err(RollupError::InvalidGranularity(s.to_string())),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered, strictly increasing, non-empty list of granularities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GranularitySequence(Vec<Granularity>);

impl GranularitySequence {
    /// Validate and wrap a list of granularities
    pub fn new(granularities: Vec<Granularity>) -> RollupResult<Self> {
        if granularities.is_empty() {
            return Err(RollupError::Configuration(
                "granularity sequence is empty".to_string(),
            ));
        }

        for pair in granularities.windows(2) {
            if pair[1] <= pair[0] {
                return Err(RollupError::NonMonotonicGranularity {
                    previous: pair[0].to_string(),
                    next: pair[1].to_string(),
                });
            }
        }

        Ok(Self(granularities))
    }

    /// Parse a list of names such as `["minute", "hour", "day"]`
    pub fn parse<S: AsRef<str>>(names: &[S]) -> RollupResult<Self> {
        let granularities = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<RollupResult<Vec<Granularity>>>()?;
        Self::new(granularities)
    }

    /// The granularity computed from raw rows
    pub fn finest(&self) -> Granularity {
        self.0[0]
    }

    /// The last granularity of the chain
    pub fn coarsest(&self) -> Granularity {
        self.0[self.0.len() - 1]
    }

    /// Whether the sequence contains `granularity`
    pub fn contains(&self, granularity: Granularity) -> bool {
        self.0.contains(&granularity)
    }

    /// Number of granularities
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, an empty sequence cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate finest first
    pub fn iter(&self) -> impl Iterator<Item = Granularity> + '_ {
        self.0.iter().copied()
    }

    /// Borrow as a slice
    pub fn as_slice(&self) -> &[Granularity] {
        &self.0
    }
}

impl Default for GranularitySequence {
    fn default() -> Self {
        Self(vec![
            Granularity::Minute,
            Granularity::Hour,
            Granularity::Day,
            Granularity::Month,
        ])
    }
}

/// A validated interval literal, e.g. `10 minutes` or `1 day 12 hours`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(String);

const INTERVAL_TERM: &str =
    r"(\d+)\s*(microseconds?|milliseconds?|seconds?|secs?|minutes?|mins?|hours?|days?|weeks?|months?|years?)";

impl Interval {
    /// Parse and normalize an interval literal
    pub fn parse(input: &str) -> RollupResult<Self> {
        let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

        let full = Regex::new(&format!(r"^{INTERVAL_TERM}(\s+{INTERVAL_TERM})*$"))
            .map_err(|e| RollupError::InvalidInterval(e.to_string()))?;

        if !full.is_match(&normalized) {
            return Err(RollupError::InvalidInterval(input.to_string()));
        }

        Ok(Self(normalized))
    }

    /// The normalized literal text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Approximate length in seconds (months are 30 days, years 365)
    pub fn approx_secs(&self) -> i64 {
        let Ok(term) = Regex::new(INTERVAL_TERM) else {
            return 0;
        };

        term.captures_iter(&self.0)
            .map(|caps| {
                // Counts too large for i64 saturate like the products below
                let n: i64 = caps[1].parse().unwrap_or(i64::MAX);
                let unit = caps[2].trim_end_matches('s');
                let secs = match unit {
                    "microsecond" | "millisecond" => 0,
                    "second" | "sec" => 1,
                    "minute" | "min" => 60,
                    "hour" => 3600,
                    "day" => 24 * 3600,
                    "week" => 7 * 24 * 3600,
                    "month" => 30 * 24 * 3600,
                    "year" => 365 * 24 * 3600,
                    _ => 0,
                };
                n.saturating_mul(secs)
            })
            .fold(0i64, i64::saturating_add)
    }
}

impl From<Granularity> for Interval {
    fn from(granularity: Granularity) -> Self {
        Self(granularity.interval().to_string())
    }
}

impl TryFrom<String> for Interval {
    type Error = RollupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.0
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_order() {
        assert!(Granularity::Minute < Granularity::Hour);
        assert!(Granularity::Month < Granularity::Year);

        for pair in Granularity::all().windows(2) {
            assert!(pair[0].approx_duration_secs() < pair[1].approx_duration_secs());
        }
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("minute".parse::<Granularity>().unwrap(), Granularity::Minute);
        assert_eq!("1 hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("Days".parse::<Granularity>().unwrap(), Granularity::Day);
        assert_eq!(" mon ".parse::<Granularity>().unwrap(), Granularity::Month);
        assert!("fortnight".parse::<Granularity>().is_err());
        assert!("2 hours".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_bucket_expr() {
        assert_eq!(
            Granularity::Minute.bucket_expr("ts"),
            "time_bucket('1 minute', ts)"
        );
    }

    #[test]
    fn test_sequence_strictly_increasing() {
        let seq = GranularitySequence::parse(&["minute", "hour", "day"]).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.finest(), Granularity::Minute);
        assert_eq!(seq.coarsest(), Granularity::Day);

        let err = GranularitySequence::parse(&["hour", "minute"]).unwrap_err();
        assert_eq!(
            err,
            RollupError::NonMonotonicGranularity {
                previous: "hour".to_string(),
                next: "minute".to_string(),
            }
        );

        assert!(GranularitySequence::parse(&["hour", "hour"]).is_err());
        assert!(GranularitySequence::new(Vec::new()).is_err());
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(Interval::parse("10 minutes").unwrap().as_str(), "10 minutes");
        assert_eq!(Interval::parse("  1   DAY ").unwrap().as_str(), "1 day");
        assert_eq!(
            Interval::parse("1 day 12 hours").unwrap().approx_secs(),
            36 * 3600
        );
        assert_eq!(Interval::parse("2 hours").unwrap().approx_secs(), 7200);
        assert_eq!(Interval::parse("30 mins").unwrap().approx_secs(), 1800);

        assert!(Interval::parse("soon").is_err());
        assert!(Interval::parse("10 minutes'; drop table x").is_err());
        assert!(Interval::parse("").is_err());
    }

    #[test]
    fn test_interval_approx_secs_saturates() {
        let huge = Interval::parse("1000000000000000 years").unwrap();
        assert_eq!(huge.approx_secs(), i64::MAX);

        let wider = Interval::parse("99999999999999999999999 days 1 hour").unwrap();
        assert_eq!(wider.approx_secs(), i64::MAX);
    }

    #[test]
    fn test_interval_from_granularity() {
        let interval = Interval::from(Granularity::Week);
        assert_eq!(interval.as_str(), "1 week");
        assert_eq!(interval.approx_secs(), Granularity::Week.approx_duration_secs());
    }
}
