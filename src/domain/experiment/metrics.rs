//! Engagement counters and the rates derived from them
//!
//! Everything here is pure: rates are a function of a counter snapshot and
//! never carry state of their own. Every zero denominator yields a rate of 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// EventKind
// ============================================================================

/// Kind of engagement event recorded against a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The variant was shown to someone
    Impression,
    /// The variant was clicked
    Click,
    /// Any deeper interaction (like, comment, share, watch)
    Engagement,
    /// A downstream conversion attributed to the variant
    Conversion,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Click => "click",
            Self::Engagement => "engagement",
            Self::Conversion => "conversion",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PrimaryMetric
// ============================================================================

/// Metric used to rank variants against each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    /// Click-through rate
    Clicks,
    /// Engagement rate
    Engagement,
    /// Conversion rate (conversions per click)
    Conversions,
    /// Watch time. There is no watch-time counter, so this ranks by the raw
    /// engagement count.
    WatchTime,
}

impl PrimaryMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clicks => "clicks",
            Self::Engagement => "engagement",
            Self::Conversions => "conversions",
            Self::WatchTime => "watch_time",
        }
    }

    /// Human readable label used in recommendations
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clicks => "click-through rate",
            Self::Engagement => "engagement rate",
            Self::Conversions => "conversion rate",
            Self::WatchTime => "engagement count",
        }
    }
}

impl fmt::Display for PrimaryMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimaryMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clicks" => Ok(Self::Clicks),
            "engagement" => Ok(Self::Engagement),
            "conversions" => Ok(Self::Conversions),
            "watch_time" | "watchtime" => Ok(Self::WatchTime),
            other => Err(format!(
                "Invalid primary metric '{}'. Valid values: clicks, engagement, conversions, watch_time",
                other
            )),
        }
    }
}

// ============================================================================
// VariantCounters
// ============================================================================

/// Raw engagement counters for a single variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    pub impressions: u64,
    pub clicks: u64,
    pub engagement: u64,
    pub conversions: u64,
}

impl VariantCounters {
    /// Increment exactly the counter that matches `kind`
    pub fn increment(&mut self, kind: EventKind) {
        let counter = match kind {
            EventKind::Impression => &mut self.impressions,
            EventKind::Click => &mut self.clicks,
            EventKind::Engagement => &mut self.engagement,
            EventKind::Conversion => &mut self.conversions,
        };
        *counter = counter.saturating_add(1);
    }
}

// ============================================================================
// VariantRates
// ============================================================================

/// Rates derived from a counter snapshot, as percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantRates {
    /// clicks / impressions * 100
    pub ctr: f64,
    /// engagement / impressions * 100
    pub engagement_rate: f64,
    /// conversions / clicks * 100
    pub conversion_rate: f64,
}

impl VariantRates {
    pub fn from_counters(counters: &VariantCounters) -> Self {
        Self {
            ctr: percentage(counters.clicks, counters.impressions),
            engagement_rate: percentage(counters.engagement, counters.impressions),
            conversion_rate: percentage(counters.conversions, counters.clicks),
        }
    }
}

fn percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64 * 100.0
}

/// Value used to compare variants for the given primary metric
pub fn metric_value(
    counters: &VariantCounters,
    rates: &VariantRates,
    metric: PrimaryMetric,
) -> f64 {
    match metric {
        PrimaryMetric::Clicks => rates.ctr,
        PrimaryMetric::Engagement => rates.engagement_rate,
        PrimaryMetric::Conversions => rates.conversion_rate,
        PrimaryMetric::WatchTime => counters.engagement as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(impressions: u64, clicks: u64, engagement: u64, conversions: u64) -> VariantCounters {
        VariantCounters {
            impressions,
            clicks,
            engagement,
            conversions,
        }
    }

    #[test]
    fn test_rates_from_counters() {
        let rates = VariantRates::from_counters(&counters(200, 50, 20, 5));

        assert!((rates.ctr - 25.0).abs() < 1e-9);
        assert!((rates.engagement_rate - 10.0).abs() < 1e-9);
        assert!((rates.conversion_rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_impressions_yield_zero_rates() {
        let rates = VariantRates::from_counters(&counters(0, 3, 4, 1));

        assert_eq!(rates.ctr, 0.0);
        assert_eq!(rates.engagement_rate, 0.0);
        assert!((rates.conversion_rate - 33.333333).abs() < 1e-4);
    }

    #[test]
    fn test_zero_clicks_yield_zero_conversion_rate() {
        let rates = VariantRates::from_counters(&counters(100, 0, 0, 7));

        assert_eq!(rates.conversion_rate, 0.0);
        assert!(!rates.conversion_rate.is_nan());
    }

    #[test]
    fn test_increment_touches_one_counter() {
        let mut c = VariantCounters::default();
        c.increment(EventKind::Click);
        c.increment(EventKind::Click);
        c.increment(EventKind::Conversion);

        assert_eq!(c, counters(0, 2, 0, 1));
    }

    #[test]
    fn test_metric_value_lookup() {
        let c = counters(100, 10, 40, 2);
        let rates = VariantRates::from_counters(&c);

        assert!((metric_value(&c, &rates, PrimaryMetric::Clicks) - 10.0).abs() < 1e-9);
        assert!((metric_value(&c, &rates, PrimaryMetric::Engagement) - 40.0).abs() < 1e-9);
        assert!((metric_value(&c, &rates, PrimaryMetric::Conversions) - 20.0).abs() < 1e-9);
        assert_eq!(metric_value(&c, &rates, PrimaryMetric::WatchTime), 40.0);
    }

    #[test]
    fn test_primary_metric_parsing() {
        assert_eq!("clicks".parse::<PrimaryMetric>(), Ok(PrimaryMetric::Clicks));
        assert_eq!("WATCH_TIME".parse::<PrimaryMetric>(), Ok(PrimaryMetric::WatchTime));
        assert!("revenue".parse::<PrimaryMetric>().is_err());
    }

    #[test]
    fn test_serialization_names() {
        assert_eq!(
            serde_json::to_string(&PrimaryMetric::WatchTime).unwrap(),
            "\"watch_time\""
        );
        assert_eq!(
            serde_json::from_str::<EventKind>("\"impression\"").unwrap(),
            EventKind::Impression
        );
    }
}
