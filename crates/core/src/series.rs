//! Time-indexed series at native and aggregated resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::SeriesError;

/// One observation at the source's native resolution. `None` is missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl RawPoint {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// Ordered observations with strictly increasing dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawSeries {
    points: Vec<RawPoint>,
}

impl RawSeries {
    /// Validate ordering. Non-finite values are stored as missing.
    pub fn new(points: Vec<RawPoint>) -> Result<Self, SeriesError> {
        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(SeriesError::NotIncreasing {
                    previous: pair[0].date,
                    next: pair[1].date,
                });
            }
        }
        let points = points
            .into_iter()
            .map(|p| RawPoint {
                date: p.date,
                value: p.value.filter(|v| v.is_finite()),
            })
            .collect();
        Ok(Self { points })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[RawPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Coarser calendar period that raw points are averaged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Month,
    Quarter,
    Year,
}

impl Resolution {
    /// First day of the period containing `date`.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        let month = match self {
            Resolution::Month => date.month(),
            Resolution::Quarter => (date.month0() / 3) * 3 + 1,
            Resolution::Year => 1,
        };
        date.with_day(1)
            .and_then(|d| d.with_month(month))
            .unwrap_or(date)
    }

    /// Start of the period following the one starting at `start`.
    /// `None` only past the end of the representable calendar.
    pub fn next_period(self, start: NaiveDate) -> Option<NaiveDate> {
        let months = match self {
            Resolution::Month => 1,
            Resolution::Quarter => 3,
            Resolution::Year => 12,
        };
        start.checked_add_months(chrono::Months::new(months))
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Month => "month",
            Resolution::Quarter => "quarter",
            Resolution::Year => "year",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" | "monthly" | "ms" => Ok(Resolution::Month),
            "quarter" | "quarterly" | "qs" => Ok(Resolution::Quarter),
            "year" | "yearly" | "annual" | "ys" => Ok(Resolution::Year),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// One aggregated value per period. `None` when no point in the period had a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub period_start: NaiveDate,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSeries {
    resolution: Resolution,
    points: Vec<AggregatedPoint>,
}

impl AggregatedSeries {
    pub(crate) fn from_parts(resolution: Resolution, points: Vec<AggregatedPoint>) -> Self {
        Self { resolution, points }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn points(&self) -> &[AggregatedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
