//! Response body parsers.

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

use harvest_core::{PayloadFormat, RawPoint, RawSeries, SeriesError};

/// Anti-XSSI guard some JSON endpoints prepend to their bodies.
const XSSI_PREFIXES: [&str; 2] = [")]}',", ")]}'"];

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("invalid value '{value}' on {date}")]
    Value { date: NaiveDate, value: String },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Parse a response body into a raw series.
pub fn parse_payload(format: PayloadFormat, body: &str) -> Result<RawSeries, PayloadError> {
    match format {
        PayloadFormat::TrendsTimeline => parse_trends_timeline(body),
        PayloadFormat::Csv => parse_csv(body),
    }
}

// ── Trends timeline JSON ─────────────────────────────────────────

#[derive(Deserialize)]
struct TimelineEnvelope {
    default: TimelineBody,
}

#[derive(Deserialize)]
struct TimelineBody {
    #[serde(rename = "timelineData")]
    timeline_data: Vec<TimelineEntry>,
}

#[derive(Deserialize)]
struct TimelineEntry {
    time: serde_json::Value,
    #[serde(default)]
    value: Vec<f64>,
    #[serde(rename = "hasData", default)]
    has_data: Vec<bool>,
}

/// `{"default":{"timelineData":[{"time":"1451779200","value":[42],"hasData":[true]}]}}`
fn parse_trends_timeline(body: &str) -> Result<RawSeries, PayloadError> {
    let body = strip_xssi(body);
    let envelope: TimelineEnvelope = serde_json::from_str(body)?;

    let points = envelope
        .default
        .timeline_data
        .into_iter()
        .map(|entry| {
            let date = unix_date(&entry.time)?;
            let has_data = entry.has_data.first().copied().unwrap_or(true);
            let value = if has_data { entry.value.first().copied() } else { None };
            Ok(RawPoint::new(date, value))
        })
        .collect::<Result<Vec<_>, PayloadError>>()?;

    Ok(RawSeries::new(points)?)
}

fn strip_xssi(body: &str) -> &str {
    let trimmed = body.trim_start();
    XSSI_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
}

fn unix_date(time: &serde_json::Value) -> Result<NaiveDate, PayloadError> {
    let secs = match time {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    };
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|dt| dt.date_naive())
        .ok_or_else(|| PayloadError::Timestamp(time.to_string()))
}

// ── CSV ──────────────────────────────────────────────────────────

/// `date,value` rows. Lines whose first field is not a date (preambles,
/// headers, blank lines) are skipped. An empty value is missing.
fn parse_csv(body: &str) -> Result<RawSeries, PayloadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 2 {
            continue;
        }
        let Some(date) = parse_date(record.get(0).unwrap_or_default()) else {
            continue;
        };
        let raw = record.get(1).unwrap_or_default().trim();
        points.push(RawPoint::new(date, parse_value(date, raw)?));
    }

    Ok(RawSeries::new(points)?)
}

fn parse_date(field: &str) -> Option<NaiveDate> {
    let field = field.trim();
    NaiveDate::parse_from_str(field, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&format!("{field}-01"), "%Y-%m-%d").ok())
}

fn parse_value(date: NaiveDate, raw: &str) -> Result<Option<f64>, PayloadError> {
    match raw {
        "" => Ok(None),
        // Trends reports non-zero values below one as "<1".
        "<1" => Ok(Some(0.0)),
        _ => raw.parse::<f64>().map(Some).map_err(|_| PayloadError::Value {
            date,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn timeline_with_xssi_prefix_and_gaps() {
        let body = r#")]}',
{"default":{"timelineData":[
  {"time":"1451779200","formattedTime":"Jan 3 - 9, 2016","value":[42],"hasData":[true]},
  {"time":"1452384000","value":[0],"hasData":[false]},
  {"time":1452988800,"value":[57],"hasData":[true],"isPartial":true}
],"averages":[]}}"#;

        let series = parse_payload(PayloadFormat::TrendsTimeline, body).unwrap();
        let points = series.points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], RawPoint::new(d(2016, 1, 3), Some(42.0)));
        assert_eq!(points[1], RawPoint::new(d(2016, 1, 10), None));
        assert_eq!(points[2], RawPoint::new(d(2016, 1, 17), Some(57.0)));
    }

    #[test]
    fn empty_timeline_is_a_valid_empty_series() {
        let body = r#"{"default":{"timelineData":[],"averages":[]}}"#;
        let series = parse_payload(PayloadFormat::TrendsTimeline, body).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn timeline_without_envelope_is_malformed() {
        assert!(matches!(
            parse_payload(PayloadFormat::TrendsTimeline, r#"{"error":"nope"}"#),
            Err(PayloadError::Json(_))
        ));
        assert!(parse_payload(PayloadFormat::TrendsTimeline, "<html>").is_err());
    }

    #[test]
    fn timeline_bad_timestamp_is_reported() {
        let body = r#"{"default":{"timelineData":[{"time":"soon","value":[1]}]}}"#;
        assert!(matches!(
            parse_payload(PayloadFormat::TrendsTimeline, body),
            Err(PayloadError::Timestamp(_))
        ));
    }

    #[test]
    fn timeline_out_of_order_is_rejected() {
        let body = r#"{"default":{"timelineData":[
            {"time":"1452384000","value":[1]},
            {"time":"1451779200","value":[2]}]}}"#;
        assert!(matches!(
            parse_payload(PayloadFormat::TrendsTimeline, body),
            Err(PayloadError::Series(_))
        ));
    }

    #[test]
    fn csv_skips_preamble_and_header() {
        let body = "Category: All categories\n\nWeek,flu: (California)\n2016-01-03,42\n2016-01-10,\n2016-01-17,<1\n";
        let series = parse_payload(PayloadFormat::Csv, body).unwrap();
        assert_eq!(
            series.points(),
            &[
                RawPoint::new(d(2016, 1, 3), Some(42.0)),
                RawPoint::new(d(2016, 1, 10), None),
                RawPoint::new(d(2016, 1, 17), Some(0.0)),
            ]
        );
    }

    #[test]
    fn csv_accepts_month_dates() {
        let body = "Month,value\n2020-01,3.5\n2020-02,4\n";
        let series = parse_payload(PayloadFormat::Csv, body).unwrap();
        assert_eq!(series.points()[0].date, d(2020, 1, 1));
        assert_eq!(series.points()[1].value, Some(4.0));
    }

    #[test]
    fn csv_header_only_is_empty() {
        let series = parse_payload(PayloadFormat::Csv, "date,value\n").unwrap();
        assert!(series.is_empty());
        assert!(parse_payload(PayloadFormat::Csv, "").unwrap().is_empty());
    }

    #[test]
    fn csv_garbage_value_is_an_error() {
        let err = parse_payload(PayloadFormat::Csv, "2020-01-05,lots\n").unwrap_err();
        assert!(err.to_string().contains("lots"));
    }
}
