//! Resampling of raw series into calendar periods.

use crate::series::{AggregatedPoint, AggregatedSeries, RawSeries, Resolution};

/// Average raw points into one value per period of `resolution`.
///
/// Periods run contiguously from the period of the first point to the period
/// of the last one. Missing points are ignored; a period without any value
/// (no points, or only missing ones) is itself missing, never zero. An empty
/// series yields an empty aggregate.
pub fn aggregate(series: &RawSeries, resolution: Resolution) -> AggregatedSeries {
    let points = series.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return AggregatedSeries::from_parts(resolution, Vec::new());
    };

    let last_period = resolution.period_start(last.date);
    let mut period = resolution.period_start(first.date);
    let mut remaining = points.iter().peekable();
    let mut out = Vec::new();

    loop {
        let next = resolution.next_period(period);

        let mut sum = 0.0;
        let mut count = 0usize;
        while let Some(point) = remaining.next_if(|p| next.map_or(true, |n| p.date < n)) {
            if let Some(value) = point.value {
                sum += value;
                count += 1;
            }
        }

        out.push(AggregatedPoint {
            period_start: period,
            value: (count > 0).then(|| sum / count as f64),
        });

        match next {
            Some(n) if n <= last_period => period = n,
            _ => break,
        }
    }

    AggregatedSeries::from_parts(resolution, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::RawPoint;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(points: &[(NaiveDate, Option<f64>)]) -> RawSeries {
        RawSeries::new(points.iter().map(|&(date, value)| RawPoint::new(date, value)).collect())
            .unwrap()
    }

    #[test]
    fn weekly_points_average_into_month_ignoring_missing() {
        let raw = series(&[
            (d(2023, 1, 7), Some(10.0)),
            (d(2023, 1, 14), Some(20.0)),
            (d(2023, 1, 21), None),
        ]);
        let monthly = aggregate(&raw, Resolution::Month);

        assert_eq!(monthly.resolution(), Resolution::Month);
        assert_eq!(
            monthly.points(),
            &[AggregatedPoint { period_start: d(2023, 1, 1), value: Some(15.0) }]
        );
    }

    #[test]
    fn empty_series_aggregates_to_empty() {
        let monthly = aggregate(&RawSeries::empty(), Resolution::Month);
        assert!(monthly.is_empty());
    }

    #[test]
    fn all_missing_period_is_missing_not_zero() {
        let raw = series(&[(d(2023, 3, 4), None), (d(2023, 3, 11), None)]);
        let monthly = aggregate(&raw, Resolution::Month);
        assert_eq!(monthly.points()[0].value, None);
    }

    #[test]
    fn gap_months_are_emitted_as_missing() {
        let raw = series(&[(d(2023, 1, 29), Some(4.0)), (d(2023, 4, 2), Some(8.0))]);
        let monthly = aggregate(&raw, Resolution::Month);

        let starts: Vec<_> = monthly.points().iter().map(|p| p.period_start).collect();
        assert_eq!(starts, vec![d(2023, 1, 1), d(2023, 2, 1), d(2023, 3, 1), d(2023, 4, 1)]);
        let values: Vec<_> = monthly.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(4.0), None, None, Some(8.0)]);
    }

    #[test]
    fn quarterly_and_yearly_buckets() {
        let raw = series(&[
            (d(2022, 12, 25), Some(2.0)),
            (d(2023, 1, 1), Some(4.0)),
            (d(2023, 3, 26), Some(6.0)),
            (d(2023, 4, 2), Some(10.0)),
        ]);

        let quarterly = aggregate(&raw, Resolution::Quarter);
        let values: Vec<_> = quarterly.points().iter().map(|p| (p.period_start, p.value)).collect();
        assert_eq!(
            values,
            vec![
                (d(2022, 10, 1), Some(2.0)),
                (d(2023, 1, 1), Some(5.0)),
                (d(2023, 4, 1), Some(10.0)),
            ]
        );

        let yearly = aggregate(&raw, Resolution::Year);
        let values: Vec<_> = yearly.points().iter().map(|p| (p.period_start, p.value)).collect();
        assert_eq!(values, vec![(d(2022, 1, 1), Some(2.0)), (d(2023, 1, 1), Some(20.0 / 3.0))]);
    }

    #[test]
    fn aggregate_is_deterministic() {
        let raw = series(&[
            (d(2020, 5, 3), Some(1.5)),
            (d(2020, 5, 10), Some(2.5)),
            (d(2020, 6, 7), None),
            (d(2020, 7, 5), Some(9.0)),
        ]);
        assert_eq!(aggregate(&raw, Resolution::Month), aggregate(&raw, Resolution::Month));
    }
}
