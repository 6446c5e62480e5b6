//! Hourly density weighting
//!
//! Sampling rates changed a lot over the years (one point per minute on some
//! days, one per hour on others). Each hour bucket gets a total mass of 1,
//! split evenly between its points, so the heatmap shows where time was spent
//! rather than how often the phone reported.

use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Utc};
use std::collections::BTreeMap;

use crate::point::{Point, WeightedPoint};

/// Number of points per hour bucket, ordered by bucket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalCounts(BTreeMap<DateTime<Utc>, usize>);

impl IntervalCounts {
    pub fn from_bins(bins: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let mut counts = BTreeMap::new();
        for bin in bins {
            *counts.entry(bin).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn get(&self, bin: &DateTime<Utc>) -> Option<usize> {
        self.0.get(bin).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DateTime<Utc>, &usize)> + Clone {
        self.0.iter()
    }

    /// Smallest and largest bucket size
    pub fn spread(&self) -> Option<(usize, usize)> {
        if self.is_empty() {
            return None;
        }
        let sizes = self.iter().map(|(_, &c)| c);
        Some((sizes.clone().min()?, sizes.max()?))
    }
}

/// Truncate a timestamp to the start of its hour
pub fn time_bin(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(TimeDelta::hours(1)).unwrap_or(time)
}

/// Append `time_bin` and `weight` to every point.
pub fn weigh(points: &[Point]) -> (Vec<WeightedPoint>, IntervalCounts) {
    let bins: Vec<DateTime<Utc>> = points.iter().map(|p| time_bin(p.time)).collect();
    let counts = IntervalCounts::from_bins(bins.iter().copied());

    let weighted = points
        .iter()
        .zip(bins)
        .map(|(point, bin)| {
            let count = counts
                .get(&bin)
                .expect("every bin is counted from its own point");
            WeightedPoint {
                point: *point,
                time_bin: bin,
                weight: 1.0 / count as f64,
            }
        })
        .collect();

    tracing::debug!(
        "Weighted {} points over {} hour buckets",
        points.len(),
        counts.len()
    );
    (weighted, counts)
}

/// Points per calendar month (UTC), keyed by `(year, month)`
pub fn monthly_counts(points: &[WeightedPoint]) -> BTreeMap<(i32, u32), usize> {
    let mut months = BTreeMap::new();
    for p in points {
        *months
            .entry((p.point.time.year(), p.point.time.month()))
            .or_insert(0) += 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_time_bin_floors_to_hour() {
        assert_eq!(time_bin(at(10, 59, 59)), at(10, 0, 0));
        assert_eq!(time_bin(at(11, 0, 0)), at(11, 0, 0));
        let nanos = at(10, 15, 0) + TimeDelta::nanoseconds(123_456_789);
        assert_eq!(time_bin(nanos), at(10, 0, 0));
    }

    #[test]
    fn test_end_to_end_example() {
        let merged = vec![
            Point::new(at(10, 0, 0), 1.0, 1.0),
            Point::new(at(10, 30, 0), 1.1, 1.1),
            Point::new(at(11, 0, 0), 2.0, 2.0),
        ];
        let (weighted, counts) = weigh(&merged);

        assert_eq!(counts.get(&at(10, 0, 0)), Some(2));
        assert_eq!(counts.get(&at(11, 0, 0)), Some(1));
        let weights: Vec<f64> = weighted.iter().map(|p| p.weight).collect();
        assert_eq!(weights, vec![0.5, 0.5, 1.0]);
        assert_eq!(weighted[1].time_bin, at(10, 0, 0));
    }

    #[test]
    fn test_bucket_mass_is_one() {
        // uneven sampling: 1, 7, 60 and 3 points in four hours
        let mut points = vec![Point::new(at(8, 12, 0), 0.0, 0.0)];
        points.extend((0..7).map(|i| Point::new(at(9, i * 8, 0), 0.0, 0.0)));
        points.extend((0..60).map(|i| Point::new(at(10, i, 0), 0.0, 0.0)));
        points.extend((0..3).map(|i| Point::new(at(13, 0, i), 0.0, 0.0)));

        let (weighted, counts) = weigh(&points);
        assert_eq!(counts.len(), 4);

        let mut mass: HashMap<DateTime<Utc>, f64> = HashMap::new();
        for p in &weighted {
            assert!(p.weight > 0.0 && p.weight.is_finite());
            *mass.entry(p.time_bin).or_default() += p.weight;
        }
        for (bin, total) in mass {
            assert!((total - 1.0).abs() < 1e-9, "bucket {bin} has mass {total}");
        }
    }

    #[test]
    fn test_every_bucket_counted_at_least_once() {
        let points: Vec<Point> = (0..24).map(|h| Point::new(at(h, 0, 0), 0.0, 0.0)).collect();
        let (weighted, counts) = weigh(&points);
        assert!(counts.iter().all(|(_, &c)| c >= 1));
        assert!(weighted.iter().all(|p| counts.get(&p.time_bin).is_some()));
    }

    #[test]
    fn test_weight_is_inverse_of_bucket_count() {
        let points: Vec<Point> = (0..5)
            .map(|i| Point::new(at(9 + i / 3, (i % 3) * 20, 0), 0.0, 0.0))
            .collect();
        let (weighted, counts) = weigh(&points);
        for p in &weighted {
            let count = counts.get(&p.time_bin).unwrap();
            assert!(count >= 1);
            assert_eq!(p.weight, 1.0 / count as f64);
        }
        // 09:00, 09:20, 09:40 then 10:00, 10:20
        assert_eq!(counts.spread(), Some((2, 3)));
    }

    #[test]
    fn test_empty_input() {
        let (weighted, counts) = weigh(&[]);
        assert!(weighted.is_empty());
        assert!(counts.is_empty());
        assert_eq!(counts.spread(), None);
    }

    #[test]
    fn test_monthly_counts() {
        let points = vec![
            Point::new(Utc.with_ymd_and_hms(2026, 9, 30, 23, 0, 0).unwrap(), 0.0, 0.0),
            Point::new(at(1, 0, 0), 0.0, 0.0),
            Point::new(at(2, 0, 0), 0.0, 0.0),
        ];
        let (weighted, _) = weigh(&points);
        let months = monthly_counts(&weighted);
        assert_eq!(months.get(&(2026, 9)), Some(&1));
        assert_eq!(months.get(&(2026, 10)), Some(&2));
    }
}
