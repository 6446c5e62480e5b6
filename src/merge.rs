//! Merge the InfluxDB and GPX tables into one time-ordered table
//!
//! InfluxDB is the continuously updated feed and wins every exact timestamp
//! collision. GPX points only fill the gaps from the start of the window on.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::point::{self, Point};

/// Merge `priority` (already scoped to the window) with `secondary`.
pub fn merge(priority: &[Point], secondary: &[Point], start: DateTime<Utc>) -> Vec<Point> {
    let taken: HashSet<DateTime<Utc>> = priority.iter().map(|p| p.time).collect();

    let in_window = secondary.iter().filter(|p| p.time >= start);
    let (collisions, fill): (Vec<&Point>, Vec<&Point>) =
        in_window.partition(|p| taken.contains(&p.time));

    let mut merged: Vec<Point> = priority.iter().chain(fill.iter().copied()).copied().collect();
    point::sort_by_time(&mut merged);

    tracing::info!(
        "Merged {} priority + {} secondary points ({} collisions dropped, {} before {})",
        priority.len(),
        fill.len(),
        collisions.len(),
        secondary.len() - fill.len() - collisions.len(),
        start.format("%Y-%m-%d"),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 2, h, m, 0).unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_priority_wins_collisions() {
        let a = vec![Point::new(at(10, 0), 1.0, 1.0), Point::new(at(10, 30), 1.1, 1.1)];
        let b = vec![Point::new(at(10, 0), 9.0, 9.0), Point::new(at(11, 0), 2.0, 2.0)];

        let merged = merge(&a, &b, start());
        assert_eq!(
            merged,
            vec![
                Point::new(at(10, 0), 1.0, 1.0),
                Point::new(at(10, 30), 1.1, 1.1),
                Point::new(at(11, 0), 2.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_secondary_filtered_to_window() {
        let early = Utc.with_ymd_and_hms(2026, 9, 30, 23, 59, 59).unwrap();
        let b = vec![Point::new(early, 5.0, 5.0), Point::new(start(), 6.0, 6.0)];

        let merged = merge(&[], &b, start());
        assert_eq!(merged, vec![Point::new(start(), 6.0, 6.0)]);
    }

    #[test]
    fn test_priority_not_filtered() {
        let early = Utc.with_ymd_and_hms(2026, 9, 15, 0, 0, 0).unwrap();
        let a = vec![Point::new(early, 5.0, 5.0)];
        assert_eq!(merge(&a, &[], start()).len(), 1);
    }

    #[test]
    fn test_output_unique_and_sorted() {
        let a: Vec<Point> = (0..30).rev().map(|m| Point::new(at(12, m * 2), 0.0, 0.0)).collect();
        let b: Vec<Point> = (0..60).map(|m| Point::new(at(12, m), 1.0, 1.0)).collect();

        let merged = merge(&a, &b, start());
        assert_eq!(merged.len(), 60);
        assert!(merged.windows(2).all(|w| w[0].time < w[1].time));
        // even minutes come from the priority table
        assert!(merged.iter().step_by(2).all(|p| p.latitude == 0.0));
    }
}
