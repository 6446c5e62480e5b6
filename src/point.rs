//! Point tables shared by every pipeline stage

use chrono::{DateTime, Utc};

/// A single GPS sample, normalized to UTC
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(time: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            time,
            latitude,
            longitude,
        }
    }
}

/// A merged point with its hourly bucket and heatmap weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPoint {
    pub point: Point,
    pub time_bin: DateTime<Utc>,
    pub weight: f64,
}

/// Stable sort by timestamp
pub fn sort_by_time(points: &mut [Point]) {
    points.sort_by_key(|p| p.time);
}

/// Keep the first point for every exact timestamp, preserving order
pub fn dedup_by_time(points: Vec<Point>) -> Vec<Point> {
    let mut seen = std::collections::HashSet::with_capacity(points.len());
    points.into_iter().filter(|p| seen.insert(p.time)).collect()
}
