//! Pipeline - load both sources, merge, weigh
//!
//! Each run starts from scratch: nothing is cached between invocations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::Config;
use crate::influx::InfluxClient;
use crate::merge;
use crate::point::{Point, WeightedPoint};
use crate::track;
use crate::weight::{self, IntervalCounts};
use crate::window::TimeWindow;

#[derive(Error, Debug, PartialEq)]
pub enum PipelineError {
    #[error("no points left after filtering (window starting {start})")]
    EmptyResult { start: DateTime<Utc> },
    #[error("no '{0}' entities recorded in this window")]
    NoEntities(String),
    #[error("entity '{entity}' not found, choose one of: {choices}")]
    UnknownEntity { entity: String, choices: String },
}

/// What to load: the user-facing controls
#[derive(Debug, Clone)]
pub struct Selection {
    pub months: u32,
    pub domain: String,
    /// `None` picks the first discovered entity
    pub entity: Option<String>,
    pub gpx_dir: PathBuf,
    /// `all` or one file name
    pub gpx: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub entity: String,
    pub window: TimeWindow,
    pub points: Vec<WeightedPoint>,
    pub counts: IntervalCounts,
}

/// Resolve the requested entity against the discovered ones
pub fn pick_entity(
    discovered: &[String],
    requested: Option<&str>,
    domain: &str,
) -> Result<String, PipelineError> {
    match requested {
        Some(entity) if discovered.iter().any(|e| e == entity) => Ok(entity.to_string()),
        Some(entity) => Err(PipelineError::UnknownEntity {
            entity: entity.to_string(),
            choices: discovered.join(", "),
        }),
        None => discovered
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::NoEntities(domain.to_string())),
    }
}

/// Merge both tables and weigh the result; an empty table is an error.
pub fn combine(
    influx_points: &[Point],
    gpx_points: &[Point],
    start: DateTime<Utc>,
) -> Result<(Vec<WeightedPoint>, IntervalCounts), PipelineError> {
    let merged = merge::merge(influx_points, gpx_points, start);
    if merged.is_empty() {
        return Err(PipelineError::EmptyResult { start });
    }
    Ok(weight::weigh(&merged))
}

/// Run every stage for one selection
pub async fn run(config: &Config, selection: &Selection) -> Result<PipelineOutput> {
    let window = TimeWindow::ending_now(selection.months)?;
    tracing::info!(
        "Window: {} months, start date {}",
        window.months,
        window.start.format("%Y-%m-%d")
    );

    let client = InfluxClient::new(&config.influxdb)?;
    let discovered = client
        .discover_entities(&selection.domain, &window)
        .await
        .context("Failed to list entities from InfluxDB")?;
    let entity = pick_entity(&discovered, selection.entity.as_deref(), &selection.domain)?;

    let influx_points = client
        .fetch_points(&selection.domain, &entity, &window)
        .await
        .with_context(|| format!("Failed to load points for '{}'", entity))?;

    let files = track::discover_files(&selection.gpx_dir)?;
    let selected = track::select_files(&files, &selection.gpx)?;
    let gpx_points = track::load(&selected)?;

    let (points, counts) = combine(&influx_points, &gpx_points, window.start)?;
    tracing::info!(
        "{} points in {} hour buckets for '{}'",
        points.len(),
        counts.len(),
        entity
    );

    Ok(PipelineOutput {
        entity,
        window,
        points,
        counts,
    })
}
