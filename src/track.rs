//! GPX source - track logs exported from PhoneTrack / Nextcloud Maps
//!
//! Every track, segment and point of the selected files is flattened into one
//! point table. Points without a `<time>` get a synthetic timestamp so they
//! still take part in deduplication and hourly bucketing.

use chrono::{DateTime, TimeZone, Utc};
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::point::{self, Point};

/// Baseline for synthetic timestamps (2020-11-10T11:15:51Z, the start of the recordings)
pub const BASELINE_EPOCH: i64 = 1_605_006_951;

/// Selector value meaning "every discovered file"
pub const ALL_FILES: &str = "all";

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse GPX file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("GPX file '{selected}' not found, choose one of: {choices}")]
    UnknownFile { selected: String, choices: String },
    #[error("synthetic timestamp out of range at offset {0}")]
    SyntheticTime(i64),
}

/// List `*.gpx` files directly inside `dir`, sorted by path.
///
/// A missing directory simply yields no files.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, TrackError> {
    if !dir.is_dir() {
        tracing::warn!("GPX directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let io_err = |source| TrackError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_gpx = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gpx"))
            .unwrap_or(false);
        if is_gpx && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    tracing::debug!("Found {} GPX files in {}", files.len(), dir.display());
    Ok(files)
}

/// Resolve the file selector: `all`, a file name, or a full path among `files`
pub fn select_files(files: &[PathBuf], selected: &str) -> Result<Vec<PathBuf>, TrackError> {
    if selected.eq_ignore_ascii_case(ALL_FILES) {
        return Ok(files.to_vec());
    }

    files
        .iter()
        .find(|f| {
            f.as_path() == Path::new(selected)
                || f.file_name() == Some(OsStr::new(selected))
        })
        .map(|f| vec![f.clone()])
        .ok_or_else(|| TrackError::UnknownFile {
            selected: selected.to_string(),
            choices: std::iter::once(ALL_FILES.to_string())
                .chain(files.iter().filter_map(|f| {
                    f.file_name().map(|n| n.to_string_lossy().into_owned())
                }))
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn synthetic_time(offset: i64) -> Result<DateTime<Utc>, TrackError> {
    Utc.timestamp_opt(BASELINE_EPOCH + offset, 0)
        .single()
        .ok_or(TrackError::SyntheticTime(offset))
}

fn gpx_time(time: &gpx::Time, path: &Path) -> Result<DateTime<Utc>, TrackError> {
    let parse_err = |message: String| TrackError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let iso = time.format().map_err(|e| parse_err(e.to_string()))?;
    Ok(DateTime::parse_from_rfc3339(&iso)
        .map_err(|e| parse_err(e.to_string()))?
        .with_timezone(&Utc))
}

/// Flatten a parsed GPX document into points.
///
/// The synthetic offset counts every point of the document, so untimed points
/// get distinct, strictly increasing timestamps in file order.
pub fn points_from_gpx(doc: &gpx::Gpx, path: &Path) -> Result<Vec<Point>, TrackError> {
    let mut points = Vec::new();
    let mut offset: i64 = 0;
    let mut synthesized = 0usize;

    for track in &doc.tracks {
        for segment in &track.segments {
            for waypoint in &segment.points {
                let time = match &waypoint.time {
                    Some(time) => gpx_time(time, path)?,
                    None => {
                        synthesized += 1;
                        synthetic_time(offset)?
                    }
                };
                let geo = waypoint.point();
                points.push(Point::new(time, geo.y(), geo.x()));
                offset += 1;
            }
        }
    }

    if synthesized > 0 {
        tracing::debug!(
            "{}: synthesized {} timestamps",
            path.display(),
            synthesized
        );
    }
    Ok(points)
}

/// Parse one GPX file
pub fn parse_file(path: &Path) -> Result<Vec<Point>, TrackError> {
    let file = File::open(path).map_err(|source| TrackError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = gpx::read(BufReader::new(file)).map_err(|e| TrackError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let points = points_from_gpx(&doc, path)?;
    tracing::info!("Parsed {} points from {}", points.len(), path.display());
    Ok(points)
}

/// Load the selected files into one deduplicated, time-sorted table.
///
/// Earlier files win when the same timestamp appears more than once.
pub fn load(files: &[PathBuf]) -> Result<Vec<Point>, TrackError> {
    let mut all = Vec::new();
    for path in files {
        all.extend(parse_file(path)?);
    }

    let total = all.len();
    let mut points = point::dedup_by_time(all);
    point::sort_by_time(&mut points);

    tracing::info!(
        "Loaded {} GPX points from {} files ({} duplicates dropped)",
        points.len(),
        files.len(),
        total - points.len()
    );
    Ok(points)
}
