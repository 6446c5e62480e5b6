//! InfluxDB source - Flux queries over the v2 HTTP API
//!
//! HomeAssistant writes one series per tracked person, with `latitude` and
//! `longitude` stored as separate fields. Results come back as annotated CSV
//! and are reshaped into a plain point table.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::config::InfluxDbConfig;
use crate::point::{self, Point};
use crate::window::TimeWindow;

/// Metadata columns whose presence changed between the v1 and v2 setups.
/// Rows with and without them cannot share one result table.
pub const DRIFTING_COLUMNS: [&str; 3] = ["_measurement", "source", "friendly_name"];

const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";

#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB rejected the credentials ({0})")]
    Unauthorized(StatusCode),

    #[error("InfluxDB returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid token header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("InfluxDB reported a query error: {0}")]
    Query(String),

    #[error("data row before any header row")]
    MissingHeader,

    #[error("row has {found} fields, its header has {expected}")]
    RowWidth { expected: usize, found: usize },

    #[error("result is split over incompatible tables: {0:?}")]
    SchemaDrift(Vec<Vec<String>>),

    #[error("result has no '{0}' column")]
    MissingColumn(&'static str),

    #[error("invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("invalid {column} value '{value}'")]
    Number { column: &'static str, value: String },
}

/// One result table: a header row and the data rows that follow it
#[derive(Debug, Clone, PartialEq)]
pub struct FluxTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FluxTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// InfluxDB v2 query client
pub struct InfluxClient {
    client: Client,
    base_url: String,
    org: String,
    bucket: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxDbConfig) -> Result<Self, InfluxError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/csv"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/vnd.flux"));

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bucket: config.database.clone(),
        })
    }

    /// Run a Flux query and parse the CSV response
    pub async fn query(&self, flux: &str) -> Result<Vec<FluxTable>, InfluxError> {
        let url = format!("{}/api/v2/query", self.base_url);
        tracing::debug!("Flux query to {}:\n{}", url, flux);

        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .body(flux.to_string())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(InfluxError::Unauthorized(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InfluxError::Status { status, body });
        }

        let body = response.text().await?;
        tracing::debug!("Received {} bytes of CSV", body.len());
        parse_csv(&body)
    }

    /// Distinct `entity_id` values recorded for a domain within the window
    pub async fn discover_entities(
        &self,
        domain: &str,
        window: &TimeWindow,
    ) -> Result<Vec<String>, InfluxError> {
        let tables = self
            .query(&entities_query(&self.bucket, domain, window))
            .await?;

        let mut entities: Vec<String> = Vec::new();
        for table in &tables {
            let Some(idx) = table.column("entity_id") else {
                continue;
            };
            for row in &table.rows {
                if let Some(id) = row.get(idx).filter(|id| !id.is_empty()) {
                    if !entities.contains(id) {
                        entities.push(id.clone());
                    }
                }
            }
        }

        tracing::info!("Discovered {} '{}' entities", entities.len(), domain);
        Ok(entities)
    }

    /// Latitude/longitude history of one entity within the window
    pub async fn fetch_points(
        &self,
        domain: &str,
        entity: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Point>, InfluxError> {
        tracing::info!("Loading points for '{}' over {}", entity, window.flux_range());
        let tables = self
            .query(&points_query(&self.bucket, domain, entity, window))
            .await?;
        let points = points_from_tables(&tables)?;
        tracing::info!("Loaded {} points from InfluxDB", points.len());
        Ok(points)
    }
}

/// Quote a value as a Flux string literal
fn flux_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{}\"", escaped)
}

pub fn entities_query(bucket: &str, domain: &str, window: &TimeWindow) -> String {
    format!(
        r#"from(bucket: {bucket})
    |> range(start: {range})
    |> filter(fn: (r) => r.domain == {domain})
    |> group(columns: ["entity_id"])
    |> count()"#,
        bucket = flux_string(bucket),
        range = window.flux_range(),
        domain = flux_string(domain),
    )
}

pub fn points_query(bucket: &str, domain: &str, entity: &str, window: &TimeWindow) -> String {
    let drop = DRIFTING_COLUMNS
        .iter()
        .map(|c| flux_string(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"from(bucket: {bucket})
    |> range(start: {range})
    |> filter(fn: (r) => r.domain == {domain} and r.entity_id == {entity} and (r._field == "{LATITUDE}" or r._field == "{LONGITUDE}"))
    |> drop(columns: [{drop}])
    |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")"#,
        bucket = flux_string(bucket),
        range = window.flux_range(),
        domain = flux_string(domain),
        entity = flux_string(entity),
    )
}

/// Header rows in Influx CSV start with the annotation column, then `result,table`
fn is_header(record: &csv::StringRecord) -> bool {
    record.get(1) == Some("result") && record.get(2) == Some("table")
}

/// Failures found after streaming started come back with status 200 as an
/// `error,reference` table
fn is_error_header(record: &csv::StringRecord) -> bool {
    record.get(1) == Some("error")
}

/// Split an Influx CSV response into tables, one per distinct header.
///
/// An embedded error table fails the whole response, even after data rows.
pub fn parse_csv(body: &str) -> Result<Vec<FluxTable>, InfluxError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut tables: Vec<FluxTable> = Vec::new();
    let mut current: Option<usize> = None;
    let mut records = reader
        .records()
        .filter(|r| !matches!(r, Ok(record) if record.iter().all(|field| field.is_empty())));

    while let Some(record) = records.next() {
        let record = record?;

        if is_error_header(&record) {
            let message = match records.next().transpose()? {
                Some(row) => row.get(1).unwrap_or_default().to_string(),
                None => String::new(),
            };
            tracing::error!("InfluxDB query failed: {}", message);
            return Err(InfluxError::Query(message));
        }

        if is_header(&record) {
            let columns: Vec<String> = record.iter().map(str::to_string).collect();
            current = Some(match tables.iter().position(|t| t.columns == columns) {
                Some(idx) => idx,
                None => {
                    tables.push(FluxTable {
                        columns,
                        rows: Vec::new(),
                    });
                    tables.len() - 1
                }
            });
            continue;
        }

        let table = current
            .and_then(|idx| tables.get_mut(idx))
            .ok_or(InfluxError::MissingHeader)?;
        if record.len() != table.columns.len() {
            return Err(InfluxError::RowWidth {
                expected: table.columns.len(),
                found: record.len(),
            });
        }
        table.rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(tables)
}

/// Project pivoted tables down to `time, latitude, longitude`.
///
/// Rows missing a coordinate are skipped; repeated timestamps keep the first row.
pub fn points_from_tables(tables: &[FluxTable]) -> Result<Vec<Point>, InfluxError> {
    let table = match tables {
        [] => return Ok(Vec::new()),
        [table] => table,
        _ => {
            return Err(InfluxError::SchemaDrift(
                tables.iter().map(|t| t.columns.clone()).collect(),
            ))
        }
    };

    let time_idx = table.column("_time").ok_or(InfluxError::MissingColumn("_time"))?;
    let lat_idx = table.column(LATITUDE).ok_or(InfluxError::MissingColumn(LATITUDE))?;
    let lon_idx = table.column(LONGITUDE).ok_or(InfluxError::MissingColumn(LONGITUDE))?;

    let mut points = Vec::with_capacity(table.rows.len());
    let mut incomplete = 0usize;

    for row in &table.rows {
        if row.len() != table.columns.len() {
            return Err(InfluxError::RowWidth {
                expected: table.columns.len(),
                found: row.len(),
            });
        }
        let field = |idx: usize| row[idx].as_str();
        let (lat, lon) = (field(lat_idx), field(lon_idx));
        if lat.is_empty() || lon.is_empty() {
            incomplete += 1;
            continue;
        }

        let raw_time = field(time_idx);
        let time = DateTime::parse_from_rfc3339(raw_time)
            .map_err(|source| InfluxError::Timestamp {
                value: raw_time.to_string(),
                source,
            })?
            .with_timezone(&Utc);

        points.push(Point::new(
            time,
            parse_number(LATITUDE, lat)?,
            parse_number(LONGITUDE, lon)?,
        ));
    }

    if incomplete > 0 {
        tracing::debug!("Skipped {} rows missing a coordinate", incomplete);
    }

    let mut points = point::dedup_by_time(points);
    point::sort_by_time(&mut points);
    Ok(points)
}

fn parse_number(column: &'static str, value: &str) -> Result<f64, InfluxError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| InfluxError::Number {
            column,
            value: value.to_string(),
        })
}
