use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// A geographic point in WGS84 (latitude, longitude)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// WRS-2 acquisition mode (attribute `MODE` in the grid shapefile)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridMode {
    Descending,
    Ascending,
}

impl GridMode {
    /// Attribute letter used by the grid dataset
    pub fn letter(&self) -> &'static str {
        match self {
            GridMode::Descending => "D",
            GridMode::Ascending => "A",
        }
    }
}

impl std::fmt::Display for GridMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// One WRS-2 tile. Identity is (path, row); the polygon geometry stays with
/// the grid dataset that produced the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub path: i64,
    pub row: i64,
    pub mode: GridMode,
}

/// Half-open acquisition date window: start excluded, end included
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date > self.start && date <= self.end
    }
}

/// One catalog row from the Landsat scene list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    #[serde(rename = "productId")]
    pub product_id: String,
    pub path: i64,
    pub row: i64,
    #[serde(rename = "acquisitionDate", deserialize_with = "de_date_prefix")]
    pub acquisition_date: NaiveDate,
    #[serde(rename = "cloudCover")]
    pub cloud_cover: f64,
    pub download_url: String,
}

/// Catalog timestamps carry a time-of-day suffix; only the calendar date
/// takes part in range filtering and ordering.
fn de_date_prefix<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let prefix = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

/// A matched catalog row tagged with its originating cell and its dense
/// position in the date-sorted candidate list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScene {
    pub record: SceneRecord,
    /// Index of the originating cell in the resolved cell sequence
    pub cell_index: usize,
    /// Dense zero-based index after the date sort
    pub row_index: usize,
}

/// All candidate scenes for one query, sorted ascending by acquisition date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneCandidateSet {
    pub scenes: Vec<CandidateScene>,
}

impl SceneCandidateSet {
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateScene> {
        self.scenes.iter()
    }

    /// Find a candidate by its product id
    pub fn find(&self, product_id: &str) -> Option<&CandidateScene> {
        self.scenes.iter().find(|c| c.record.product_id == product_id)
    }

    /// Product id of the candidate with the lowest cloud cover, for callers
    /// that auto-select instead of asking the user
    pub fn least_cloudy(&self) -> Option<&str> {
        self.scenes
            .iter()
            .min_by(|a, b| {
                a.record
                    .cloud_cover
                    .partial_cmp(&b.record.cloud_cover)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.record.product_id.as_str())
    }
}

/// The chosen scene plus at most one companion per other covering cell.
/// No two entries share a cell index; the chosen scene comes first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedSceneSet {
    pub scenes: Vec<CandidateScene>,
}

impl SelectedSceneSet {
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateScene> {
        self.scenes.iter()
    }
}

/// Landsat-8 OLI spectral bands used by the indicator formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl Band {
    /// Filename suffix of the band inside a scene's download listing
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Band::Red => "B4.TIF",
            Band::Nir => "B5.TIF",
            Band::Swir1 => "B6.TIF",
            Band::Swir2 => "B7.TIF",
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::Red => write!(f, "RED"),
            Band::Nir => write!(f, "NIR"),
            Band::Swir1 => write!(f, "SWIR1"),
            Band::Swir2 => write!(f, "SWIR2"),
        }
    }
}

/// Normalized-difference spectral indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    Ndvi,
    Ndwi,
    Ndsi,
    Slavi,
    Ndre,
}

impl Indicator {
    /// Bands that must be present before the indicator can be computed
    pub fn required_bands(&self) -> &'static [Band] {
        match self {
            Indicator::Ndvi => &[Band::Red, Band::Nir],
            Indicator::Ndwi => &[Band::Nir, Band::Swir1],
            Indicator::Ndsi => &[Band::Nir, Band::Swir1],
            Indicator::Slavi => &[Band::Red, Band::Nir, Band::Swir1],
            Indicator::Ndre => &[Band::Nir, Band::Swir2],
        }
    }

    /// Band whose zero samples mark the no-data background of the output
    pub fn anchor_band(&self) -> Band {
        match self {
            Indicator::Ndvi | Indicator::Slavi => Band::Red,
            Indicator::Ndwi | Indicator::Ndsi | Indicator::Ndre => Band::Nir,
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Indicator::Ndvi => write!(f, "NDVI"),
            Indicator::Ndwi => write!(f, "NDWI"),
            Indicator::Ndsi => write!(f, "NDSI"),
            Indicator::Slavi => write!(f, "SLAVI"),
            Indicator::Ndre => write!(f, "NDRE"),
        }
    }
}

impl std::str::FromStr for Indicator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NDVI" => Ok(Indicator::Ndvi),
            "NDWI" => Ok(Indicator::Ndwi),
            "NDSI" => Ok(Indicator::Ndsi),
            "SLAVI" => Ok(Indicator::Slavi),
            "NDRE" => Ok(Indicator::Ndre),
            other => Err(PipelineError::InvalidFormat(format!(
                "unknown indicator: {}",
                other
            ))),
        }
    }
}

/// A band raster downloaded into the run's scratch space
#[derive(Debug, Clone, PartialEq)]
pub struct BandFile {
    pub scene_id: String,
    pub band: Band,
    pub local_path: PathBuf,
}

/// Geospatial bounding box in lon/lat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box covering both inputs
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }
}

/// Geospatial transformation parameters (GDAL affine order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Geographic coordinate of a pixel center
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }
}

/// A single-band georeferenced index raster; no-data is NaN
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRaster {
    pub projection_wkt: String,
    pub transform: GeoTransform,
    pub values: Array2<f32>,
}

impl IndexRaster {
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }
}

/// Error types for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no grid cell covers point ({lat:.4}, {lon:.4})")]
    NoCoverage { lat: f64, lon: f64 },

    #[error("no catalog scenes matched the query")]
    EmptyMatch,

    #[error("product not present in candidate set: {0}")]
    NoSuchProduct(String),

    #[error("fetch failed for scene {scene_id}: {reason}")]
    Fetch { scene_id: String, reason: String },

    #[error("boundary not found in reference dataset: {0}")]
    NoSuchBoundary(String),

    #[error("missing {band} band for scene {scene_id}")]
    MissingBand { scene_id: String, band: Band },

    #[error("no index rasters to composite")]
    EmptySet,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("catalog error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid data format: {0}")]
    InvalidFormat(String),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
