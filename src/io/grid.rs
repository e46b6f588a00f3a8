use crate::types::{GridCell, GridMode, PipelineError, PipelineResult, Point};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use std::path::{Path, PathBuf};

/// USGS distribution of the WRS-2 descending/ascending tiling grid
pub const WRS2_GRID_URL: &str =
    "https://prd-wret.s3-us-west-2.amazonaws.com/assets/palladium/production/s3fs-public/atoms/files/WRS2_descending_0.zip";

/// In-memory WRS-2 tiling grid for one acquisition mode.
///
/// The grid is static reference data: loaded once at startup, then queried
/// per point. A point near tile boundaries can sit in the overlap of
/// adjacent tiles, so lookups return every containing cell.
pub struct WrsGrid {
    mode: GridMode,
    cells: Vec<GridCell>,
    geometries: Vec<Geometry>,
}

impl WrsGrid {
    /// Load the grid from a local vector dataset (shapefile or equivalent),
    /// keeping only features of the requested acquisition mode.
    ///
    /// Expected attributes: `PATH`, `ROW`, `MODE`.
    pub fn from_path<P: AsRef<Path>>(path: P, mode: GridMode) -> PipelineResult<Self> {
        log::info!("Loading WRS-2 grid from: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let mut layer = dataset.layer(0)?;

        let mut cells = Vec::new();
        let mut geometries = Vec::new();

        for feature in layer.features() {
            let feature_mode = match feature.field("MODE")? {
                Some(value) => field_to_string(value),
                None => continue,
            };
            if feature_mode != mode.letter() {
                continue;
            }

            let path_no = match feature.field("PATH")? {
                Some(value) => field_to_i64(value)?,
                None => continue,
            };
            let row_no = match feature.field("ROW")? {
                Some(value) => field_to_i64(value)?,
                None => continue,
            };

            let geometry = match feature.geometry() {
                Some(g) => g.clone(),
                None => continue,
            };

            cells.push(GridCell {
                path: path_no,
                row: row_no,
                mode,
            });
            geometries.push(geometry);
        }

        log::info!("Loaded {} {} grid cells", cells.len(), mode);

        if cells.is_empty() {
            return Err(PipelineError::InvalidFormat(format!(
                "grid dataset contains no features with MODE={}",
                mode.letter()
            )));
        }

        Ok(Self {
            mode,
            cells,
            geometries,
        })
    }

    /// Download the grid archive once, extract it into a cache directory and
    /// load it. Subsequent calls reuse the cached shapefile.
    pub fn fetch_or_cached(url: &str, mode: GridMode) -> PipelineResult<Self> {
        let cache_dir = grid_cache_dir()?;
        let shapefile = find_cached_shapefile(&cache_dir);

        if let Some(path) = shapefile {
            log::info!("WRS-2 grid already cached at {}, skipping download", path.display());
            return Self::from_path(path, mode);
        }

        std::fs::create_dir_all(&cache_dir).map_err(PipelineError::Io)?;
        log::info!("Downloading WRS-2 grid archive from: {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .user_agent("landscan/0.2.0 (Landsat Index Pipeline)")
            .build()
            .map_err(|e| PipelineError::Processing(format!("Failed to create HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| PipelineError::Processing(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Processing(format!(
                "grid archive download failed with status: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| PipelineError::Processing(format!("Failed to read response bytes: {}", e)))?;

        extract_grid_archive(&bytes, &cache_dir)?;

        let shapefile = find_cached_shapefile(&cache_dir).ok_or_else(|| {
            PipelineError::InvalidFormat("grid archive contained no shapefile".to_string())
        })?;

        Self::from_path(shapefile, mode)
    }

    pub fn mode(&self) -> GridMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Return every grid cell whose polygon contains the point.
    ///
    /// All cells are tested; overlap zones yield more than one cell and the
    /// first containing cell must not short-circuit the scan.
    pub fn resolve_cells(&self, point: Point) -> PipelineResult<Vec<GridCell>> {
        let wkt = format!("POINT ({} {})", point.lon, point.lat);
        let point_geom = Geometry::from_wkt(&wkt)?;

        let mut hits = Vec::new();
        for (cell, geometry) in self.cells.iter().zip(self.geometries.iter()) {
            if geometry.contains(&point_geom) {
                hits.push(*cell);
            }
        }

        if hits.is_empty() {
            log::warn!(
                "No {} grid cell covers ({:.4}, {:.4})",
                self.mode,
                point.lat,
                point.lon
            );
            return Err(PipelineError::NoCoverage {
                lat: point.lat,
                lon: point.lon,
            });
        }

        log::info!(
            "Point ({:.4}, {:.4}) resolves to {} cell(s): {:?}",
            point.lat,
            point.lon,
            hits.len(),
            hits.iter().map(|c| (c.path, c.row)).collect::<Vec<_>>()
        );

        Ok(hits)
    }
}

/// Platform cache directory for the extracted grid dataset
fn grid_cache_dir() -> PipelineResult<PathBuf> {
    let base = dirs::cache_dir()
        .ok_or_else(|| PipelineError::Processing("no cache directory available".to_string()))?;
    Ok(base.join("landscan").join("wrs2"))
}

/// Locate a previously extracted .shp inside the cache directory
fn find_cached_shapefile(cache_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(cache_dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "shp").unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// Unpack every member of the grid zip archive into the cache directory
fn extract_grid_archive(zip_bytes: &[u8], cache_dir: &Path) -> PipelineResult<()> {
    use std::io::Cursor;
    use zip::ZipArchive;

    let cursor = Cursor::new(zip_bytes);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| PipelineError::Processing(format!("Failed to read ZIP archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| PipelineError::Processing(format!("Failed to read ZIP entry {}: {}", i, e)))?;

        // Flatten any archive-internal directories; the shapefile sidecars
        // must land next to each other.
        let name = file.name().to_string();
        let basename = match name.rsplit('/').next() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => continue,
        };

        let target = cache_dir.join(basename);
        let mut out = std::fs::File::create(&target).map_err(PipelineError::Io)?;
        std::io::copy(&mut file, &mut out).map_err(PipelineError::Io)?;
        log::debug!("Extracted {} to {}", name, target.display());
    }

    Ok(())
}

/// Coerce an OGR attribute into an integer; shapefile drivers report numeric
/// columns inconsistently across versions.
fn field_to_i64(value: gdal::vector::FieldValue) -> PipelineResult<i64> {
    use gdal::vector::FieldValue;
    match value {
        FieldValue::IntegerValue(v) => Ok(v as i64),
        FieldValue::Integer64Value(v) => Ok(v),
        FieldValue::RealValue(v) => Ok(v as i64),
        FieldValue::StringValue(v) => v
            .trim()
            .parse::<i64>()
            .map_err(|e| PipelineError::InvalidFormat(format!("non-numeric grid attribute: {}", e))),
        other => Err(PipelineError::InvalidFormat(format!(
            "unexpected grid attribute type: {:?}",
            other
        ))),
    }
}

fn field_to_string(value: gdal::vector::FieldValue) -> String {
    use gdal::vector::FieldValue;
    match value {
        FieldValue::StringValue(v) => v,
        FieldValue::IntegerValue(v) => v.to_string(),
        FieldValue::Integer64Value(v) => v.to_string(),
        FieldValue::RealValue(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}
