use crate::types::{PipelineError, PipelineResult};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use std::path::Path;

/// Reader for the administrative boundary reference dataset.
///
/// Boundaries are WGS84 polygons keyed by their `ADMIN` attribute; the mask
/// stage reprojects them per raster and the compositor draws their outline.
pub struct BoundaryReader;

impl BoundaryReader {
    /// Load one named boundary polygon
    pub fn load_named<P: AsRef<Path>>(path: P, name: &str) -> PipelineResult<Geometry> {
        log::info!(
            "Loading boundary '{}' from {}",
            name,
            path.as_ref().display()
        );

        let dataset = Dataset::open(path.as_ref())?;
        let mut layer = dataset.layer(0)?;

        for feature in layer.features() {
            let admin = match feature.field("ADMIN")? {
                Some(gdal::vector::FieldValue::StringValue(v)) => v,
                _ => continue,
            };
            if admin != name {
                continue;
            }
            let geometry = feature.geometry().ok_or_else(|| {
                PipelineError::InvalidFormat(format!("boundary '{}' has no geometry", name))
            })?;
            return Ok(geometry.clone());
        }

        Err(PipelineError::NoSuchBoundary(name.to_string()))
    }

    /// List every boundary name in the dataset, for callers that present a
    /// selection to the user
    pub fn names<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<String>> {
        let dataset = Dataset::open(path.as_ref())?;
        let mut layer = dataset.layer(0)?;

        let mut names = Vec::new();
        for feature in layer.features() {
            if let Some(gdal::vector::FieldValue::StringValue(v)) = feature.field("ADMIN")? {
                names.push(v);
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_boundary_geojson(dir: &Path) -> std::path::PathBuf {
        let geojson = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature",
     "properties": {"ADMIN": "Luxembourg"},
     "geometry": {"type": "Polygon", "coordinates": [[[5.7, 49.4], [6.5, 49.4], [6.5, 50.2], [5.7, 50.2], [5.7, 49.4]]]}},
    {"type": "Feature",
     "properties": {"ADMIN": "Belgium"},
     "geometry": {"type": "Polygon", "coordinates": [[[2.5, 49.5], [6.4, 49.5], [6.4, 51.5], [2.5, 51.5], [2.5, 49.5]]]}}
  ]
}"#;
        let path = dir.join("boundaries.geojson");
        std::fs::write(&path, geojson).unwrap();
        path
    }

    #[test]
    fn test_load_named_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_boundary_geojson(dir.path());

        let geometry = BoundaryReader::load_named(&path, "Luxembourg").unwrap();
        let env = geometry.envelope();
        assert!(env.MinX >= 5.6 && env.MaxX <= 6.6);
    }

    #[test]
    fn test_missing_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_boundary_geojson(dir.path());

        let err = BoundaryReader::load_named(&path, "Atlantis").unwrap_err();
        assert!(matches!(err, PipelineError::NoSuchBoundary(_)));
    }

    #[test]
    fn test_boundary_names_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_boundary_geojson(dir.path());

        let names = BoundaryReader::names(&path).unwrap();
        assert_eq!(names, vec!["Belgium", "Luxembourg"]);
    }
}
