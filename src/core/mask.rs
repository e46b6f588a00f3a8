use crate::io::raster;
use crate::types::{BandFile, GeoTransform, PipelineError, PipelineResult};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::Geometry;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Crops band rasters to an administrative boundary polygon.
///
/// The boundary lives in WGS84; each raster may sit in its own projected
/// CRS (Landsat scenes span UTM zones), so the polygon is reprojected per
/// file. The raster is cropped to the polygon envelope, pixels outside the
/// polygon are set to exactly 0, and the file is rewritten in place with
/// the reduced shape. Index computation later treats those zeros as
/// background, so cropping must run first.
pub struct BoundaryMasker {
    boundary: Geometry,
}

impl BoundaryMasker {
    /// Wrap an already-loaded WGS84 boundary polygon
    pub fn new(boundary: Geometry) -> Self {
        Self { boundary }
    }

    /// Look the named boundary up in the reference dataset
    pub fn from_dataset<P: AsRef<std::path::Path>>(
        boundary_path: P,
        boundary_name: &str,
    ) -> PipelineResult<Self> {
        let boundary = crate::io::boundary::BoundaryReader::load_named(boundary_path, boundary_name)?;
        Ok(Self::new(boundary))
    }

    /// Crop and rewrite every band file in place
    pub fn mask_to_boundary(&self, band_files: &[BandFile]) -> PipelineResult<()> {
        log::info!("Masking {} band file(s) to boundary", band_files.len());
        for band_file in band_files {
            self.mask_file(&band_file.local_path)?;
        }
        Ok(())
    }

    fn mask_file(&self, path: &Path) -> PipelineResult<()> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let gt = dataset.geo_transform()?;
        let projection_wkt = dataset.projection();
        let raster_srs = dataset.spatial_ref()?;

        let projected = self.project_boundary(&raster_srs)?;

        // Pixel window of the polygon envelope, clamped to the raster
        let env = projected.envelope();
        let min_col = ((env.MinX - gt[0]) / gt[1]).floor().max(0.0) as usize;
        let max_col = (((env.MaxX - gt[0]) / gt[1]).ceil() as usize).min(width);
        let min_row = ((env.MaxY - gt[3]) / gt[5]).floor().max(0.0) as usize;
        let max_row = (((env.MinY - gt[3]) / gt[5]).ceil() as usize).min(height);

        if min_col >= max_col || min_row >= max_row {
            return Err(PipelineError::Processing(format!(
                "boundary does not overlap raster {}",
                path.display()
            )));
        }

        let clip_width = max_col - min_col;
        let clip_height = max_row - min_row;
        log::debug!(
            "Cropping {} from {}x{} to {}x{}",
            path.display(),
            width,
            height,
            clip_width,
            clip_height
        );

        let rasterband = dataset.rasterband(1)?;
        let band_data = rasterband.read_as::<u16>(
            (min_col as isize, min_row as isize),
            (clip_width, clip_height),
            (clip_width, clip_height),
            None,
        )?;

        // Geotransform of the cropped window
        let cropped = GeoTransform {
            top_left_x: gt[0] + (min_col as f64) * gt[1],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3] + (min_row as f64) * gt[5],
            rotation_y: gt[4],
            pixel_height: gt[5],
        };

        let inside = rasterize_mask(&projected, &cropped, &raster_srs, clip_width, clip_height)?;

        let mut values = Array2::<u16>::zeros((clip_height, clip_width));
        for row in 0..clip_height {
            for col in 0..clip_width {
                if inside[[row, col]] {
                    values[[row, col]] = band_data.data[row * clip_width + col];
                }
            }
        }

        drop(dataset);

        // Rewrite through a sibling temp file so a failed write never
        // truncates the original
        let tmp_path = path.with_extension("TIF.tmp");
        raster::write_geotiff_u16(&tmp_path, &values, &cropped, &projection_wkt, Some(0.0))?;
        std::fs::rename(&tmp_path, path).map_err(PipelineError::Io)?;

        Ok(())
    }

    /// Reproject the WGS84 boundary into the raster's CRS
    fn project_boundary(&self, raster_srs: &SpatialRef) -> PipelineResult<Geometry> {
        let wgs84 = SpatialRef::from_epsg(4326)?;
        wgs84.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        raster_srs
            .set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

        let mut boundary = self.boundary.clone();
        boundary.set_spatial_ref(wgs84);
        let projected = boundary.transform_to(raster_srs)?;
        Ok(projected)
    }
}

/// Rasterize the polygon onto the cropped window grid: true inside
fn rasterize_mask(
    polygon: &Geometry,
    transform: &GeoTransform,
    srs: &SpatialRef,
    width: usize,
    height: usize,
) -> PipelineResult<Array2<bool>> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut mask_ds =
        driver.create_with_band_type::<u8, _>("", width as isize, height as isize, 1)?;
    mask_ds.set_geo_transform(&transform.to_gdal())?;
    mask_ds.set_spatial_ref(srs)?;

    gdal::raster::rasterize(
        &mut mask_ds,
        &[1],
        std::slice::from_ref(polygon),
        &[1.0],
        None,
    )?;

    let mask_band = mask_ds.rasterband(1)?;
    let mask_data = mask_band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;

    let mut inside = Array2::<bool>::from_elem((height, width), false);
    for row in 0..height {
        for col in 0..width {
            inside[[row, col]] = mask_data.data[row * width + col] != 0;
        }
    }
    Ok(inside)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Band;

    /// 10x10 raster of value 7 in a unit-degree WGS84 square
    fn write_test_band(path: &Path) {
        let values = Array2::<u16>::from_elem((10, 10), 7);
        let transform = GeoTransform {
            top_left_x: 0.0,
            pixel_width: 0.1,
            rotation_x: 0.0,
            top_left_y: 1.0,
            rotation_y: 0.0,
            pixel_height: -0.1,
        };
        let wkt = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        raster::write_geotiff_u16(path, &values, &transform, &wkt, Some(0.0)).unwrap();
    }

    #[test]
    fn test_mask_crops_and_zeroes_outside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band.tif");
        write_test_band(&path);

        // Lower-left quadrant triangle
        let boundary = Geometry::from_wkt(
            "POLYGON ((0.0 0.0, 0.5 0.0, 0.0 0.5, 0.0 0.0))",
        )
        .unwrap();

        let masker = BoundaryMasker::new(boundary);
        let band_files = vec![BandFile {
            scene_id: "scene".to_string(),
            band: Band::Red,
            local_path: path.clone(),
        }];
        masker.mask_to_boundary(&band_files).unwrap();

        let (matrix, info) = raster::read_band_widened(&path).unwrap();

        // Cropped to the envelope of the triangle (half the raster)
        assert!(info.width <= 6);
        assert!(info.height <= 6);

        // Some pixels survive, some are zeroed
        let kept = matrix.iter().filter(|&&v| v == 7).count();
        let zeroed = matrix.iter().filter(|&&v| v == 0).count();
        assert!(kept > 0);
        assert!(zeroed > 0);
    }

    #[test]
    fn test_disjoint_boundary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band.tif");
        write_test_band(&path);

        let boundary =
            Geometry::from_wkt("POLYGON ((50 50, 51 50, 51 51, 50 51, 50 50))").unwrap();

        let masker = BoundaryMasker::new(boundary);
        let band_files = vec![BandFile {
            scene_id: "scene".to_string(),
            band: Band::Red,
            local_path: path.clone(),
        }];
        let err = masker.mask_to_boundary(&band_files).unwrap_err();
        assert!(matches!(err, PipelineError::Processing(_)));
    }
}
