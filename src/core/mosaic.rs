use crate::io::raster;
use crate::types::{BoundingBox, GeoTransform, IndexRaster, PipelineError, PipelineResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::Geometry;
use gdal::DriverManager;
use ndarray::Array2;
use std::path::Path;

/// Compositing parameters
#[derive(Debug, Clone)]
pub struct MosaicParams {
    /// Destination grid resolution in degrees, roughly a Landsat pixel
    pub resolution: f64,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self { resolution: 0.00025 }
    }
}

/// The stitched output: per-scene index rasters resampled onto one WGS84
/// grid, plus the boundary outline burned over them
#[derive(Debug, Clone)]
pub struct CompositeImage {
    pub transform: GeoTransform,
    pub projection_wkt: String,
    pub values: Array2<f32>,
    pub outline: Array2<bool>,
}

impl CompositeImage {
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    /// Write the composite values as a float GeoTIFF (no-data NaN)
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        raster::write_geotiff_f32(
            path,
            &self.values,
            &self.transform,
            &self.projection_wkt,
            Some(f64::NAN),
        )
    }

    /// Render an RGBA PNG: white-to-green ramp over the index values,
    /// no-data fully transparent, outline pixels opaque black
    pub fn render_png<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let (height, width) = self.values.dim();
        let mut red = vec![0u8; width * height];
        let mut green = vec![0u8; width * height];
        let mut blue = vec![0u8; width * height];
        let mut alpha = vec![0u8; width * height];

        for row in 0..height {
            for col in 0..width {
                let i = row * width + col;
                if self.outline[[row, col]] {
                    alpha[i] = 255;
                    continue;
                }
                let v = self.values[[row, col]];
                if !v.is_finite() {
                    continue;
                }
                let v = v.clamp(0.0, 1.0);
                red[i] = (255.0 * (1.0 - v)) as u8;
                green[i] = 255;
                blue[i] = (255.0 * (1.0 - v)) as u8;
                alpha[i] = 255;
            }
        }

        let mem_driver = DriverManager::get_driver_by_name("MEM")?;
        let mut mem_ds =
            mem_driver.create_with_band_type::<u8, _>("", width as isize, height as isize, 4)?;

        for (band_index, data) in [&red, &green, &blue, &alpha].into_iter().enumerate() {
            let mut rasterband = mem_ds.rasterband(band_index as isize + 1)?;
            let buffer = gdal::raster::Buffer::new((width, height), data.clone());
            rasterband.write((0, 0), (width, height), &buffer)?;
        }

        let png_driver = DriverManager::get_driver_by_name("PNG")?;
        let options: &[gdal::raster::RasterCreationOption] = &[];
        mem_ds.create_copy(&png_driver, path.as_ref(), options)?;

        log::info!(
            "Rendered {}x{} composite image to {}",
            width,
            height,
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Stitches per-scene index rasters onto one shared WGS84 grid.
///
/// Sources may sit in different UTM zones; each destination pixel center is
/// projected into every source CRS and sampled nearest-neighbor. Earlier
/// rasters win overlaps, so the selector's chosen-first ordering keeps the
/// anchor scene on top. Exact-zero source pixels are background and stay
/// transparent.
pub struct MosaicCompositor {
    params: MosaicParams,
}

impl MosaicCompositor {
    pub fn new(params: MosaicParams) -> Self {
        Self { params }
    }

    /// Create a compositor with standard parameters
    pub fn standard() -> Self {
        Self::new(MosaicParams::default())
    }

    pub fn compose(
        &self,
        rasters: &[IndexRaster],
        boundary: &Geometry,
    ) -> PipelineResult<CompositeImage> {
        if rasters.is_empty() {
            return Err(PipelineError::EmptySet);
        }

        let wgs84 = SpatialRef::from_epsg(4326)?;
        wgs84.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

        // Union of all source extents in the reference CRS
        let mut bbox: Option<BoundingBox> = None;
        for index_raster in rasters {
            let extent = raster_extent_wgs84(index_raster, &wgs84)?;
            bbox = Some(match bbox {
                Some(b) => b.union(&extent),
                None => extent,
            });
        }
        let bbox = bbox.ok_or(PipelineError::EmptySet)?;

        let res = self.params.resolution;
        let width = (((bbox.max_lon - bbox.min_lon) / res).ceil() as usize).max(1);
        let height = (((bbox.max_lat - bbox.min_lat) / res).ceil() as usize).max(1);
        let transform = GeoTransform {
            top_left_x: bbox.min_lon,
            pixel_width: res,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -res,
        };

        log::info!(
            "Compositing {} raster(s) onto a {}x{} grid at {} deg",
            rasters.len(),
            width,
            height,
            res
        );

        let mut values = Array2::<f32>::from_elem((height, width), f32::NAN);

        for index_raster in rasters {
            let src_srs = SpatialRef::from_wkt(&index_raster.projection_wkt)?;
            src_srs.set_axis_mapping_strategy(
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            );
            let to_src = CoordTransform::new(&wgs84, &src_srs)?;

            resample_into(&mut values, &transform, index_raster, &to_src)?;
        }

        let outline = burn_outline(boundary, &transform, width, height);

        Ok(CompositeImage {
            transform,
            projection_wkt: wgs84.to_wkt()?,
            values,
            outline,
        })
    }
}

/// Extent of a source raster projected into WGS84
fn raster_extent_wgs84(
    index_raster: &IndexRaster,
    wgs84: &SpatialRef,
) -> PipelineResult<BoundingBox> {
    let src_srs = SpatialRef::from_wkt(&index_raster.projection_wkt)?;
    src_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    let to_wgs84 = CoordTransform::new(&src_srs, wgs84)?;

    let t = &index_raster.transform;
    let right = t.top_left_x + index_raster.width() as f64 * t.pixel_width;
    let bottom = t.top_left_y + index_raster.height() as f64 * t.pixel_height;

    let mut xs = [t.top_left_x, right, t.top_left_x, right];
    let mut ys = [t.top_left_y, t.top_left_y, bottom, bottom];
    let mut zs = [0.0; 4];
    to_wgs84.transform_coords(&mut xs, &mut ys, &mut zs)?;

    Ok(BoundingBox {
        min_lon: xs.iter().cloned().fold(f64::INFINITY, f64::min),
        max_lon: xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        min_lat: ys.iter().cloned().fold(f64::INFINITY, f64::min),
        max_lat: ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Nearest-neighbor sample one source raster into the destination grid.
/// Already-set destination pixels are left alone.
fn resample_into(
    values: &mut Array2<f32>,
    dest_transform: &GeoTransform,
    index_raster: &IndexRaster,
    to_src: &CoordTransform,
) -> PipelineResult<()> {
    let (height, width) = values.dim();
    let src = &index_raster.transform;
    let src_width = index_raster.width();
    let src_height = index_raster.height();

    for row in 0..height {
        // Project one destination row of pixel centers at a time
        let mut xs: Vec<f64> = (0..width)
            .map(|col| dest_transform.pixel_center(col, row).0)
            .collect();
        let mut ys: Vec<f64> = vec![dest_transform.pixel_center(0, row).1; width];
        let mut zs: Vec<f64> = vec![0.0; width];
        to_src.transform_coords(&mut xs, &mut ys, &mut zs)?;

        for col in 0..width {
            if values[[row, col]].is_finite() {
                continue;
            }

            let src_col = (xs[col] - src.top_left_x) / src.pixel_width;
            let src_row = (ys[col] - src.top_left_y) / src.pixel_height;
            if src_col < 0.0 || src_row < 0.0 {
                continue;
            }
            let (src_col, src_row) = (src_col as usize, src_row as usize);
            if src_col >= src_width || src_row >= src_height {
                continue;
            }

            let v = index_raster.values[[src_row, src_col]];
            // Exact zeros are cropped background, kept transparent
            if v.is_finite() && v != 0.0 {
                values[[row, col]] = v;
            }
        }
    }
    Ok(())
}

/// Mark destination pixels under the boundary's exterior rings
fn burn_outline(
    boundary: &Geometry,
    transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Array2<bool> {
    let mut outline = Array2::<bool>::from_elem((height, width), false);
    let step = transform.pixel_width.abs() / 2.0;

    for ring in exterior_rings(boundary) {
        for segment in ring.windows(2) {
            let (x0, y0) = segment[0];
            let (x1, y1) = segment[1];
            let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            let samples = ((length / step).ceil() as usize).max(1);

            for i in 0..=samples {
                let t = i as f64 / samples as f64;
                let x = x0 + t * (x1 - x0);
                let y = y0 + t * (y1 - y0);
                let col = (x - transform.top_left_x) / transform.pixel_width;
                let row = (y - transform.top_left_y) / transform.pixel_height;
                if col < 0.0 || row < 0.0 {
                    continue;
                }
                let (col, row) = (col as usize, row as usize);
                if col < width && row < height {
                    outline[[row, col]] = true;
                }
            }
        }
    }
    outline
}

/// Exterior ring vertices of a polygon or multipolygon
fn exterior_rings(geometry: &Geometry) -> Vec<Vec<(f64, f64)>> {
    let mut rings = Vec::new();
    for i in 0..geometry.geometry_count() {
        let part = unsafe { geometry.get_unowned_geometry(i) };
        if part.geometry_count() > 0 {
            // Polygon inside a multipolygon: first sub-geometry is the
            // exterior ring
            let ring = unsafe { part.get_unowned_geometry(0) };
            rings.push(ring_points(&ring));
        } else {
            rings.push(ring_points(&part));
        }
    }
    rings
}

fn ring_points(ring: &Geometry) -> Vec<(f64, f64)> {
    ring.get_point_vec()
        .into_iter()
        .map(|(x, y, _z)| (x, y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wgs84_wkt() -> String {
        SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap()
    }

    fn unit_raster(top_left_x: f64, fill: f32) -> IndexRaster {
        IndexRaster {
            projection_wkt: wgs84_wkt(),
            transform: GeoTransform {
                top_left_x,
                pixel_width: 0.1,
                rotation_x: 0.0,
                top_left_y: 1.0,
                rotation_y: 0.0,
                pixel_height: -0.1,
            },
            values: Array2::from_elem((10, 10), fill),
        }
    }

    fn square_boundary() -> Geometry {
        Geometry::from_wkt("POLYGON ((0 0, 2 0, 2 1, 0 1, 0 0))").unwrap()
    }

    #[test]
    fn test_empty_set() {
        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let err = compositor.compose(&[], &square_boundary()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptySet));
    }

    #[test]
    fn test_union_grid_and_placement() {
        // Two adjacent unit tiles: [0,1] and [1,2] in longitude
        let rasters = vec![unit_raster(0.0, 0.25), unit_raster(1.0, 0.75)];
        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let composite = compositor.compose(&rasters, &square_boundary()).unwrap();

        assert_eq!(composite.width(), 20);
        assert_eq!(composite.height(), 10);

        // Left half from the first raster, right half from the second
        assert_eq!(composite.values[[5, 2]], 0.25);
        assert_eq!(composite.values[[5, 17]], 0.75);
    }

    #[test]
    fn test_overlap_first_raster_wins() {
        let rasters = vec![unit_raster(0.0, 0.25), unit_raster(0.0, 0.75)];
        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let composite = compositor.compose(&rasters, &square_boundary()).unwrap();

        assert_eq!(composite.values[[5, 5]], 0.25);
    }

    #[test]
    fn test_zero_and_nan_stay_transparent() {
        let mut tile = unit_raster(0.0, 0.5);
        tile.values[[0, 0]] = 0.0;
        tile.values[[0, 1]] = f32::NAN;

        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let composite = compositor.compose(&[tile], &square_boundary()).unwrap();

        assert!(composite.values[[0, 0]].is_nan());
        assert!(composite.values[[0, 1]].is_nan());
        assert_eq!(composite.values[[5, 5]], 0.5);
    }

    #[test]
    fn test_outline_burned() {
        let rasters = vec![unit_raster(0.0, 0.5)];
        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let composite = compositor.compose(&rasters, &square_boundary()).unwrap();

        let burned = composite.outline.iter().filter(|&&b| b).count();
        assert!(burned > 0);
    }

    #[test]
    fn test_artifact_writing() {
        let rasters = vec![unit_raster(0.0, 0.5)];
        let compositor = MosaicCompositor::new(MosaicParams { resolution: 0.1 });
        let composite = compositor.compose(&rasters, &square_boundary()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let tif = dir.path().join("composite.tif");
        let png = dir.path().join("composite.png");
        composite.write_geotiff(&tif).unwrap();
        composite.render_png(&png).unwrap();
        assert!(tif.exists());
        assert!(png.exists());
    }
}
