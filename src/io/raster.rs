use crate::types::{GeoTransform, PipelineError, PipelineResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::ToPrimitive;
use std::path::Path;

/// Georeferencing read alongside a band matrix
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub projection_wkt: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

/// Read band 1 of a raster, promoting every sample to i64.
///
/// Landsat band files carry unsigned 16-bit samples; widening before any
/// arithmetic keeps differences and sums of large samples exact.
pub fn read_band_widened<P: AsRef<Path>>(path: P) -> PipelineResult<(Array2<i64>, RasterInfo)> {
    let (matrix, info) = read_band_matrix::<u16, _>(path)?;
    Ok((matrix, info))
}

/// Read band 1 of a raster as i64 through an intermediate sample type
pub fn read_band_matrix<T, P>(path: P) -> PipelineResult<(Array2<i64>, RasterInfo)>
where
    T: GdalType + Copy + ToPrimitive,
    P: AsRef<Path>,
{
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let geo_transform = dataset.geo_transform()?;
    let projection_wkt = dataset.projection();

    let rasterband = dataset.rasterband(1)?;
    let band_data = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;

    let mut samples = Vec::with_capacity(band_data.data.len());
    for value in &band_data.data {
        let widened = value.to_i64().ok_or_else(|| {
            PipelineError::InvalidFormat(format!(
                "band sample not representable as integer in {}",
                path.as_ref().display()
            ))
        })?;
        samples.push(widened);
    }

    let matrix = Array2::from_shape_vec((height, width), samples)
        .map_err(|e| PipelineError::Processing(format!("Failed to reshape band data: {}", e)))?;

    Ok((
        matrix,
        RasterInfo {
            projection_wkt,
            transform: GeoTransform::from_gdal(&geo_transform),
            width,
            height,
        },
    ))
}

/// Write a single-band f32 GeoTIFF with the given georeferencing
pub fn write_geotiff_f32<P: AsRef<Path>>(
    path: P,
    values: &Array2<f32>,
    transform: &GeoTransform,
    projection_wkt: &str,
    no_data: Option<f64>,
) -> PipelineResult<()> {
    let (height, width) = values.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut dataset =
        driver.create_with_band_type::<f32, _>(path.as_ref(), width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    if !projection_wkt.is_empty() {
        dataset.set_projection(projection_wkt)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<f32> = values.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if let Some(nodata) = no_data {
        rasterband.set_no_data_value(Some(nodata))?;
    }

    log::debug!(
        "Wrote {}x{} f32 GeoTIFF to {}",
        width,
        height,
        path.as_ref().display()
    );
    Ok(())
}

/// Write a single-band u16 GeoTIFF with the given georeferencing
pub fn write_geotiff_u16<P: AsRef<Path>>(
    path: P,
    values: &Array2<u16>,
    transform: &GeoTransform,
    projection_wkt: &str,
    no_data: Option<f64>,
) -> PipelineResult<()> {
    let (height, width) = values.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut dataset =
        driver.create_with_band_type::<u16, _>(path.as_ref(), width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    if !projection_wkt.is_empty() {
        dataset.set_projection(projection_wkt)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u16> = values.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if let Some(nodata) = no_data {
        rasterband.set_no_data_value(Some(nodata))?;
    }

    log::debug!(
        "Wrote {}x{} u16 GeoTIFF to {}",
        width,
        height,
        path.as_ref().display()
    );
    Ok(())
}
