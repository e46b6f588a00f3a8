use crate::io::raster;
use crate::types::{
    Band, BandFile, IndexRaster, Indicator, PipelineError, PipelineResult,
};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One pixel's widened band samples; bands an indicator does not use stay 0
#[derive(Debug, Clone, Copy, Default)]
struct PixelSamples {
    red: i64,
    nir: i64,
    swir1: i64,
    swir2: i64,
}

/// Computes one spectral indicator per scene from its cropped band files.
///
/// Numeric rules: samples are widened to i64 before any arithmetic, a zero
/// denominator yields 0 instead of a division trap, negative ratios clamp
/// to 0, and pixels whose anchor band is exactly 0 become NaN no-data so
/// the cropped background stays transparent.
pub struct IndexProcessor {
    indicator: Indicator,
}

impl IndexProcessor {
    pub fn new(indicator: Indicator) -> Self {
        Self { indicator }
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    /// Compute the indicator raster for one scene.
    ///
    /// Band files belonging to other scenes are ignored; a required band
    /// missing from the scene's set is a per-scene failure.
    pub fn compute_scene(
        &self,
        scene_id: &str,
        band_files: &[BandFile],
    ) -> PipelineResult<IndexRaster> {
        log::info!("Computing {} for scene {}", self.indicator, scene_id);

        let mut matrices: HashMap<Band, Array2<i64>> = HashMap::new();
        let mut anchor_info: Option<raster::RasterInfo> = None;
        let mut first_info: Option<raster::RasterInfo> = None;

        for &band in self.indicator.required_bands() {
            let band_file = band_files
                .iter()
                .find(|f| f.scene_id == scene_id && f.band == band)
                .ok_or(PipelineError::MissingBand {
                    scene_id: scene_id.to_string(),
                    band,
                })?;

            let (matrix, info) = raster::read_band_widened(&band_file.local_path)?;

            match &first_info {
                Some(first) if first.width != info.width || first.height != info.height => {
                    return Err(PipelineError::InvalidFormat(format!(
                        "band {} of scene {} is {}x{}, expected {}x{}",
                        band, scene_id, info.width, info.height, first.width, first.height
                    )));
                }
                Some(_) => {}
                None => first_info = Some(info.clone()),
            }

            if band == self.indicator.anchor_band() {
                anchor_info = Some(info);
            }
            matrices.insert(band, matrix);
        }

        // The output inherits the anchor band's georeferencing
        let info = anchor_info.or(first_info).ok_or_else(|| {
            PipelineError::Processing("indicator requires at least one band".to_string())
        })?;

        let values = evaluate(self.indicator, &matrices, info.height, info.width);

        let valid = values.iter().filter(|v| v.is_finite()).count();
        log::info!(
            "{} for {}: {}x{}, {} valid pixel(s)",
            self.indicator,
            scene_id,
            info.width,
            info.height,
            valid
        );

        Ok(IndexRaster {
            projection_wkt: info.projection_wkt,
            transform: info.transform,
            values,
        })
    }

    /// Write a scene's index raster into `dir` under a deterministic name
    pub fn write_scene_raster(
        &self,
        scene_id: &str,
        index_raster: &IndexRaster,
        dir: &Path,
    ) -> PipelineResult<PathBuf> {
        let path = dir.join(format!("{}_{}.tif", scene_id, self.indicator));
        raster::write_geotiff_f32(
            &path,
            &index_raster.values,
            &index_raster.transform,
            &index_raster.projection_wkt,
            Some(f64::NAN),
        )?;
        Ok(path)
    }
}

/// Apply the indicator formula over the widened band matrices
fn evaluate(
    indicator: Indicator,
    matrices: &HashMap<Band, Array2<i64>>,
    height: usize,
    width: usize,
) -> Array2<f32> {
    let sample = |band: Band, row: usize, col: usize| -> i64 {
        matrices.get(&band).map(|m| m[[row, col]]).unwrap_or(0)
    };

    let mut values = Array2::<f32>::zeros((height, width));
    for row in 0..height {
        for col in 0..width {
            let samples = PixelSamples {
                red: sample(Band::Red, row, col),
                nir: sample(Band::Nir, row, col),
                swir1: sample(Band::Swir1, row, col),
                swir2: sample(Band::Swir2, row, col),
            };

            let anchor = match indicator.anchor_band() {
                Band::Red => samples.red,
                Band::Nir => samples.nir,
                Band::Swir1 => samples.swir1,
                Band::Swir2 => samples.swir2,
            };

            values[[row, col]] = if anchor == 0 {
                f32::NAN
            } else {
                pixel_value(indicator, samples)
            };
        }
    }
    values
}

/// Ratio for one pixel: 0 on a zero denominator, negatives clamped to 0
fn pixel_value(indicator: Indicator, s: PixelSamples) -> f32 {
    let (numerator, denominator) = match indicator {
        Indicator::Ndvi => (s.nir - s.red, s.nir + s.red),
        Indicator::Ndwi => (s.nir - s.swir1, s.nir + s.swir1),
        Indicator::Ndsi => (s.swir1 - s.nir, s.swir1 + s.nir),
        Indicator::Slavi => (s.nir, s.swir1 + s.red),
        Indicator::Ndre => (s.nir - s.swir2, s.swir2 + s.nir),
    };

    let ratio = if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    };

    ratio.max(0.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;

    fn samples(red: i64, nir: i64, swir1: i64, swir2: i64) -> PixelSamples {
        PixelSamples {
            red,
            nir,
            swir1,
            swir2,
        }
    }

    #[test]
    fn test_zero_denominator_yields_zero() {
        // Both bands zero: ratio defined as 0 before any masking
        let v = pixel_value(Indicator::Ndvi, samples(0, 0, 0, 0));
        assert_eq!(v, 0.0);
        assert!(!v.is_nan());
    }

    #[test]
    fn test_negative_ratio_clamps_to_zero() {
        // NIR below RED drives NDVI negative
        let v = pixel_value(Indicator::Ndvi, samples(10, 0, 0, 0));
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_ratio_bounds() {
        // Normalized differences stay within [0, 1] after clamping
        for (red, nir) in [(1, 65535), (65535, 1), (100, 100), (0, 5), (5, 0)] {
            let v = pixel_value(Indicator::Ndvi, samples(red, nir, 0, 0));
            assert!((0.0..=1.0).contains(&v), "NDVI {} out of bounds", v);
        }
    }

    #[test]
    fn test_formula_table() {
        assert_relative_eq!(
            pixel_value(Indicator::Ndvi, samples(10, 30, 0, 0)),
            0.5,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            pixel_value(Indicator::Ndwi, samples(0, 30, 10, 0)),
            0.5,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            pixel_value(Indicator::Ndsi, samples(0, 10, 30, 0)),
            0.5,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            pixel_value(Indicator::Slavi, samples(10, 30, 50, 0)),
            0.5,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            pixel_value(Indicator::Ndre, samples(0, 30, 0, 10)),
            0.5,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_evaluate_masks_anchor_zero() {
        // RED = [[0, 10], [10, 10]], NIR = [[0, 20], [0, 20]]
        let red = Array2::from_shape_vec((2, 2), vec![0i64, 10, 10, 10]).unwrap();
        let nir = Array2::from_shape_vec((2, 2), vec![0i64, 20, 0, 20]).unwrap();
        let mut matrices = HashMap::new();
        matrices.insert(Band::Red, red);
        matrices.insert(Band::Nir, nir);

        let values = evaluate(Indicator::Ndvi, &matrices, 2, 2);

        // anchor RED=0: no-data
        assert!(values[[0, 0]].is_nan());
        // (20-10)/(20+10)
        assert_relative_eq!(values[[0, 1]], 1.0 / 3.0, epsilon = 1e-6);
        // NIR=0, RED=10: negative ratio clamped, anchor nonzero so kept
        assert_eq!(values[[1, 0]], 0.0);
        assert_relative_eq!(values[[1, 1]], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_compute_scene_missing_band() {
        let processor = IndexProcessor::new(Indicator::Ndvi);
        let err = processor.compute_scene("scene", &[]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingBand {
                band: Band::Red,
                ..
            }
        ));
    }

    #[test]
    fn test_compute_scene_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let transform = GeoTransform {
            top_left_x: 0.0,
            pixel_width: 0.1,
            rotation_x: 0.0,
            top_left_y: 1.0,
            rotation_y: 0.0,
            pixel_height: -0.1,
        };

        let red = Array2::from_shape_vec((2, 2), vec![0u16, 10, 10, 10]).unwrap();
        let nir = Array2::from_shape_vec((2, 2), vec![0u16, 20, 0, 20]).unwrap();

        let red_path = dir.path().join("scene_B4.TIF");
        let nir_path = dir.path().join("scene_B5.TIF");
        raster::write_geotiff_u16(&red_path, &red, &transform, "", Some(0.0)).unwrap();
        raster::write_geotiff_u16(&nir_path, &nir, &transform, "", Some(0.0)).unwrap();

        let band_files = vec![
            BandFile {
                scene_id: "scene".to_string(),
                band: Band::Red,
                local_path: red_path,
            },
            BandFile {
                scene_id: "scene".to_string(),
                band: Band::Nir,
                local_path: nir_path,
            },
        ];

        let processor = IndexProcessor::new(Indicator::Ndvi);
        let index_raster = processor.compute_scene("scene", &band_files).unwrap();

        assert_eq!(index_raster.width(), 2);
        assert_eq!(index_raster.height(), 2);
        assert!(index_raster.values[[0, 0]].is_nan());
        assert_relative_eq!(index_raster.values[[0, 1]], 1.0 / 3.0, epsilon = 1e-6);
        assert_eq!(index_raster.values[[1, 0]], 0.0);

        let out = processor
            .write_scene_raster("scene", &index_raster, dir.path())
            .unwrap();
        assert!(out.ends_with("scene_NDVI.tif"));
        assert!(out.exists());
    }
}
