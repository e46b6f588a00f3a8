use crate::core::index::IndexProcessor;
use crate::core::mask::BoundaryMasker;
use crate::core::mosaic::{CompositeImage, MosaicCompositor, MosaicParams};
use crate::core::select::select_companions;
use crate::io::bands::{BandFetcher, FetcherParams, SceneFailure};
use crate::io::boundary::BoundaryReader;
use crate::io::catalog::{self, Catalog};
use crate::io::grid::{WrsGrid, WRS2_GRID_URL};
use crate::types::{
    DateRange, GridMode, Indicator, PipelineError, PipelineResult, Point, SceneCandidateSet,
    SelectedSceneSet,
};
use std::path::{Path, PathBuf};

/// Pipeline configuration: data sources, scratch/output locations, and the
/// per-stage parameter blocks
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Local grid dataset; when absent the grid is fetched and cached
    pub grid_path: Option<PathBuf>,
    pub grid_url: String,
    pub grid_mode: GridMode,
    pub catalog_path: PathBuf,
    pub boundary_path: PathBuf,
    /// Base directory for per-run scratch arenas
    pub scratch_base: PathBuf,
    /// Directory for artifacts that outlive the run
    pub output_dir: PathBuf,
    pub fetcher: FetcherParams,
    pub mosaic: MosaicParams,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(
        catalog_path: P,
        boundary_path: P,
        scratch_base: P,
        output_dir: P,
    ) -> Self {
        Self {
            grid_path: None,
            grid_url: WRS2_GRID_URL.to_string(),
            grid_mode: GridMode::Descending,
            catalog_path: catalog_path.into(),
            boundary_path: boundary_path.into(),
            scratch_base: scratch_base.into(),
            output_dir: output_dir.into(),
            fetcher: FetcherParams::default(),
            mosaic: MosaicParams::default(),
        }
    }
}

/// Per-run working directory, keyed by run id.
///
/// Band and staging files live only here; the directory is removed when the
/// arena drops, on success and on failure alike, so concurrent runs never
/// share working state.
pub struct ScratchArena {
    run_id: String,
    dir: tempfile::TempDir,
}

impl ScratchArena {
    pub fn create(base: &Path, run_id: &str) -> PipelineResult<Self> {
        std::fs::create_dir_all(base).map_err(PipelineError::Io)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("run-{}-", run_id))
            .tempdir_in(base)
            .map_err(PipelineError::Io)?;
        log::info!("Scratch arena for run {}: {}", run_id, dir.path().display());
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Everything a finished run hands back to the caller
#[derive(Debug)]
pub struct PipelineOutput {
    pub composite: CompositeImage,
    pub composite_path: PathBuf,
    pub image_path: PathBuf,
    /// Per-scene index rasters, deterministically named
    pub index_paths: Vec<PathBuf>,
    /// Scenes dropped along the way, with the reason each was dropped
    pub skipped_scenes: Vec<SceneFailure>,
}

/// One pipeline invocation, owned by the caller.
///
/// The session carries the candidate and selection state across the
/// list-then-select interaction instead of a hidden shared store; the two
/// staging CSVs it writes into the scratch arena are the only hand-off
/// artifacts. Stages run strictly in order: resolve, match, select, fetch,
/// mask, index, compose.
pub struct PipelineSession {
    config: PipelineConfig,
    scratch: ScratchArena,
    grid: WrsGrid,
    candidates: Option<SceneCandidateSet>,
    selection: Option<SelectedSceneSet>,
}

impl PipelineSession {
    /// Load static reference data and set up the scratch arena
    pub fn open(config: PipelineConfig, run_id: &str) -> PipelineResult<Self> {
        let grid = match &config.grid_path {
            Some(path) => WrsGrid::from_path(path, config.grid_mode)?,
            None => WrsGrid::fetch_or_cached(&config.grid_url, config.grid_mode)?,
        };
        let scratch = ScratchArena::create(&config.scratch_base, run_id)?;
        std::fs::create_dir_all(&config.output_dir).map_err(PipelineError::Io)?;

        Ok(Self {
            config,
            scratch,
            grid,
            candidates: None,
            selection: None,
        })
    }

    pub fn scratch(&self) -> &ScratchArena {
        &self.scratch
    }

    pub fn grid(&self) -> &WrsGrid {
        &self.grid
    }

    pub fn candidates(&self) -> Option<&SceneCandidateSet> {
        self.candidates.as_ref()
    }

    pub fn selection(&self) -> Option<&SelectedSceneSet> {
        self.selection.as_ref()
    }

    /// Path of the staged candidate list
    pub fn candidates_path(&self) -> PathBuf {
        self.scratch.path().join("candidates.csv")
    }

    /// Path of the staged selection
    pub fn selection_path(&self) -> PathBuf {
        self.scratch.path().join("selection.csv")
    }

    /// Resolve the point, scan the catalog and stage the candidate list.
    ///
    /// An empty candidate set is a valid outcome here; `run` turns it into
    /// a terminal result.
    pub fn match_scenes(
        &mut self,
        point: Point,
        date_range: Option<&DateRange>,
    ) -> PipelineResult<&SceneCandidateSet> {
        let cells = self.grid.resolve_cells(point)?;
        let catalog = Catalog::load(&self.config.catalog_path)?;
        let set = catalog.match_scenes(&cells, date_range);
        catalog::write_candidates_csv(&set, self.candidates_path())?;
        Ok(self.candidates.insert(set))
    }

    /// Build and stage the selected scene set around the chosen product
    pub fn select_scene(&mut self, product_id: &str) -> PipelineResult<&SelectedSceneSet> {
        let candidates = self.candidates.as_ref().ok_or_else(|| {
            PipelineError::Processing("no candidate set staged for this run".to_string())
        })?;
        let selected = select_companions(candidates, product_id)?;
        catalog::write_selection_csv(&selected, self.selection_path())?;
        Ok(self.selection.insert(selected))
    }

    /// Retrieve, mask, compute and composite the selected scene set.
    ///
    /// Per-scene failures (unreachable listing, missing band) drop that
    /// scene and are reported in the output; query-level failures abort.
    pub fn process(
        &self,
        indicator: Indicator,
        boundary_name: &str,
    ) -> PipelineResult<PipelineOutput> {
        let selection = self.selection.as_ref().ok_or_else(|| {
            PipelineError::Processing("no scene selection staged for this run".to_string())
        })?;

        let boundary = BoundaryReader::load_named(&self.config.boundary_path, boundary_name)?;

        let bands_dir = self.scratch.path().join("bands");
        std::fs::create_dir_all(&bands_dir).map_err(PipelineError::Io)?;

        let fetcher = BandFetcher::new(self.config.fetcher.clone())?;
        let outcome = fetcher.fetch_bands(selection, indicator.required_bands(), &bands_dir);

        let masker = BoundaryMasker::new(boundary.clone());
        masker.mask_to_boundary(&outcome.bands)?;

        let processor = IndexProcessor::new(indicator);
        let mut skipped = outcome.failures.clone();
        let mut index_rasters = Vec::new();
        let mut index_paths = Vec::new();

        for scene in selection.iter() {
            let scene_id = &scene.record.product_id;
            if skipped.iter().any(|f| &f.scene_id == scene_id) {
                continue;
            }
            match processor.compute_scene(scene_id, &outcome.bands) {
                Ok(index_raster) => {
                    let path = processor.write_scene_raster(
                        scene_id,
                        &index_raster,
                        &self.config.output_dir,
                    )?;
                    index_rasters.push(index_raster);
                    index_paths.push(path);
                }
                Err(e) => {
                    log::warn!("Skipping scene {}: {}", scene_id, e);
                    skipped.push(SceneFailure {
                        scene_id: scene_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let compositor = MosaicCompositor::new(self.config.mosaic.clone());
        let composite = compositor.compose(&index_rasters, &boundary)?;

        let composite_path = self.config.output_dir.join(format!(
            "{}_{}_composite.tif",
            self.scratch.run_id(),
            indicator
        ));
        let image_path = self.config.output_dir.join(format!(
            "{}_{}_composite.png",
            self.scratch.run_id(),
            indicator
        ));
        composite.write_geotiff(&composite_path)?;
        composite.render_png(&image_path)?;

        Ok(PipelineOutput {
            composite,
            composite_path,
            image_path,
            index_paths,
            skipped_scenes: skipped,
        })
    }

    /// Full run for one query. Without an explicit product choice the
    /// least-cloudy candidate is taken.
    pub fn run(
        &mut self,
        point: Point,
        date_range: Option<&DateRange>,
        chosen_product: Option<&str>,
        indicator: Indicator,
        boundary_name: &str,
    ) -> PipelineResult<PipelineOutput> {
        self.match_scenes(point, date_range)?;

        let product_id = {
            let candidates = self
                .candidates
                .as_ref()
                .ok_or(PipelineError::EmptyMatch)?;
            if candidates.is_empty() {
                return Err(PipelineError::EmptyMatch);
            }
            match chosen_product {
                Some(id) => id.to_string(),
                None => candidates
                    .least_cloudy()
                    .map(str::to_string)
                    .ok_or(PipelineError::EmptyMatch)?,
            }
        };

        self.select_scene(&product_id)?;
        self.process(indicator, boundary_name)
    }
}
