//! landscan: A Fast, Modular Landsat-8 Spectral Index Pipeline
//!
//! This library resolves a geographic point to WRS-2 grid cells, matches and
//! ranks the Landsat scene catalog against them, selects a temporally
//! coherent multi-cell scene set, retrieves band rasters, crops them to an
//! administrative boundary, computes normalized-difference spectral indices
//! and composites the results into one mosaic.

pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandFile, BoundingBox, CandidateScene, DateRange, GeoTransform, GridCell, GridMode,
    IndexRaster, Indicator, PipelineError, PipelineResult, Point, SceneCandidateSet, SceneRecord,
    SelectedSceneSet,
};

pub use crate::core::{
    select_companions, BoundaryMasker, CompositeImage, IndexProcessor, MosaicCompositor,
};
pub use crate::io::{BandFetcher, BoundaryReader, Catalog, WrsGrid};
pub use crate::pipeline::{PipelineConfig, PipelineOutput, PipelineSession, ScratchArena};
