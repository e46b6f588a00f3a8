//! I/O modules for the grid, catalog, boundary and band data sources

pub mod bands;
pub mod boundary;
pub mod catalog;
pub mod grid;
pub mod raster;

pub use bands::{BandFetcher, FetchOutcome, FetcherParams, SceneFailure};
pub use boundary::BoundaryReader;
pub use catalog::Catalog;
pub use grid::WrsGrid;
