//! Core processing stages: selection, masking, index computation, mosaicking

pub mod index;
pub mod mask;
pub mod mosaic;
pub mod select;

pub use index::IndexProcessor;
pub use mask::BoundaryMasker;
pub use mosaic::{CompositeImage, MosaicCompositor, MosaicParams};
pub use select::select_companions;
