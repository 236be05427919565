//! The datasource, its layers and features, and the geometry blob codec.

mod catalog;
mod feature;
pub(crate) mod geometry;
mod gpkg;
mod layer;

pub use catalog::CatalogEntry;
pub use feature::GpkgFeature;
pub use geometry::{GeometryHeader, decode, decode_header, encode};
pub use gpkg::Gpkg;
pub use layer::{GpkgFeatureIterator, GpkgLayer};
