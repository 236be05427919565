//! GeoPackage vector datasource built on top of rusqlite.
//!
//! ## Overview
//!
//! - `Gpkg` is a datasource: one GeoPackage file (or an in-memory database)
//!   and its ordered list of feature layers.
//! - `GpkgLayer` is a feature table registered in the catalog.
//! - `GpkgFeature` is a single row: an id, an optional geometry and values.
//! - `Value` is a single property value.
//!
//! `Gpkg` is the entry point:
//!
//! - `Gpkg::create(path, &options)`: create a new file.
//! - `Gpkg::open(path, &options)`: open an existing file; layers are loaded
//!   from the catalog in the order they were created.
//! - `Gpkg::open_read_only(path)`: open without write access.
//! - `Gpkg::create_in_memory()`: a transient in-memory GeoPackage.
//!
//! Geometries are `geo_types::Geometry<f64>`. They are stored as GeoPackage
//! geometry blobs; see [`encode`] and [`decode`] for the codec.
//!
//! ## Writer
//!
//! ```no_run
//! use geo_types::Point;
//! use gpkg_store::{
//!     ColumnSpec, ColumnType, GeometryType, Gpkg, GpkgFeature, GpkgOptions, LayerOptions,
//! };
//!
//! let mut gpkg = Gpkg::create("data/cities.gpkg", &GpkgOptions::default())?;
//! let layer = gpkg.create_layer(
//!     "cities",
//!     GeometryType::Point,
//!     Some(4326),
//!     &LayerOptions::default()
//!         .column(ColumnSpec::new("name", ColumnType::String))
//!         .column(ColumnSpec::new("population", ColumnType::Integer)),
//! )?;
//!
//! let mut feature = GpkgFeature::new()
//!     .with_geometry(Point::new(139.69, 35.69))
//!     .with_field("name", "Tokyo")
//!     .with_field("population", 13_960_000_i64);
//! let id = layer.create_feature(&mut feature)?;
//! assert_eq!(feature.id(), Some(id));
//! # Ok::<(), gpkg_store::GpkgError>(())
//! ```
//!
//! ## Reader
//!
//! ```no_run
//! use gpkg_store::Gpkg;
//!
//! let gpkg = Gpkg::open_read_only("data/cities.gpkg")?;
//! for layer in gpkg.layers() {
//!     for feature in layer.features() {
//!         let feature = feature?;
//!         let name: Option<String> = feature.field_as("name")?;
//!         println!("{}: {:?} {:?}", layer.name(), feature.id(), name);
//!     }
//! }
//! # Ok::<(), gpkg_store::GpkgError>(())
//! ```
//!
//! `NULL` converts to `None` when the target is an `Option<T>`; converting it
//! to a plain `T` is an error.
mod conversions;
mod error;
mod gpkg;
mod ogc_sql;
mod options;
mod sql_functions;
mod srs;
mod types;

pub use error::{GpkgError, Result};
pub use gpkg::{
    CatalogEntry, GeometryHeader, Gpkg, GpkgFeature, GpkgFeatureIterator, GpkgLayer, decode,
    decode_header, encode,
};
pub use options::{
    DatasourceCapability, GpkgOptions, LayerCapability, LayerOptions, OpenMode, Synchronous,
};
pub use sql_functions::register_spatial_functions;
pub use srs::{BuiltinSrsRegistry, SrsDefinition, SrsRegistry};
pub use types::{ColumnSpec, ColumnType, Envelope, GeometryType, Value};
