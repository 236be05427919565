use std::path::PathBuf;

use thiserror::Error;

/// Crate error type for GeoPackage operations.
#[derive(Debug, Error)]
pub enum GpkgError {
    /// A layer with the same name is already registered.
    #[error("layer already exists: {0}")]
    DuplicateName(String),
    /// A field with the same name already exists in the layer.
    #[error("field '{field}' already exists in layer '{layer}'")]
    DuplicateField { layer: String, field: String },
    /// A feature referenced a field the layer schema does not have.
    #[error("unknown field '{field}' for layer '{layer}'")]
    UnknownField { layer: String, field: String },
    /// The requested layer, feature or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A layer index was outside `0..len`.
    #[error("layer index {index} out of range (layer count is {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// A geometry blob could not be decoded or a geometry could not be encoded.
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),
    /// The file lacks the GeoPackage catalog tables or is not a database at all.
    #[error("not a GeoPackage: {0}")]
    NotAGeopackage(String),
    /// The target of `create` already holds a GeoPackage catalog.
    #[error("GeoPackage already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    /// The datasource was closed; handles obtained before closing are invalid.
    #[error("datasource is closed")]
    DatasourceClosed,
    /// Wraps errors returned by `rusqlite`.
    #[error(transparent)]
    StorageEngineFailure(#[from] rusqlite::Error),
    /// Write attempted through a read-only datasource.
    #[error("operation not allowed on read-only connection")]
    ReadOnly,
    /// The schema change is not allowed in the layer's current state.
    #[error("cannot add non-nullable field '{field}' to populated layer '{layer}'")]
    SchemaFrozen { layer: String, field: String },
    /// Dynamic `Value` type did not match the expected column or conversion target.
    #[error("expected {expected}, got {actual}")]
    ValueTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Numeric conversion failed because the value is out of range.
    #[error("value out of range for {target}")]
    ValueOutOfRange { target: &'static str },
    /// A non-nullable field was left unset or set to NULL.
    #[error("field '{field}' of layer '{layer}' is not nullable")]
    NotNullable { layer: String, field: String },
    /// The geometry kind does not match the layer's declared geometry type.
    #[error("layer '{layer}' expects {expected} geometries, got {actual}")]
    GeometryTypeMismatch {
        layer: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// The caller supplied a feature id that is already taken.
    #[error("feature id {id} already exists in layer '{layer}'")]
    DuplicateFeatureId { layer: String, id: i64 },
    /// The feature needs an id for this operation but has none.
    #[error("feature has no id")]
    MissingFeatureId,
    /// Referenced `srs_id` is neither in `gpkg_spatial_ref_sys` nor resolvable.
    #[error("srs_id {srs_id} not found in gpkg_spatial_ref_sys and could not be resolved")]
    UnknownSrs { srs_id: i32 },
    /// A geometry type in metadata could not be mapped to a supported geometry type.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometryType(String),
    /// A column type declared in SQLite metadata is not supported by this crate.
    #[error("unsupported column type for column '{column}': {declared_type}")]
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// Invalid `z` / `m` flags in GeoPackage metadata.
    #[error("invalid geometry dimension flags (z={z}, m={m})")]
    InvalidDimension { z: i8, m: i8 },
}

pub type Result<T> = std::result::Result<T, GpkgError>;

/// Translate engine errors raised while opening a file into the catalog taxonomy.
pub(crate) fn not_a_database(err: rusqlite::Error, what: &str) -> GpkgError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::NotADatabase =>
        {
            GpkgError::NotAGeopackage(format!("{what} is not an SQLite database"))
        }
        other => GpkgError::StorageEngineFailure(other),
    }
}
