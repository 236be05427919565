use std::fmt;
use std::sync::Arc;

use crate::srs::{BuiltinSrsRegistry, SrsRegistry};
use crate::types::ColumnSpec;

pub(crate) const DEFAULT_READ_BATCH_SIZE: usize = 256;

/// How a GeoPackage file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Value of `PRAGMA synchronous` applied after opening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
}

impl Synchronous {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Options for creating or opening a [`crate::Gpkg`].
#[derive(Clone)]
pub struct GpkgOptions {
    /// Ignored by `create`, which always opens read-write.
    pub mode: OpenMode,
    /// Used by `create_layer` for SRS ids not yet stored in the file.
    pub srs_registry: Arc<dyn SrsRegistry>,
    /// `None` keeps the engine default.
    pub synchronous: Option<Synchronous>,
    /// Refuse paths that do not end with `.gpkg`.
    pub require_gpkg_extension: bool,
    /// Number of rows fetched per page by sequential reads.
    pub read_batch_size: usize,
}

impl Default for GpkgOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::default(),
            srs_registry: Arc::new(BuiltinSrsRegistry),
            synchronous: None,
            require_gpkg_extension: true,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }
}

impl fmt::Debug for GpkgOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpkgOptions")
            .field("mode", &self.mode)
            .field("synchronous", &self.synchronous)
            .field("require_gpkg_extension", &self.require_gpkg_extension)
            .field("read_batch_size", &self.read_batch_size)
            .finish_non_exhaustive()
    }
}

impl GpkgOptions {
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn srs_registry(mut self, registry: impl SrsRegistry + 'static) -> Self {
        self.srs_registry = Arc::new(registry);
        self
    }

    pub fn synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = Some(synchronous);
        self
    }

    pub fn require_gpkg_extension(mut self, require: bool) -> Self {
        self.require_gpkg_extension = require;
        self
    }

    /// Values below 1 are treated as 1.
    pub fn read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size.max(1);
        self
    }
}

/// Options for a new layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerOptions {
    /// Name of the geometry column. Defaults to `geom`.
    pub geometry_column: String,
    /// Name of the integer primary key column. Defaults to `fid`.
    pub fid_column: String,
    /// Property columns created together with the table.
    pub columns: Vec<ColumnSpec>,
    /// Create the `gpkg_rtree_index` spatial index. Defaults to `true`.
    pub spatial_index: bool,
    /// `gpkg_contents.identifier`; the layer name is used when unset.
    pub identifier: Option<String>,
    pub description: Option<String>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            geometry_column: "geom".to_string(),
            fid_column: "fid".to_string(),
            columns: Vec::new(),
            spatial_index: true,
            identifier: None,
            description: None,
        }
    }
}

impl LayerOptions {
    pub fn geometry_column(mut self, name: impl Into<String>) -> Self {
        self.geometry_column = name.into();
        self
    }

    pub fn fid_column(mut self, name: impl Into<String>) -> Self {
        self.fid_column = name.into();
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnSpec>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn spatial_index(mut self, enabled: bool) -> Self {
        self.spatial_index = enabled;
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Capabilities reported by [`crate::Gpkg::test_capability`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasourceCapability {
    CreateLayer,
    DeleteLayer,
}

/// Capabilities reported by [`crate::GpkgLayer::test_capability`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerCapability {
    CreateField,
    SequentialWrite,
    RandomRead,
    RandomWrite,
    DeleteFeature,
    FastFeatureCount,
}
