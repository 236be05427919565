use crate::error::{GpkgError, Result, not_a_database};
use crate::ogc_sql::{
    GP10_APPLICATION_ID, GP11_APPLICATION_ID, GPKG_APPLICATION_ID, SQL_SRS_EXISTS,
    initialize_gpkg, insert_srs,
};
use crate::options::{DatasourceCapability, GpkgOptions, OpenMode};
use crate::sql_functions::register_spatial_functions;
use crate::srs::{SrsDefinition, SrsRegistry};
use crate::types::GeometryType;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::catalog::{LayerDefinition, SchemaCatalog};
use super::layer::GpkgLayer;
use crate::options::LayerOptions;

/// The single engine connection of a datasource, shared with its layers.
///
/// The slot is emptied on close; later users get `DatasourceClosed`.
pub(crate) struct GpkgConnection {
    conn: Mutex<Option<Connection>>,
    read_only: bool,
    read_batch_size: usize,
}

impl GpkgConnection {
    fn new(conn: Connection, read_only: bool, read_batch_size: usize) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            read_only,
            read_batch_size: read_batch_size.max(1),
        }
    }

    pub(crate) fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(GpkgError::DatasourceClosed)?;
        f(conn)
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn read_batch_size(&self) -> usize {
        self.read_batch_size
    }

    fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Returns whether the connection was still open.
    fn close(&self) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match conn {
            Some(conn) => {
                conn.close().map_err(|(_, err)| err)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A GeoPackage datasource: the file, its catalog and its open layers.
///
/// Layers are kept in catalog order; that order survives reopening.
pub struct Gpkg {
    conn: Arc<GpkgConnection>,
    path: Option<PathBuf>,
    srs_registry: Arc<dyn SrsRegistry>,
    layers: Vec<GpkgLayer>,
}

impl std::fmt::Debug for Gpkg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpkg")
            .field("path", &self.path)
            .field("read_only", &self.conn.is_read_only())
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Gpkg {
    /// Create a new GeoPackage file.
    ///
    /// An empty existing file is initialized in place. A file that already
    /// holds a GeoPackage fails with [`GpkgError::AlreadyExists`].
    ///
    /// Example:
    /// ```no_run
    /// use gpkg_store::{Gpkg, GpkgOptions};
    ///
    /// let gpkg = Gpkg::create("data/new.gpkg", &GpkgOptions::default())?;
    /// assert_eq!(gpkg.layer_count(), 0);
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn create<P: AsRef<Path>>(path: P, options: &GpkgOptions) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path, options)?;
        let path_str = path.display().to_string();

        let is_empty_file = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if !is_empty_file {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            let present = SchemaCatalog::new(&conn)
                .is_present()
                .map_err(|err| match err {
                    GpkgError::StorageEngineFailure(e) => not_a_database(e, &path_str),
                    other => other,
                })?;
            return Err(if present {
                GpkgError::AlreadyExists(path.to_path_buf())
            } else {
                GpkgError::NotAGeopackage(format!("{path_str} exists and is not empty"))
            });
        }

        let conn = Connection::open(path)?;
        let gpkg = Self::initialize(conn, Some(path.to_path_buf()), options)?;
        tracing::info!(path = %path_str, "created GeoPackage");
        Ok(gpkg)
    }

    /// Create a new GeoPackage in memory.
    pub fn create_in_memory() -> Result<Self> {
        Self::create_in_memory_with(&GpkgOptions::default())
    }

    pub fn create_in_memory_with(options: &GpkgOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None, options)
    }

    fn initialize(conn: Connection, path: Option<PathBuf>, options: &GpkgOptions) -> Result<Self> {
        apply_pragmas(&conn, options)?;
        register_spatial_functions(&conn)?;
        {
            let tx = conn.unchecked_transaction()?;
            initialize_gpkg(&tx)?;
            tx.commit()?;
        }
        Ok(Self {
            conn: Arc::new(GpkgConnection::new(conn, false, options.read_batch_size)),
            path,
            srs_registry: Arc::clone(&options.srs_registry),
            layers: Vec::new(),
        })
    }

    /// Open an existing GeoPackage and load its feature layers.
    ///
    /// Example:
    /// ```no_run
    /// use gpkg_store::{Gpkg, GpkgOptions};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg", &GpkgOptions::default())?;
    /// for layer in gpkg.layers() {
    ///     println!("{}: {:?}", layer.name(), layer.geometry_type());
    /// }
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: &GpkgOptions) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        if !path.exists() {
            return Err(GpkgError::NotFound(path_str));
        }
        check_extension(path, options)?;

        let read_only = options.mode == OpenMode::ReadOnly;
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|err| not_a_database(err, &path_str))?;

        let application_id: i32 = conn
            .query_row("PRAGMA application_id", [], |row| row.get(0))
            .map_err(|err| not_a_database(err, &path_str))?;
        if ![GPKG_APPLICATION_ID, GP10_APPLICATION_ID, GP11_APPLICATION_ID]
            .contains(&application_id)
        {
            tracing::warn!(
                path = %path_str,
                application_id = %format!("{application_id:#010x}"),
                "unexpected application id"
            );
        }

        if !SchemaCatalog::new(&conn).is_present()? {
            return Err(GpkgError::NotAGeopackage(format!(
                "{path_str} lacks the GeoPackage catalog tables"
            )));
        }
        if !read_only {
            apply_pragmas(&conn, options)?;
        }
        register_spatial_functions(&conn)?;

        let conn = Arc::new(GpkgConnection::new(conn, read_only, options.read_batch_size));
        let layers = conn.with(|conn| {
            let catalog = SchemaCatalog::new(conn);
            catalog
                .list_all()?
                .into_iter()
                .map(|entry| {
                    let table = catalog.table_columns(&entry)?;
                    Ok((entry, table))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let layers = layers
            .into_iter()
            .map(|(entry, table)| GpkgLayer::new(Arc::clone(&conn), entry, table))
            .collect::<Vec<_>>();

        tracing::info!(path = %path_str, layers = layers.len(), read_only, "opened GeoPackage");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            srs_registry: Arc::clone(&options.srs_registry),
            layers,
        })
    }

    /// Open a GeoPackage in read-only mode.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, &GpkgOptions::default().mode(OpenMode::ReadOnly))
    }

    /// Register a spatial reference system in `gpkg_spatial_ref_sys`.
    ///
    /// Only needed for SRS ids the configured [`SrsRegistry`] cannot resolve.
    /// No validation of the WKT or the authority fields is done.
    ///
    /// Example: register NZGD2000 / New Zealand Transverse Mercator.
    /// ```no_run
    /// use gpkg_store::{Gpkg, SrsDefinition};
    ///
    /// let gpkg = Gpkg::create_in_memory()?;
    /// gpkg.register_srs(&SrsDefinition {
    ///     srs_name: "NZGD2000 / New Zealand Transverse Mercator 2000".to_string(),
    ///     srs_id: 2193,
    ///     organization: "EPSG".to_string(),
    ///     organization_coordsys_id: 2193,
    ///     definition: r#"PROJCS["NZGD2000 / New Zealand Transverse Mercator 2000", ...]"#.to_string(),
    ///     description: None,
    /// })?;
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn register_srs(&self, srs: &SrsDefinition) -> Result<()> {
        self.ensure_writable()?;
        self.conn.with(|conn| {
            insert_srs(conn, srs)?;
            Ok(())
        })?;
        tracing::debug!(srs_id = srs.srs_id, "registered spatial reference system");
        Ok(())
    }

    /// The `gpkg_spatial_ref_sys` row for `srs_id`, if any.
    pub fn spatial_ref(&self, srs_id: i32) -> Result<Option<SrsDefinition>> {
        self.conn
            .with(|conn| SchemaCatalog::new(conn).spatial_ref(srs_id))
    }

    /// Create a feature layer backed by a new table.
    ///
    /// `srs_id` of `None` stands for the undefined geographic SRS (`0`). An
    /// SRS not yet in the file is resolved through the configured
    /// [`SrsRegistry`] and stored together with the layer.
    ///
    /// Example:
    /// ```no_run
    /// use gpkg_store::{ColumnSpec, ColumnType, GeometryType, Gpkg, LayerOptions};
    ///
    /// let mut gpkg = Gpkg::create_in_memory()?;
    /// let layer = gpkg.create_layer(
    ///     "points",
    ///     GeometryType::Point,
    ///     Some(4326),
    ///     &LayerOptions::default().column(ColumnSpec::new("name", ColumnType::String)),
    /// )?;
    /// assert_eq!(layer.field_names(), ["name"]);
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn create_layer(
        &mut self,
        name: &str,
        geometry_type: GeometryType,
        srs_id: Option<i32>,
        options: &LayerOptions,
    ) -> Result<GpkgLayer> {
        self.ensure_writable()?;
        if self.position(name).is_some() {
            return Err(GpkgError::DuplicateName(name.to_string()));
        }
        let srs_id = srs_id.unwrap_or(0);

        let (entry, table) = self.conn.with(|conn| {
            let srs_exists: bool = conn.query_row(SQL_SRS_EXISTS, [srs_id], |row| row.get(0))?;
            let missing_srs = if srs_exists {
                None
            } else {
                Some(self.srs_registry.resolve(srs_id)?)
            };

            let catalog = SchemaCatalog::new(conn);
            let entry = catalog.register(&LayerDefinition {
                name,
                geometry_type,
                srs_id,
                missing_srs,
                options,
            })?;
            let table = catalog.table_columns(&entry)?;
            Ok((entry, table))
        })?;

        let layer = GpkgLayer::new(Arc::clone(&self.conn), entry, table);
        self.layers.push(layer.clone());
        tracing::info!(
            layer = name,
            geometry_type = ?geometry_type,
            srs_id,
            "created layer"
        );
        Ok(layer)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Result<GpkgLayer> {
        self.layers
            .get(index)
            .cloned()
            .ok_or(GpkgError::IndexOutOfRange {
                index,
                len: self.layers.len(),
            })
    }

    /// Layer names match case-insensitively, as table names do.
    pub fn layer_by_name(&self, name: &str) -> Option<GpkgLayer> {
        self.position(name).map(|index| self.layers[index].clone())
    }

    pub fn layers(&self) -> impl Iterator<Item = &GpkgLayer> {
        self.layers.iter()
    }

    /// Names of the layers in catalog order.
    pub fn list_layers(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    /// Delete the layer at `index`; the layers after it move down by one.
    pub fn delete_layer(&mut self, index: usize) -> Result<()> {
        let len = self.layers.len();
        if index >= len {
            return Err(GpkgError::IndexOutOfRange { index, len });
        }
        self.ensure_writable()?;

        let name = self.layers[index].name().to_string();
        self.conn
            .with(|conn| SchemaCatalog::new(conn).unregister(&name))?;
        let layer = self.layers.remove(index);
        layer.mark_dropped();
        tracing::info!(layer = %name, "deleted layer");
        Ok(())
    }

    pub fn delete_layer_by_name(&mut self, name: &str) -> Result<()> {
        let index = self
            .position(name)
            .ok_or_else(|| GpkgError::NotFound(name.to_string()))?;
        self.delete_layer(index)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.name().eq_ignore_ascii_case(name))
    }

    pub fn test_capability(&self, capability: DatasourceCapability) -> bool {
        match capability {
            DatasourceCapability::CreateLayer | DatasourceCapability::DeleteLayer => {
                !self.conn.is_read_only() && !self.conn.is_closed()
            }
        }
    }

    /// `None` for in-memory datasources.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.conn.is_read_only()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close the connection. Calling it again is a no-op.
    ///
    /// Layer handles obtained earlier fail with [`GpkgError::DatasourceClosed`].
    pub fn close(&mut self) -> Result<()> {
        self.layers.clear();
        if self.conn.close()? {
            tracing::info!(path = ?self.path, "closed GeoPackage");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.conn.with(f)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.conn.is_read_only() {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }
}

impl Drop for Gpkg {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close GeoPackage");
        }
    }
}

fn check_extension(path: &Path, options: &GpkgOptions) -> Result<()> {
    if !options.require_gpkg_extension {
        return Ok(());
    }
    let ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gpkg"));
    if ok {
        Ok(())
    } else {
        Err(GpkgError::NotAGeopackage(format!(
            "{} does not have the .gpkg extension",
            path.display()
        )))
    }
}

fn apply_pragmas(conn: &Connection, options: &GpkgOptions) -> Result<()> {
    if let Some(synchronous) = options.synchronous {
        conn.execute_batch(&format!(
            "PRAGMA synchronous = {}",
            synchronous.pragma_value()
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Gpkg;
    use crate::Result;
    use crate::error::GpkgError;
    use crate::gpkg::GpkgFeature;
    use crate::options::{
        DatasourceCapability, GpkgOptions, LayerCapability, LayerOptions, OpenMode, Synchronous,
    };
    use crate::srs::{SrsDefinition, SrsRegistry};
    use crate::types::{ColumnSpec, ColumnType, GeometryType, Value};
    use geo_types::{Geometry, Point};
    use std::path::PathBuf;
    use wkt::TryFromWkt;

    fn gpkg_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn duplicate_layer_name_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let mut gpkg = Gpkg::create(gpkg_path(&dir, "test.gpkg"), &GpkgOptions::default())?;

        gpkg.create_layer(
            "first_layer",
            GeometryType::Point,
            Some(4326),
            &LayerOptions::default(),
        )?;
        gpkg.create_layer("a_layer", GeometryType::Unknown, None, &LayerOptions::default())?;
        let err = gpkg
            .create_layer("a_layer", GeometryType::Unknown, None, &LayerOptions::default())
            .unwrap_err();
        assert!(matches!(err, GpkgError::DuplicateName(name) if name == "a_layer"));
        assert!(matches!(
            gpkg.create_layer("A_LAYER", GeometryType::Point, None, &LayerOptions::default()),
            Err(GpkgError::DuplicateName(_))
        ));
        assert_eq!(gpkg.layer_count(), 2);
        assert_eq!(gpkg.list_layers(), ["first_layer", "a_layer"]);

        let found = gpkg
            .layer_by_name("A_LAYER")
            .ok_or(GpkgError::NotFound("A_LAYER".into()))?;
        assert_eq!(found.name(), "a_layer");
        gpkg.delete_layer_by_name("First_Layer")?;
        assert_eq!(gpkg.list_layers(), ["a_layer"]);
        Ok(())
    }

    #[test]
    fn reopen_preserves_layers_and_fields() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "reopen.gpkg");
        {
            let mut gpkg = Gpkg::create(&path, &GpkgOptions::default())?;
            let roads = gpkg.create_layer(
                "roads",
                GeometryType::LineString,
                Some(3857),
                &LayerOptions::default(),
            )?;
            gpkg.create_layer("notes", GeometryType::Unknown, None, &LayerOptions::default())?;
            gpkg.create_layer(
                "parcels",
                GeometryType::Polygon,
                Some(4326),
                &LayerOptions::default(),
            )?;
            roads.create_field(ColumnSpec::new("lanes", ColumnType::Integer))?;
            roads.create_field(ColumnSpec::new("opened", ColumnType::Date))?;
            gpkg.close()?;
            gpkg.close()?;
            assert!(gpkg.is_closed());
        }

        let gpkg = Gpkg::open(&path, &GpkgOptions::default())?;
        assert_eq!(gpkg.layer_count(), 3);
        assert_eq!(gpkg.list_layers(), ["roads", "notes", "parcels"]);

        let roads = gpkg.layer(0)?;
        assert_eq!(roads.geometry_type(), GeometryType::LineString);
        assert_eq!(roads.srs_id(), 3857);
        assert_eq!(
            roads.fields(),
            vec![
                ColumnSpec::new("lanes", ColumnType::Integer),
                ColumnSpec::new("opened", ColumnType::Date),
            ]
        );
        assert_eq!(gpkg.layer(1)?.srs_id(), 0);
        assert_eq!(gpkg.layer(1)?.geometry_type(), GeometryType::Unknown);

        let srs = gpkg
            .spatial_ref(3857)?
            .ok_or(GpkgError::UnknownSrs { srs_id: 3857 })?;
        assert_eq!(srs.organization, "EPSG");
        Ok(())
    }

    #[test]
    fn features_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "features.gpkg");
        let geometry = Geometry::try_from_wkt_str("MULTIPOLYGON(((0 0,1 0,1 1,0 0)))").unwrap();
        {
            let options = GpkgOptions::default().synchronous(Synchronous::Normal);
            let mut gpkg = Gpkg::create(&path, &options)?;
            let layer = gpkg.create_layer(
                "lots",
                GeometryType::MultiPolygon,
                Some(4326),
                &LayerOptions::default()
                    .column(ColumnSpec::new("owner", ColumnType::String))
                    .column(ColumnSpec::new("deed", ColumnType::Binary)),
            )?;
            let mut feature = GpkgFeature::new()
                .with_geometry(geometry.clone())
                .with_field("owner", "Ada")
                .with_field("deed", vec![1u8, 2, 3]);
            layer.create_feature(&mut feature)?;
        }

        let gpkg = Gpkg::open_read_only(&path)?;
        let layer = gpkg.layer_by_name("lots").ok_or(GpkgError::NotFound("lots".into()))?;
        let feature = layer.get_feature(1)?.ok_or(GpkgError::NotFound("1".into()))?;
        assert_eq!(feature.geometry(), Some(&geometry));
        assert_eq!(feature.field("owner"), Some(&Value::from("Ada")));
        assert_eq!(feature.field("deed"), Some(&Value::Binary(vec![1, 2, 3])));
        Ok(())
    }

    #[test]
    fn delete_layers_by_position() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "delete.gpkg");
        let mut gpkg = Gpkg::create(&path, &GpkgOptions::default())?;
        gpkg.create_layer("a", GeometryType::Point, Some(4326), &LayerOptions::default())?;
        let b = gpkg.create_layer("b", GeometryType::Point, Some(4326), &LayerOptions::default())?;

        assert!(matches!(
            gpkg.delete_layer(2),
            Err(GpkgError::IndexOutOfRange { index: 2, len: 2 })
        ));
        gpkg.delete_layer(1)?;
        assert!(matches!(b.feature_count(), Err(GpkgError::NotFound(_))));
        gpkg.delete_layer(0)?;
        assert_eq!(gpkg.layer_count(), 0);
        assert!(matches!(
            gpkg.delete_layer(0),
            Err(GpkgError::IndexOutOfRange { index: 0, len: 0 })
        ));
        gpkg.close()?;

        let gpkg = Gpkg::open(&path, &GpkgOptions::default())?;
        assert_eq!(gpkg.layer_count(), 0);
        Ok(())
    }

    #[test]
    fn delete_layer_by_name_frees_the_name() -> Result<()> {
        let mut gpkg = Gpkg::create_in_memory()?;
        gpkg.create_layer("temp", GeometryType::Point, None, &LayerOptions::default())?;
        gpkg.delete_layer_by_name("temp")?;
        assert!(matches!(
            gpkg.delete_layer_by_name("temp"),
            Err(GpkgError::NotFound(_))
        ));
        gpkg.create_layer("temp", GeometryType::Polygon, None, &LayerOptions::default())?;
        assert_eq!(gpkg.layer(0)?.geometry_type(), GeometryType::Polygon);
        Ok(())
    }

    #[test]
    fn create_refuses_existing_geopackage() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "exists.gpkg");
        Gpkg::create(&path, &GpkgOptions::default())?.close()?;

        assert!(matches!(
            Gpkg::create(&path, &GpkgOptions::default()),
            Err(GpkgError::AlreadyExists(p)) if p == path
        ));

        std::fs::remove_file(&path).unwrap();
        Gpkg::create(&path, &GpkgOptions::default())?;
        Ok(())
    }

    #[test]
    fn create_initializes_empty_file() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "empty.gpkg");
        std::fs::write(&path, b"").unwrap();
        let gpkg = Gpkg::create(&path, &GpkgOptions::default())?;
        assert_eq!(gpkg.path(), Some(path.as_path()));
        Ok(())
    }

    #[test]
    fn open_rejects_non_geopackages() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            Gpkg::open(gpkg_path(&dir, "missing.gpkg"), &GpkgOptions::default()),
            Err(GpkgError::NotFound(_))
        ));

        let garbage = gpkg_path(&dir, "garbage.gpkg");
        std::fs::write(&garbage, vec![0x42u8; 4096]).unwrap();
        assert!(matches!(
            Gpkg::open(&garbage, &GpkgOptions::default()),
            Err(GpkgError::NotAGeopackage(_))
        ));

        let plain = gpkg_path(&dir, "plain.gpkg");
        rusqlite::Connection::open(&plain)?.execute_batch("CREATE TABLE t (x INTEGER)")?;
        assert!(matches!(
            Gpkg::open(&plain, &GpkgOptions::default()),
            Err(GpkgError::NotAGeopackage(_))
        ));
        assert!(matches!(
            Gpkg::create(&plain, &GpkgOptions::default()),
            Err(GpkgError::NotAGeopackage(_))
        ));

        let sqlite = gpkg_path(&dir, "real.sqlite");
        Gpkg::create(&sqlite, &GpkgOptions::default().require_gpkg_extension(false))?;
        assert!(matches!(
            Gpkg::open(&sqlite, &GpkgOptions::default()),
            Err(GpkgError::NotAGeopackage(_))
        ));
        let gpkg = Gpkg::open(&sqlite, &GpkgOptions::default().require_gpkg_extension(false))?;
        assert_eq!(gpkg.layer_count(), 0);
        Ok(())
    }

    #[test]
    fn closed_datasource_invalidates_layers() -> Result<()> {
        let mut gpkg = Gpkg::create_in_memory()?;
        let layer = gpkg.create_layer("pts", GeometryType::Point, None, &LayerOptions::default())?;
        gpkg.close()?;

        assert!(matches!(
            layer.create_feature(&mut GpkgFeature::new()),
            Err(GpkgError::DatasourceClosed)
        ));
        assert!(matches!(layer.next_feature(), Err(GpkgError::DatasourceClosed)));
        assert!(matches!(
            gpkg.create_layer("more", GeometryType::Point, None, &LayerOptions::default()),
            Err(GpkgError::DatasourceClosed)
        ));
        assert_eq!(gpkg.layer_count(), 0);
        assert!(!gpkg.test_capability(DatasourceCapability::CreateLayer));
        Ok(())
    }

    #[test]
    fn read_only_datasource_refuses_writes() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = gpkg_path(&dir, "ro.gpkg");
        {
            let mut gpkg = Gpkg::create(&path, &GpkgOptions::default())?;
            let layer =
                gpkg.create_layer("pts", GeometryType::Point, None, &LayerOptions::default())?;
            layer.create_feature(&mut GpkgFeature::new().with_geometry(Point::new(0.0, 0.0)))?;
        }

        let mut gpkg = Gpkg::open(&path, &GpkgOptions::default().mode(OpenMode::ReadOnly))?;
        assert!(gpkg.is_read_only());
        assert!(!gpkg.test_capability(DatasourceCapability::CreateLayer));
        assert!(!gpkg.test_capability(DatasourceCapability::DeleteLayer));
        assert!(matches!(
            gpkg.create_layer("x", GeometryType::Point, None, &LayerOptions::default()),
            Err(GpkgError::ReadOnly)
        ));
        assert!(matches!(gpkg.delete_layer(0), Err(GpkgError::ReadOnly)));

        let layer = gpkg.layer(0)?;
        assert!(!layer.test_capability(LayerCapability::SequentialWrite));
        assert!(layer.test_capability(LayerCapability::RandomRead));
        assert!(matches!(
            layer.create_feature(&mut GpkgFeature::new()),
            Err(GpkgError::ReadOnly)
        ));
        assert!(matches!(
            layer.create_field(ColumnSpec::new("x", ColumnType::Integer)),
            Err(GpkgError::ReadOnly)
        ));
        assert_eq!(layer.feature_count()?, 1);
        Ok(())
    }

    #[test]
    fn unknown_srs_is_resolved_or_rejected() -> Result<()> {
        struct NzRegistry;
        impl SrsRegistry for NzRegistry {
            fn resolve(&self, srs_id: i32) -> Result<SrsDefinition> {
                if srs_id != 2193 {
                    return Err(GpkgError::UnknownSrs { srs_id });
                }
                Ok(SrsDefinition {
                    srs_name: "NZGD2000 / New Zealand Transverse Mercator 2000".to_string(),
                    srs_id,
                    organization: "EPSG".to_string(),
                    organization_coordsys_id: srs_id,
                    definition: "PROJCS[\"NZGD2000 / New Zealand Transverse Mercator 2000\"]"
                        .to_string(),
                    description: None,
                })
            }
        }

        let mut gpkg = Gpkg::create_in_memory()?;
        assert!(matches!(
            gpkg.create_layer("nz", GeometryType::Point, Some(2193), &LayerOptions::default()),
            Err(GpkgError::UnknownSrs { srs_id: 2193 })
        ));
        assert_eq!(gpkg.layer_count(), 0);
        assert_eq!(gpkg.spatial_ref(2193)?, None);

        let options = GpkgOptions::default().srs_registry(NzRegistry);
        let mut gpkg = Gpkg::create_in_memory_with(&options)?;
        let layer =
            gpkg.create_layer("nz", GeometryType::Point, Some(2193), &LayerOptions::default())?;
        assert_eq!(layer.srs_id(), 2193);
        assert!(gpkg.spatial_ref(2193)?.is_some());

        gpkg.register_srs(&SrsDefinition::epsg_3857())?;
        assert!(matches!(
            gpkg.register_srs(&SrsDefinition::epsg_3857()),
            Err(GpkgError::StorageEngineFailure(_))
        ));
        Ok(())
    }

    #[test]
    fn catalog_tables_are_written() -> Result<()> {
        let mut gpkg = Gpkg::create_in_memory()?;
        gpkg.create_layer(
            "described",
            GeometryType::Point,
            Some(4326),
            &LayerOptions::default()
                .geometry_column("shape")
                .fid_column("id")
                .identifier("Described layer")
                .description("points with a description")
                .spatial_index(false),
        )?;

        let layer = gpkg.layer(0)?;
        assert_eq!(layer.geometry_column(), "shape");
        assert_eq!(layer.fid_column(), "id");
        let entry = layer.catalog_entry()?;
        assert_eq!(entry.identifier.as_deref(), Some("Described layer"));
        assert_eq!(entry.description.as_deref(), Some("points with a description"));

        let (application_id, user_version, rtrees): (i32, i32, i64) =
            gpkg.with_connection(|conn| {
                let application_id = conn.query_row("PRAGMA application_id", [], |r| r.get(0))?;
                let user_version = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
                let rtrees = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'rtree_%'",
                    [],
                    |r| r.get(0),
                )?;
                Ok((application_id, user_version, rtrees))
            })?;
        assert_eq!(application_id, 0x4750_4B47);
        assert_eq!(user_version, 10400);
        assert_eq!(rtrees, 0);
        Ok(())
    }
}
