use crate::error::{GpkgError, Result};
use crate::ogc_sql::{
    quote_identifier, sql_count_features, sql_delete_feature, sql_feature_exists,
    sql_insert_feature, sql_select_features, sql_update_feature,
};
use crate::options::LayerCapability;
use crate::types::{ColumnSpec, Envelope, GeometryType, Value};
use rusqlite::{Connection, Row, params_from_iter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::catalog::{CatalogEntry, SchemaCatalog, TableColumns};
use super::geometry::{bounds, decode, encode};
use super::gpkg::GpkgConnection;
use super::GpkgFeature;

// When issueing the SELECT query, always place these columns first so that
// we don't need to find the positions every time.
const GEOMETRY_INDEX: usize = 0;
const PRIMARY_INDEX: usize = 1;

/// A feature table of a GeoPackage.
///
/// Handles are cheap to clone and share the datasource connection. Once the
/// datasource is closed every operation fails with
/// [`GpkgError::DatasourceClosed`]; once the layer is deleted, with
/// [`GpkgError::NotFound`].
#[derive(Clone)]
pub struct GpkgLayer {
    inner: Arc<LayerInner>,
}

struct LayerInner {
    conn: Arc<GpkgConnection>,
    name: String,
    geometry_column: String,
    fid_column: String,
    geometry_type: GeometryType,
    srs_id: i32,
    columns: RwLock<Vec<ColumnSpec>>,
    cursor: Mutex<Cursor>,
    dropped: AtomicBool,
}

impl std::fmt::Debug for GpkgLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpkgLayer")
            .field("name", &self.inner.name)
            .field("geometry_column", &self.inner.geometry_column)
            .field("fid_column", &self.inner.fid_column)
            .field("geometry_type", &self.inner.geometry_type)
            .field("srs_id", &self.inner.srs_id)
            .finish_non_exhaustive()
    }
}

/// Keyset-paginated read position: rows with an id above `last_fid`.
#[derive(Debug, Default)]
struct Cursor {
    last_fid: Option<i64>,
    buffer: VecDeque<GpkgFeature>,
    exhausted: bool,
}

impl Cursor {
    fn next(&mut self, layer: &GpkgLayer) -> Result<Option<GpkgFeature>> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch_size = layer.inner.conn.read_batch_size();
            let page = layer.fetch_page(self.last_fid, batch_size)?;
            if page.len() < batch_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.last_fid = last.id();
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }
}

/// Row as read from the engine, before the geometry is decoded.
struct RawFeature {
    id: i64,
    geometry: Option<Vec<u8>>,
    fields: Vec<(String, Value)>,
}

impl RawFeature {
    fn from_row(row: &Row<'_>, columns: &[ColumnSpec]) -> rusqlite::Result<Self> {
        let geometry: Option<Vec<u8>> = row.get(GEOMETRY_INDEX)?;
        let id: i64 = row.get(PRIMARY_INDEX)?;
        let mut fields = Vec::with_capacity(columns.len());
        for (i, spec) in columns.iter().enumerate() {
            let idx = i + 2;
            let value = Value::from_sql(row.get_ref(idx)?, spec.column_type, idx)?;
            fields.push((spec.name.clone(), value));
        }
        Ok(Self {
            id,
            geometry,
            fields,
        })
    }

    fn into_feature(self) -> Result<GpkgFeature> {
        let geometry = self.geometry.as_deref().map(decode).transpose()?;
        Ok(GpkgFeature::from_parts(self.id, geometry, self.fields))
    }
}

impl GpkgLayer {
    pub(crate) fn new(conn: Arc<GpkgConnection>, entry: CatalogEntry, table: TableColumns) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                conn,
                name: entry.table_name,
                geometry_column: entry.geometry_column,
                fid_column: table.fid_column,
                geometry_type: entry.geometry_type,
                srs_id: entry.srs_id,
                columns: RwLock::new(table.columns),
                cursor: Mutex::new(Cursor::default()),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.inner.geometry_type
    }

    pub fn srs_id(&self) -> i32 {
        self.inner.srs_id
    }

    pub fn geometry_column(&self) -> &str {
        &self.inner.geometry_column
    }

    pub fn fid_column(&self) -> &str {
        &self.inner.fid_column
    }

    /// Property columns in creation order.
    pub fn fields(&self) -> Vec<ColumnSpec> {
        self.columns().clone()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name.clone()).collect()
    }

    /// The current catalog row, including the extent and last change time.
    pub fn catalog_entry(&self) -> Result<CatalogEntry> {
        self.with_conn(|conn| {
            SchemaCatalog::new(conn)
                .lookup(&self.inner.name)?
                .ok_or_else(|| GpkgError::NotFound(self.inner.name.clone()))
        })
    }

    /// Bounding box of every geometry written so far; `None` for a layer
    /// without non-empty geometries.
    pub fn extent(&self) -> Result<Option<Envelope>> {
        Ok(self.catalog_entry()?.extent)
    }

    pub fn feature_count(&self) -> Result<u64> {
        let sql = sql_count_features(&self.inner.name);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn test_capability(&self, capability: LayerCapability) -> bool {
        match capability {
            LayerCapability::RandomRead | LayerCapability::FastFeatureCount => true,
            LayerCapability::CreateField
            | LayerCapability::SequentialWrite
            | LayerCapability::RandomWrite
            | LayerCapability::DeleteFeature => !self.inner.conn.is_read_only(),
        }
    }

    /// Add a property column.
    ///
    /// Existing rows read back `NULL` for a nullable column. A non-nullable
    /// column can only be added while the layer is empty.
    ///
    /// Column names are case-insensitive in the engine: a name equal to an
    /// existing field, the fid column or the geometry column ignoring ASCII
    /// case fails with [`GpkgError::DuplicateField`].
    ///
    /// Example:
    /// ```no_run
    /// use gpkg_store::{ColumnSpec, ColumnType, Gpkg};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg", &Default::default())?;
    /// let layer = gpkg
    ///     .layer_by_name("points")
    ///     .ok_or_else(|| gpkg_store::GpkgError::NotFound("points".into()))?;
    /// layer.create_field(ColumnSpec::new("label", ColumnType::String))?;
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn create_field(&self, spec: ColumnSpec) -> Result<()> {
        self.ensure_writable()?;
        let mut columns = self
            .inner
            .columns
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let taken = [&self.inner.fid_column, &self.inner.geometry_column]
            .into_iter()
            .chain(columns.iter().map(|c| &c.name))
            .any(|name| name.eq_ignore_ascii_case(&spec.name));
        if taken {
            return Err(GpkgError::DuplicateField {
                layer: self.inner.name.clone(),
                field: spec.name,
            });
        }

        let count_sql = sql_count_features(&self.inner.name);
        self.with_conn(|conn| {
            if !spec.nullable {
                let count: i64 = conn.query_row(&count_sql, [], |row| row.get(0))?;
                if count > 0 {
                    return Err(GpkgError::SchemaFrozen {
                        layer: self.inner.name.clone(),
                        field: spec.name.clone(),
                    });
                }
            }
            SchemaCatalog::new(conn).add_column(&self.inner.name, &spec)
        })?;

        tracing::debug!(
            layer = %self.inner.name,
            field = %spec.name,
            column_type = spec.column_type.name(),
            nullable = spec.nullable,
            "created field"
        );
        columns.push(spec);
        Ok(())
    }

    /// Insert a feature and return its id.
    ///
    /// An id is assigned when the feature has none and written back to it.
    /// Ids are never reused, even after deletion.
    ///
    /// Example:
    /// ```no_run
    /// use geo_types::Point;
    /// use gpkg_store::{Gpkg, GpkgFeature};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg", &Default::default())?;
    /// let layer = gpkg
    ///     .layer_by_name("points")
    ///     .ok_or_else(|| gpkg_store::GpkgError::NotFound("points".into()))?;
    /// let mut feature = GpkgFeature::new()
    ///     .with_geometry(Point::new(1.0, 2.0))
    ///     .with_field("name", "alpha");
    /// let id = layer.create_feature(&mut feature)?;
    /// assert_eq!(feature.id(), Some(id));
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn create_feature(&self, feature: &mut GpkgFeature) -> Result<i64> {
        self.ensure_writable()?;
        let columns = self.columns();
        let mut values = self.bind_fields(&columns, feature, false)?;
        let (blob, envelope) = self.encode_geometry(feature)?;
        if let Some(blob) = blob {
            values.insert(
                0,
                (
                    quote_identifier(&self.inner.geometry_column),
                    Value::Binary(blob),
                ),
            );
        }

        let id = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if let Some(id) = feature.id() {
                if self.exists(&tx, id)? {
                    return Err(GpkgError::DuplicateFeatureId {
                        layer: self.inner.name.clone(),
                        id,
                    });
                }
                values.push((quote_identifier(&self.inner.fid_column), Value::Integer(id)));
            }

            let (names, params): (Vec<String>, Vec<Value>) = values.into_iter().unzip();
            tx.execute(
                &sql_insert_feature(&self.inner.name, &names),
                params_from_iter(params.iter()),
            )?;
            let id = match feature.id() {
                Some(id) => id,
                None => tx.last_insert_rowid(),
            };
            self.record_write(&tx, envelope.as_ref())?;
            tx.commit()?;
            Ok(id)
        })?;

        feature.set_id(Some(id));
        tracing::debug!(layer = %self.inner.name, fid = id, "created feature");
        Ok(id)
    }

    /// Replace the geometry and every property of an existing feature.
    ///
    /// Properties not set on `feature` become `NULL`.
    pub fn update_feature(&self, feature: &GpkgFeature) -> Result<()> {
        self.ensure_writable()?;
        let id = feature.id().ok_or(GpkgError::MissingFeatureId)?;
        let columns = self.columns();
        let mut values = self.bind_fields(&columns, feature, true)?;
        let (blob, envelope) = self.encode_geometry(feature)?;
        values.insert(
            0,
            (
                quote_identifier(&self.inner.geometry_column),
                blob.map_or(Value::Null, Value::Binary),
            ),
        );

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let (names, mut params): (Vec<String>, Vec<Value>) = values.into_iter().unzip();
            params.push(Value::Integer(id));
            let updated = tx.execute(
                &sql_update_feature(&self.inner.name, &self.inner.fid_column, &names),
                params_from_iter(params.iter()),
            )?;
            if updated == 0 {
                return Err(self.feature_not_found(id));
            }
            self.record_write(&tx, envelope.as_ref())?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!(layer = %self.inner.name, fid = id, "updated feature");
        Ok(())
    }

    /// Delete a feature. Remaining ids are left untouched.
    pub fn delete_feature(&self, id: i64) -> Result<()> {
        self.ensure_writable()?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let deleted = tx.execute(
                &sql_delete_feature(&self.inner.name, &self.inner.fid_column),
                [id],
            )?;
            if deleted == 0 {
                return Err(self.feature_not_found(id));
            }
            SchemaCatalog::new(&tx).touch(&self.inner.name)?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!(layer = %self.inner.name, fid = id, "deleted feature");
        Ok(())
    }

    /// Look a feature up by id; `None` if there is no such feature.
    pub fn get_feature(&self, id: i64) -> Result<Option<GpkgFeature>> {
        let columns = self.columns();
        let filter = format!("WHERE {}=?1", quote_identifier(&self.inner.fid_column));
        let sql = self.select_sql(&columns, &filter);
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query_map([id], |row| RawFeature::from_row(row, &columns))?;
            Ok(rows.next().transpose()?)
        })?;
        raw.map(RawFeature::into_feature).transpose()
    }

    /// Rewind the sequential reader to the first feature.
    pub fn reset_reading(&self) {
        let mut cursor = self
            .inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cursor = Cursor::default();
    }

    /// Next feature in id order, or `None` once every feature was returned.
    ///
    /// After `None` the reader stays exhausted until [`Self::reset_reading`].
    pub fn next_feature(&self) -> Result<Option<GpkgFeature>> {
        self.ensure_alive()?;
        let mut cursor = self
            .inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cursor.next(self)
    }

    /// Iterate over all features in id order, independently of the
    /// sequential reader.
    ///
    /// Example:
    /// ```no_run
    /// use gpkg_store::Gpkg;
    ///
    /// let gpkg = Gpkg::open_read_only("data/example.gpkg")?;
    /// let layer = gpkg.layer(0)?;
    /// for feature in layer.features() {
    ///     let feature = feature?;
    ///     let _id = feature.id();
    ///     let _geom = feature.geometry();
    /// }
    /// # Ok::<(), gpkg_store::GpkgError>(())
    /// ```
    pub fn features(&self) -> GpkgFeatureIterator {
        GpkgFeatureIterator {
            layer: self.clone(),
            cursor: Cursor::default(),
        }
    }

    pub(crate) fn mark_dropped(&self) {
        self.inner.dropped.store(true, Ordering::Release);
        self.reset_reading();
    }

    fn fetch_page(&self, after: Option<i64>, limit: usize) -> Result<Vec<GpkgFeature>> {
        let columns = self.columns();
        let fid = quote_identifier(&self.inner.fid_column);
        // The first page has no lower bound; any i64 is a valid id.
        let filter = match after {
            Some(_) => format!("WHERE {fid} > ?1 ORDER BY {fid} LIMIT ?2"),
            None => format!("ORDER BY {fid} LIMIT ?1"),
        };
        let sql = self.select_sql(&columns, &filter);
        let params: Vec<i64> = after.into_iter().chain([limit as i64]).collect();
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    RawFeature::from_row(row, &columns)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        tracing::debug!(layer = %self.inner.name, after = ?after, rows = raw.len(), "fetched page");
        raw.into_iter().map(RawFeature::into_feature).collect()
    }

    fn select_sql(&self, columns: &[ColumnSpec], filter: &str) -> String {
        sql_select_features(
            &self.inner.name,
            &self.inner.geometry_column,
            &self.inner.fid_column,
            columns.iter().map(|c| c.name.as_str()),
            filter,
        )
    }

    // Validate the feature's properties against the schema and pair each with
    // its quoted column name. With `all_columns`, unset columns bind NULL.
    fn bind_fields(
        &self,
        columns: &[ColumnSpec],
        feature: &GpkgFeature,
        all_columns: bool,
    ) -> Result<Vec<(String, Value)>> {
        if let Some((name, _)) = feature
            .fields()
            .find(|(name, _)| !columns.iter().any(|c| c.name == *name))
        {
            return Err(GpkgError::UnknownField {
                layer: self.inner.name.clone(),
                field: name.to_string(),
            });
        }

        let mut values = Vec::with_capacity(columns.len() + 2);
        for spec in columns {
            let value = match feature.field(&spec.name) {
                Some(value) => value.clone(),
                None if all_columns || !spec.nullable => Value::Null,
                None => continue,
            };
            if value.is_null() && !spec.nullable {
                return Err(GpkgError::NotNullable {
                    layer: self.inner.name.clone(),
                    field: spec.name.clone(),
                });
            }
            if !spec.column_type.accepts(&value) {
                return Err(GpkgError::ValueTypeMismatch {
                    expected: spec.column_type.name(),
                    actual: value.type_name(),
                });
            }
            value.check_storable()?;
            values.push((quote_identifier(&spec.name), value));
        }
        Ok(values)
    }

    fn encode_geometry(
        &self,
        feature: &GpkgFeature,
    ) -> Result<(Option<Vec<u8>>, Option<Envelope>)> {
        let Some(geometry) = feature.geometry() else {
            return Ok((None, None));
        };
        let actual = GeometryType::of(geometry);
        let expected = self.inner.geometry_type;
        if expected != GeometryType::Unknown && actual != expected {
            return Err(GpkgError::GeometryTypeMismatch {
                layer: self.inner.name.clone(),
                expected: crate::conversions::geometry_type_to_str(expected),
                actual: crate::conversions::geometry_type_to_str(actual),
            });
        }
        let blob = encode(geometry, self.inner.srs_id)?;
        Ok((Some(blob), bounds(geometry)))
    }

    fn record_write(&self, conn: &Connection, envelope: Option<&Envelope>) -> Result<()> {
        let catalog = SchemaCatalog::new(conn);
        match envelope {
            Some(envelope) => catalog.update_extent(&self.inner.name, envelope),
            None => catalog.touch(&self.inner.name),
        }
    }

    fn exists(&self, conn: &Connection, id: i64) -> Result<bool> {
        let sql = sql_feature_exists(&self.inner.name, &self.inner.fid_column);
        Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
    }

    fn feature_not_found(&self, id: i64) -> GpkgError {
        GpkgError::NotFound(format!("feature {id} in layer '{}'", self.inner.name))
    }

    fn columns(&self) -> std::sync::RwLockReadGuard<'_, Vec<ColumnSpec>> {
        self.inner
            .columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.inner.dropped.load(Ordering::Acquire) {
            return Err(GpkgError::NotFound(self.inner.name.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.inner.conn.is_read_only() {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.ensure_alive()?;
        self.inner.conn.with(f)
    }
}

/// Iterator over the features of a layer, fetched page by page.
pub struct GpkgFeatureIterator {
    layer: GpkgLayer,
    cursor: Cursor,
}

impl Iterator for GpkgFeatureIterator {
    type Item = Result<GpkgFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next(&self.layer) {
            Ok(feature) => feature.map(Ok),
            Err(err) => {
                self.cursor.exhausted = true;
                self.cursor.buffer.clear();
                Some(Err(err))
            }
        }
    }
}
