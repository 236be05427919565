//! Schema catalog: the `gpkg_contents` / `gpkg_geometry_columns` bookkeeping
//! that makes a data table a layer.
//!
//! `register`, `unregister` and `add_column` each run in their own
//! transaction; the other writers run on whatever transaction the caller
//! holds.

use crate::conversions::{
    column_type_from_str, column_type_to_str, column_type_zero_literal, geometry_type_from_str,
    geometry_type_to_str, validate_zm,
};
use crate::error::{GpkgError, Result};
use crate::ogc_sql::{
    REQUIRED_CATALOG_TABLES, SQL_DELETE_GPKG_CONTENTS, SQL_DELETE_GPKG_EXTENSIONS,
    SQL_DELETE_GPKG_GEOMETRY_COLUMNS, SQL_GROW_GPKG_CONTENTS_EXTENT, SQL_HAS_RTREE_EXTENSION,
    SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_TABLE_COLUMNS,
    SQL_TABLE_EXISTS, SQL_TOUCH_GPKG_CONTENTS, execute_rtree_sqls, gpkg_rtree_drop_sql,
    insert_srs, quote_identifier, sql_add_column, sql_create_table, sql_drop_table,
    sql_select_catalog_entries,
};
use crate::options::LayerOptions;
use crate::srs::SrsDefinition;
use crate::types::{ColumnSpec, Envelope, GeometryType, parse_datetime};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

/// One catalog row: a feature table and its geometry column.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    /// Layer name, which is also the data table name.
    pub table_name: String,
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
    pub extent: Option<Envelope>,
    pub geometry_column: String,
    pub geometry_type: GeometryType,
    pub srs_id: i32,
    pub z: i8,
    pub m: i8,
}

impl CatalogEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<(Self, String)> {
        let last_change: Option<String> = row.get(3)?;
        let extent = match (
            row.get::<_, Option<f64>>(4)?,
            row.get::<_, Option<f64>>(5)?,
            row.get::<_, Option<f64>>(6)?,
            row.get::<_, Option<f64>>(7)?,
        ) {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => Some(Envelope {
                min_x,
                min_y,
                max_x,
                max_y,
            }),
            _ => None,
        };
        let geometry_type_name: String = row.get(9)?;
        let entry = Self {
            table_name: row.get(0)?,
            identifier: row.get(1)?,
            description: row.get(2)?,
            last_change: last_change.and_then(|s| parse_datetime(&s).ok()),
            extent,
            geometry_column: row.get(8)?,
            geometry_type: GeometryType::Unknown,
            srs_id: row.get(10)?,
            z: row.get(11)?,
            m: row.get(12)?,
        };
        Ok((entry, geometry_type_name))
    }

    fn resolve((mut entry, geometry_type_name): (Self, String)) -> Result<Self> {
        entry.geometry_type = geometry_type_from_str(&geometry_type_name)?;
        validate_zm(entry.z, entry.m)?;
        Ok(entry)
    }
}

/// Columns of a data table as found in the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TableColumns {
    pub fid_column: String,
    /// Property columns in creation order, without the id and geometry columns.
    pub columns: Vec<ColumnSpec>,
}

/// Everything `register` needs to create a layer.
pub(crate) struct LayerDefinition<'a> {
    pub name: &'a str,
    pub geometry_type: GeometryType,
    pub srs_id: i32,
    /// Inserted into `gpkg_spatial_ref_sys` together with the layer.
    pub missing_srs: Option<SrsDefinition>,
    pub options: &'a LayerOptions,
}

pub(crate) struct SchemaCatalog<'c> {
    conn: &'c Connection,
}

impl<'c> SchemaCatalog<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Whether the mandatory catalog tables exist.
    pub(crate) fn is_present(&self) -> Result<bool> {
        for table in REQUIRED_CATALOG_TABLES {
            if !self.table_exists(table)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Case-insensitive lookup of any table or view with this name.
    pub(crate) fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(SQL_TABLE_EXISTS, [name], |row| row.get(0))?)
    }

    /// Create the data table and its catalog rows atomically.
    pub(crate) fn register(&self, def: &LayerDefinition<'_>) -> Result<CatalogEntry> {
        let options = def.options;
        if self.table_exists(def.name)? {
            return Err(GpkgError::DuplicateName(def.name.to_string()));
        }
        check_column_names(def.name, options)?;

        let mut column_defs = Vec::with_capacity(options.columns.len() + 2);
        column_defs.push(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
            quote_identifier(&options.fid_column)
        ));
        column_defs.push(format!(
            "{} {}",
            quote_identifier(&options.geometry_column),
            geometry_type_to_str(def.geometry_type)
        ));
        for spec in &options.columns {
            column_defs.push(column_definition(spec, false));
        }

        let tx = self.conn.unchecked_transaction()?;
        if let Some(srs) = &def.missing_srs {
            insert_srs(&tx, srs)?;
            tracing::debug!(srs_id = srs.srs_id, "registered spatial reference system");
        }
        tx.execute_batch(&sql_create_table(def.name, &column_defs.join(", ")))?;
        tx.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![
                def.name,
                options.identifier.as_deref().unwrap_or(def.name),
                options.description.as_deref().unwrap_or(""),
                def.srs_id
            ],
        )?;
        tx.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                def.name,
                options.geometry_column,
                geometry_type_to_str(def.geometry_type),
                def.srs_id,
                0i8,
                0i8
            ],
        )?;
        if options.spatial_index {
            execute_rtree_sqls(
                &tx,
                def.name,
                &options.geometry_column,
                &options.fid_column,
            )?;
        }

        let entry = SchemaCatalog::new(&tx)
            .lookup(def.name)?
            .ok_or_else(|| GpkgError::NotFound(def.name.to_string()))?;
        tx.commit()?;
        Ok(entry)
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let mut stmt = self.conn.prepare(&sql_select_catalog_entries(true))?;
        let raw = stmt.query_row([name], CatalogEntry::from_row).optional()?;
        raw.map(CatalogEntry::resolve).transpose()
    }

    /// All feature layers in catalog insertion order.
    pub(crate) fn list_all(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(&sql_select_catalog_entries(false))?;
        let raw = stmt
            .query_map([], CatalogEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(CatalogEntry::resolve).collect()
    }

    /// Drop the data table, its spatial index and its catalog rows atomically.
    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        let entry = self
            .lookup(name)?
            .ok_or_else(|| GpkgError::NotFound(name.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        let has_rtree: bool = tx.query_row(
            SQL_HAS_RTREE_EXTENSION,
            rusqlite::params![entry.table_name, entry.geometry_column],
            |row| row.get(0),
        )?;
        if has_rtree {
            tx.execute_batch(&gpkg_rtree_drop_sql(
                &entry.table_name,
                &entry.geometry_column,
            ))?;
        }
        tx.execute(SQL_DELETE_GPKG_EXTENSIONS, [&entry.table_name])?;
        tx.execute(SQL_DELETE_GPKG_GEOMETRY_COLUMNS, [&entry.table_name])?;
        tx.execute(SQL_DELETE_GPKG_CONTENTS, [&entry.table_name])?;
        // Triggers on the table go away with it.
        tx.execute_batch(&sql_drop_table(&entry.table_name))?;
        tx.commit()?;
        Ok(())
    }

    /// Append a column to a data table.
    ///
    /// Non-nullable columns get a zero default so the engine accepts them.
    pub(crate) fn add_column(&self, table: &str, spec: &ColumnSpec) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&sql_add_column(table, &column_definition(spec, true)))?;
        tx.execute(SQL_TOUCH_GPKG_CONTENTS, [table])?;
        tx.commit()?;
        Ok(())
    }

    /// Grow the stored extent of a layer to cover `envelope`.
    pub(crate) fn update_extent(&self, table: &str, envelope: &Envelope) -> Result<()> {
        self.conn.execute(
            SQL_GROW_GPKG_CONTENTS_EXTENT,
            rusqlite::params![
                table,
                envelope.min_x,
                envelope.min_y,
                envelope.max_x,
                envelope.max_y
            ],
        )?;
        Ok(())
    }

    pub(crate) fn touch(&self, table: &str) -> Result<()> {
        self.conn.execute(SQL_TOUCH_GPKG_CONTENTS, [table])?;
        Ok(())
    }

    /// Read the id column and the property columns of a layer's table.
    pub(crate) fn table_columns(&self, entry: &CatalogEntry) -> Result<TableColumns> {
        let mut stmt = self.conn.prepare(SQL_TABLE_COLUMNS)?;
        let rows = stmt
            .query_map([&entry.table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut fid_column: Option<String> = None;
        let mut columns = Vec::new();
        for (name, declared_type, not_null, pk) in rows {
            if pk != 0 {
                if fid_column.is_some() {
                    return Err(GpkgError::NotAGeopackage(format!(
                        "layer '{}' has a composite primary key",
                        entry.table_name
                    )));
                }
                fid_column = Some(name);
                continue;
            }
            if name == entry.geometry_column {
                continue;
            }
            let column_type = column_type_from_str(&declared_type).ok_or_else(|| {
                GpkgError::UnsupportedColumnType {
                    column: name.clone(),
                    declared_type: declared_type.clone(),
                }
            })?;
            columns.push(ColumnSpec {
                name,
                column_type,
                nullable: !not_null,
            });
        }

        let fid_column = fid_column.ok_or_else(|| {
            GpkgError::NotAGeopackage(format!(
                "layer '{}' has no integer primary key",
                entry.table_name
            ))
        })?;
        Ok(TableColumns {
            fid_column,
            columns,
        })
    }

    /// The SRS row with this id, if the file has one.
    pub(crate) fn spatial_ref(&self, srs_id: i32) -> Result<Option<SrsDefinition>> {
        Ok(self
            .conn
            .query_row(crate::ogc_sql::SQL_SELECT_SRS, [srs_id], SrsDefinition::from_row)
            .optional()?)
    }
}

fn column_definition(spec: &ColumnSpec, with_default: bool) -> String {
    let name = quote_identifier(&spec.name);
    let ty = column_type_to_str(spec.column_type);
    match (spec.nullable, with_default) {
        (true, _) => format!("{name} {ty}"),
        (false, false) => format!("{name} {ty} NOT NULL"),
        (false, true) => format!(
            "{name} {ty} NOT NULL DEFAULT {}",
            column_type_zero_literal(spec.column_type)
        ),
    }
}

// Column names are compared case-insensitively, as the engine does.
fn check_column_names(layer: &str, options: &LayerOptions) -> Result<()> {
    let mut seen: Vec<&str> = vec![options.fid_column.as_str()];
    let all = std::iter::once(options.geometry_column.as_str())
        .chain(options.columns.iter().map(|c| c.name.as_str()));
    for name in all {
        if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return Err(GpkgError::DuplicateField {
                layer: layer.to_string(),
                field: name.to_string(),
            });
        }
        seen.push(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogc_sql::initialize_gpkg;
    use crate::sql_functions::register_spatial_functions;
    use crate::types::ColumnType;

    fn catalog_conn() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;
        Ok(conn)
    }

    fn definition<'a>(name: &'a str, options: &'a LayerOptions) -> LayerDefinition<'a> {
        LayerDefinition {
            name,
            geometry_type: GeometryType::Point,
            srs_id: 4326,
            missing_srs: None,
            options,
        }
    }

    #[test]
    fn register_then_lookup() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default()
            .column(ColumnSpec::new("name", ColumnType::String))
            .column(ColumnSpec::new("population", ColumnType::Integer).not_null());

        let entry = catalog.register(&definition("cities", &options))?;
        assert_eq!(entry.table_name, "cities");
        assert_eq!(entry.identifier.as_deref(), Some("cities"));
        assert_eq!(entry.geometry_column, "geom");
        assert_eq!(entry.geometry_type, GeometryType::Point);
        assert_eq!(entry.srs_id, 4326);
        assert_eq!(entry.extent, None);
        assert!(entry.last_change.is_some());

        let columns = catalog.table_columns(&entry)?;
        assert_eq!(columns.fid_column, "fid");
        assert_eq!(columns.columns, options.columns);

        assert_eq!(catalog.lookup("cities")?, Some(entry));
        assert_eq!(catalog.lookup("towns")?, None);
        Ok(())
    }

    #[test]
    fn register_rejects_taken_names() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default();
        catalog.register(&definition("roads", &options))?;

        for name in ["roads", "ROADS", "gpkg_contents"] {
            assert!(matches!(
                catalog.register(&definition(name, &options)),
                Err(GpkgError::DuplicateName(_))
            ));
        }
        assert_eq!(catalog.list_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn register_rolls_back_on_failure() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        // The spatial index table name is taken, so the layer fails after
        // its data table and catalog rows were written.
        conn.execute_batch("CREATE TABLE rtree_rivers_geom (id INTEGER)")?;
        let options = LayerOptions::default();
        let def = definition("rivers", &options);
        assert!(matches!(
            catalog.register(&def),
            Err(GpkgError::StorageEngineFailure(_))
        ));
        assert!(!catalog.table_exists("rivers")?);
        assert!(catalog.list_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn register_rejects_duplicate_columns() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default()
            .column(ColumnSpec::new("name", ColumnType::String))
            .column(ColumnSpec::new("Name", ColumnType::String));
        assert!(matches!(
            catalog.register(&definition("dups", &options)),
            Err(GpkgError::DuplicateField { .. })
        ));
        let options = LayerOptions::default().column(ColumnSpec::new("fid", ColumnType::Integer));
        assert!(matches!(
            catalog.register(&definition("dups", &options)),
            Err(GpkgError::DuplicateField { .. })
        ));
        assert!(!catalog.table_exists("dups")?);
        Ok(())
    }

    #[test]
    fn list_all_in_insertion_order() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default().spatial_index(false);
        for name in ["zeta", "alpha", "mid"] {
            catalog.register(&definition(name, &options))?;
        }
        let names: Vec<String> = catalog
            .list_all()?
            .into_iter()
            .map(|e| e.table_name)
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        Ok(())
    }

    #[test]
    fn unregister_drops_everything() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default();
        catalog.register(&definition("parcels", &options))?;
        assert!(catalog.table_exists("rtree_parcels_geom")?);

        catalog.unregister("parcels")?;
        assert!(!catalog.table_exists("parcels")?);
        assert!(!catalog.table_exists("rtree_parcels_geom")?);
        assert_eq!(catalog.lookup("parcels")?, None);
        let extensions: i64 =
            conn.query_row("SELECT COUNT(*) FROM gpkg_extensions", [], |row| row.get(0))?;
        assert_eq!(extensions, 0);

        assert!(matches!(
            catalog.unregister("parcels"),
            Err(GpkgError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn unregister_rolls_back_on_failure() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default();
        catalog.register(&definition("wells", &options))?;
        // Fails after the index and the geometry column row were dropped.
        conn.execute_batch(
            "CREATE TRIGGER keep_contents BEFORE DELETE ON gpkg_contents
             BEGIN SELECT RAISE(ABORT, 'contents are locked'); END;",
        )?;

        assert!(matches!(
            catalog.unregister("wells"),
            Err(GpkgError::StorageEngineFailure(_))
        ));
        assert!(catalog.table_exists("wells")?);
        assert!(catalog.table_exists("rtree_wells_geom")?);
        assert!(catalog.lookup("wells")?.is_some());
        let geometry_columns: i64 = conn.query_row(
            "SELECT COUNT(*) FROM gpkg_geometry_columns WHERE table_name = 'wells'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(geometry_columns, 1);
        let extensions: i64 =
            conn.query_row("SELECT COUNT(*) FROM gpkg_extensions", [], |row| row.get(0))?;
        assert!(extensions > 0);

        conn.execute_batch("DROP TRIGGER keep_contents")?;
        catalog.unregister("wells")?;
        assert!(!catalog.table_exists("wells")?);
        Ok(())
    }

    #[test]
    fn extent_grows() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default();
        catalog.register(&definition("sites", &options))?;

        catalog.update_extent("sites", &Envelope::from_point(1.0, 2.0))?;
        catalog.update_extent("sites", &Envelope::from_point(-3.0, 5.0))?;
        let entry = catalog.lookup("sites")?.ok_or(GpkgError::NotFound("sites".into()))?;
        assert_eq!(
            entry.extent,
            Some(Envelope {
                min_x: -3.0,
                min_y: 2.0,
                max_x: 1.0,
                max_y: 5.0,
            })
        );
        Ok(())
    }

    #[test]
    fn add_column_with_default() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default();
        let entry = catalog.register(&definition("wells", &options))?;

        catalog.add_column("wells", &ColumnSpec::new("depth", ColumnType::Real).not_null())?;
        catalog.add_column("wells", &ColumnSpec::new("drilled", ColumnType::Date))?;
        let columns = catalog.table_columns(&entry)?.columns;
        assert_eq!(
            columns,
            vec![
                ColumnSpec::new("depth", ColumnType::Real).not_null(),
                ColumnSpec::new("drilled", ColumnType::Date),
            ]
        );
        Ok(())
    }

    #[test]
    fn unsupported_column_type() -> Result<()> {
        let conn = catalog_conn()?;
        let catalog = SchemaCatalog::new(&conn);
        let options = LayerOptions::default().spatial_index(false);
        let entry = catalog.register(&definition("odd", &options))?;
        conn.execute_batch(r#"ALTER TABLE "odd" ADD COLUMN "weird" JSONB"#)?;
        assert!(matches!(
            catalog.table_columns(&entry),
            Err(GpkgError::UnsupportedColumnType { .. })
        ));
        Ok(())
    }
}
