// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

use crate::srs::SrsDefinition;

/// "GPKG" in ASCII, the application id of GeoPackage 1.2 and later.
pub(crate) const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;
/// "GP10" and "GP11", written by GeoPackage 1.0 / 1.1 producers.
pub(crate) const GP10_APPLICATION_ID: i32 = 0x4750_3130;
pub(crate) const GP11_APPLICATION_ID: i32 = 0x4750_3131;
pub(crate) const GPKG_USER_VERSION: i32 = 10400;

// One row per user table; the layer catalog proper.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// Extension registrations; only the R-tree index writes here.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

// Geometry column, declared type and SRS of each feature table.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// Referenced by both gpkg_contents and gpkg_geometry_columns.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// gpkg_tile_matrix_set / gpkg_tile_matrix: tile pyramid metadata. Raster
// content is not handled here; the tables exist so the file is a conforming
// GeoPackage for other readers.
pub(crate) const SQL_GPKG_TILE_MATRIX_SET: &str = "
CREATE TABLE gpkg_tile_matrix_set (
  table_name TEXT NOT NULL PRIMARY KEY,
  srs_id INTEGER NOT NULL,
  min_x DOUBLE NOT NULL,
  min_y DOUBLE NOT NULL,
  max_x DOUBLE NOT NULL,
  max_y DOUBLE NOT NULL,
  CONSTRAINT fk_gtms_table_name FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gtms_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

pub(crate) const SQL_GPKG_TILE_MATRIX: &str = "
CREATE TABLE gpkg_tile_matrix (
  table_name TEXT NOT NULL,
  zoom_level INTEGER NOT NULL,
  matrix_width INTEGER NOT NULL,
  matrix_height INTEGER NOT NULL,
  tile_width INTEGER NOT NULL,
  tile_height INTEGER NOT NULL,
  pixel_x_size DOUBLE NOT NULL,
  pixel_y_size DOUBLE NOT NULL,
  CONSTRAINT pk_ttm PRIMARY KEY (table_name, zoom_level),
  CONSTRAINT fk_tmm_table_name FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name)
);
";

/// Tables that must exist for a file to be treated as a GeoPackage with vector content.
pub(crate) const REQUIRED_CATALOG_TABLES: [&str; 3] = [
    "gpkg_spatial_ref_sys",
    "gpkg_contents",
    "gpkg_geometry_columns",
];

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND lower(name) = lower(?1))";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, srs_id)
VALUES
  (?1, 'features', ?2, ?3, ?4)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

const SQL_SELECT_CATALOG_ENTRIES: &str = "
SELECT c.table_name, c.identifier, c.description, c.last_change,
       c.min_x, c.min_y, c.max_x, c.max_y,
       g.column_name, g.geometry_type_name, g.srs_id, g.z, g.m
FROM gpkg_contents c
JOIN gpkg_geometry_columns g ON g.table_name = c.table_name
WHERE lower(c.data_type) = 'features'
";

pub(crate) fn sql_select_catalog_entries(by_name: bool) -> String {
    if by_name {
        format!("{SQL_SELECT_CATALOG_ENTRIES} AND c.table_name = ?1")
    } else {
        format!("{SQL_SELECT_CATALOG_ENTRIES} ORDER BY c.rowid")
    }
}

pub(crate) const SQL_DELETE_GPKG_CONTENTS: &str = "DELETE FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_DELETE_GPKG_GEOMETRY_COLUMNS: &str =
    "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1";

pub(crate) const SQL_DELETE_GPKG_EXTENSIONS: &str =
    "DELETE FROM gpkg_extensions WHERE table_name = ?1";

pub(crate) const SQL_TOUCH_GPKG_CONTENTS: &str = "
UPDATE gpkg_contents
SET last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now')
WHERE table_name = ?1
";

// NULL-safe min/max so the first write initializes the extent.
pub(crate) const SQL_GROW_GPKG_CONTENTS_EXTENT: &str = "
UPDATE gpkg_contents SET
  min_x = min(coalesce(min_x, ?2), ?2),
  min_y = min(coalesce(min_y, ?3), ?3),
  max_x = max(coalesce(max_x, ?4), ?4),
  max_y = max(coalesce(max_y, ?5), ?5),
  last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now')
WHERE table_name = ?1
";

pub(crate) const SQL_SRS_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)";

pub(crate) const SQL_INSERT_SRS: &str = "
INSERT INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_SRS: &str = "
SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description
FROM gpkg_spatial_ref_sys
WHERE srs_id = ?1
";

pub(crate) const SQL_TABLE_COLUMNS: &str =
    r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1) ORDER BY cid"#;

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {} ({})", quote_identifier(layer_name), column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!("DROP TABLE {}", quote_identifier(layer_name))
}

pub(crate) fn sql_add_column(layer_name: &str, column_def: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_identifier(layer_name),
        column_def
    )
}

pub(crate) fn sql_select_features<'a, I>(
    layer_name: &'a str,
    geometry_column: &'a str,
    primary_key_column: &'a str,
    other_columns: I,
    filter: &str,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns = vec![
        quote_identifier(geometry_column),
        quote_identifier(primary_key_column),
    ];
    columns.extend(other_columns.into_iter().map(quote_identifier));

    format!(
        "SELECT {} FROM {} {filter}",
        columns.join(", "),
        quote_identifier(layer_name),
    )
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &[String]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(layer_name));
    }
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(layer_name),
        columns.join(", "),
        placeholders
    )
}

pub(crate) fn sql_update_feature(
    layer_name: &str,
    primary_key_column: &str,
    columns: &[String],
) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("{}=?{}", name, idx + 1))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}=?{}",
        quote_identifier(layer_name),
        assignments,
        quote_identifier(primary_key_column),
        columns.len() + 1
    )
}

pub(crate) fn sql_delete_feature(layer_name: &str, primary_key_column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {}=?1",
        quote_identifier(layer_name),
        quote_identifier(primary_key_column)
    )
}

pub(crate) fn sql_feature_exists(layer_name: &str, primary_key_column: &str) -> String {
    format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {}=?1)",
        quote_identifier(layer_name),
        quote_identifier(primary_key_column)
    )
}

pub(crate) fn sql_count_features(layer_name: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_identifier(layer_name))
}

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA application_id = {GPKG_APPLICATION_ID}; PRAGMA user_version = {GPKG_USER_VERSION};"
    ))?;
    conn.execute_batch(SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    conn.execute_batch(SQL_GPKG_CONTENTS)?;
    conn.execute_batch(SQL_GPKG_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_GPKG_TILE_MATRIX_SET)?;
    conn.execute_batch(SQL_GPKG_TILE_MATRIX)?;
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

pub(crate) fn insert_srs(conn: &rusqlite::Connection, srs: &SrsDefinition) -> rusqlite::Result<()> {
    conn.execute(
        SQL_INSERT_SRS,
        rusqlite::params![
            srs.srs_name,
            srs.srs_id,
            srs.organization,
            srs.organization_coordsys_id,
            srs.definition,
            srs.description
        ],
    )?;
    Ok(())
}

// The three rows every GeoPackage must contain.
fn register_default_srs_ids(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    for srs in [
        SrsDefinition::epsg_4326(),
        SrsDefinition::undefined_cartesian(),
        SrsDefinition::undefined_geographic(),
    ] {
        insert_srs(conn, &srs)?;
    }
    Ok(())
}

// cf. https://www.geopackage.org/spec140/index.html#extension_rtree
pub(crate) const SQL_INSERT_RTREE_EXTENSION: &str = "
INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope)
VALUES (?1, ?2, 'gpkg_rtree_index', 'http://www.geopackage.org/spec120/#extension_rtree', 'write-only')
";

pub(crate) const SQL_HAS_RTREE_EXTENSION: &str = "
SELECT EXISTS(SELECT 1 FROM gpkg_extensions
  WHERE table_name = ?1 AND column_name = ?2 AND extension_name = 'gpkg_rtree_index')
";

pub(crate) fn rtree_table_name(table: &str, geom_column: &str) -> String {
    format!("rtree_{table}_{geom_column}")
}

pub(crate) fn gpkg_rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE {} USING rtree(id, minx, maxx, miny, maxy);",
        quote_identifier(&rtree_table_name(table, geom_column)),
    )
}

pub(crate) fn gpkg_rtree_drop_sql(table: &str, geom_column: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {};",
        quote_identifier(&rtree_table_name(table, geom_column)),
    )
}

pub(crate) fn gpkg_rtree_triggers_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    let r = quote_identifier(&rtree_table_name(table, geom_column));
    let base = rtree_table_name(table, geom_column);
    let trigger = |suffix: &str| quote_identifier(&format!("{base}_{suffix}"));
    let t = quote_identifier(table);
    let c = quote_identifier(geom_column);
    let i = quote_identifier(id_column);

    format!(
        "CREATE TRIGGER {insert} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update2} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;

CREATE TRIGGER {update4} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END;

CREATE TRIGGER {update5} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update6} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END;

CREATE TRIGGER {update7} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {delete} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;",
        insert = trigger("insert"),
        update2 = trigger("update2"),
        update4 = trigger("update4"),
        update5 = trigger("update5"),
        update6 = trigger("update6"),
        update7 = trigger("update7"),
        delete = trigger("delete"),
    )
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> rusqlite::Result<()> {
    conn.execute_batch(&gpkg_rtree_create_sql(table, geom_column))?;
    conn.execute_batch(&gpkg_rtree_triggers_sql(table, geom_column, id_column))?;
    conn.execute(SQL_INSERT_RTREE_EXTENSION, rusqlite::params![table, geom_column])?;
    Ok(())
}
