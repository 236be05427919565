use crate::error::GpkgError;
use crate::types::{ColumnType, GeometryType};

#[inline]
pub(crate) fn geometry_type_to_str(geometry_type: GeometryType) -> &'static str {
    match geometry_type {
        GeometryType::Unknown => "GEOMETRY",
        GeometryType::Point => "POINT",
        GeometryType::LineString => "LINESTRING",
        GeometryType::Polygon => "POLYGON",
        GeometryType::MultiPoint => "MULTIPOINT",
        GeometryType::MultiLineString => "MULTILINESTRING",
        GeometryType::MultiPolygon => "MULTIPOLYGON",
        GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
    }
}

pub(crate) fn geometry_type_from_str(name: &str) -> Result<GeometryType, GpkgError> {
    let geometry_type = match name.to_ascii_uppercase().as_str() {
        "GEOMETRY" => GeometryType::Unknown,
        "POINT" => GeometryType::Point,
        "LINESTRING" => GeometryType::LineString,
        "POLYGON" => GeometryType::Polygon,
        "MULTIPOINT" => GeometryType::MultiPoint,
        "MULTILINESTRING" => GeometryType::MultiLineString,
        "MULTIPOLYGON" => GeometryType::MultiPolygon,
        "GEOMETRYCOLLECTION" => GeometryType::GeometryCollection,
        _ => return Err(GpkgError::UnsupportedGeometryType(name.to_string())),
    };
    Ok(geometry_type)
}

/// Validate the `z` / `m` flags of `gpkg_geometry_columns`.
// 0 prohibited, 1 mandatory, 2 optional. Geometries are read as XY either
// way, so the flags are only range-checked.
#[inline]
pub(crate) fn validate_zm(z: i8, m: i8) -> Result<(), GpkgError> {
    if (0..=2).contains(&z) && (0..=2).contains(&m) {
        Ok(())
    } else {
        Err(GpkgError::InvalidDimension { z, m })
    }
}

#[inline]
pub(crate) fn column_type_to_str(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::String => "TEXT",
        ColumnType::Binary => "BLOB",
        ColumnType::Date => "DATE",
        ColumnType::DateTime => "DATETIME",
    }
}

/// SQL literal used as the default of a `NOT NULL` column added to an existing table.
#[inline]
pub(crate) fn column_type_zero_literal(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "0",
        ColumnType::Real => "0.0",
        ColumnType::String => "''",
        ColumnType::Binary => "x''",
        ColumnType::Date => "'1970-01-01'",
        ColumnType::DateTime => "'1970-01-01T00:00:00.000Z'",
    }
}

// Declared types allowed by the GeoPackage data type table, plus the aliases
// older writers use. TEXT(n) and BLOB(n) carry a maximum length that is not
// enforced.
pub(crate) fn column_type_from_str(declared: &str) -> Option<ColumnType> {
    let base = declared.split('(').next().unwrap_or_default().trim();
    match base.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "BOOLEAN" => {
            Some(ColumnType::Integer)
        }
        "REAL" | "DOUBLE" | "FLOAT" => Some(ColumnType::Real),
        "TEXT" => Some(ColumnType::String),
        "BLOB" => Some(ColumnType::Binary),
        "DATE" => Some(ColumnType::Date),
        "DATETIME" => Some(ColumnType::DateTime),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_type_names_roundtrip() -> crate::Result<()> {
        for ty in [
            GeometryType::Unknown,
            GeometryType::Point,
            GeometryType::LineString,
            GeometryType::Polygon,
            GeometryType::MultiPoint,
            GeometryType::MultiLineString,
            GeometryType::MultiPolygon,
            GeometryType::GeometryCollection,
        ] {
            assert_eq!(geometry_type_from_str(geometry_type_to_str(ty))?, ty);
        }
        assert_eq!(geometry_type_from_str("point")?, GeometryType::Point);
        assert!(matches!(
            geometry_type_from_str("CIRCULARSTRING"),
            Err(GpkgError::UnsupportedGeometryType(_))
        ));
        Ok(())
    }

    #[test]
    fn declared_column_types() {
        assert_eq!(column_type_from_str("TEXT(32)"), Some(ColumnType::String));
        assert_eq!(column_type_from_str("blob(8)"), Some(ColumnType::Binary));
        assert_eq!(column_type_from_str("BOOLEAN"), Some(ColumnType::Integer));
        assert_eq!(column_type_from_str("DOUBLE"), Some(ColumnType::Real));
        assert_eq!(column_type_from_str("DATETIME"), Some(ColumnType::DateTime));
        assert_eq!(column_type_from_str("POINT"), None);
    }

    #[test]
    fn zm_flags() {
        assert!(validate_zm(0, 0).is_ok());
        assert!(validate_zm(2, 1).is_ok());
        assert!(matches!(
            validate_zm(3, 0),
            Err(GpkgError::InvalidDimension { z: 3, m: 0 })
        ));
    }
}
