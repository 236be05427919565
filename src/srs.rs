use crate::error::{GpkgError, Result};

const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

const EPSG3857_WKT: &str = r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH],EXTENSION["PROJ4","+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs"],AUTHORITY["EPSG","3857"]]"#;

/// One row of `gpkg_spatial_ref_sys`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrsDefinition {
    pub srs_name: String,
    pub srs_id: i32,
    pub organization: String,
    pub organization_coordsys_id: i32,
    /// WKT definition, or `undefined` for the reserved ids.
    pub definition: String,
    pub description: Option<String>,
}

impl SrsDefinition {
    pub fn epsg_4326() -> Self {
        Self {
            srs_name: "WGS 84".to_string(),
            srs_id: 4326,
            organization: "EPSG".to_string(),
            organization_coordsys_id: 4326,
            definition: EPSG4326_WKT.to_string(),
            description: Some("WGS 84".to_string()),
        }
    }

    pub fn epsg_3857() -> Self {
        Self {
            srs_name: "WGS 84 / Pseudo-Mercator".to_string(),
            srs_id: 3857,
            organization: "EPSG".to_string(),
            organization_coordsys_id: 3857,
            definition: EPSG3857_WKT.to_string(),
            description: Some("Web Mercator / Pseudo-Mercator (EPSG:3857)".to_string()),
        }
    }

    /// The reserved `-1` row.
    pub fn undefined_cartesian() -> Self {
        Self {
            srs_name: "Undefined Cartesian SRS".to_string(),
            srs_id: -1,
            organization: "NONE".to_string(),
            organization_coordsys_id: -1,
            definition: "undefined".to_string(),
            description: Some("undefined Cartesian coordinate reference system".to_string()),
        }
    }

    /// The reserved `0` row.
    pub fn undefined_geographic() -> Self {
        Self {
            srs_name: "Undefined geographic SRS".to_string(),
            srs_id: 0,
            organization: "NONE".to_string(),
            organization_coordsys_id: 0,
            definition: "undefined".to_string(),
            description: Some("undefined geographic coordinate reference system".to_string()),
        }
    }

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            srs_name: row.get(0)?,
            srs_id: row.get(1)?,
            organization: row.get(2)?,
            organization_coordsys_id: row.get(3)?,
            definition: row.get(4)?,
            description: row.get(5)?,
        })
    }
}

/// Resolves an `srs_id` that is not yet stored in the GeoPackage into a full
/// definition, so that layers can reference it.
///
/// `gpkg_spatial_ref_sys` needs the WKT of every referenced SRS. Implement this
/// to plug in an authority database; the default only knows a handful of ids.
pub trait SrsRegistry: Send + Sync {
    fn resolve(&self, srs_id: i32) -> Result<SrsDefinition>;
}

/// Knows EPSG:4326, EPSG:3857 and the reserved ids `0` and `-1`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinSrsRegistry;

impl SrsRegistry for BuiltinSrsRegistry {
    fn resolve(&self, srs_id: i32) -> Result<SrsDefinition> {
        match srs_id {
            4326 => Ok(SrsDefinition::epsg_4326()),
            3857 => Ok(SrsDefinition::epsg_3857()),
            0 => Ok(SrsDefinition::undefined_geographic()),
            -1 => Ok(SrsDefinition::undefined_cartesian()),
            _ => Err(GpkgError::UnknownSrs { srs_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_known_ids() -> Result<()> {
        let registry = BuiltinSrsRegistry;
        assert_eq!(registry.resolve(3857)?.organization_coordsys_id, 3857);
        assert_eq!(registry.resolve(-1)?.definition, "undefined");
        assert!(matches!(
            registry.resolve(2193),
            Err(GpkgError::UnknownSrs { srs_id: 2193 })
        ));
        Ok(())
    }
}
