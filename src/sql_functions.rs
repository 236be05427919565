use crate::error::Result;
use crate::gpkg::geometry::{bounds, decode, decode_header};
use crate::types::Envelope;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};

/// Register the spatial SQL functions used by the R-tree index triggers.
///
/// Every connection opened through [`crate::Gpkg`] has them; call this on your
/// own connection before writing to a GeoPackage table that carries an R-tree.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use gpkg_store::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), gpkg_store::GpkgError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |b| b.min_x)?;
    register_bounds_component(conn, "ST_MinY", |b| b.min_y)?;
    register_bounds_component(conn, "ST_MaxX", |b| b.max_x)?;
    register_bounds_component(conn, "ST_MaxY", |b| b.max_y)?;
    register_st_isempty(conn)?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            if matches!(ctx.get_raw(0), ValueRef::Null) {
                return Ok(None);
            }
            Ok(Some(i64::from(bounds_from_ctx(ctx)?.is_none())))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Envelope) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        Ok(bounds_from_ctx(ctx)?.map(f))
    })?;
    Ok(())
}

/// Bounds of the blob in argument 0; `None` for NULL and empty geometries.
fn bounds_from_ctx(ctx: &Context<'_>) -> std::result::Result<Option<Envelope>, Error> {
    match ctx.get_raw(0) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            bounds_from_blob(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}

// The header envelope, when present, saves decoding the WKB body.
fn bounds_from_blob(blob: &[u8]) -> Result<Option<Envelope>> {
    let header = decode_header(blob)?;
    if header.empty {
        return Ok(None);
    }
    if let Some(envelope) = header.envelope {
        return Ok(Some(envelope));
    }
    Ok(bounds(&decode(blob)?))
}
