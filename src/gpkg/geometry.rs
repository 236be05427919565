//! GeoPackage binary geometry codec.
//!
//! A blob is a small header (`GP` magic, version, flags, `srs_id`, optional
//! envelope) followed by a WKB body.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format

use crate::error::{GpkgError, Result};
use crate::types::{Envelope, GeometryType};
use geo_traits::to_geo::{
    ToGeoLine, ToGeoLineString, ToGeoMultiLineString, ToGeoMultiPolygon, ToGeoPoint,
    ToGeoPolygon, ToGeoRect, ToGeoTriangle,
};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};
use geo_types::{Geometry, GeometryCollection, LineString, MultiPoint, Point};
use wkb::reader::Wkb;

const MAGIC: [u8; 2] = *b"GP";
const VERSION: u8 = 0;
const HEADER_LEN: usize = 8;

const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_MASK: u8 = 0b0000_1110;
const FLAG_EMPTY: u8 = 0b0001_0000;
const FLAG_EXTENDED: u8 = 0b0010_0000;
const ENVELOPE_XY: u8 = 0b0000_0010;

const MAX_NESTING: usize = 32;

/// Decoded GeoPackage binary header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryHeader {
    pub srs_id: i32,
    /// XY part of the stored envelope, if any.
    pub envelope: Option<Envelope>,
    pub empty: bool,
    wkb_offset: usize,
}

fn malformed(msg: impl Into<String>) -> GpkgError {
    GpkgError::MalformedGeometry(msg.into())
}

/// Encode a geometry into a GeoPackage binary blob.
///
/// `Line`, `Rect` and `Triangle` are stored as `LineString` / `Polygon`.
/// The header is little endian; points carry no envelope, other non-empty
/// geometries carry an XY envelope.
pub fn encode(geometry: &Geometry<f64>, srs_id: i32) -> Result<Vec<u8>> {
    let geometry = normalize(geometry.clone());
    let bounds = bounds(&geometry);

    let mut flags = FLAG_LITTLE_ENDIAN;
    let envelope = match (&geometry, bounds) {
        (_, None) => {
            flags |= FLAG_EMPTY;
            None
        }
        (Geometry::Point(_), Some(_)) => None,
        (_, Some(envelope)) => {
            flags |= ENVELOPE_XY;
            Some(envelope)
        }
    };

    let mut buf = Vec::with_capacity(HEADER_LEN + 32 + 64);
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.push(flags);
    buf.extend_from_slice(&srs_id.to_le_bytes());
    if let Some(e) = envelope {
        for v in [e.min_x, e.max_x, e.min_y, e.max_y] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    wkb::writer::write_geometry(&mut buf, &geometry, &Default::default())
        .map_err(|e| malformed(format!("failed to write WKB: {e}")))?;
    Ok(buf)
}

/// Decode a GeoPackage binary blob.
///
/// Z and M ordinates are dropped. An empty point decodes to NaN coordinates.
pub fn decode(blob: &[u8]) -> Result<Geometry<f64>> {
    let header = decode_header(blob)?;
    let body = &blob[header.wkb_offset..];
    let wkb = wkb::reader::read_wkb(body).map_err(|e| malformed(format!("invalid WKB: {e}")))?;
    let trailing = body.len() - wkb.buf().len();
    if trailing > 0 {
        return Err(malformed(format!("{trailing} trailing bytes after WKB body")));
    }
    to_geo(&wkb, 0)
}

/// Parse only the header of a GeoPackage binary blob.
pub fn decode_header(blob: &[u8]) -> Result<GeometryHeader> {
    if blob.len() < HEADER_LEN {
        return Err(malformed(format!(
            "blob of {} bytes is shorter than the header",
            blob.len()
        )));
    }
    if blob[0..2] != MAGIC {
        return Err(malformed("missing GP magic"));
    }
    if blob[2] != VERSION {
        return Err(malformed(format!("unsupported version {}", blob[2])));
    }
    let flags = blob[3];
    if flags & FLAG_EXTENDED != 0 {
        return Err(malformed("extended geometry types are not supported"));
    }
    let little_endian = flags & FLAG_LITTLE_ENDIAN != 0;

    let envelope_len: usize = match (flags & FLAG_ENVELOPE_MASK) >> 1 {
        0 => 0,
        1 => 32,     // [minx, maxx, miny, maxy]
        2 | 3 => 48, // + [minz, maxz] or [minm, maxm]
        4 => 64,     // + [minz, maxz, minm, maxm]
        code => return Err(malformed(format!("invalid envelope code {code}"))),
    };
    let wkb_offset = HEADER_LEN + envelope_len;
    if blob.len() < wkb_offset {
        return Err(malformed(format!(
            "blob of {} bytes is shorter than its {envelope_len}-byte envelope",
            blob.len()
        )));
    }

    let mut srs_id = [0u8; 4];
    srs_id.copy_from_slice(&blob[4..8]);
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_id)
    } else {
        i32::from_be_bytes(srs_id)
    };

    let envelope = (envelope_len > 0)
        .then(|| {
            let read = |i: usize| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&blob[HEADER_LEN + i * 8..HEADER_LEN + (i + 1) * 8]);
                if little_endian {
                    f64::from_le_bytes(bytes)
                } else {
                    f64::from_be_bytes(bytes)
                }
            };
            [read(0), read(1), read(2), read(3)]
        })
        .filter(|values| !values.iter().any(|v| v.is_nan()))
        .map(|[min_x, max_x, min_y, max_y]| Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
        });

    Ok(GeometryHeader {
        srs_id,
        envelope,
        empty: flags & FLAG_EMPTY != 0,
        wkb_offset,
    })
}

fn to_geo(wkb: &Wkb<'_>, depth: usize) -> Result<Geometry<f64>> {
    use geo_traits::GeometryType as GeoType;

    if depth > MAX_NESTING {
        return Err(malformed(format!(
            "geometry nesting deeper than {MAX_NESTING} levels"
        )));
    }
    let geometry = match wkb.as_type() {
        GeoType::Point(point) => Geometry::Point(to_point(point)),
        GeoType::LineString(line) => Geometry::LineString(line.to_line_string()),
        GeoType::Polygon(poly) => Geometry::Polygon(poly.to_polygon()),
        GeoType::MultiPoint(multi) => Geometry::MultiPoint(MultiPoint::new(
            multi.points().map(|point| to_point(&point)).collect(),
        )),
        GeoType::MultiLineString(multi) => Geometry::MultiLineString(multi.to_multi_line_string()),
        GeoType::MultiPolygon(multi) => Geometry::MultiPolygon(multi.to_multi_polygon()),
        GeoType::GeometryCollection(collection) => {
            let members = collection
                .geometries()
                .map(|member| to_geo(member, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Geometry::GeometryCollection(GeometryCollection::new_from(members))
        }
        GeoType::Rect(rect) => Geometry::Rect(rect.to_rect()),
        GeoType::Triangle(triangle) => Geometry::Triangle(triangle.to_triangle()),
        GeoType::Line(line) => Geometry::Line(line.to_line()),
    };
    Ok(geometry)
}

// geo-types has no empty point; keep the NaN coordinates WKB uses for it.
fn to_point<P: PointTrait<T = f64>>(point: &P) -> Point<f64> {
    point
        .try_to_point()
        .unwrap_or_else(|| Point::new(f64::NAN, f64::NAN))
}

/// Replace the `geo_types`-only variants with their OGC counterparts.
pub(crate) fn normalize(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Line(line) => Geometry::LineString(LineString::new(vec![line.start, line.end])),
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(triangle) => Geometry::Polygon(triangle.to_polygon()),
        Geometry::GeometryCollection(collection) => Geometry::GeometryCollection(
            GeometryCollection::new_from(collection.0.into_iter().map(normalize).collect()),
        ),
        other => other,
    }
}

/// XY bounding box of a geometry; `None` when it has no (non-NaN) coordinate.
pub(crate) fn bounds<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Envelope> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Envelope> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = self::bounds(&sub_geom) {
                    match &mut bounds {
                        Some(existing) => existing.merge(&sub_bounds),
                        None => bounds = Some(sub_bounds),
                    }
                }
            }
        }
        GeoType::Rect(rect) => {
            add_coord(&mut bounds, &rect.min());
            add_coord(&mut bounds, &rect.max());
        }
        GeoType::Triangle(triangle) => {
            add_coord(&mut bounds, &triangle.first());
            add_coord(&mut bounds, &triangle.second());
            add_coord(&mut bounds, &triangle.third());
        }
        GeoType::Line(line) => {
            add_coord(&mut bounds, &line.start());
            add_coord(&mut bounds, &line.end());
        }
    }

    bounds
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Envelope>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Envelope>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Envelope>, coord: &C) {
    let (x, y) = coord.x_y();
    // WKB has no empty point; writers use NaN coordinates instead.
    if x.is_nan() || y.is_nan() {
        return;
    }
    match bounds {
        Some(existing) => existing.expand_to(x, y),
        None => *bounds = Some(Envelope::from_point(x, y)),
    }
}
