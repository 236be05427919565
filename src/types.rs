use crate::error::GpkgError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};

/// Storage type of a property column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Real,
    String,
    Binary,
    Date,
    DateTime,
}

impl ColumnType {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
        }
    }

    /// Whether a value of this variant may be stored in a column of this type.
    pub(crate) fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Real, Value::Real(_) | Value::Integer(_))
                | (ColumnType::String, Value::String(_))
                | (ColumnType::Binary, Value::Binary(_))
                | (ColumnType::Date, Value::Date(_))
                | (ColumnType::DateTime, Value::DateTime(_))
        )
    }
}

/// Definition of a single property column of a layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSpec {
    /// A nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Mark the column as `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Geometry type declared for a layer.
///
/// `Unknown` is stored as `GEOMETRY` and accepts every kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GeometryType {
    #[default]
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    /// The geometry type of an in-memory geometry, after normalization.
    pub fn of(geometry: &geo_types::Geometry<f64>) -> Self {
        use geo_types::Geometry;
        match geometry {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Line(_) | Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                GeometryType::Polygon
            }
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }

}

/// Axis-aligned bounding box in layer coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub(crate) fn from_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub(crate) fn expand_to(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub(crate) fn merge(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }
}

/// Owned dynamic value of a feature property.
///
/// The variant set is closed and mirrors `ColumnType`; `Null` stands for an
/// unset or SQL `NULL` value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }

    /// Fail with `ValueOutOfRange` for values the text encoding of dates
    /// cannot hold: years outside 0..=9999 and sub-millisecond precision.
    pub(crate) fn check_storable(&self) -> Result<(), GpkgError> {
        let storable = match self {
            Value::Date(d) => (0..=9999).contains(&d.year()),
            Value::DateTime(dt) => {
                (0..=9999).contains(&dt.year()) && dt.nanosecond() % 1_000_000 == 0
            }
            _ => true,
        };
        if storable {
            Ok(())
        } else {
            Err(GpkgError::ValueOutOfRange {
                target: self.type_name(),
            })
        }
    }

    /// Read a stored value for a column of the given type.
    pub(crate) fn from_sql(
        value_ref: ValueRef<'_>,
        column_type: ColumnType,
        idx: usize,
    ) -> rusqlite::Result<Self> {
        let conversion_error = |err: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(idx, value_ref.data_type(), err)
        };

        let value = match (value_ref, column_type) {
            (ValueRef::Null, _) => Value::Null,
            (ValueRef::Integer(i), ColumnType::Real) => Value::Real(i as f64),
            (ValueRef::Integer(i), _) => Value::Integer(i),
            (ValueRef::Real(f), _) => Value::Real(f),
            (ValueRef::Blob(b), _) => Value::Binary(b.to_vec()),
            (ValueRef::Text(bytes), column_type) => {
                let s = std::str::from_utf8(bytes).map_err(|e| conversion_error(e.into()))?;
                match column_type {
                    ColumnType::Date => {
                        Value::Date(parse_date(s).map_err(|e| conversion_error(e.into()))?)
                    }
                    ColumnType::DateTime => Value::DateTime(
                        parse_datetime(s).map_err(|e| conversion_error(e.into()))?,
                    ),
                    _ => Value::String(s.to_string()),
                }
            }
        };
        Ok(value)
    }
}

pub(crate) fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// cf. https://www.geopackage.org/spec140/index.html#_data_types
pub(crate) fn format_datetime(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_date(s: &str) -> chrono::ParseResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

pub(crate) fn parse_datetime(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(datetime) => Ok(datetime.with_timezone(&Utc)),
        // Some writers omit the zone designator or use a space separator.
        Err(err) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .map(|naive| naive.and_utc())
            .map_err(|_| err),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(format_date(d))),
            Value::DateTime(dt) => ToSqlOutput::Owned(SqlValue::Text(format_datetime(dt))),
        };
        Ok(output)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

fn mismatch(expected: &'static str, value: &Value) -> GpkgError {
    GpkgError::ValueTypeMismatch {
        expected,
        actual: value.type_name(),
    }
}

impl TryFrom<Value> for i64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let i: i64 = value.try_into()?;
        i32::try_from(i).map_err(|_| GpkgError::ValueOutOfRange { target: "i32" })
    }
}

impl TryFrom<Value> for bool {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(_) => Err(GpkgError::ValueOutOfRange { target: "bool" }),
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(mismatch("real", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Binary(b) => Ok(b),
            other => Err(mismatch("binary", &other)),
        }
    }
}

impl TryFrom<Value> for NaiveDate {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(mismatch("date", &other)),
        }
    }
}

impl TryFrom<Value> for DateTime<Utc> {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            other => Err(mismatch("datetime", &other)),
        }
    }
}

impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = GpkgError>,
{
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(None),
            other => T::try_from(other).map(Some),
        }
    }
}
