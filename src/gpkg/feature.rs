use crate::error::{GpkgError, Result};
use crate::types::Value;
use geo_types::Geometry;

/// A single feature: an optional id, an optional geometry and named values.
///
/// Field order is the order in which values were set; features read from a
/// layer carry every schema field in schema order, `Value::Null` included.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpkgFeature {
    id: Option<i64>,
    geometry: Option<Geometry<f64>>,
    fields: Vec<(String, Value)>,
}

impl GpkgFeature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_geometry(mut self, geometry: impl Into<Geometry<f64>>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// The feature id; `None` until the feature was written or read.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: Option<Geometry<f64>>) {
        self.geometry = geometry;
    }

    pub fn take_geometry(&mut self) -> Option<Geometry<f64>> {
        self.geometry.take()
    }

    /// Set a value, replacing any previous value of the same field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Read a field and convert it, e.g. `feature.field_as::<Option<i64>>("count")`.
    pub fn field_as<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = GpkgError>,
    {
        let value = self
            .field(name)
            .ok_or_else(|| GpkgError::NotFound(format!("field '{name}'")))?;
        T::try_from(value.clone())
    }

    pub fn field_by_index(&self, idx: usize) -> Option<&Value> {
        self.fields.get(idx).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn from_parts(
        id: i64,
        geometry: Option<Geometry<f64>>,
        fields: Vec<(String, Value)>,
    ) -> Self {
        Self {
            id: Some(id),
            geometry,
            fields,
        }
    }
}
