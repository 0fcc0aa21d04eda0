//! Typed access to host-owned state.
//!
//! The host exposes the internals a render pass needs as a set of named,
//! dynamically typed fields. Reads are checked against the concrete type the
//! caller expects; a mismatch means the host is not the version this renderer
//! was built against and is reported as a fatal extraction error.

use std::any::{type_name, Any};
use std::fmt;

use hashbrown::HashMap;
use thiserror::Error;

/// Failure to read a field of host state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostStateError {
    /// The host does not expose the field at all.
    #[error("host field `{field}` not found; is the host an incompatible version?")]
    MissingField { field: String },

    /// The field exists but holds a value of another type.
    #[error(
        "host field `{field}` was of type `{actual}`, expected type `{expected}`; \
         is the host an incompatible version?"
    )]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
}

struct HostField {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Named, dynamically typed fields exposed by a host.
#[derive(Default)]
pub struct HostFields {
    fields: HashMap<String, HostField>,
}

impl HostFields {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a field, replacing any previous value with the same name.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.fields.insert(
            name.into(),
            HostField {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns true if a field with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Name of the concrete type stored under `name`.
    pub fn type_name_of(&self, name: &str) -> Option<&'static str> {
        self.fields.get(name).map(|field| field.type_name)
    }

    /// Number of exposed fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no fields are exposed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow a field as `T`.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T, HostStateError> {
        let field = self.field(name)?;
        field
            .value
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch::<T>(name, field.type_name))
    }

    /// Mutably borrow a field as `T`.
    pub fn get_mut<T: Any>(&mut self, name: &str) -> Result<&mut T, HostStateError> {
        let field = self.fields.get_mut(name).ok_or_else(|| missing(name))?;
        let actual = field.type_name;
        field
            .value
            .downcast_mut::<T>()
            .ok_or_else(|| mismatch::<T>(name, actual))
    }

    /// Clone a field out as `T`.
    pub fn cloned<T: Any + Clone>(&self, name: &str) -> Result<T, HostStateError> {
        self.get::<T>(name).cloned()
    }

    fn field(&self, name: &str) -> Result<&HostField, HostStateError> {
        self.fields.get(name).ok_or_else(|| missing(name))
    }
}

fn missing(name: &str) -> HostStateError {
    let err = HostStateError::MissingField {
        field: name.to_string(),
    };
    tracing::error!("{err}");
    err
}

fn mismatch<T>(name: &str, actual: &'static str) -> HostStateError {
    let err = HostStateError::TypeMismatch {
        field: name.to_string(),
        expected: type_name::<T>(),
        actual,
    };
    tracing::error!("{err}");
    err
}

impl fmt::Debug for HostFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, field) in &self.fields {
            map.entry(name, &field.type_name);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_type_returns_exact_value() {
        let fields = HostFields::new()
            .with("width", 640_u32)
            .with("name", String::from("overworld"));

        assert_eq!(*fields.get::<u32>("width").unwrap(), 640);
        assert_eq!(fields.cloned::<String>("name").unwrap(), "overworld");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn mismatched_type_names_field_and_types() {
        let fields = HostFields::new().with("width", 640_u64);

        let err = fields.get::<u32>("width").unwrap_err();
        assert_eq!(
            err,
            HostStateError::TypeMismatch {
                field: "width".to_string(),
                expected: "u32",
                actual: "u64",
            }
        );
        let message = err.to_string();
        assert!(message.contains("width"));
        assert!(message.contains("u32"));
        assert!(message.contains("u64"));
    }

    #[test]
    fn mismatched_mutable_access_leaves_value_untouched() {
        let mut fields = HostFields::new().with("samples", vec![1.0_f64, 2.0, 3.0]);

        assert!(fields.get_mut::<Vec<f32>>("samples").is_err());
        assert_eq!(fields.get::<Vec<f64>>("samples").unwrap(), &[1.0, 2.0, 3.0]);

        fields.get_mut::<Vec<f64>>("samples").unwrap()[0] = 9.0;
        assert_eq!(fields.get::<Vec<f64>>("samples").unwrap()[0], 9.0);
    }

    #[test]
    fn missing_field_is_reported() {
        let fields = HostFields::new();
        assert_eq!(
            fields.get::<u32>("height").unwrap_err(),
            HostStateError::MissingField {
                field: "height".to_string()
            }
        );
        assert!(!fields.contains("height"));
        assert_eq!(fields.type_name_of("height"), None);
    }
}
