//! The declarative `Kind` system: a schema layer sitting on top of plain
//! `serde_json::Value`. Concrete Rust types still move in and out of the
//! wire through ordinary `Serialize`/`Deserialize`; `Kind` is what the
//! method facade checks argument and result shapes against, and the only
//! place tagged (`MultiObject`) polymorphism and optional/nullable field
//! semantics are enforced.

use loadbus_wire::ProtocolError;
use serde_json::Value;

/// A field within an `Object` or `MultiObject` variant.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: Kind,
    pub optional: bool,
}

impl FieldSpec {
    #[must_use]
    pub fn required(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
pub struct MultiObjectDescriptor {
    pub tag_field: &'static str,
    pub variants: Vec<(&'static str, ObjectDescriptor)>,
}

impl MultiObjectDescriptor {
    fn find(&self, tag: &str) -> Option<&ObjectDescriptor> {
        self.variants
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, desc)| desc)
    }
}

#[derive(Debug, Clone)]
pub enum Kind {
    Int,
    Float,
    Bool,
    String,
    Null,
    Any,
    Array(Box<Kind>),
    Map(Box<Kind>),
    Object(ObjectDescriptor),
    Nullable(Box<Kind>),
    MultiObject(MultiObjectDescriptor),
}

impl Kind {
    #[must_use]
    pub fn array(element: Kind) -> Kind {
        Kind::Array(Box::new(element))
    }

    #[must_use]
    pub fn map(value: Kind) -> Kind {
        Kind::Map(Box::new(value))
    }

    #[must_use]
    pub fn nullable(inner: Kind) -> Kind {
        Kind::Nullable(Box::new(inner))
    }

    /// Checks that `value` matches this kind's shape. Used identically on
    /// the serialize and deserialize paths — both directions pass through
    /// the same `Value` tree, so one check suffices for the round-trip
    /// property.
    pub fn check(&self, value: &Value) -> Result<(), ProtocolError> {
        match (self, value) {
            (Kind::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (Kind::Int, other) => Err(type_mismatch("int", other)),
            (Kind::Float, Value::Number(_)) => Ok(()),
            (Kind::Float, other) => Err(type_mismatch("float", other)),
            (Kind::Bool, Value::Bool(_)) => Ok(()),
            (Kind::Bool, other) => Err(type_mismatch("bool", other)),
            (Kind::String, Value::String(_)) => Ok(()),
            (Kind::String, other) => Err(type_mismatch("string", other)),
            (Kind::Null, Value::Null) => Ok(()),
            (Kind::Null, other) => Err(type_mismatch("null", other)),
            (Kind::Any, _) => Ok(()),
            (Kind::Array(elem), Value::Array(items)) => {
                for item in items {
                    elem.check(item)?;
                }
                Ok(())
            }
            (Kind::Array(_), other) => Err(type_mismatch("array", other)),
            (Kind::Map(val), Value::Object(map)) => {
                for v in map.values() {
                    val.check(v)?;
                }
                Ok(())
            }
            (Kind::Map(_), other) => Err(type_mismatch("map", other)),
            (Kind::Object(desc), Value::Object(map)) => {
                for field in &desc.fields {
                    match map.get(field.name) {
                        Some(Value::Null) if field.optional => {}
                        Some(v) => field.kind.check(v)?,
                        None if field.optional => {}
                        None => {
                            return Err(ProtocolError::MessageFormat(format!(
                                "{}: missing required field {}",
                                desc.name, field.name
                            )));
                        }
                    }
                }
                Ok(())
            }
            (Kind::Object(desc), other) => Err(ProtocolError::MessageFormat(format!(
                "{}: expected object, got {}",
                desc.name,
                value_type_name(other)
            ))),
            (Kind::Nullable(_), Value::Null) => Ok(()),
            (Kind::Nullable(inner), other) => inner.check(other),
            (Kind::MultiObject(desc), Value::Object(map)) => {
                let tag = map
                    .get(desc.tag_field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ProtocolError::MessageFormat(format!(
                            "multi-object missing tag field {}",
                            desc.tag_field
                        ))
                    })?;
                let variant = desc.find(tag).ok_or_else(|| {
                    ProtocolError::MessageFormat(format!("multi-object unknown tag {tag}"))
                })?;
                Kind::Object(variant.clone()).check(value)
            }
            (Kind::MultiObject(_), other) => Err(type_mismatch("multi-object", other)),
        }
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> ProtocolError {
    ProtocolError::MessageFormat(format!(
        "expected {expected}, got {}",
        value_type_name(actual)
    ))
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workload_param_kind() -> Kind {
        Kind::MultiObject(MultiObjectDescriptor {
            tag_field: "type",
            variants: vec![
                (
                    "int",
                    ObjectDescriptor {
                        name: "IntParam",
                        fields: vec![
                            FieldSpec::required("type", Kind::String),
                            FieldSpec::required("value", Kind::Int),
                        ],
                    },
                ),
                (
                    "string",
                    ObjectDescriptor {
                        name: "StringParam",
                        fields: vec![
                            FieldSpec::required("type", Kind::String),
                            FieldSpec::required("value", Kind::String),
                        ],
                    },
                ),
                (
                    "range",
                    ObjectDescriptor {
                        name: "RangeParam",
                        fields: vec![
                            FieldSpec::required("type", Kind::String),
                            FieldSpec::required("min", Kind::Float),
                            FieldSpec::required("max", Kind::Float),
                            FieldSpec::optional("step", Kind::Float),
                        ],
                    },
                ),
            ],
        })
    }

    #[test]
    fn object_rejects_missing_required_field() {
        let kind = Kind::Object(ObjectDescriptor {
            name: "Hello",
            fields: vec![FieldSpec::required("agentType", Kind::String)],
        });
        let err = kind.check(&json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageFormat(_)));
    }

    #[test]
    fn object_allows_absent_optional_field() {
        let kind = Kind::Object(ObjectDescriptor {
            name: "Thing",
            fields: vec![FieldSpec::optional("note", Kind::String)],
        });
        assert!(kind.check(&json!({})).is_ok());
    }

    #[test]
    fn object_allows_explicit_null_for_an_optional_field_of_any_inner_kind() {
        let kind = Kind::Object(ObjectDescriptor {
            name: "Thing",
            fields: vec![FieldSpec::optional("note", Kind::String)],
        });
        assert!(kind.check(&json!({"note": null})).is_ok());
    }

    #[test]
    fn nullable_accepts_null_or_inner_type() {
        let kind = Kind::nullable(Kind::Int);
        assert!(kind.check(&json!(null)).is_ok());
        assert!(kind.check(&json!(5)).is_ok());
        assert!(kind.check(&json!("five")).is_err());
    }

    #[test]
    fn multi_object_dispatches_on_tag_and_validates_the_selected_variant() {
        let kind = workload_param_kind();
        assert!(kind.check(&json!({"type": "int", "value": 10})).is_ok());
        assert!(
            kind.check(&json!({"type": "range", "min": 1.0, "max": 2.0}))
                .is_ok()
        );
        assert!(
            kind.check(&json!({"type": "int", "value": "nope"}))
                .is_err()
        );
    }

    #[test]
    fn multi_object_rejects_unknown_tag() {
        let kind = workload_param_kind();
        let err = kind
            .check(&json!({"type": "unknown", "value": 1}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MessageFormat(_)));
    }
}
