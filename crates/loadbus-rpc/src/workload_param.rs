//! A worked multi-object example modeled on the original workload-parameter
//! tagged union (an `int`/`string`/`range` parameter bag keyed by a `type`
//! tag). Kept here so the polymorphic `Kind::MultiObject` path has a
//! realistic multi-variant exerciser; the experiment-service domain this
//! came from is otherwise out of scope.

use serde::{Deserialize, Serialize};

use crate::kind::{FieldSpec, Kind, MultiObjectDescriptor, ObjectDescriptor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkloadParam {
    Int { value: i64 },
    String { value: String },
    Range {
        min: f64,
        max: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
}

#[must_use]
pub fn workload_param_kind() -> Kind {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn workload_param_round_trips_tag_and_variant() {
        let param = WorkloadParam::Range {
            min: 1.0,
            max: 4.0,
            step: Some(0.5),
        };
        let value = to_value(&param).unwrap();
        assert_eq!(value["type"], json!("range"));
        workload_param_kind().check(&value).unwrap();

        let back: WorkloadParam = serde_json::from_value(value).unwrap();
        assert_eq!(back, param);
    }

    #[test]
    fn workload_param_round_trips_a_range_with_no_step() {
        let param = WorkloadParam::Range {
            min: 1.0,
            max: 4.0,
            step: None,
        };
        let value = to_value(&param).unwrap();
        assert!(value.get("step").is_none());
        workload_param_kind().check(&value).unwrap();

        let back: WorkloadParam = serde_json::from_value(value).unwrap();
        assert_eq!(back, param);
    }

    #[test]
    fn workload_param_int_and_string_variants_validate() {
        let int_param = to_value(WorkloadParam::Int { value: 42 }).unwrap();
        workload_param_kind().check(&int_param).unwrap();

        let string_param = to_value(WorkloadParam::String {
            value: "threads".to_owned(),
        })
        .unwrap();
        workload_param_kind().check(&string_param).unwrap();
    }
}
