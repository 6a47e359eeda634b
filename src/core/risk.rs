use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ValidationError;

/// A probabilistic event that scales a week's throughput by `impact` when it fires.
///
/// Both `probability` and `impact` lie in the open interval (0, 1); the
/// boundaries are rejected even though they would be arithmetically usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Risk {
    name: String,
    probability: f64,
    impact: f64,
}

impl Risk {
    pub fn new(name: &str, probability: f64, impact: f64) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::risk("name", "must be a non-empty string"));
        }
        open_unit("probability", probability)?;
        open_unit("impact", impact)?;

        Ok(Self {
            name: name.to_string(),
            probability,
            impact,
        })
    }

    /// Builds a risk from a JSON object with `name` (or `risk_name`),
    /// `probability` and `impact`.
    pub fn from_mapping(map: &Map<String, Value>) -> Result<Self, ValidationError> {
        let name = match map.get("name").or_else(|| map.get("risk_name")) {
            None => return Err(ValidationError::MissingField("name".to_string())),
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Err(ValidationError::risk("name", "must be a non-empty string")),
        };
        let probability = number_field(map, "probability")?;
        let impact = number_field(map, "impact")?;

        Self::new(name, probability, impact)
    }

    /// Accepts one risk object or an ordered array of them. Failures inside an
    /// array are reported with the index of the offending element.
    pub fn parse(data: &Value) -> Result<Vec<Self>, ValidationError> {
        match data {
            Value::Object(map) => Ok(vec![Self::from_mapping(map)?]),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let parsed = match item {
                        Value::Object(map) => Self::from_mapping(map),
                        _ => Err(ValidationError::risk("risk", "must be an object")),
                    };
                    parsed.map_err(|source| ValidationError::AtIndex {
                        index,
                        source: Box::new(source),
                    })
                })
                .collect(),
            _ => Err(ValidationError::risk(
                "risks",
                "must be an object or a list of objects",
            )),
        }
    }

    pub fn to_mapping(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), self.name.clone().into());
        map.insert("probability".into(), self.probability.into());
        map.insert("impact".into(), self.impact.into());
        map
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn impact(&self) -> f64 {
        self.impact
    }
}

impl TryFrom<Map<String, Value>> for Risk {
    type Error = ValidationError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_mapping(&map)
    }
}

fn open_unit(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ValidationError::risk(
            field,
            format!("must lie strictly between 0 and 1 (e.g. 0.40 for 40%), got {value}"),
        ))
    }
}

fn number_field(map: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    match map.get(field) {
        None => Err(ValidationError::MissingField(field.to_string())),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ValidationError::risk(field, format!("must be a number, got {n}"))),
        Some(other) => Err(ValidationError::risk(
            field,
            format!("must be a number, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use serde_json::json;

    #[test]
    fn trims_name_and_keeps_values() {
        let risk = Risk::new("  Dependencies ", 0.3, 0.7).expect("valid risk");
        assert_eq!(risk.name(), "Dependencies");
        assert_eq!(risk.probability(), 0.3);
        assert_eq!(risk.impact(), 0.7);
    }

    #[test]
    fn rejects_blank_names() {
        let err = Risk::new("   ", 0.3, 0.7).expect_err("blank name");
        assert_eq!(err.field(), "name");
    }

    #[test]
    fn rejects_closed_interval_boundaries() {
        for value in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert_eq!(
                Risk::new("r", value, 0.5).expect_err("bad probability").field(),
                "probability"
            );
            assert_eq!(
                Risk::new("r", 0.5, value).expect_err("bad impact").field(),
                "impact"
            );
        }
    }

    #[test]
    fn from_mapping_accepts_legacy_name_key() {
        let map = json!({"risk_name": "Vacation", "probability": 0.05, "impact": 0.9});
        let Value::Object(map) = map else {
            unreachable!()
        };
        let risk = Risk::from_mapping(&map).expect("legacy key");
        assert_eq!(risk.name(), "Vacation");
    }

    #[test]
    fn from_mapping_reports_missing_fields() {
        let Value::Object(map) = json!({"name": "x", "impact": 0.9}) else {
            unreachable!()
        };
        assert_eq!(
            Risk::from_mapping(&map).expect_err("missing probability"),
            ValidationError::MissingField("probability".to_string())
        );
    }

    #[test]
    fn parse_single_object_yields_one_risk() {
        let risks = Risk::parse(&json!({"name": "a", "probability": 0.2, "impact": 0.8}))
            .expect("single risk");
        assert_eq!(risks.len(), 1);
    }

    #[test]
    fn parse_list_preserves_order() {
        let risks = Risk::parse(&json!([
            {"name": "a", "probability": 0.2, "impact": 0.8},
            {"name": "b", "probability": 0.1, "impact": 0.5}
        ]))
        .expect("two risks");
        let names = risks.iter().map(Risk::name).collect::<Vec<_>>();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn parse_list_qualifies_errors_with_index() {
        let err = Risk::parse(&json!([
            {"name": "a", "probability": 0.2, "impact": 0.8},
            {"name": "b", "probability": 1.0, "impact": 0.5}
        ]))
        .expect_err("second element is invalid");
        assert!(matches!(err, ValidationError::AtIndex { index: 1, .. }));
        assert_eq!(err.field(), "risks[1].probability");

        let err = Risk::parse(&json!([{"name": "a", "probability": 0.2, "impact": 0.8}, 7]))
            .expect_err("non-object element");
        assert!(matches!(err, ValidationError::AtIndex { index: 1, .. }));
    }

    #[test]
    fn parse_rejects_scalars() {
        let err = Risk::parse(&json!("risky")).expect_err("string input");
        assert_eq!(err.field(), "risks");
    }

    proptest! {
        #[test]
        fn prop_open_interval_values_round_trip(
            probability in 0.0001f64..0.9999,
            impact in 0.0001f64..0.9999
        ) {
            let risk = Risk::new("r", probability, impact).unwrap();
            let back = Risk::from_mapping(&risk.to_mapping()).unwrap();
            prop_assert!(back == risk);
        }
    }
}
