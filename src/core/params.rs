use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ValidationError;

const FIELDS: [&str; 5] = ["backlog", "th_min", "th_ex", "th_max", "num_sim"];

/// Backlog size, weekly throughput bounds and trial count for one forecast.
///
/// Only obtainable through [`SimulationParameters::new`] or
/// [`SimulationParameters::from_mapping`], so every instance satisfies
/// `0 < th_min < th_ex < th_max` with all fields strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct SimulationParameters {
    backlog: u32,
    th_min: u32,
    th_ex: u32,
    th_max: u32,
    num_sim: u32,
}

impl SimulationParameters {
    pub fn new(
        backlog: i64,
        th_min: i64,
        th_ex: i64,
        th_max: i64,
        num_sim: i64,
    ) -> Result<Self, ValidationError> {
        let backlog = positive("backlog", backlog)?;
        let th_min = positive("th_min", th_min)?;
        let th_ex = positive("th_ex", th_ex)?;
        let th_max = positive("th_max", th_max)?;
        let num_sim = positive("num_sim", num_sim)?;

        if th_min >= th_ex {
            return Err(ValidationError::parameter(
                "th_min",
                format!("throughput must follow th_min < th_ex < th_max, got {th_min} >= {th_ex}"),
            ));
        }
        if th_ex >= th_max {
            return Err(ValidationError::parameter(
                "th_max",
                format!("throughput must follow th_min < th_ex < th_max, got {th_ex} >= {th_max}"),
            ));
        }

        Ok(Self {
            backlog,
            th_min,
            th_ex,
            th_max,
            num_sim,
        })
    }

    /// Builds parameters from a JSON object. Every key is checked for presence
    /// before any value is inspected; values must be JSON integers.
    pub fn from_mapping(map: &Map<String, Value>) -> Result<Self, ValidationError> {
        if let Some(missing) = FIELDS.iter().find(|key| !map.contains_key(**key)) {
            return Err(ValidationError::MissingField((*missing).to_string()));
        }

        Self::new(
            integer_field(map, "backlog")?,
            integer_field(map, "th_min")?,
            integer_field(map, "th_ex")?,
            integer_field(map, "th_max")?,
            integer_field(map, "num_sim")?,
        )
    }

    pub fn to_mapping(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("backlog".into(), self.backlog.into());
        map.insert("th_min".into(), self.th_min.into());
        map.insert("th_ex".into(), self.th_ex.into());
        map.insert("th_max".into(), self.th_max.into());
        map.insert("num_sim".into(), self.num_sim.into());
        map
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn th_min(&self) -> u32 {
        self.th_min
    }

    pub fn th_ex(&self) -> u32 {
        self.th_ex
    }

    pub fn th_max(&self) -> u32 {
        self.th_max
    }

    pub fn num_sim(&self) -> u32 {
        self.num_sim
    }

    /// Skips the ordering check so tests can pin throughput to one value.
    #[cfg(test)]
    pub(crate) fn unchecked(backlog: u32, th_min: u32, th_ex: u32, th_max: u32, num_sim: u32) -> Self {
        Self {
            backlog,
            th_min,
            th_ex,
            th_max,
            num_sim,
        }
    }
}

impl TryFrom<Map<String, Value>> for SimulationParameters {
    type Error = ValidationError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_mapping(&map)
    }
}

fn positive(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::parameter(
            field,
            format!("must be > 0, got {value}"),
        ));
    }
    u32::try_from(value).map_err(|_| {
        ValidationError::parameter(field, format!("must be <= {}, got {value}", u32::MAX))
    })
}

fn integer_field(map: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    match map.get(field) {
        Some(Value::Number(n)) if n.is_i64() => n
            .as_i64()
            .ok_or_else(|| ValidationError::parameter(field, "must be an integer")),
        Some(Value::Number(n)) if n.is_u64() => Err(ValidationError::parameter(
            field,
            format!("must be <= {}, got {n}", u32::MAX),
        )),
        Some(Value::Number(n)) => Err(ValidationError::parameter(
            field,
            format!("must be an integer, got {n}"),
        )),
        Some(Value::Null) | None => Err(ValidationError::parameter(field, "must not be null")),
        Some(other) => Err(ValidationError::parameter(
            field,
            format!("must be an integer, got {other}"),
        )),
    }
}
