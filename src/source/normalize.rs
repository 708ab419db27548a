// src/source/normalize.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Field renaming and type coercion applied to every parsed record.
//!
//! The mapping is plain configuration owned by the reader; nothing here is
//! process-global.

use chrono::NaiveDateTime;
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};

use crate::constants::{METRES_PER_MILE, RECORD_DATETIME_FORMAT};

/// How raw column names and values are normalised.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    /// Lower-cased source name -> canonical name.
    pub renames: HashMap<String, String>,
    /// Fields that must parse as `RECORD_DATETIME_FORMAT`; values are kept as strings.
    pub datetimes: HashSet<String>,
    /// Fields converted to floating point (empty -> 0.0).
    pub floats: HashSet<String>,
    /// Fields converted to integers (empty -> 0).
    pub integers: HashSet<String>,
    /// Fields given in miles, converted to whole metres (empty -> 0).
    pub miles_to_metres: HashSet<String>,
}

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl FieldMapping {
    /// Only trims and lower-cases field names.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Mapping for the NYC TLC yellow/green taxi trip datasets.
    pub fn nyc_taxi() -> Self {
        let renames = [
            ("ratecodeid", "rate_code"),
            ("vendorid", "vendor_id"),
            ("dolocationid", "dropoff_location_id"),
            ("pulocationid", "pickup_location_id"),
            ("tpep_dropoff_datetime", "dropoff_datetime"),
            ("tpep_pickup_datetime", "pickup_datetime"),
            ("lpep_dropoff_datetime", "dropoff_datetime"),
            ("lpep_pickup_datetime", "pickup_datetime"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            renames,
            datetimes: set(&["dropoff_datetime", "pickup_datetime"]),
            floats: set(&[
                "dropoff_latitude",
                "dropoff_longitude",
                "pickup_latitude",
                "pickup_longitude",
            ]),
            integers: set(&["passenger_count"]),
            miles_to_metres: set(&["trip_distance"]),
        }
    }

    /// Canonical name for a raw header / key.
    pub fn normalize_name(&self, name: &str) -> String {
        let name = name.trim().to_lowercase();
        match self.renames.get(&name) {
            Some(renamed) => renamed.clone(),
            None => name,
        }
    }

    /// Rename keys and coerce values in place.
    ///
    /// Returns the offending `field: value` on the first value that cannot be coerced.
    pub fn normalize_record(&self, record: Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut out = Map::new();
        for (key, value) in record {
            let key = self.normalize_name(&key);
            let value = self.coerce(&key, value)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Build a record from a CSV header and one row; missing trailing cells are empty.
    pub fn zip_row(&self, header: &[String], row: &csv::StringRecord) -> Map<String, Value> {
        header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let cell = row.get(i).unwrap_or("");
                (name.clone(), Value::String(cell.to_string()))
            })
            .collect()
    }

    fn coerce(&self, key: &str, value: Value) -> Result<Value, String> {
        let invalid = |v: &Value| format!("invalid value {}: {}", key, v);

        let Value::String(raw) = &value else {
            // Already typed (JSON input); only unit conversion still applies.
            if self.miles_to_metres.contains(key) {
                let miles = value.as_f64().ok_or_else(|| invalid(&value))?;
                return Ok(Value::from(mile_to_metre(miles)));
            }
            return Ok(value);
        };
        let raw = raw.trim();

        if self.datetimes.contains(key) {
            NaiveDateTime::parse_from_str(raw, RECORD_DATETIME_FORMAT).map_err(|_| invalid(&value))?;
            Ok(value)
        } else if self.miles_to_metres.contains(key) {
            if raw.is_empty() {
                return Ok(Value::from(0i64));
            }
            let miles: f64 = raw.parse().map_err(|_| invalid(&value))?;
            Ok(Value::from(mile_to_metre(miles)))
        } else if self.floats.contains(key) {
            if raw.is_empty() {
                return Ok(Value::from(0.0));
            }
            let parsed: f64 = raw.parse().map_err(|_| invalid(&value))?;
            Number::from_f64(parsed).map(Value::Number).ok_or_else(|| invalid(&value))
        } else if self.integers.contains(key) {
            if raw.is_empty() {
                return Ok(Value::from(0i64));
            }
            let parsed: i64 = raw.parse().map_err(|_| invalid(&value))?;
            Ok(Value::from(parsed))
        } else {
            Ok(value)
        }
    }
}

pub fn mile_to_metre(miles: f64) -> i64 {
    (miles * METRES_PER_MILE) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn taxi_headers_are_renamed() {
        let mapping = FieldMapping::nyc_taxi();
        assert_eq!(mapping.normalize_name(" VendorID "), "vendor_id");
        assert_eq!(mapping.normalize_name("tpep_dropoff_datetime"), "dropoff_datetime");
        assert_eq!(mapping.normalize_name("lpep_pickup_datetime"), "pickup_datetime");
        assert_eq!(mapping.normalize_name("Fare_Amount"), "fare_amount");
    }

    #[test]
    fn taxi_values_are_coerced() {
        let mapping = FieldMapping::nyc_taxi();
        let record = mapping
            .normalize_record(map(json!({
                "tpep_dropoff_datetime": "2018-01-01 00:10:00",
                "trip_distance": "2.5",
                "passenger_count": "",
                "pickup_latitude": "40.75",
                "store_and_fwd_flag": "N",
            })))
            .unwrap();

        assert_eq!(record["dropoff_datetime"], json!("2018-01-01 00:10:00"));
        assert_eq!(record["trip_distance"], json!(4023));
        assert_eq!(record["passenger_count"], json!(0));
        assert_eq!(record["pickup_latitude"], json!(40.75));
        assert_eq!(record["store_and_fwd_flag"], json!("N"));
    }

    #[test]
    fn empty_distance_becomes_zero() {
        let mapping = FieldMapping::nyc_taxi();
        let record = mapping
            .normalize_record(map(json!({ "trip_distance": "" })))
            .unwrap();
        assert_eq!(record["trip_distance"], json!(0));
    }

    #[test]
    fn bad_values_are_reported() {
        let mapping = FieldMapping::nyc_taxi();
        let err = mapping
            .normalize_record(map(json!({ "passenger_count": "two" })))
            .unwrap_err();
        assert!(err.contains("passenger_count"));

        let err = mapping
            .normalize_record(map(json!({ "dropoff_datetime": "yesterday" })))
            .unwrap_err();
        assert!(err.contains("dropoff_datetime"));
    }

    #[test]
    fn identity_mapping_keeps_values() {
        let mapping = FieldMapping::identity();
        let record = mapping
            .normalize_record(map(json!({ " Trip_Distance ": "2.5" })))
            .unwrap();
        assert_eq!(record["trip_distance"], json!("2.5"));
    }

    #[test]
    fn csv_rows_are_zipped_with_header() {
        let mapping = FieldMapping::identity();
        let header = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let row = csv::StringRecord::from(vec!["1", "2"]);
        let record = mapping.zip_row(&header, &row);
        assert_eq!(record["a"], json!("1"));
        assert_eq!(record["b"], json!("2"));
        assert_eq!(record["c"], json!(""));
    }
}
