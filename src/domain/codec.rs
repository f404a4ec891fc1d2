// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Row Codec
//!
//! Rows are written as flat JSON objects: `PartitionKey`, `RowKey`, then every
//! property in order. Types JSON cannot express natively carry an OData-style
//! `"<name>@odata.type"` annotation right before the value, which keeps the
//! round trip lossless:
//!
//! | Value      | JSON                 | Annotation     |
//! |------------|----------------------|----------------|
//! | `Int64`    | decimal string       | `Edm.Int64`    |
//! | `DateTime` | RFC 3339 string      | `Edm.DateTime` |
//! | `Guid`     | string               | `Edm.Guid`     |
//! | `Binary`   | base64 string        | `Edm.Binary`   |
//! | `Double` (NaN, ±∞) | `"NaN"`, `"Infinity"`, `"-Infinity"` | `Edm.Double` |
//!
//! A page is one JSON array, or several when it does not fit one block. A
//! backup destination is many arrays written back to back, so readers must
//! consume it as a stream of documents.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::domain::entities::{Row, Value};
use crate::domain::errors::{BackupError, Result};

pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
const ODATA_TYPE_SUFFIX: &str = "@odata.type";
const ODATA_ETAG: &str = "odata.etag";

fn edm_annotation(value: &Value) -> Option<&'static str> {
    match value {
        Value::Int64(_) => Some("Edm.Int64"),
        Value::DateTime(_) => Some("Edm.DateTime"),
        Value::Guid(_) => Some("Edm.Guid"),
        Value::Binary(_) => Some("Edm.Binary"),
        Value::Double(v) if !v.is_finite() => Some("Edm.Double"),
        _ => None,
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_str(&v.to_string()),
            Value::Double(v) if v.is_nan() => serializer.serialize_str("NaN"),
            Value::Double(v) if v.is_infinite() => {
                serializer.serialize_str(if *v > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Guid(g) => serializer.serialize_str(g),
            Value::Binary(b) => serializer.serialize_str(&general_purpose::STANDARD.encode(b)),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(PARTITION_KEY, &self.partition_key)?;
        map.serialize_entry(ROW_KEY, &self.row_key)?;
        for (name, value) in self.fields() {
            if let Some(edm) = edm_annotation(value) {
                map.serialize_entry(&format!("{}{}", name, ODATA_TYPE_SUFFIX), edm)?;
            }
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = Map::<String, Json>::deserialize(deserializer)?;
        row_from_object(map).map_err(de::Error::custom)
    }
}

fn key_string(map: &Map<String, Json>, name: &str) -> Result<String> {
    match map.get(name) {
        Some(Json::String(s)) => Ok(s.clone()),
        Some(other) => Err(BackupError::SerializationError(format!(
            "{} must be a string, found {}",
            name, other
        ))),
        None => Err(BackupError::SerializationError(format!("missing {}", name))),
    }
}

fn typed_value(name: &str, edm: &str, json: &Json) -> Result<Value> {
    let bad = || {
        BackupError::SerializationError(format!("property '{}' is not a valid {}", name, edm))
    };
    match (edm, json) {
        ("Edm.Int64", Json::String(s)) => s.parse().map(Value::Int64).map_err(|_| bad()),
        ("Edm.Int64", Json::Number(n)) => n.as_i64().map(Value::Int64).ok_or_else(bad),
        ("Edm.Int32", Json::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int32)
            .ok_or_else(bad),
        ("Edm.Double", Json::Number(n)) => n.as_f64().map(Value::Double).ok_or_else(bad),
        ("Edm.Double", Json::String(s)) => match s.as_str() {
            "NaN" => Ok(Value::Double(f64::NAN)),
            "Infinity" => Ok(Value::Double(f64::INFINITY)),
            "-Infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
            other => other.parse().map(Value::Double).map_err(|_| bad()),
        },
        ("Edm.DateTime", Json::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| bad()),
        ("Edm.Guid", Json::String(s)) => Ok(Value::Guid(s.clone())),
        ("Edm.Binary", Json::String(s)) => general_purpose::STANDARD
            .decode(s)
            .map(Value::Binary)
            .map_err(|_| bad()),
        ("Edm.String", Json::String(s)) => Ok(Value::String(s.clone())),
        ("Edm.Boolean", Json::Bool(b)) => Ok(Value::Boolean(*b)),
        _ => Err(bad()),
    }
}

fn untyped_value(name: &str, json: &Json) -> Result<Option<Value>> {
    match json {
        Json::Null => Ok(None),
        Json::String(s) => Ok(Some(Value::String(s.clone()))),
        Json::Bool(b) => Ok(Some(Value::Boolean(*b))),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Some(match i32::try_from(v) {
                    Ok(small) => Value::Int32(small),
                    Err(_) => Value::Int64(v),
                }))
            } else {
                n.as_f64().map(|v| Some(Value::Double(v))).ok_or_else(|| {
                    BackupError::SerializationError(format!(
                        "property '{}' is out of range",
                        name
                    ))
                })
            }
        }
        Json::Array(_) | Json::Object(_) => Err(BackupError::SerializationError(format!(
            "property '{}' is a nested document, which entities cannot hold",
            name
        ))),
    }
}

/// Converts one decoded JSON object into a row.
pub fn row_from_object(map: Map<String, Json>) -> Result<Row> {
    let mut row = Row::new(key_string(&map, PARTITION_KEY)?, key_string(&map, ROW_KEY)?);
    for (name, json) in &map {
        if name == PARTITION_KEY
            || name == ROW_KEY
            || name == ODATA_ETAG
            || name.ends_with(ODATA_TYPE_SUFFIX)
        {
            continue;
        }
        let annotation = map.get(&format!("{}{}", name, ODATA_TYPE_SUFFIX));
        let value = match annotation {
            Some(Json::String(edm)) => Some(typed_value(name, edm, json)?),
            Some(_) => {
                return Err(BackupError::SerializationError(format!(
                    "type annotation of '{}' must be a string",
                    name
                )))
            }
            None => untyped_value(name, json)?,
        };
        if let Some(value) = value {
            row.set(name.clone(), value);
        }
    }
    Ok(row)
}

/// Serializes one page as a self-contained JSON array.
pub fn encode_page(rows: &[Row]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(rows)?)
}

/// Serializes one page as self-contained JSON arrays of at most
/// `max_block_bytes` each.
///
/// A page that fits comes back as a single array identical to
/// [`encode_page`]. Every array can be appended on its own, so a write that
/// stops between arrays still leaves a readable destination. Fails without
/// producing anything if one row alone does not fit.
pub fn encode_blocks(rows: &[Row], max_block_bytes: usize) -> Result<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    // Open array without its closing bracket.
    let mut current: Vec<u8> = Vec::new();
    for row in rows {
        let encoded = serde_json::to_vec(row)?;
        if encoded.len() + 2 > max_block_bytes {
            return Err(BackupError::SerializationError(format!(
                "row {} needs {} bytes, over the {}-byte block limit",
                row.key(),
                encoded.len() + 2,
                max_block_bytes
            )));
        }
        if !current.is_empty() && current.len() + encoded.len() + 2 > max_block_bytes {
            current.push(b']');
            blocks.push(std::mem::take(&mut current));
        }
        current.push(if current.is_empty() { b'[' } else { b',' });
        current.extend_from_slice(&encoded);
    }
    if !current.is_empty() {
        current.push(b']');
        blocks.push(current);
    }
    Ok(blocks)
}

/// Splits a destination into the page documents it was built from.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Vec<Row>>> {
    serde_json::Deserializer::from_slice(bytes)
        .into_iter::<Vec<Row>>()
        .map(|doc| doc.map_err(BackupError::from))
        .collect()
}

/// Reads rows from any mix of JSON arrays and single objects, such as a JSON
/// export file or a JSON-lines dump.
pub fn decode_rows(bytes: &[u8]) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for doc in serde_json::Deserializer::from_slice(bytes).into_iter::<Json>() {
        match doc? {
            Json::Array(items) => {
                for item in items {
                    rows.push(serde_json::from_value(item)?);
                }
            }
            obj @ Json::Object(_) => rows.push(serde_json::from_value(obj)?),
            other => {
                return Err(BackupError::SerializationError(format!(
                    "expected an entity or an array of entities, found {}",
                    other
                )))
            }
        }
    }
    Ok(rows)
}
