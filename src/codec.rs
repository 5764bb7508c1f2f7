//! Conversion between documents and relational rows.

use crate::backend::QueryRow;
use crate::error::{AdapterError, Result};
use crate::schema::{ClassSchema, FieldType};
use crate::sql::{Params, SqlParam, Statement};
use crate::value::{self, GeoPoint};
use serde_json::{json, Map, Value};

/// Column values of one document, ready for `INSERT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedRow {
    pub columns: Vec<String>,
    pub values: Vec<SqlParam>,
    /// Point columns, emitted through `POINT(lng, lat)` after the scalars.
    pub geo_points: Vec<(String, GeoPoint)>,
}

impl EncodedRow {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.geo_points.is_empty()
    }

    pub fn into_insert(self, table: &str) -> Statement {
        let mut params = Params::starting_at(1);
        let table = params.push(SqlParam::ident(table));

        let mut columns = Vec::with_capacity(self.columns.len() + self.geo_points.len());
        for column in self.columns.iter().chain(self.geo_points.iter().map(|(name, _)| name)) {
            columns.push(params.push(SqlParam::ident(column.as_str())));
        }

        let mut values = Vec::with_capacity(columns.len());
        for value in self.values {
            values.push(params.push(value));
        }
        for (_, point) in &self.geo_points {
            let longitude = params.push(SqlParam::Value(Value::from(point.longitude)));
            let latitude = params.push(SqlParam::Value(Value::from(point.latitude)));
            values.push(format!("POINT({}, {})", longitude, latitude));
        }

        params.finish(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            values.join(", ")
        ))
    }
}

/// Lower a document into column values under `schema`'s storage view.
pub fn encode_object(schema: &ClassSchema, object: &Map<String, Value>) -> Result<EncodedRow> {
    let storage = schema.to_storage();
    let mut object = value::expand_dotted_keys(object.clone());
    value::validate_keys(&Value::Object(object.clone()))?;
    value::fold_auth_data(&mut object);

    let mut row = EncodedRow::default();
    for (field, data) in &object {
        if data.is_null() {
            continue;
        }
        let field_type = storage.field_type(field).ok_or_else(|| AdapterError::UnknownField {
            class_name: storage.class_name.clone(),
            field: field.clone(),
        })?;

        let param = match field_type {
            FieldType::Relation { .. } => continue,
            FieldType::GeoPoint => {
                let point = GeoPoint::from_value(data)
                    .ok_or_else(|| AdapterError::incorrect_type(field.as_str(), "expected a GeoPoint"))?;
                row.geo_points.push((field.clone(), point));
                continue;
            }
            FieldType::Date => encode_date(field, data)?,
            FieldType::Pointer { .. } => match (data, value::pointer_id(data)) {
                (_, Some(id)) => SqlParam::text(id),
                (Value::String(id), None) => SqlParam::text(id.as_str()),
                _ => return Err(AdapterError::incorrect_type(field.as_str(), "expected a Pointer")),
            },
            FieldType::Array { .. } if !data.is_array() => {
                return Err(AdapterError::incorrect_type(field.as_str(), "expected an Array"))
            }
            FieldType::Object if !data.is_object() => {
                return Err(AdapterError::incorrect_type(field.as_str(), "expected an Object"))
            }
            FieldType::Array { .. } | FieldType::Object | FieldType::Bytes => SqlParam::Json(data.clone()),
            FieldType::String => match data {
                Value::String(_) => SqlParam::Value(data.clone()),
                _ => return Err(AdapterError::incorrect_type(field.as_str(), "expected a String")),
            },
            FieldType::Number => match data {
                Value::Number(_) => SqlParam::Value(data.clone()),
                Value::String(s) if s.is_empty() => SqlParam::Value(json!(0)),
                Value::Bool(false) => SqlParam::Value(json!(0)),
                _ => return Err(AdapterError::incorrect_type(field.as_str(), "expected a Number")),
            },
            FieldType::Boolean => match data {
                Value::Bool(_) => SqlParam::Value(data.clone()),
                _ => return Err(AdapterError::incorrect_type(field.as_str(), "expected a Boolean")),
            },
            FieldType::File => match data.get("name").and_then(Value::as_str) {
                Some(name) => SqlParam::text(name),
                None => return Err(AdapterError::incorrect_type(field.as_str(), "expected a File")),
            },
        };
        row.columns.push(field.clone());
        row.values.push(param);
    }

    Ok(row)
}

fn encode_date(field: &str, data: &Value) -> Result<SqlParam> {
    if field == "updatedAt" && value::type_tag(data) == Some("Date") && data.get("iso").is_none() {
        return Ok(SqlParam::text(value::now_timestamp()));
    }
    Ok(match value::date_to_timestamp(field, data)? {
        Some(timestamp) => SqlParam::text(timestamp),
        None => SqlParam::Value(Value::Null),
    })
}

/// Rebuild a typed document from a result row.
///
/// Columns holding `NULL` are dropped. Columns outside the schema (such as a
/// projected `score`) pass through untouched.
pub fn decode_row(schema: &ClassSchema, row: &QueryRow) -> Result<Map<String, Value>> {
    let storage = schema.to_storage();
    let mut document = Map::with_capacity(row.columns.len());

    for (column, raw) in &row.columns {
        if raw.is_null() {
            continue;
        }
        let decoded = match storage.field_type(column) {
            Some(field_type) => decode_value(column, field_type, raw)?,
            None => Some(raw.clone()),
        };
        if let Some(decoded) = decoded {
            document.insert(column.clone(), decoded);
        }
    }

    for (field, field_type) in &storage.fields {
        if let FieldType::Relation { target_class } = field_type {
            document.insert(
                field.clone(),
                json!({"__type": "Relation", "className": target_class}),
            );
        }
    }

    Ok(document)
}

fn decode_value(column: &str, field_type: &FieldType, raw: &Value) -> Result<Option<Value>> {
    let decoded = match field_type {
        FieldType::Pointer { target_class } => match raw {
            Value::String(id) => json!({"__type": "Pointer", "className": target_class, "objectId": id}),
            other => other.clone(),
        },
        FieldType::Relation { .. } => return Ok(None),
        FieldType::GeoPoint => match (raw.get("x").and_then(Value::as_f64), raw.get("y").and_then(Value::as_f64)) {
            (Some(x), Some(y)) => GeoPoint::new(y, x).to_value(),
            _ => raw.clone(),
        },
        FieldType::File => match raw {
            Value::String(name) => json!({"__type": "File", "name": name}),
            other => other.clone(),
        },
        FieldType::Boolean => match raw {
            Value::Number(n) => Value::Bool(n.as_i64() == Some(1)),
            Value::String(s) => Value::Bool(s == "1" || s == "true"),
            other => other.clone(),
        },
        FieldType::Date => match raw.as_str().and_then(value::parse_date) {
            Some(date) if column == "createdAt" || column == "updatedAt" => {
                Value::String(value::iso_string(&date))
            }
            Some(date) => value::date_wrapper(&date),
            None => raw.clone(),
        },
        FieldType::Object | FieldType::Array { .. } | FieldType::Bytes => match raw {
            Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| raw.clone()),
            other => other.clone(),
        },
        FieldType::String | FieldType::Number => raw.clone(),
    };
    Ok(Some(decoded))
}
