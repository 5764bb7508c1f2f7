//! Atomic update operators and their compilation into `SET` assignments.

use crate::error::{AdapterError, Result};
use crate::schema::{ClassSchema, FieldType};
use crate::sql::{json_path, Params, SqlParam};
use crate::value::{self, GeoPoint};
use serde_json::{Map, Value};

/// Changes to keys inside an `Object` column, gathered from dotted update
/// keys. Paths are relative to the column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedPatch {
    pub deletes: Vec<Vec<String>>,
    pub increments: Vec<(Vec<String>, Value)>,
    pub sets: Vec<(Vec<String>, Value)>,
    /// Replacement of the whole object, applied after the keyed changes.
    pub whole: Option<Value>,
}

impl NestedPatch {
    fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.increments.is_empty() && self.sets.is_empty() && self.whole.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(Value),
    Clear,
    Increment(Value),
    ArrayAppend(Vec<Value>),
    ArrayAppendUnique(Vec<Value>),
    ArrayRemove(Vec<Value>),
    NestedPatch(NestedPatch),
    /// Provider to new value; `None` deletes the provider's entry.
    AuthData(Vec<(String, Option<Value>)>),
    RelationNoop,
}

/// A decoded update, one operator per column in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub ops: Vec<(String, UpdateOp)>,
}

impl Update {
    pub fn parse(schema: &ClassSchema, update: &Map<String, Value>) -> Result<Self> {
        let storage = schema.to_storage();
        let mut ops: Vec<(String, UpdateOp)> = Vec::with_capacity(update.len());

        // authData first, so provider keys end up in a single assignment
        let mut providers = Vec::new();
        for (key, operand) in update {
            if let Some(provider) = value::auth_data_provider(key) {
                providers.push((provider.to_string(), provider_value(operand)));
            }
        }
        if !providers.is_empty() {
            ops.push(("authData".to_string(), UpdateOp::AuthData(providers)));
        }

        for (key, operand) in update {
            if value::auth_data_provider(key).is_some() {
                continue;
            }
            if let Some((root, path)) = key.split_once('.') {
                let path: Vec<String> = path.split('.').map(str::to_string).collect();
                let patch = patch_for(&storage, &mut ops, root, key, operand)?;
                match value::op_tag(operand) {
                    Some("Delete") => patch.deletes.push(path),
                    Some("Increment") => patch.increments.push((path, increment_amount(key, operand)?)),
                    Some(_) => return Err(AdapterError::unsupported_update(key.as_str(), operand)),
                    None => patch.sets.push((path, operand.clone())),
                }
                continue;
            }

            let field_type = storage.field_type(key);
            let op = match parse_op(key, field_type, operand)? {
                ParsedOp::Op(op) => op,
                ParsedOp::WholeObject => {
                    let patch = patch_for(&storage, &mut ops, key, key, operand)?;
                    patch.whole = Some(operand.clone());
                    continue;
                }
            };
            match (key.as_str(), op) {
                ("authData", UpdateOp::AuthData(entries)) => match auth_data_entry(&mut ops) {
                    Some(existing) => existing.extend(entries),
                    None => ops.push((key.clone(), UpdateOp::AuthData(entries))),
                },
                (_, op) => ops.push((key.clone(), op)),
            }
        }

        Ok(Self { ops })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.iter().all(|(_, op)| matches!(op, UpdateOp::RelationNoop))
    }
}

enum ParsedOp {
    Op(UpdateOp),
    WholeObject,
}

fn parse_op(field: &str, field_type: Option<&FieldType>, operand: &Value) -> Result<ParsedOp> {
    if operand.is_null() {
        return Ok(ParsedOp::Op(UpdateOp::Clear));
    }
    if matches!(field_type, Some(FieldType::Relation { .. })) {
        return Ok(ParsedOp::Op(UpdateOp::RelationNoop));
    }
    if let Some(op) = value::op_tag(operand) {
        let accepted = match op {
            "Increment" => matches!(field_type, None | Some(FieldType::Number)),
            "Add" | "AddUnique" | "Remove" => matches!(field_type, None | Some(FieldType::Array { .. })),
            _ => true,
        };
        if !accepted {
            return Err(AdapterError::unsupported_update(field, operand));
        }
        let op = match op {
            "Delete" => UpdateOp::Clear,
            "Increment" => UpdateOp::Increment(increment_amount(field, operand)?),
            "Add" => UpdateOp::ArrayAppend(objects(field, operand)?),
            "AddUnique" => UpdateOp::ArrayAppendUnique(objects(field, operand)?),
            "Remove" => UpdateOp::ArrayRemove(objects(field, operand)?),
            "AddRelation" | "RemoveRelation" => UpdateOp::RelationNoop,
            _ => return Err(AdapterError::unsupported_update(field, operand)),
        };
        return Ok(ParsedOp::Op(op));
    }
    if value::type_tag(operand) == Some("Relation") {
        return Ok(ParsedOp::Op(UpdateOp::RelationNoop));
    }
    if field == "authData" {
        if let Value::Object(map) = operand {
            let entries = map
                .iter()
                .map(|(provider, data)| (provider.clone(), provider_value(data)))
                .collect();
            return Ok(ParsedOp::Op(UpdateOp::AuthData(entries)));
        }
    }
    if operand.is_object() && value::type_tag(operand).is_none() && matches!(field_type, Some(FieldType::Object)) {
        return Ok(ParsedOp::WholeObject);
    }
    Ok(ParsedOp::Op(UpdateOp::Set(operand.clone())))
}

fn provider_value(operand: &Value) -> Option<Value> {
    if operand.is_null() || value::is_delete_op(operand) {
        None
    } else {
        Some(operand.clone())
    }
}

fn increment_amount(field: &str, operand: &Value) -> Result<Value> {
    match operand.get("amount") {
        Some(amount @ Value::Number(_)) => Ok(amount.clone()),
        _ => Err(AdapterError::unsupported_update(field, operand)),
    }
}

fn objects(field: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .get("objects")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| AdapterError::unsupported_update(field, operand))
}

fn auth_data_entry(ops: &mut [(String, UpdateOp)]) -> Option<&mut Vec<(String, Option<Value>)>> {
    ops.iter_mut().find_map(|(name, op)| match op {
        UpdateOp::AuthData(entries) if name == "authData" => Some(entries),
        _ => None,
    })
}

/// Patch slot for `root`, created on first use. Only `Object` columns take
/// patches.
fn patch_for<'a>(
    storage: &ClassSchema,
    ops: &'a mut Vec<(String, UpdateOp)>,
    root: &str,
    key: &str,
    operand: &Value,
) -> Result<&'a mut NestedPatch> {
    if !matches!(storage.field_type(root), Some(FieldType::Object)) {
        return Err(AdapterError::unsupported_update(key, operand));
    }
    let position = match ops
        .iter()
        .position(|(name, op)| name == root && matches!(op, UpdateOp::NestedPatch(_)))
    {
        Some(position) => position,
        None => {
            ops.push((root.to_string(), UpdateOp::NestedPatch(NestedPatch::default())));
            ops.len() - 1
        }
    };
    match &mut ops[position].1 {
        UpdateOp::NestedPatch(patch) => Ok(patch),
        _ => Err(AdapterError::InternalError(format!("no patch slot for {}", root))),
    }
}

/// Compiled `SET` list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetClause {
    pub assignments: Vec<String>,
    pub params: Vec<SqlParam>,
}

/// Compile `update` against `schema` with placeholders numbered from
/// `start_index`.
pub fn compile_update(schema: &ClassSchema, update: &Map<String, Value>, start_index: usize) -> Result<SetClause> {
    let parsed = Update::parse(schema, update)?;
    let mut params = Params::starting_at(start_index);
    let assignments = compile_into(schema, &parsed, &mut params)?;
    Ok(SetClause {
        assignments,
        params: params.into_vec(),
    })
}

pub(crate) fn compile_into(schema: &ClassSchema, update: &Update, params: &mut Params) -> Result<Vec<String>> {
    let storage = schema.to_storage();
    let mut assignments = Vec::with_capacity(update.ops.len());

    for (field, op) in &update.ops {
        if matches!(op, UpdateOp::RelationNoop) {
            continue;
        }
        let column = params.push(SqlParam::ident(field.as_str()));
        match op {
            UpdateOp::RelationNoop => {}
            UpdateOp::Clear => assignments.push(format!("{} = NULL", column)),
            UpdateOp::AuthData(entries) => {
                let mut expr = column.clone();
                for (provider, data) in entries {
                    let path = params.push(SqlParam::text(json_path(&[provider])));
                    let data = match data {
                        Some(data) => format!("CAST({} AS JSON)", params.push(SqlParam::Json(data.clone()))),
                        None => "NULL".to_string(),
                    };
                    expr = format!("JSON_SET(COALESCE({}, JSON_OBJECT()), {}, {})", expr, path, data);
                }
                assignments.push(format!("{} = {}", column, expr));
            }
            UpdateOp::Increment(amount) => {
                let amount = params.push(SqlParam::Value(amount.clone()));
                assignments.push(format!("{c} = COALESCE({c}, 0) + {a}", c = column, a = amount));
            }
            UpdateOp::ArrayAppend(items) => {
                let mut args = String::new();
                for item in items {
                    let item = params.push(SqlParam::Json(item.clone()));
                    args.push_str(&format!(", '$', CAST({} AS JSON)", item));
                }
                if args.is_empty() {
                    assignments.push(format!("{c} = COALESCE({c}, JSON_ARRAY())", c = column));
                } else {
                    assignments.push(format!(
                        "{c} = JSON_ARRAY_APPEND(COALESCE({c}, JSON_ARRAY()){args})",
                        c = column,
                        args = args
                    ));
                }
            }
            UpdateOp::ArrayAppendUnique(items) => {
                for item in items {
                    let candidate = params.push(SqlParam::Json(Value::Array(vec![item.clone()])));
                    let item = params.push(SqlParam::Json(item.clone()));
                    assignments.push(format!(
                        "{c} = IF(JSON_CONTAINS(COALESCE({c}, JSON_ARRAY()), {k}) = 0, \
                         JSON_ARRAY_APPEND(COALESCE({c}, JSON_ARRAY()), '$', CAST({v} AS JSON)), {c})",
                        c = column,
                        k = candidate,
                        v = item
                    ));
                }
            }
            UpdateOp::ArrayRemove(items) => {
                let removed = params.push(SqlParam::Json(Value::Array(items.clone())));
                assignments.push(format!(
                    "{c} = (SELECT COALESCE(JSON_ARRAYAGG(jt.elem), JSON_ARRAY()) \
                     FROM JSON_TABLE(COALESCE({c}, JSON_ARRAY()), '$[*]' COLUMNS (elem JSON PATH '$')) AS jt \
                     WHERE NOT (jt.elem MEMBER OF (CAST({r} AS JSON))))",
                    c = column,
                    r = removed
                ));
            }
            UpdateOp::NestedPatch(patch) => {
                if patch.is_empty() {
                    continue;
                }
                compile_patch(&column, patch, params, &mut assignments);
            }
            UpdateOp::Set(operand) => {
                let expr = set_expr(field, storage.field_type(field), operand, params)?;
                assignments.push(format!("{} = {}", column, expr));
            }
        }
    }

    Ok(assignments)
}

fn compile_patch(column: &str, patch: &NestedPatch, params: &mut Params, assignments: &mut Vec<String>) {
    if !patch.deletes.is_empty() {
        let paths: Vec<String> = patch
            .deletes
            .iter()
            .map(|path| params.push(SqlParam::text(json_path(path))))
            .collect();
        assignments.push(format!(
            "{c} = JSON_REMOVE(COALESCE({c}, JSON_OBJECT()), {p})",
            c = column,
            p = paths.join(", ")
        ));
    }

    if !patch.increments.is_empty() {
        let mut pairs = parent_pairs(column, patch.increments.iter().map(|(path, _)| path), params);
        for (path, amount) in &patch.increments {
            let path = params.push(SqlParam::text(json_path(path)));
            let amount = params.push(SqlParam::Value(amount.clone()));
            pairs.push(format!(
                "{p}, COALESCE(JSON_EXTRACT({c}, {p}), 0) + {a}",
                p = path,
                c = column,
                a = amount
            ));
        }
        assignments.push(format!(
            "{c} = JSON_SET(COALESCE({c}, JSON_OBJECT()), {pairs})",
            c = column,
            pairs = pairs.join(", ")
        ));
    }

    if !patch.sets.is_empty() {
        let mut pairs = parent_pairs(column, patch.sets.iter().map(|(path, _)| path), params);
        for (path, data) in &patch.sets {
            let path = params.push(SqlParam::text(json_path(path)));
            let data = params.push(SqlParam::Json(data.clone()));
            pairs.push(format!("{}, CAST({} AS JSON)", path, data));
        }
        assignments.push(format!(
            "{c} = JSON_SET(COALESCE({c}, JSON_OBJECT()), {pairs})",
            c = column,
            pairs = pairs.join(", ")
        ));
    }

    if let Some(whole) = &patch.whole {
        let data = params.push(SqlParam::Json(whole.clone()));
        assignments.push(format!("{} = CAST({} AS JSON)", column, data));
    }
}

/// `JSON_SET` pairs creating the missing intermediate objects of `paths`,
/// shallowest first, each prefix once.
fn parent_pairs<'p>(
    column: &str,
    paths: impl Iterator<Item = &'p Vec<String>>,
    params: &mut Params,
) -> Vec<String> {
    let mut prefixes: Vec<&[String]> = Vec::new();
    for path in paths {
        for depth in 1..path.len() {
            let prefix = &path[..depth];
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
    }
    prefixes.sort_by_key(|prefix| prefix.len());

    prefixes
        .into_iter()
        .map(|prefix| {
            let path = params.push(SqlParam::text(json_path(prefix)));
            format!(
                "{p}, COALESCE(JSON_EXTRACT({c}, {p}), JSON_OBJECT())",
                p = path,
                c = column
            )
        })
        .collect()
}

fn set_expr(field: &str, field_type: Option<&FieldType>, operand: &Value, params: &mut Params) -> Result<String> {
    let expr = match operand {
        Value::String(_) if matches!(field_type, Some(FieldType::Date)) => {
            match value::date_to_timestamp(field, operand)? {
                Some(timestamp) => params.push(SqlParam::text(timestamp)),
                None => "NULL".to_string(),
            }
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) => params.push(SqlParam::Value(operand.clone())),
        Value::Array(_) if matches!(field_type, Some(FieldType::Array { .. })) => {
            format!("CAST({} AS JSON)", params.push(SqlParam::Json(operand.clone())))
        }
        Value::Object(_) => match value::type_tag(operand) {
            Some("Date") => match value::date_to_timestamp(field, operand)? {
                Some(timestamp) => params.push(SqlParam::text(timestamp)),
                None => "NULL".to_string(),
            },
            Some("Pointer") => match value::pointer_id(operand) {
                Some(id) => params.push(SqlParam::text(id)),
                None => return Err(AdapterError::unsupported_update(field, operand)),
            },
            Some("File") => match operand.get("name").and_then(Value::as_str) {
                Some(name) => params.push(SqlParam::text(name)),
                None => return Err(AdapterError::unsupported_update(field, operand)),
            },
            Some("GeoPoint") => {
                let point = GeoPoint::from_value(operand)
                    .ok_or_else(|| AdapterError::unsupported_update(field, operand))?;
                let longitude = params.push(SqlParam::Value(Value::from(point.longitude)));
                let latitude = params.push(SqlParam::Value(Value::from(point.latitude)));
                format!("POINT({}, {})", longitude, latitude)
            }
            Some("Bytes") => format!("CAST({} AS JSON)", params.push(SqlParam::Json(operand.clone()))),
            _ => return Err(AdapterError::unsupported_update(field, operand)),
        },
        _ => return Err(AdapterError::unsupported_update(field, operand)),
    };
    Ok(expr)
}
