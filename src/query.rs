//! Document query language and its compilation to a MySQL boolean
//! expression.
//!
//! A query is decoded once into [`Query`] (field clauses holding
//! [`Constraint`]s, plus `$or`/`$and` clauses), then [`compile_where`] turns
//! it into a `WHERE` fragment with `$N` placeholders, the parameters those
//! placeholders refer to, and any distance sorts `$nearSphere` requires.

use crate::error::{AdapterError, Result};
use crate::pattern;
use crate::schema::{ClassSchema, FieldType};
use crate::sql::{json_path, Params, SqlParam};
use crate::value::{self, GeoPoint, EARTH_RADIUS_METERS};
use serde_json::{Map, Value};
use std::fmt;

/// Ordering comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Gt,
    Lt,
    Ge,
    Le,
}

impl ComparisonOp {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$gt" => Some(ComparisonOp::Gt),
            "$lt" => Some(ComparisonOp::Lt),
            "$gte" => Some(ComparisonOp::Ge),
            "$lte" => Some(ComparisonOp::Le),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Ge => write!(f, ">="),
            ComparisonOp::Le => write!(f, "<="),
        }
    }
}

/// Logical operators for combining sub-queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// One condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    IsNull,
    Equals(Value),
    NotEqual(Value),
    Comparison(ComparisonOp, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    All(Vec<Value>),
    Exists(bool),
    Regex {
        pattern: String,
        options: Option<String>,
    },
    Text {
        term: String,
        language: Option<String>,
    },
    NearSphere {
        point: GeoPoint,
        max_distance: Option<f64>,
    },
    WithinBox(GeoPoint, GeoPoint),
    WithinPolygon(Vec<GeoPoint>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Conjunction of constraints on one (possibly dotted) field.
    Field {
        name: String,
        constraints: Vec<Constraint>,
    },
    Logical { op: LogicalOp, queries: Vec<Query> },
}

/// A decoded document query. Clauses are AND-ed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// The empty query, matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Null => Ok(Self::all()),
            other => Err(AdapterError::InvalidQuery(format!(
                "query must be an object, got {}",
                other
            ))),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let mut clauses = Vec::with_capacity(map.len());
        for (name, value) in map {
            let clause = match name.as_str() {
                "$or" => parse_logical(LogicalOp::Or, name, value)?,
                "$and" => parse_logical(LogicalOp::And, name, value)?,
                other if other.starts_with('$') => {
                    return Err(AdapterError::unsupported_query(other, value.to_string()))
                }
                _ => Clause::Field {
                    name: name.clone(),
                    constraints: parse_constraints(name, value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(Self { clauses })
    }
}

fn parse_logical(op: LogicalOp, name: &str, value: &Value) -> Result<Clause> {
    let items = value
        .as_array()
        .ok_or_else(|| AdapterError::InvalidQuery(format!("{} must be an array", name)))?;
    if items.is_empty() {
        return Err(AdapterError::InvalidQuery(format!("{} must not be empty", name)));
    }
    let queries = items.iter().map(Query::parse).collect::<Result<Vec<_>>>()?;
    Ok(Clause::Logical { op, queries })
}

fn parse_constraints(field: &str, value: &Value) -> Result<Vec<Constraint>> {
    let map = match value {
        Value::Null => return Ok(vec![Constraint::IsNull]),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            return Ok(vec![Constraint::Equals(value.clone())])
        }
        Value::Array(_) => return Err(AdapterError::unsupported_query(field, value.to_string())),
        Value::Object(_) if value::type_tag(value).is_some() => {
            return Ok(vec![Constraint::Equals(value.clone())])
        }
        Value::Object(map) => map,
    };

    let mut constraints = Vec::with_capacity(map.len());
    for (key, operand) in map {
        if let Some(op) = ComparisonOp::from_key(key) {
            constraints.push(Constraint::Comparison(op, operand.clone()));
            continue;
        }
        let constraint = match key.as_str() {
            "$eq" if operand.is_null() => Constraint::IsNull,
            "$eq" => Constraint::Equals(operand.clone()),
            "$ne" => Constraint::NotEqual(operand.clone()),
            "$in" => Constraint::In(list_operand(field, key, operand)?),
            "$nin" => Constraint::NotIn(list_operand(field, key, operand)?),
            "$all" => Constraint::All(list_operand(field, key, operand)?),
            "$exists" => match operand {
                Value::Bool(exists) => Constraint::Exists(*exists),
                _ => return Err(AdapterError::unsupported_query(field, format!("$exists: {}", operand))),
            },
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    AdapterError::InvalidQuery(format!("bad $regex on {}, should be string", field))
                })?;
                let options = map.get("$options").and_then(Value::as_str).map(str::to_string);
                Constraint::Regex {
                    pattern: pattern.to_string(),
                    options,
                }
            }
            "$options" if map.contains_key("$regex") => continue,
            "$text" => parse_text(operand)?,
            "$nearSphere" => {
                let point = GeoPoint::from_value(operand).ok_or_else(|| {
                    AdapterError::InvalidQuery("bad $nearSphere value, should be a GeoPoint".to_string())
                })?;
                let max_distance = match map.get("$maxDistance") {
                    None | Some(Value::Null) => None,
                    Some(distance) => Some(distance.as_f64().ok_or_else(|| {
                        AdapterError::InvalidQuery("bad $maxDistance value, should be a number".to_string())
                    })?),
                };
                Constraint::NearSphere { point, max_distance }
            }
            "$maxDistance" if map.contains_key("$nearSphere") => continue,
            "$within" => parse_box(operand)?,
            "$geoWithin" => parse_polygon(operand)?,
            _ => return Err(AdapterError::unsupported_query(field, format!("{}: {}", key, operand))),
        };
        constraints.push(constraint);
    }
    Ok(constraints)
}

fn list_operand(field: &str, key: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| AdapterError::unsupported_query(field, format!("{} expects an array, got {}", key, operand)))
}

fn parse_text(operand: &Value) -> Result<Constraint> {
    let search = match operand.get("$search") {
        Some(Value::Object(search)) => search,
        _ => return Err(AdapterError::InvalidQuery("bad $text: $search, should be object".to_string())),
    };
    let term = match search.get("$term") {
        Some(Value::String(term)) if !term.is_empty() => term.clone(),
        _ => return Err(AdapterError::InvalidQuery("bad $text: $term, should be string".to_string())),
    };
    let language = match search.get("$language") {
        None => None,
        Some(Value::String(language)) => Some(language.clone()),
        Some(_) => return Err(AdapterError::InvalidQuery("bad $text: $language, should be string".to_string())),
    };
    match search.get("$caseSensitive") {
        None | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => {
            return Err(AdapterError::InvalidQuery(
                "bad $text: $caseSensitive not supported, please use $regex or create a separate lower case column."
                    .to_string(),
            ))
        }
        Some(_) => {
            return Err(AdapterError::InvalidQuery(
                "bad $text: $caseSensitive, should be boolean".to_string(),
            ))
        }
    }
    match search.get("$diacriticSensitive") {
        None | Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) => {
            return Err(AdapterError::InvalidQuery(
                "bad $text: $diacriticSensitive - false not supported".to_string(),
            ))
        }
        Some(_) => {
            return Err(AdapterError::InvalidQuery(
                "bad $text: $diacriticSensitive, should be boolean".to_string(),
            ))
        }
    }
    Ok(Constraint::Text { term, language })
}

fn parse_box(operand: &Value) -> Result<Constraint> {
    let corners = operand
        .get("$box")
        .and_then(Value::as_array)
        .filter(|corners| corners.len() == 2)
        .ok_or_else(|| AdapterError::InvalidQuery("bad $within value; $box should contain 2 GeoPoints".to_string()))?;
    let mut points = Vec::with_capacity(2);
    for corner in corners {
        let point = GeoPoint::from_value(corner)
            .ok_or_else(|| AdapterError::InvalidQuery("bad $box value".to_string()))?;
        point.validate()?;
        points.push(point);
    }
    Ok(Constraint::WithinBox(points[0], points[1]))
}

fn parse_polygon(operand: &Value) -> Result<Constraint> {
    let too_small =
        || AdapterError::InvalidQuery("bad $geoWithin value; $polygon should contain at least 3 GeoPoints".to_string());
    let vertices = operand
        .get("$polygon")
        .and_then(Value::as_array)
        .ok_or_else(too_small)?;
    if vertices.len() < 3 {
        return Err(too_small());
    }
    let mut points = Vec::with_capacity(vertices.len() + 1);
    for vertex in vertices {
        if value::type_tag(vertex) != Some("GeoPoint") {
            return Err(AdapterError::InvalidQuery("bad $geoWithin value".to_string()));
        }
        let point = GeoPoint::from_value(vertex)
            .ok_or_else(|| AdapterError::InvalidQuery("bad $geoWithin value".to_string()))?;
        point.validate()?;
        points.push(point);
    }
    if points.first() != points.last() {
        points.push(points[0]);
    }
    Ok(Constraint::WithinPolygon(points))
}

/// Compiled `WHERE` fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    /// Boolean expression; empty for the empty query.
    pub pattern: String,
    pub params: Vec<SqlParam>,
    /// `ORDER BY` items required by distance constraints.
    pub sorts: Vec<String>,
    /// `MATCH .. AGAINST` expression of the first `$text` constraint.
    pub score: Option<String>,
}

impl WhereClause {
    /// The pattern, or `TRUE` when the query was empty.
    pub fn condition(&self) -> &str {
        if self.pattern.is_empty() {
            "TRUE"
        } else {
            &self.pattern
        }
    }
}

/// Compile `query` against `schema` with placeholders numbered from
/// `start_index`.
pub fn compile_where(schema: &ClassSchema, query: &Query, start_index: usize) -> Result<WhereClause> {
    let mut params = Params::starting_at(start_index);
    let compiled = compile_into(schema, query, &mut params)?;
    Ok(WhereClause {
        pattern: compiled.pattern,
        params: params.into_vec(),
        sorts: compiled.sorts,
        score: compiled.score,
    })
}

/// Fragment whose parameters live in a caller-owned [`Params`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledQuery {
    pub pattern: String,
    pub sorts: Vec<String>,
    pub score: Option<String>,
}

/// Compile into a shared parameter list, so the fragment can be spliced into
/// a larger statement.
pub(crate) fn compile_into(schema: &ClassSchema, query: &Query, params: &mut Params) -> Result<CompiledQuery> {
    let storage = schema.to_storage();
    let mut compiler = Compiler {
        schema: &storage,
        params,
        sorts: Vec::new(),
        score: None,
    };
    let pattern = compiler.query(query)?;
    Ok(CompiledQuery {
        pattern,
        sorts: compiler.sorts,
        score: compiler.score,
    })
}

/// Column reference, optionally into a JSON path.
struct FieldRef {
    column: String,
    path: Vec<String>,
}

impl FieldRef {
    fn parse(name: &str) -> Self {
        let mut segments = name.split('.');
        let root = segments.next().unwrap_or_default();
        let mut path: Vec<String> = segments.map(str::to_string).collect();

        match value::auth_data_provider(root) {
            Some(provider) => {
                path.insert(0, provider.to_string());
                Self {
                    column: "authData".to_string(),
                    path,
                }
            }
            None => Self {
                column: root.to_string(),
                path,
            },
        }
    }

    fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }
}

struct Compiler<'a> {
    schema: &'a ClassSchema,
    params: &'a mut Params,
    sorts: Vec<String>,
    score: Option<String>,
}

impl Compiler<'_> {
    fn query(&mut self, query: &Query) -> Result<String> {
        let mut patterns = Vec::with_capacity(query.clauses.len());
        for clause in &query.clauses {
            match clause {
                Clause::Field { name, constraints } => {
                    if let Some(pattern) = self.field(name, constraints)? {
                        patterns.push(pattern);
                    }
                }
                Clause::Logical { op, queries } => {
                    let mut parts = Vec::with_capacity(queries.len());
                    for sub in queries {
                        let pattern = self.query(sub)?;
                        parts.push(if pattern.is_empty() { "TRUE".to_string() } else { pattern });
                    }
                    patterns.push(format!("({})", parts.join(&format!(" {} ", op))));
                }
            }
        }
        Ok(patterns.join(" AND "))
    }

    /// `None` when the clause is vacuous and must be dropped.
    fn field(&mut self, name: &str, constraints: &[Constraint]) -> Result<Option<String>> {
        let field = FieldRef::parse(name);
        let field_type = self.schema.field_type(&field.column);

        if field_type.is_none() {
            if !constraints.is_empty() && constraints.iter().all(|c| *c == Constraint::Exists(false)) {
                return Ok(None);
            }
            return Err(AdapterError::UnknownField {
                class_name: self.schema.class_name.clone(),
                field: name.to_string(),
            });
        }
        if constraints.is_empty() {
            return Err(AdapterError::unsupported_query(name, "empty constraint"));
        }

        let column = self.params.push(SqlParam::ident(field.column.as_str()));
        let expr = if field.is_nested() {
            let path = self.params.push(SqlParam::text(json_path(&field.path)));
            format!("{}->>{}", column, path)
        } else {
            column
        };
        let is_array = !field.is_nested() && field_type.is_some_and(FieldType::is_array);

        let mut patterns = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            patterns.push(self.constraint(name, &expr, is_array, field.is_nested(), constraint)?);
        }
        Ok(Some(patterns.join(" AND ")))
    }

    fn constraint(
        &mut self,
        name: &str,
        expr: &str,
        is_array: bool,
        nested: bool,
        constraint: &Constraint,
    ) -> Result<String> {
        let pattern = match constraint {
            Constraint::IsNull => format!("{} IS NULL", expr),
            Constraint::Exists(true) => format!("{} IS NOT NULL", expr),
            Constraint::Exists(false) => format!("{} IS NULL", expr),
            Constraint::Equals(operand) => self.equals(name, expr, is_array, nested, operand)?,
            Constraint::NotEqual(Value::Null) => format!("{} IS NOT NULL", expr),
            Constraint::NotEqual(operand) => {
                if is_array {
                    let candidate = self.params.push(SqlParam::Json(Value::Array(vec![operand.clone()])));
                    format!("(JSON_CONTAINS({}, {}) = 0 OR {} IS NULL)", expr, candidate, expr)
                } else if value::type_tag(operand) == Some("GeoPoint") {
                    let point = self.geo_text(name, operand)?;
                    format!("(NOT ST_Equals({}, ST_GeomFromText({})) OR {} IS NULL)", expr, point, expr)
                } else {
                    let value = self.scalar(name, nested, operand)?;
                    format!("({} <> {} OR {} IS NULL)", expr, value, expr)
                }
            }
            Constraint::Comparison(op, operand) => {
                if operand.is_null() {
                    return Err(AdapterError::unsupported_query(name, format!("{} null", op)));
                }
                let value = self.scalar(name, nested, operand)?;
                format!("{} {} {}", expr, op, value)
            }
            Constraint::In(list) => self.membership(name, expr, is_array, nested, list, false)?,
            Constraint::NotIn(list) => self.membership(name, expr, is_array, nested, list, true)?,
            Constraint::All(list) => {
                if !is_array {
                    return Err(AdapterError::unsupported_query(name, "$all on a non-array field"));
                }
                let candidate = self.params.push(SqlParam::Json(Value::Array(list.clone())));
                format!("JSON_CONTAINS({}, {}) = 1", expr, candidate)
            }
            Constraint::Regex { pattern: source, options } => {
                let translated = pattern::translate(source, options.as_deref())?;
                let regex = self.params.push(SqlParam::text(translated));
                format!("REGEXP_LIKE({}, {}, 'c')", expr, regex)
            }
            Constraint::Text { term, .. } => {
                let term = self.params.push(SqlParam::text(term.as_str()));
                let matcher = format!("MATCH ({}) AGAINST ({})", expr, term);
                if self.score.is_none() {
                    self.score = Some(matcher.clone());
                }
                matcher
            }
            Constraint::NearSphere { point, max_distance } => {
                point.validate()?;
                let origin = self.params.push(SqlParam::text(point.wkt()));
                let distance = format!("ST_Distance_Sphere({}, ST_GeomFromText({}))", expr, origin);
                self.sorts.push(format!("{} ASC", distance));
                match max_distance {
                    Some(radians) => {
                        let meters = self.params.push(SqlParam::Value(Value::from(radians * EARTH_RADIUS_METERS)));
                        format!("{} <= {}", distance, meters)
                    }
                    None => format!("{} IS NOT NULL", expr),
                }
            }
            Constraint::WithinBox(corner, opposite) => {
                let (left, bottom) = (corner.longitude, corner.latitude);
                let (right, top) = (opposite.longitude, opposite.latitude);
                let polygon = format!(
                    "POLYGON(({l} {b}, {l} {t}, {r} {t}, {r} {b}, {l} {b}))",
                    l = left,
                    b = bottom,
                    r = right,
                    t = top
                );
                let polygon = self.params.push(SqlParam::text(polygon));
                format!("MBRCovers(ST_GeomFromText({}), {})", polygon, expr)
            }
            Constraint::WithinPolygon(points) => {
                let ring = points
                    .iter()
                    .map(GeoPoint::wkt_coordinates)
                    .collect::<Vec<_>>()
                    .join(", ");
                let polygon = self.params.push(SqlParam::text(format!("POLYGON(({}))", ring)));
                format!("ST_Contains(ST_GeomFromText({}), {})", polygon, expr)
            }
        };
        Ok(pattern)
    }

    fn equals(&mut self, name: &str, expr: &str, is_array: bool, nested: bool, operand: &Value) -> Result<String> {
        if operand.is_null() {
            return Ok(format!("{} IS NULL", expr));
        }
        if is_array {
            if operand.is_array() {
                return Err(AdapterError::unsupported_query(name, operand.to_string()));
            }
            let candidate = self.params.push(SqlParam::Json(Value::Array(vec![operand.clone()])));
            return Ok(format!("JSON_CONTAINS({}, {}) = 1", expr, candidate));
        }
        if value::type_tag(operand) == Some("GeoPoint") {
            let point = self.geo_text(name, operand)?;
            return Ok(format!("ST_Equals({}, ST_GeomFromText({}))", expr, point));
        }
        let value = self.scalar(name, nested, operand)?;
        Ok(format!("{} = {}", expr, value))
    }

    fn membership(
        &mut self,
        name: &str,
        expr: &str,
        is_array: bool,
        nested: bool,
        list: &[Value],
        negate: bool,
    ) -> Result<String> {
        let mut allow_null = false;
        let mut items = Vec::with_capacity(list.len());
        for item in list {
            match item {
                Value::Array(inner) => items.extend(inner.iter().cloned()),
                other => items.push(other.clone()),
            }
        }
        items.retain(|item| {
            if item.is_null() {
                allow_null = true;
                false
            } else {
                true
            }
        });

        if items.is_empty() {
            return Ok(match (negate, allow_null) {
                (false, _) => format!("{} IS NULL", expr),
                (true, true) => format!("{} IS NOT NULL", expr),
                (true, false) => "TRUE".to_string(),
            });
        }

        let predicate = if is_array {
            let mut tests = Vec::with_capacity(items.len());
            for item in items {
                let candidate = self.params.push(SqlParam::Json(Value::Array(vec![item])));
                let expected = if negate { 0 } else { 1 };
                tests.push(format!("JSON_CONTAINS({}, {}) = {}", expr, candidate, expected));
            }
            let joiner = if negate { " AND " } else { " OR " };
            format!("({})", tests.join(joiner))
        } else {
            let mut values = Vec::with_capacity(items.len());
            for item in &items {
                values.push(self.scalar(name, nested, item)?);
            }
            let keyword = if negate { "NOT IN" } else { "IN" };
            format!("{} {} ({})", expr, keyword, values.join(", "))
        };

        Ok(match (negate, allow_null) {
            (false, false) => predicate,
            (false, true) => format!("({} IS NULL OR {})", expr, predicate),
            (true, false) => format!("({} OR {} IS NULL)", predicate, expr),
            (true, true) => format!("({} IS NOT NULL AND {})", expr, predicate),
        })
    }

    /// Push a comparable scalar: pointers compare by id, dates by timestamp.
    fn scalar(&mut self, name: &str, nested: bool, operand: &Value) -> Result<String> {
        let param = match operand {
            Value::Bool(b) if nested => SqlParam::text(b.to_string()),
            Value::String(_) | Value::Number(_) | Value::Bool(_) => SqlParam::Value(operand.clone()),
            Value::Object(_) => match value::type_tag(operand) {
                Some("Pointer") => match value::pointer_id(operand) {
                    Some(id) => SqlParam::text(id),
                    None => return Err(AdapterError::unsupported_query(name, operand.to_string())),
                },
                Some("Date") => match value::date_to_timestamp(name, operand)? {
                    Some(timestamp) => SqlParam::text(timestamp),
                    None => return Err(AdapterError::unsupported_query(name, operand.to_string())),
                },
                Some("File") => match operand.get("name").and_then(Value::as_str) {
                    Some(file) => SqlParam::text(file),
                    None => return Err(AdapterError::unsupported_query(name, operand.to_string())),
                },
                _ => return Err(AdapterError::unsupported_query(name, operand.to_string())),
            },
            _ => return Err(AdapterError::unsupported_query(name, operand.to_string())),
        };
        Ok(self.params.push(param))
    }

    fn geo_text(&mut self, name: &str, operand: &Value) -> Result<String> {
        let point = GeoPoint::from_value(operand)
            .ok_or_else(|| AdapterError::unsupported_query(name, operand.to_string()))?;
        point.validate()?;
        Ok(self.params.push(SqlParam::text(point.wkt())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sql::{Dialect, MySqlDialect, Statement};
    use serde_json::json;

    fn widget() -> ClassSchema {
        ClassSchema::with_default_fields("Widget")
            .field("name", FieldType::String)
            .field("count", FieldType::Number)
            .field("active", FieldType::Boolean)
            .field("tags", FieldType::array_of(FieldType::String))
            .field("meta", FieldType::Object)
            .field("owner", FieldType::pointer("_User"))
            .field("location", FieldType::GeoPoint)
            .field("due", FieldType::Date)
            .field("body", FieldType::String)
            .field("authData", FieldType::Object)
    }

    fn render(query: Value) -> Result<(String, WhereClause)> {
        let compiled = compile_where(&widget(), &Query::parse(&query)?, 1)?;
        let sql = MySqlDialect.render(&Statement::new(compiled.pattern.clone(), compiled.params.clone()))?;
        Ok((sql, compiled))
    }

    fn sql(query: Value) -> String {
        render(query).unwrap().0
    }

    fn kind(query: Value) -> ErrorKind {
        render(query).unwrap_err().kind()
    }

    #[test]
    fn test_scalar_equality() {
        assert_eq!(sql(json!({"name": "bolt"})), "`name` = 'bolt'");
        assert_eq!(sql(json!({"count": 3})), "`count` = 3");
        assert_eq!(sql(json!({"active": true})), "`active` = TRUE");
        assert_eq!(sql(json!({"name": {"$eq": "nut"}})), "`name` = 'nut'");
    }

    #[test]
    fn test_null_and_exists() {
        assert_eq!(sql(json!({"name": null})), "`name` IS NULL");
        assert_eq!(sql(json!({"name": {"$exists": true}})), "`name` IS NOT NULL");
        assert_eq!(sql(json!({"name": {"$exists": false}})), "`name` IS NULL");
        assert_eq!(sql(json!({"name": {"$ne": null}})), "`name` IS NOT NULL");
    }

    #[test]
    fn test_unknown_field() {
        assert_eq!(sql(json!({"ghost": {"$exists": false}})), "");
        assert_eq!(kind(json!({"ghost": 1})), ErrorKind::UnknownField);
        assert_eq!(kind(json!({"ghost": {"$exists": true}})), ErrorKind::UnknownField);
    }

    #[test]
    fn test_not_equal() {
        assert_eq!(sql(json!({"name": {"$ne": "x"}})), "(`name` <> 'x' OR `name` IS NULL)");
        assert_eq!(
            sql(json!({"tags": {"$ne": "x"}})),
            "(JSON_CONTAINS(`tags`, '[\"x\"]') = 0 OR `tags` IS NULL)"
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            sql(json!({"count": {"$gt": 1, "$lte": 10}})),
            "`count` > 1 AND `count` <= 10"
        );
        assert_eq!(
            sql(json!({"due": {"$lt": {"__type": "Date", "iso": "2024-01-01T00:00:00.000Z"}}})),
            "`due` < '2024-01-01 00:00:00.000000'"
        );
    }

    #[test]
    fn test_in_and_nin_on_scalars() {
        assert_eq!(sql(json!({"name": {"$in": ["a", ["b", "c"]]}})), "`name` IN ('a', 'b', 'c')");
        assert_eq!(
            sql(json!({"name": {"$in": ["a", null]}})),
            "(`name` IS NULL OR `name` IN ('a'))"
        );
        assert_eq!(
            sql(json!({"name": {"$nin": ["a"]}})),
            "(`name` NOT IN ('a') OR `name` IS NULL)"
        );
        assert_eq!(
            sql(json!({"name": {"$nin": ["a", null]}})),
            "(`name` IS NOT NULL AND `name` NOT IN ('a'))"
        );
    }

    #[test]
    fn test_empty_in_and_nin() {
        assert_eq!(sql(json!({"name": {"$in": []}})), "`name` IS NULL");
        assert_eq!(sql(json!({"name": {"$nin": []}})), "TRUE");
    }

    #[test]
    fn test_in_on_array_field() {
        assert_eq!(
            sql(json!({"tags": {"$in": ["a", "b"]}})),
            "(JSON_CONTAINS(`tags`, '[\"a\"]') = 1 OR JSON_CONTAINS(`tags`, '[\"b\"]') = 1)"
        );
        assert_eq!(
            sql(json!({"tags": {"$in": [null, "a"]}})),
            "(`tags` IS NULL OR (JSON_CONTAINS(`tags`, '[\"a\"]') = 1))"
        );
        assert_eq!(
            sql(json!({"tags": {"$nin": ["a", "b"]}})),
            "((JSON_CONTAINS(`tags`, '[\"a\"]') = 0 AND JSON_CONTAINS(`tags`, '[\"b\"]') = 0) OR `tags` IS NULL)"
        );
    }

    #[test]
    fn test_all_and_array_containment() {
        assert_eq!(
            sql(json!({"tags": {"$all": ["a", "b"]}})),
            "JSON_CONTAINS(`tags`, '[\"a\",\"b\"]') = 1"
        );
        assert_eq!(sql(json!({"tags": "a"})), "JSON_CONTAINS(`tags`, '[\"a\"]') = 1");
        assert_eq!(kind(json!({"name": {"$all": ["a"]}})), ErrorKind::UnsupportedQuery);
    }

    #[test]
    fn test_dotted_paths() {
        assert_eq!(sql(json!({"meta.color": "red"})), "`meta`->>'$.\"color\"' = 'red'");
        assert_eq!(sql(json!({"meta.a.b": null})), "`meta`->>'$.\"a\".\"b\"' IS NULL");
        assert_eq!(
            sql(json!({"_auth_data_facebook.id": "42"})),
            "`authData`->>'$.\"facebook\".\"id\"' = '42'"
        );
    }

    #[test]
    fn test_pointer_and_date_equality() {
        assert_eq!(
            sql(json!({"owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"}})),
            "`owner` = 'u1'"
        );
        assert_eq!(
            sql(json!({"due": {"__type": "Date", "iso": "2024-05-06T07:08:09.010Z"}})),
            "`due` = '2024-05-06 07:08:09.010000'"
        );
    }

    #[test]
    fn test_logical_clauses() {
        assert_eq!(
            sql(json!({"$or": [{"name": "a"}, {"count": 2}]})),
            "(`name` = 'a' OR `count` = 2)"
        );
        assert_eq!(
            sql(json!({"$and": [{"name": "a"}, {}], "count": 1})),
            "(`name` = 'a' AND TRUE) AND `count` = 1"
        );
        assert_eq!(kind(json!({"$or": []})), ErrorKind::InvalidQuery);
        assert_eq!(kind(json!({"$nor": [{"name": "a"}]})), ErrorKind::UnsupportedQuery);
    }

    #[test]
    fn test_logical_clauses_share_numbering() {
        let compiled = compile_where(
            &widget(),
            &Query::parse(&json!({"$or": [{"name": "a"}, {"count": 2}]})).unwrap(),
            3,
        )
        .unwrap();
        assert_eq!(compiled.pattern, "($3 = $4 OR $5 = $6)");
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn test_regex() {
        assert_eq!(
            sql(json!({"name": {"$regex": "^\\Qa.b\\E"}})),
            "REGEXP_LIKE(`name`, '^a\\\\.b', 'c')"
        );
        assert_eq!(
            kind(json!({"name": {"$regex": "a", "$options": "i"}})),
            ErrorKind::OperationForbidden
        );
    }

    #[test]
    fn test_text_search() {
        let (sql, compiled) = render(json!({"body": {"$text": {"$search": {"$term": "coffee"}}}})).unwrap();
        assert_eq!(sql, "MATCH (`body`) AGAINST ('coffee')");
        assert_eq!(compiled.score.as_deref(), Some("MATCH ($1) AGAINST ($2)"));

        assert_eq!(kind(json!({"body": {"$text": {"$search": "coffee"}}})), ErrorKind::InvalidQuery);
        assert_eq!(
            kind(json!({"body": {"$text": {"$search": {"$term": "c", "$caseSensitive": true}}}})),
            ErrorKind::InvalidQuery
        );
        assert_eq!(
            kind(json!({"body": {"$text": {"$search": {"$term": "c", "$diacriticSensitive": false}}}})),
            ErrorKind::InvalidQuery
        );
        assert_eq!(
            kind(json!({"body": {"$text": {"$search": {"$term": "c", "$language": 3}}}})),
            ErrorKind::InvalidQuery
        );
    }

    #[test]
    fn test_near_sphere() {
        let point = json!({"__type": "GeoPoint", "latitude": 10, "longitude": 20});
        let (sql, compiled) = render(json!({"location": {"$nearSphere": point, "$maxDistance": 0.5}})).unwrap();
        assert_eq!(
            sql,
            "ST_Distance_Sphere(`location`, ST_GeomFromText('POINT(20 10)')) <= 3185500.0"
        );
        assert_eq!(compiled.sorts, vec!["ST_Distance_Sphere($1, ST_GeomFromText($2)) ASC".to_string()]);

        let (sql, compiled) = render(json!({"location": {"$nearSphere": point}})).unwrap();
        assert_eq!(sql, "`location` IS NOT NULL");
        assert_eq!(compiled.sorts.len(), 1);
    }

    #[test]
    fn test_within_box() {
        let query = json!({"location": {"$within": {"$box": [
            {"__type": "GeoPoint", "latitude": 1, "longitude": 2},
            {"__type": "GeoPoint", "latitude": 3, "longitude": 4}
        ]}}});
        assert_eq!(
            sql(query),
            "MBRCovers(ST_GeomFromText('POLYGON((2 1, 2 3, 4 3, 4 1, 2 1))'), `location`)"
        );
    }

    #[test]
    fn test_within_polygon() {
        let query = json!({"location": {"$geoWithin": {"$polygon": [
            {"__type": "GeoPoint", "latitude": 0, "longitude": 0},
            {"__type": "GeoPoint", "latitude": 0, "longitude": 10},
            {"__type": "GeoPoint", "latitude": 10, "longitude": 10}
        ]}}});
        assert_eq!(
            sql(query),
            "ST_Contains(ST_GeomFromText('POLYGON((0 0, 10 0, 10 10, 0 0))'), `location`)"
        );

        let two = json!({"location": {"$geoWithin": {"$polygon": [
            {"__type": "GeoPoint", "latitude": 0, "longitude": 0},
            {"__type": "GeoPoint", "latitude": 1, "longitude": 1}
        ]}}});
        assert_eq!(kind(two), ErrorKind::InvalidQuery);

        let bad = json!({"location": {"$geoWithin": {"$polygon": [
            {"__type": "GeoPoint", "latitude": 0, "longitude": 0},
            {"__type": "GeoPoint", "latitude": 100, "longitude": 1},
            {"__type": "GeoPoint", "latitude": 2, "longitude": 2}
        ]}}});
        assert_eq!(kind(bad), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_geo_point_equality() {
        assert_eq!(
            sql(json!({"location": {"__type": "GeoPoint", "latitude": 5, "longitude": 6}})),
            "ST_Equals(`location`, ST_GeomFromText('POINT(6 5)'))"
        );
    }

    #[test]
    fn test_unsupported_shapes() {
        assert_eq!(kind(json!({"name": {"$foo": 1}})), ErrorKind::UnsupportedQuery);
        assert_eq!(kind(json!({"name": {}})), ErrorKind::UnsupportedQuery);
        assert_eq!(kind(json!({"meta": {"plain": "object"}})), ErrorKind::UnsupportedQuery);
        assert_eq!(kind(json!({"name": ["a"]})), ErrorKind::UnsupportedQuery);
    }

    #[test]
    fn test_empty_query() {
        let compiled = compile_where(&widget(), &Query::all(), 1).unwrap();
        assert!(compiled.pattern.is_empty());
        assert_eq!(compiled.condition(), "TRUE");
    }
}
