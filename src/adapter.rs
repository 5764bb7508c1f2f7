//! Host-facing storage adapter: object operations.
//!
//! Schema operations live in [`crate::manager`]. Every operation takes the
//! class schema from the caller; the adapter keeps no schema cache.

use crate::backend::DatabaseBackend;
use crate::classify::{self, Context};
use crate::codec::{decode_row, encode_object};
use crate::config::AdapterConfig;
use crate::connection::Connection;
use crate::error::{AdapterError, ErrorKind, Result};
use crate::query::{self, Query};
use crate::schema::ClassSchema;
use crate::sql::{json_path, Params, SqlParam, Statement};
use crate::update::{self, Update};
use crate::value;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Largest row count MySQL accepts in `LIMIT`, used for `OFFSET` without a limit.
const UNBOUNDED_LIMIT: u64 = u64::MAX;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl From<i64> for SortDirection {
    /// The host's `1` / `-1` convention.
    fn from(direction: i64) -> Self {
        if direction < 0 {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Paging, ordering and projection for [`StorageAdapter::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Sort keys in priority order; `$score` sorts by text relevance.
    pub sort: Vec<(String, SortDirection)>,
    /// Projected fields; `$score` adds the relevance as `score`.
    pub keys: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, key: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((key.into(), direction));
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

/// Document storage on MySQL.
pub struct StorageAdapter<B: DatabaseBackend> {
    pub(crate) config: AdapterConfig,
    pub(crate) connection: Arc<Connection<B>>,
}

impl<B: DatabaseBackend> Clone for StorageAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<B: DatabaseBackend> StorageAdapter<B> {
    /// Create an adapter; the connection opens on first use.
    pub fn new(config: AdapterConfig) -> Self {
        let connection = Connection::new(config.uri.clone());
        Self {
            config,
            connection: Arc::new(connection),
        }
    }

    /// Create an adapter over an already-open backend.
    pub fn with_backend(config: AdapterConfig, backend: B) -> Self {
        let connection = Connection::with_backend(config.uri.clone(), backend);
        Self {
            config,
            connection: Arc::new(connection),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection<B> {
        &self.connection
    }

    /// Insert one document. Returns the document as given.
    pub async fn create_object(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        object: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        debug!(class_name, "create_object");
        let statement = encode_object(schema, object)?.into_insert(class_name);
        let result = self.connection.execute(&statement).await;
        classify::resolve(Context::CreateObject, class_name, result)?;
        Ok(object.clone())
    }

    /// Documents matching `query`. A missing class table yields no documents.
    pub async fn find(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        query: &Map<String, Value>,
        options: &FindOptions,
    ) -> Result<Vec<Map<String, Value>>> {
        debug!(class_name, skip = ?options.skip, limit = ?options.limit, "find");
        let statement = select_statement(class_name, schema, &Query::from_map(query)?, options)?;
        let result = self.connection.query(&statement).await;
        let rows = classify::resolve(Context::Read, class_name, result)?.unwrap_or_default();
        rows.iter().map(|row| decode_row(schema, row)).collect()
    }

    /// Number of documents matching `query`; 0 for a missing class table.
    pub async fn count(&self, class_name: &str, schema: &ClassSchema, query: &Map<String, Value>) -> Result<u64> {
        debug!(class_name, "count");
        let statement = count_statement(class_name, schema, &Query::from_map(query)?)?;
        let result = self.connection.query(&statement).await;
        let rows = classify::resolve(Context::Read, class_name, result)?.unwrap_or_default();
        let count = rows
            .first()
            .and_then(|row| row.get_i64("count"))
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Apply `update` to every matching document and return the updated
    /// documents, re-read with `limit` set to the affected row count.
    pub async fn update_objects_by_query(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        query: &Map<String, Value>,
        update: &Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>> {
        debug!(class_name, "update_objects_by_query");
        let parsed_update = Update::parse(schema, update)?;
        if parsed_update.is_empty() {
            // relation-only updates touch join tables the host maintains
            return self.find(class_name, schema, query, &FindOptions::default()).await;
        }

        let statement = update_statement(class_name, schema, &Query::from_map(query)?, &parsed_update)?;
        let result = self.connection.execute(&statement).await;
        let affected = classify::resolve(Context::UpdateObjects, class_name, result)?.unwrap_or(0);
        if affected == 0 {
            return Ok(Vec::new());
        }
        self.find(class_name, schema, query, &FindOptions::default().limit(affected))
            .await
    }

    /// Update matching documents and return the first of them.
    pub async fn find_one_and_update(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        query: &Map<String, Value>,
        update: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>> {
        debug!(class_name, "find_one_and_update");
        let updated = self
            .update_objects_by_query(class_name, schema, query, update)
            .await?;
        Ok(updated.into_iter().next())
    }

    /// Insert `query` merged with `update`; if that collides with a unique
    /// value, update the matching document instead.
    pub async fn upsert_one_object(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        query: &Map<String, Value>,
        update: &Map<String, Value>,
    ) -> Result<()> {
        debug!(class_name, "upsert_one_object");
        let mut initial = query.clone();
        for (key, data) in update {
            if let Some(data) = initial_value(data) {
                initial.insert(key.clone(), data);
            }
        }
        match self.create_object(class_name, schema, &initial).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::DuplicateValue => {
                self.find_one_and_update(class_name, schema, query, update).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete every matching document and return how many went.
    ///
    /// Fails with `ObjectNotFound` when nothing matched, including when the
    /// class table does not exist.
    pub async fn delete_objects_by_query(
        &self,
        class_name: &str,
        schema: &ClassSchema,
        query: &Map<String, Value>,
    ) -> Result<u64> {
        debug!(class_name, "delete_objects_by_query");
        let statement = delete_statement(class_name, schema, &Query::from_map(query)?)?;
        let result = self.connection.execute(&statement).await;
        let affected = classify::resolve(Context::DeleteObjects, class_name, result)?.unwrap_or(0);
        if affected == 0 {
            return Err(AdapterError::ObjectNotFound);
        }
        Ok(affected)
    }

    /// Close the connection.
    pub async fn handle_shutdown(&self) -> Result<()> {
        debug!("handle_shutdown");
        self.connection.close().await
    }
}

/// Value an update operand takes when it creates the document.
fn initial_value(data: &Value) -> Option<Value> {
    match value::op_tag(data) {
        None => Some(data.clone()),
        Some("Increment") => data.get("amount").cloned(),
        Some("Add") | Some("AddUnique") => data.get("objects").cloned(),
        Some(_) => None,
    }
}

pub(crate) fn select_statement(
    class_name: &str,
    schema: &ClassSchema,
    query: &Query,
    options: &FindOptions,
) -> Result<Statement> {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let compiled = query::compile_into(schema, query, &mut params)?;
    let condition = if compiled.pattern.is_empty() {
        "TRUE".to_string()
    } else {
        compiled.pattern
    };

    let columns = match &options.keys {
        Some(keys) if keys.iter().any(|key| !key.is_empty()) => {
            projection(schema, keys, compiled.score.as_deref(), &mut params)
        }
        _ => "*".to_string(),
    };

    let mut text = format!("SELECT {} FROM {} WHERE {}", columns, table, condition);

    let order: Vec<String> = if !compiled.sorts.is_empty() {
        compiled.sorts
    } else {
        options
            .sort
            .iter()
            .map(|(key, direction)| sort_item(key, *direction, compiled.score.as_deref(), &mut params))
            .collect::<Result<_>>()?
    };
    if !order.is_empty() {
        text.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }

    match (options.limit, options.skip) {
        (Some(limit), _) => {
            text.push_str(&format!(" LIMIT {}", params.push(SqlParam::Value(Value::from(limit)))));
        }
        (None, Some(_)) => {
            text.push_str(&format!(
                " LIMIT {}",
                params.push(SqlParam::Value(Value::from(UNBOUNDED_LIMIT)))
            ));
        }
        (None, None) => {}
    }
    if let Some(skip) = options.skip {
        text.push_str(&format!(" OFFSET {}", params.push(SqlParam::Value(Value::from(skip)))));
    }

    Ok(params.finish(text))
}

fn projection(schema: &ClassSchema, keys: &[String], score: Option<&str>, params: &mut Params) -> String {
    let storage = schema.to_storage();
    let mut roots: Vec<&str> = Vec::new();
    let mut with_score = false;
    for key in keys.iter().filter(|key| !key.is_empty()) {
        if key == "$score" {
            with_score = true;
            continue;
        }
        let root = key.split('.').next().unwrap_or(key);
        if storage.field_type(root).is_some() && !roots.contains(&root) {
            roots.push(root);
        }
    }

    let mut columns: Vec<String> = roots
        .into_iter()
        .map(|root| params.push(SqlParam::ident(root)))
        .collect();
    if let (true, Some(score)) = (with_score, score) {
        columns.push(format!("{} AS {}", score, params.push(SqlParam::ident("score"))));
    }
    if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    }
}

fn sort_item(key: &str, direction: SortDirection, score: Option<&str>, params: &mut Params) -> Result<String> {
    if key == "$score" {
        return match score {
            Some(score) => Ok(format!("{} DESC", score)),
            None => Err(AdapterError::InvalidQuery("sorting by $score requires $text".to_string())),
        };
    }
    let mut segments = key.split('.');
    let root = segments.next().unwrap_or(key);
    let path: Vec<&str> = segments.collect();
    let column = params.push(SqlParam::ident(root));
    if path.is_empty() {
        Ok(format!("{} {}", column, direction))
    } else {
        let path = params.push(SqlParam::text(json_path(&path)));
        Ok(format!("{}->>{} {}", column, path, direction))
    }
}

pub(crate) fn count_statement(class_name: &str, schema: &ClassSchema, query: &Query) -> Result<Statement> {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let compiled = query::compile_into(schema, query, &mut params)?;
    let condition = if compiled.pattern.is_empty() { "TRUE" } else { compiled.pattern.as_str() };
    let text = format!("SELECT COUNT(*) AS `count` FROM {} WHERE {}", table, condition);
    Ok(params.finish(text))
}

pub(crate) fn update_statement(
    class_name: &str,
    schema: &ClassSchema,
    query: &Query,
    update: &Update,
) -> Result<Statement> {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let assignments = update::compile_into(schema, update, &mut params)?;
    let compiled = query::compile_into(schema, query, &mut params)?;
    let condition = if compiled.pattern.is_empty() { "TRUE" } else { compiled.pattern.as_str() };
    let text = format!("UPDATE {} SET {} WHERE {}", table, assignments.join(", "), condition);
    Ok(params.finish(text))
}

pub(crate) fn delete_statement(class_name: &str, schema: &ClassSchema, query: &Query) -> Result<Statement> {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let condition = if query.is_empty() {
        "TRUE".to_string()
    } else {
        let compiled = query::compile_into(schema, query, &mut params)?;
        if compiled.pattern.is_empty() {
            "TRUE".to_string()
        } else {
            compiled.pattern
        }
    };
    Ok(params.finish(format!("DELETE FROM {} WHERE {}", table, condition)))
}
