//! Recording backend for unit tests.

use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{AdapterError, EngineError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted answer to the next call of the matching kind.
pub enum Reply {
    Execute(Result<u64>),
    Rows(Result<QueryResult>),
}

#[derive(Default)]
struct Script {
    statements: Vec<String>,
    executes: VecDeque<Result<u64>>,
    queries: VecDeque<Result<QueryResult>>,
}

/// Shared view of what a [`MockBackend`] received.
#[derive(Clone, Default)]
pub struct MockLog {
    script: Arc<Mutex<Script>>,
}

impl MockLog {
    pub fn statements(&self) -> Vec<String> {
        self.script.lock().map(|s| s.statements.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.statements().pop()
    }

    pub fn push(&self, reply: Reply) {
        if let Ok(mut script) = self.script.lock() {
            match reply {
                Reply::Execute(result) => script.executes.push_back(result),
                Reply::Rows(result) => script.queries.push_back(result),
            }
        }
    }

    /// Script one query answer from JSON objects.
    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => QueryRow::from(map),
                _ => QueryRow::from(Map::new()),
            })
            .collect();
        self.push(Reply::Rows(Ok(rows)));
    }
}

/// Backend that records rendered SQL and answers from a script.
///
/// Unscripted executes affect 0 rows; unscripted queries return no rows.
#[derive(Default)]
pub struct MockBackend {
    log: MockLog,
    closed: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    pub fn push(&self, reply: Reply) {
        self.log.push(reply);
    }

    pub fn engine_error(number: u16) -> AdapterError {
        AdapterError::Engine(EngineError::new(Some(number), format!("mock error {}", number)))
    }
}

#[async_trait]
impl DatabaseBackend for MockBackend {
    async fn connect(_url: &str) -> Result<Self> {
        Ok(Self::new())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut script = self.log.script.lock().map_err(|e| AdapterError::InternalError(e.to_string()))?;
        script.statements.push(sql.to_string());
        script.executes.pop_front().unwrap_or(Ok(0))
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut script = self.log.script.lock().map_err(|e| AdapterError::InternalError(e.to_string()))?;
        script.statements.push(sql.to_string());
        script.queries.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    async fn close(mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
