use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{AdapterError, EngineError, Result};
use crate::value::iso_string;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};
use sqlx::mysql::{MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, TypeInfo, ValueRef};

/// MySQL 8 backend over a single sqlx connection.
///
/// Statements are sent through the text protocol so that `;`-separated
/// batches run in one round trip.
pub struct MySqlBackend {
    conn: MySqlConnection,
    broken: bool,
}

impl MySqlBackend {
    /// Open a connection. Host, credentials and TLS options come from `url`.
    pub async fn new(url: &str) -> Result<Self> {
        let conn = MySqlConnection::connect(url).await?;
        Ok(Self { conn, broken: false })
    }

    fn track<T>(&mut self, result: std::result::Result<T, sqlx::Error>) -> Result<T> {
        result.map_err(|err| {
            let err = AdapterError::from(err);
            if err.is_connection_loss() {
                self.broken = true;
            }
            err
        })
    }

    /// Convert a MySQL row to a QueryRow, dispatching on the column type.
    fn convert_row(row: &MySqlRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let index = column.ordinal();
            let name = column.name();
            let is_null = row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true);
            if is_null {
                query_row.insert(name, Value::Null);
                continue;
            }
            let value = match column.type_info().name() {
                "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                    .try_get::<i64, _>(index)
                    .map(Value::from)
                    .or_else(|_| row.try_get::<bool, _>(index).map(Value::from))
                    .ok(),
                name if name.ends_with("UNSIGNED") => row.try_get::<u64, _>(index).map(Value::from).ok(),
                "DOUBLE" => row.try_get::<f64, _>(index).ok().map(Value::from),
                "FLOAT" => row.try_get::<f32, _>(index).ok().map(|v| Value::from(f64::from(v))),
                "TIMESTAMP" => row
                    .try_get::<DateTime<Utc>, _>(index)
                    .ok()
                    .map(|date| Value::String(iso_string(&date))),
                "DATETIME" => row
                    .try_get::<NaiveDateTime, _>(index)
                    .ok()
                    .map(|date| Value::String(iso_string(&date.and_utc()))),
                "JSON" => row.try_get::<Value, _>(index).ok(),
                "GEOMETRY" => row
                    .try_get_unchecked::<Vec<u8>, _>(index)
                    .ok()
                    .and_then(|bytes| decode_point(&bytes))
                    .map(|(x, y)| json!({ "x": x, "y": y })),
                _ => row
                    .try_get::<String, _>(index)
                    .or_else(|_| row.try_get_unchecked::<String, _>(index))
                    .ok()
                    .map(Value::String),
            };
            query_row.insert(name, value.unwrap_or(Value::Null));
        }

        query_row
    }
}

/// Decode MySQL's internal geometry (4-byte SRID followed by WKB) as a
/// point `(x, y)`.
pub fn decode_point(bytes: &[u8]) -> Option<(f64, f64)> {
    let wkb = bytes.get(4..)?;
    let little_endian = match wkb.first()? {
        0 => false,
        1 => true,
        _ => return None,
    };
    let read_u32 = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = wkb.get(at..at + 4)?.try_into().ok()?;
        Some(if little_endian { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) })
    };
    let read_f64 = |at: usize| -> Option<f64> {
        let raw: [u8; 8] = wkb.get(at..at + 8)?.try_into().ok()?;
        Some(if little_endian { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) })
    };
    // WKB type 1 is Point
    if read_u32(1)? != 1 {
        return None;
    }
    Some((read_f64(5)?, read_f64(13)?))
}

impl From<sqlx::Error> for AdapterError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let number = db.try_downcast_ref::<MySqlDatabaseError>().map(|e| e.number());
                AdapterError::Engine(EngineError::new(number, db.message()))
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => AdapterError::Connection(err.to_string()),
            _ => AdapterError::Database(err.to_string()),
        }
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = self.conn.execute(sqlx::raw_sql(sql)).await;
        Ok(self.track(result)?.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let rows = self.conn.fetch_all(sqlx::raw_sql(sql)).await;
        let rows = self.track(rows)?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    fn is_connected(&self) -> bool {
        !self.broken
    }

    async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}
