//! docsql - Document-store semantics on MySQL
//!
//! docsql backs a Parse-style object store (dynamic classes, `_User`/`_Role`,
//! `_Join:` relation tables, `__type`/`__op` JSON markers) with a MySQL 8
//! engine. It keeps relational tables in step with evolving class schemas
//! and compiles document queries and atomic update operators into SQL.
//!
//! # Architecture
//!
//! - **Schema → DDL**: class schemas become tables, columns, join tables,
//!   unique constraints and full-text indexes, tracked in a registry table
//! - **Query → WHERE**: document predicates (comparisons, `$in`, `$all`,
//!   `$regex`, `$text`, geospatial, nested paths) compile to SQL expressions
//! - **Update → SET**: `Increment`, `Add`, `AddUnique`, `Remove`, `Delete`
//!   and nested-object patches compile to assignments
//! - **Rows ↔ Documents**: typed encoding on insert, typed decoding on read
//!
//! Compilers are pure: they return SQL text with `$N` placeholders and typed
//! parameters, which [`sql::MySqlDialect`] renders with identifiers quoted
//! and literals escaped.
//!
//! # Example
//!
//! ```rust,no_run
//! use docsql::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     #[cfg(feature = "mysql")]
//!     {
//!         let config = AdapterConfig::new("mysql://root@localhost/parse");
//!         let adapter: StorageAdapter<MySqlBackend> = StorageAdapter::new(config);
//!
//!         let schema = ClassSchema::with_default_fields("Widget")
//!             .field("name", FieldType::String)
//!             .field("count", FieldType::Number);
//!         adapter.create_class("Widget", &schema).await?;
//!
//!         let widget = json!({"objectId": "w1", "name": "gear", "count": 1});
//!         adapter
//!             .create_object("Widget", &schema, widget.as_object().unwrap())
//!             .await?;
//!
//!         let query = json!({"count": {"$gte": 1}});
//!         let found = adapter
//!             .find("Widget", &schema, query.as_object().unwrap(), &FindOptions::new().limit(10))
//!             .await?;
//!         println!("found: {:?}", found);
//!
//!         adapter.handle_shutdown().await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! The MySQL backend is behind the default `mysql` feature. Other transports
//! plug in through [`DatabaseBackend`].

pub mod adapter;
pub mod backend;
pub mod classify;
pub mod codec;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod manager;
pub mod pattern;
pub mod query;
pub mod schema;
pub mod sql;
pub mod types;
pub mod update;
pub mod value;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(test)]
mod mock;

pub use adapter::{FindOptions, SortDirection, StorageAdapter};
pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use codec::{decode_row, encode_object, EncodedRow};
pub use config::AdapterConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{AdapterError, EngineError, ErrorKind, Result};
pub use query::{compile_where, ComparisonOp, Constraint, LogicalOp, Query, WhereClause};
pub use schema::{ClassLevelPermissions, ClassSchema, FieldType};
pub use sql::{Dialect, MySqlDialect, SqlParam, Statement};
pub use types::ColumnType;
pub use update::{compile_update, SetClause, Update, UpdateOp};

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::adapter::{FindOptions, SortDirection, StorageAdapter};
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::config::AdapterConfig;
    pub use crate::error::{AdapterError, ErrorKind, Result};
    pub use crate::schema::{ClassLevelPermissions, ClassSchema, FieldType};

    #[cfg(feature = "mysql")]
    pub use crate::mysql::MySqlBackend;
}
