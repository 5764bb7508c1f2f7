//! Lazily-established connection shared by every adapter operation.

use crate::backend::{DatabaseBackend, QueryResult};
use crate::error::{AdapterError, Result};
use crate::sql::{Dialect, MySqlDialect, Statement};
use std::fmt;
use tokio::sync::Mutex;
use tracing::{info, trace, warn};

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last attempt or call lost the transport; the next call reconnects.
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Slot<B> {
    state: ConnectionState,
    backend: Option<B>,
}

/// Single backend connection, opened on first use.
///
/// Calls are serialized through the mutex. A connection-class error drops
/// the backend so that the next call starts a fresh one.
pub struct Connection<B: DatabaseBackend> {
    url: String,
    dialect: MySqlDialect,
    slot: Mutex<Slot<B>>,
}

impl<B: DatabaseBackend> Connection<B> {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dialect: MySqlDialect,
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                backend: None,
            }),
        }
    }

    /// Wrap an already-open backend.
    pub fn with_backend(url: impl Into<String>, backend: B) -> Self {
        Self {
            url: url.into(),
            dialect: MySqlDialect,
            slot: Mutex::new(Slot {
                state: ConnectionState::Connected,
                backend: Some(backend),
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.slot.lock().await.state
    }

    /// Render and execute `statement`, returning the affected row count.
    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        let sql = self.dialect.render(statement)?;
        trace!(sql = %sql, "execute");

        let mut slot = self.slot.lock().await;
        let result = match self.ensure_open(&mut slot).await {
            Ok(backend) => backend.execute(&sql).await,
            Err(err) => Err(err),
        };
        Self::settle(&mut slot, &result);
        result
    }

    /// Render and run `statement`, returning its rows.
    pub async fn query(&self, statement: &Statement) -> Result<QueryResult> {
        let sql = self.dialect.render(statement)?;
        trace!(sql = %sql, "query");

        let mut slot = self.slot.lock().await;
        let result = match self.ensure_open(&mut slot).await {
            Ok(backend) => backend.query(&sql).await,
            Err(err) => Err(err),
        };
        Self::settle(&mut slot, &result);
        result
    }

    /// Close the backend if one is open. Later calls reconnect.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let result = match slot.backend.take() {
            Some(backend) => backend.close().await,
            None => Ok(()),
        };
        slot.state = ConnectionState::Closed;
        info!(url = %redact(&self.url), "connection closed");
        result
    }

    async fn ensure_open<'a>(&self, slot: &'a mut Slot<B>) -> Result<&'a mut B> {
        let stale = match &slot.backend {
            Some(backend) => !backend.is_connected(),
            None => true,
        };
        if stale {
            slot.backend = None;
            slot.state = ConnectionState::Connecting;
            match B::connect(&self.url).await {
                Ok(backend) => {
                    info!(url = %redact(&self.url), "connected");
                    slot.backend = Some(backend);
                    slot.state = ConnectionState::Connected;
                }
                Err(err) => {
                    slot.state = ConnectionState::Failed;
                    warn!(url = %redact(&self.url), "connect failed: {}", err);
                    return Err(err);
                }
            }
        }
        slot.backend
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("connection unavailable".to_string()))
    }

    fn settle<T>(slot: &mut Slot<B>, result: &Result<T>) {
        if let Err(err) = result {
            if err.is_connection_loss() {
                warn!("dropping connection after transport error: {}", err);
                slot.backend = None;
                slot.state = ConnectionState::Failed;
            }
        }
    }
}

/// The URL with any password replaced, for logs.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockBackend, Reply};
    use crate::sql::SqlParam;

    fn drop_statement() -> Statement {
        Statement::new("DROP TABLE IF EXISTS $1", vec![SqlParam::ident("Widget")])
    }

    #[tokio::test]
    async fn test_lazy_connect() {
        let connection: Connection<MockBackend> = Connection::new("mysql://localhost/test");
        assert_eq!(connection.state().await, ConnectionState::Disconnected);

        connection.execute(&drop_statement()).await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_renders_before_sending() {
        let backend = MockBackend::new();
        let log = backend.log();
        let connection = Connection::with_backend("mysql://localhost/test", backend);

        connection.execute(&drop_statement()).await.unwrap();
        assert_eq!(log.statements(), vec!["DROP TABLE IF EXISTS `Widget`".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_loss_tears_down() {
        let backend = MockBackend::new();
        backend.push(Reply::Execute(Err(AdapterError::Connection("broken pipe".into()))));
        let connection = Connection::with_backend("mysql://localhost/test", backend);

        let err = connection.execute(&drop_statement()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(connection.state().await, ConnectionState::Failed);

        connection.execute(&drop_statement()).await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_engine_error_keeps_connection() {
        let backend = MockBackend::new();
        backend.push(Reply::Execute(Err(MockBackend::engine_error(1146))));
        let connection = Connection::with_backend("mysql://localhost/test", backend);

        assert!(connection.execute(&drop_statement()).await.is_err());
        assert_eq!(connection.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_close() {
        let connection = Connection::with_backend("mysql://localhost/test", MockBackend::new());
        connection.close().await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("mysql://root:secret@db:3306/app"), "mysql://root:***@db:3306/app");
        assert_eq!(redact("mysql://db/app"), "mysql://db/app");
    }
}
