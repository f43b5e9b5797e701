//! SQLite sink for WARN and ERROR records.
//!
//! Relay correlation is pulled out into columns: the connection, the dapp
//! and, for call requests, the JSON-RPC method and request id. Correlation
//! missing from an event is inherited from its enclosing spans, innermost
//! first. Any other field lands in `fields` as a JSON object.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp     TEXT NOT NULL,
        severity      INTEGER NOT NULL,
        level         TEXT NOT NULL,
        target        TEXT NOT NULL,
        message       TEXT NOT NULL,
        error         TEXT,
        connection_id TEXT,
        dapp          TEXT,
        method        TEXT,
        request_id    INTEGER,
        fields        TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_connection ON logs(connection_id, id);
    CREATE INDEX IF NOT EXISTS idx_logs_dapp ON logs(dapp, id);";

/// A persisted record, newest first when queried.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub error: Option<String>,
    pub connection_id: Option<String>,
    pub dapp: Option<String>,
    pub method: Option<String>,
    pub request_id: Option<u64>,
    pub fields: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Least severe level to include. Defaults to WARN.
    pub min_level: Option<Level>,
    pub connection_id: Option<String>,
    pub dapp: Option<String>,
    pub method: Option<String>,
    pub limit: Option<u32>,
}

// Lower is more severe, so "at least WARN" is `severity <= 2`.
fn severity(level: Level) -> i64 {
    match level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

/// Correlation carried by an event or one of its spans.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Correlation {
    connection_id: Option<String>,
    dapp: Option<String>,
    method: Option<String>,
    request_id: Option<u64>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fill the gaps from an enclosing span.
    fn inherit(&mut self, outer: &Correlation) {
        if self.connection_id.is_none() {
            self.connection_id.clone_from(&outer.connection_id);
        }
        if self.dapp.is_none() {
            self.dapp.clone_from(&outer.dapp);
        }
        if self.method.is_none() {
            self.method.clone_from(&outer.method);
        }
        if self.request_id.is_none() {
            self.request_id = outer.request_id;
        }
    }

    /// Take every value `later` recorded.
    fn overlay(&mut self, later: Correlation) {
        if later.connection_id.is_some() {
            self.connection_id = later.connection_id;
        }
        if later.dapp.is_some() {
            self.dapp = later.dapp;
        }
        if later.method.is_some() {
            self.method = later.method;
        }
        if later.request_id.is_some() {
            self.request_id = later.request_id;
        }
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    error: Option<String>,
    correlation: Correlation,
    extra: Map<String, Value>,
}

impl RecordVisitor {
    fn text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "error" => self.error = Some(value),
            "connection_id" => self.correlation.connection_id = Some(value),
            "dapp" => self.correlation.dapp = Some(value),
            "method" => self.correlation.method = Some(value),
            "request_id" => match value.parse() {
                Ok(id) => self.correlation.request_id = Some(id),
                Err(_) => {
                    self.extra.insert(name.to_string(), Value::String(value));
                }
            },
            _ => {
                self.extra.insert(name.to_string(), Value::String(value));
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "request_id" {
            self.correlation.request_id = Some(value);
        } else {
            self.extra.insert(field.name().to_string(), value.into());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match (field.name(), u64::try_from(value)) {
            ("request_id", Ok(id)) => self.correlation.request_id = Some(id),
            (name, _) => {
                self.extra.insert(name.to_string(), value.into());
            }
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.insert(field.name().to_string(), value.into());
    }
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            // Connection::open reports the real failure
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Errors are dropped: a failing sink must not log about itself.
    fn insert(&self, level: Level, target: &str, visitor: RecordVisitor) {
        let fields = (!visitor.extra.is_empty())
            .then(|| Value::Object(visitor.extra).to_string());
        let request_id = visitor
            .correlation
            .request_id
            .and_then(|id| i64::try_from(id).ok());
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, severity, level, target, message, error,
                               connection_id, dapp, method, request_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                Utc::now().to_rfc3339(),
                severity(level),
                level.as_str(),
                target,
                visitor.message.unwrap_or_default(),
                visitor.error,
                visitor.correlation.connection_id,
                visitor.correlation.dapp,
                visitor.correlation.method,
                request_id,
                fields,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, error,
                    connection_id, dapp, method, request_id, fields
             FROM logs
             WHERE severity <= ?1
               AND (?2 IS NULL OR connection_id = ?2)
               AND (?3 IS NULL OR dapp = ?3)
               AND (?4 IS NULL OR method = ?4)
             ORDER BY id DESC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                severity(q.min_level.unwrap_or(Level::WARN)),
                q.connection_id,
                q.dapp,
                q.method,
                i64::from(q.limit.unwrap_or(100)),
            ],
            |row| {
                let request_id: Option<i64> = row.get(9)?;
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    error: row.get(5)?,
                    connection_id: row.get(6)?,
                    dapp: row.get(7)?,
                    method: row.get(8)?,
                    request_id: request_id.and_then(|id| u64::try_from(id).ok()),
                    fields: row.get(10)?,
                })
            },
        )?;
        rows.collect()
    }
}

/// Layer feeding WARN and ERROR events into a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        attrs.record(&mut visitor);
        if visitor.correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.correlation);
        }
    }

    // `#[instrument]` spans often declare fields empty and record them later.
    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        values.record(&mut visitor);
        if visitor.correlation.is_empty() {
            return;
        }
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<Correlation>() {
            Some(existing) => existing.overlay(visitor.correlation),
            None => extensions.insert(visitor.correlation),
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Correlation>() {
                    visitor.correlation.inherit(outer);
                }
            }
        }

        self.sink.insert(level, event.metadata().target(), visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("nested/logs.db")).unwrap();
        (dir, Arc::new(sink))
    }

    fn capture(sink: &Arc<SqliteLogSink>, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(Arc::clone(sink)));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn keeps_only_warn_and_error() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            tracing::debug!("debug");
            tracing::info!("info");
            tracing::warn!("warn");
            tracing::error!("error");
        });

        let all = sink.query(&LogQuery::default()).unwrap();
        let messages: Vec<_> = all.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["error", "warn"]);

        let errors = sink
            .query(&LogQuery {
                min_level: Some(Level::ERROR),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].level, "ERROR");
    }

    #[test]
    fn call_request_fields_become_columns() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            tracing::warn!(
                connection_id = "conn_1",
                method = "eth_sendTransaction",
                request_id = 7u64,
                error = "no pending call request with id 7",
                attempt = 2,
                "action ignored"
            );
        });

        let record = &sink.query(&LogQuery::default()).unwrap()[0];
        assert_eq!(record.connection_id.as_deref(), Some("conn_1"));
        assert_eq!(record.method.as_deref(), Some("eth_sendTransaction"));
        assert_eq!(record.request_id, Some(7));
        assert_eq!(record.error.as_deref(), Some("no pending call request with id 7"));
        assert_eq!(record.fields.as_deref(), Some(r#"{"attempt":2}"#));
        assert_eq!(record.dapp, None);
    }

    #[test]
    fn innermost_span_wins_and_gaps_come_from_outer_spans() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            let outer = tracing::info_span!("launch", connection_id = "conn_outer", dapp = "TestDapp");
            let _outer = outer.enter();
            let inner = tracing::info_span!("respond", connection_id = "conn_inner", request_id = 3u64);
            let _inner = inner.enter();
            tracing::warn!("transaction approval is not supported");
        });

        let record = &sink.query(&LogQuery::default()).unwrap()[0];
        assert_eq!(record.connection_id.as_deref(), Some("conn_inner"));
        assert_eq!(record.dapp.as_deref(), Some("TestDapp"));
        assert_eq!(record.request_id, Some(3));
    }

    #[test]
    fn fields_recorded_after_span_creation_are_inherited() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            let span = tracing::info_span!("init", connection_id = tracing::field::Empty);
            let _entered = span.enter();
            span.record("connection_id", "conn_late");
            tracing::error!("event drain task failed");
        });

        let record = &sink.query(&LogQuery::default()).unwrap()[0];
        assert_eq!(record.connection_id.as_deref(), Some("conn_late"));
    }

    #[test]
    fn query_filters_and_limits_newest_first() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            for id in 0..5u64 {
                tracing::warn!(connection_id = "conn_a", dapp = "A", method = "personal_sign", request_id = id, "a");
            }
            tracing::warn!(connection_id = "conn_b", dapp = "B", method = "eth_sendTransaction", "b");
        });

        let by_connection = sink
            .query(&LogQuery {
                connection_id: Some("conn_b".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_connection.len(), 1);
        assert_eq!(by_connection[0].message, "b");

        let by_method = sink
            .query(&LogQuery {
                dapp: Some("A".into()),
                method: Some("personal_sign".into()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<_> = by_method.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![Some(4), Some(3)]);
    }
}
