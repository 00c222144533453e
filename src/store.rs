//! Tabular backend seam.
//!
//! `TableStore` is the query-builder view of the hosted database that the
//! rest of the crate talks to. `client::SupabaseClient` implements it over
//! HTTP; `MemoryStore` implements it in-process for `--demo` and tests.

use chrono::{DateTime, Utc};
use core::fmt;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

use crate::utils::{format_timestamp, parse_timestamp};

#[derive(Debug)]
pub enum StoreError {
    /// The backend cannot be reached at all (DNS, refused, timed out).
    ConnectionUnavailable(String),
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
    /// A row did not match the expected shape.
    Decode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionUnavailable(s) => write!(f, "backend unavailable: {}", s),
            StoreError::Transport(s) => write!(f, "transport error: {}", s),
            StoreError::Http { status, message } => write!(f, "http {}: {}", status, message),
            StoreError::Json(e) => write!(f, "json error: {}", e),
            StoreError::Decode(s) => write!(f, "decode error: {}", s),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::ConnectionUnavailable(_))
    }

    /// Backend-provided text, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            StoreError::ConnectionUnavailable(s) | StoreError::Transport(s) | StoreError::Decode(s) => s.clone(),
            StoreError::Http { message, .. } => message.clone(),
            StoreError::Json(e) => e.to_string(),
        }
    }
}

/// A read against one table failed; the cycle that issued it is abandoned.
#[derive(Debug)]
pub struct FetchError {
    pub table: String,
    pub source: StoreError,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetching {} failed: {}", self.table, self.source)
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// An insert failed; nothing is queued for later.
#[derive(Debug)]
pub struct WriteError {
    pub table: String,
    pub source: StoreError,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "writing {} failed: {}", self.table, self.source)
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Order::Ascending => "asc",
            Order::Descending => "desc",
        }
    }
}

/// `select * from table [where column >= since] [order by ...] [limit n]`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub since: Option<(String, DateTime<Utc>)>,
    pub order: Option<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Query {
            table: table.into(),
            since: None,
            order: None,
            limit: None,
        }
    }

    pub fn gte(mut self, column: impl Into<String>, since: DateTime<Utc>) -> Self {
        self.since = Some((column.into(), since));
        self
    }

    pub fn order(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order = Some((column.into(), order));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// PostgREST query-string parameters for this query.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut q = vec![("select".to_string(), "*".to_string())];
        if let Some((column, since)) = &self.since {
            q.push((column.clone(), format!("gte.{}", format_timestamp(*since))));
        }
        if let Some((column, order)) = &self.order {
            q.push(("order".to_string(), format!("{}.{}", column, order.as_str())));
        }
        if let Some(n) = self.limit {
            q.push(("limit".to_string(), n.to_string()));
        }
        q
    }
}

pub trait TableStore {
    fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError>;
    fn insert(&self, table: &str, rows: &[Value]) -> Result<(), StoreError>;
}

/// In-process table store. Single-threaded, interior mutability via `RefCell`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<BTreeMap<String, Vec<Value>>>,
    failing: RefCell<BTreeSet<String>>,
    unavailable_for: Cell<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_rows(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.tables
            .borrow_mut()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.borrow().get(table).cloned().unwrap_or_default()
    }

    /// Make every request against `table` fail with an http 500.
    #[cfg(test)]
    pub fn fail_table(&self, table: &str) {
        self.failing.borrow_mut().insert(table.to_string());
    }

    #[cfg(test)]
    pub fn heal_table(&self, table: &str) {
        self.failing.borrow_mut().remove(table);
    }

    /// The next `attempts` requests report `ConnectionUnavailable`.
    #[cfg(test)]
    pub fn unavailable_for(&self, attempts: u32) {
        self.unavailable_for.set(attempts);
    }

    fn check(&self, table: &str) -> Result<(), StoreError> {
        let remaining = self.unavailable_for.get();
        if remaining > 0 {
            self.unavailable_for.set(remaining - 1);
            return Err(StoreError::ConnectionUnavailable("memory store offline".into()));
        }
        if self.failing.borrow().contains(table) {
            return Err(StoreError::Http {
                status: 500,
                message: format!("relation \"{}\" failed", table),
            });
        }
        Ok(())
    }
}

fn row_time(row: &Value, column: &str) -> Option<DateTime<Utc>> {
    row.get(column).and_then(Value::as_str).and_then(parse_timestamp)
}

impl TableStore for MemoryStore {
    fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check(&query.table)?;
        let mut rows = self.rows(&query.table);
        if let Some((column, since)) = &query.since {
            rows.retain(|r| row_time(r, column).is_some_and(|ts| ts >= *since));
        }
        if let Some((column, order)) = &query.order {
            // stable sort keeps insertion order between equal timestamps
            rows.sort_by(|a, b| {
                let ord = row_time(a, column).cmp(&row_time(b, column));
                match order {
                    Order::Ascending => ord,
                    Order::Descending => ord.reverse(),
                }
            });
        }
        if let Some(n) = query.limit {
            rows.truncate(n);
        }
        Ok(rows)
    }

    fn insert(&self, table: &str, rows: &[Value]) -> Result<(), StoreError> {
        self.check(table)?;
        if rows.iter().any(|r| !r.is_object()) {
            return Err(StoreError::Http {
                status: 400,
                message: "rows must be JSON objects".into(),
            });
        }
        self.put_rows(table, rows.iter().cloned());
        Ok(())
    }
}
