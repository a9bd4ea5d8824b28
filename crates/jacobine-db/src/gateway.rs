//! Prepared-statement CRUD with transparent reconnect on idle-timeout loss.
//!
//! One [`DbGateway`] is opened per consumer process; it is not safe for
//! concurrent use by multiple workers (see spec §4.1) — callers hold it
//! behind `&mut self`, never behind a shared pool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use jacobine_core::error::{DatabaseError, UsageError};
use jacobine_core::sql::SqlValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row, TypeInfo};

/// A single result row, as an ordered column→value mapping.
pub type SqlRow = BTreeMap<String, SqlValue>;

/// The CRUD seam every stage handler talks to. Lets tests substitute a
/// hand-rolled double for the live `DbGateway` without touching a real
/// MySQL connection.
#[async_trait]
pub trait Db: Send {
    async fn select(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SqlRow>, UsageOrDatabaseError>;

    async fn insert(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
    ) -> Result<String, UsageOrDatabaseError>;

    async fn update(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError>;

    async fn delete(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError>;
}

pub struct DbGateway {
    options: MySqlConnectOptions,
    conn: MySqlConnection,
}

impl DbGateway {
    pub async fn connect(options: MySqlConnectOptions) -> Result<Self, DatabaseError> {
        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(to_database_error)?;
        Ok(Self { options, conn })
    }

    async fn reconnect(&mut self) -> Result<(), DatabaseError> {
        tracing::warn!("mysql connection gone away, reconnecting");
        let conn = MySqlConnection::connect_with(&self.options)
            .await
            .map_err(to_database_error)?;
        self.conn = conn;
        Ok(())
    }

    /// `SELECT` with a conjunctive equality predicate and optional group/order/limit.
    pub async fn select(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SqlRow>, UsageOrDatabaseError> {
        require_table(table)?;
        let (sql, binds) = build_select(table, predicate, group_by, order_by, limit);
        let rows = self.run_fetch_all(&sql, &binds).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    /// `INSERT`, returning the driver-assigned row id as a string.
    pub async fn insert(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
    ) -> Result<String, UsageOrDatabaseError> {
        require_table(table)?;
        require_values(values)?;
        let (sql, binds) = build_insert(table, values);
        let result = self.run_execute(&sql, &binds).await?;
        Ok(result.last_insert_id().to_string())
    }

    /// `UPDATE`, returning the number of affected rows.
    pub async fn update(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        require_table(table)?;
        require_values(values)?;
        let (sql, binds) = build_update(table, values, predicate);
        let result = self.run_execute(&sql, &binds).await?;
        Ok(result.rows_affected())
    }

    /// `DELETE`, returning the number of affected rows.
    pub async fn delete(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        require_table(table)?;
        let (sql, binds) = build_delete(table, predicate);
        let result = self.run_execute(&sql, &binds).await?;
        Ok(result.rows_affected())
    }

    async fn run_execute(
        &mut self,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<sqlx::mysql::MySqlQueryResult, DatabaseError> {
        match bind_and_execute(&mut self.conn, sql, binds).await {
            Ok(r) => Ok(r),
            Err(e) if should_reconnect(&e) => {
                self.reconnect().await?;
                bind_and_execute(&mut self.conn, sql, binds)
                    .await
                    .map_err(to_database_error)
            }
            Err(e) => Err(to_database_error(e)),
        }
    }

    async fn run_fetch_all(
        &mut self,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<Vec<MySqlRow>, DatabaseError> {
        match bind_and_fetch_all(&mut self.conn, sql, binds).await {
            Ok(r) => Ok(r),
            Err(e) if should_reconnect(&e) => {
                self.reconnect().await?;
                bind_and_fetch_all(&mut self.conn, sql, binds)
                    .await
                    .map_err(to_database_error)
            }
            Err(e) => Err(to_database_error(e)),
        }
    }
}

#[async_trait]
impl Db for DbGateway {
    async fn select(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SqlRow>, UsageOrDatabaseError> {
        DbGateway::select(self, table, predicate, group_by, order_by, limit).await
    }

    async fn insert(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
    ) -> Result<String, UsageOrDatabaseError> {
        DbGateway::insert(self, table, values).await
    }

    async fn update(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        DbGateway::update(self, table, values, predicate).await
    }

    async fn delete(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        DbGateway::delete(self, table, predicate).await
    }
}

/// Either a `UsageError` (caught before any SQL is built) or a `DatabaseError`
/// (surfaced after the one-shot reconnect retry).
#[derive(Debug, thiserror::Error, Clone)]
pub enum UsageOrDatabaseError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn require_table(table: &str) -> Result<(), UsageError> {
    if table.is_empty() {
        Err(UsageError::EmptyTable)
    } else {
        Ok(())
    }
}

fn require_values(values: &BTreeMap<String, SqlValue>) -> Result<(), UsageError> {
    if values.is_empty() {
        Err(UsageError::EmptyValues)
    } else {
        Ok(())
    }
}

fn build_where(predicate: &BTreeMap<String, SqlValue>) -> (String, Vec<SqlValue>) {
    if predicate.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut binds = Vec::with_capacity(predicate.len());
    let clauses: Vec<String> = predicate
        .iter()
        .map(|(col, val)| match val {
            SqlValue::Null => format!("`{col}` IS NULL"),
            other => {
                binds.push(other.clone());
                format!("`{col}` = ?")
            }
        })
        .collect();
    (format!(" WHERE {}", clauses.join(" AND ")), binds)
}

fn build_select(
    table: &str,
    predicate: &BTreeMap<String, SqlValue>,
    group_by: Option<&str>,
    order_by: Option<&str>,
    limit: Option<u64>,
) -> (String, Vec<SqlValue>) {
    let (where_clause, binds) = build_where(predicate);
    let mut sql = format!("SELECT * FROM `{table}`{where_clause}");
    if let Some(group) = group_by {
        sql.push_str(&format!(" GROUP BY {group}"));
    }
    if let Some(order) = order_by {
        sql.push_str(&format!(" ORDER BY {order}"));
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    (sql, binds)
}

fn build_insert(table: &str, values: &BTreeMap<String, SqlValue>) -> (String, Vec<SqlValue>) {
    let columns: Vec<&String> = values.keys().collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let column_list = columns
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO `{table}` ({column_list}) VALUES ({placeholders})");
    let binds = values.values().cloned().collect();
    (sql, binds)
}

fn build_update(
    table: &str,
    values: &BTreeMap<String, SqlValue>,
    predicate: &BTreeMap<String, SqlValue>,
) -> (String, Vec<SqlValue>) {
    let mut binds = Vec::with_capacity(values.len());
    let assignments: Vec<String> = values
        .iter()
        .map(|(col, val)| {
            binds.push(val.clone());
            format!("`{col}` = ?")
        })
        .collect();
    let (where_clause, where_binds) = build_where(predicate);
    binds.extend(where_binds);
    let sql = format!("UPDATE `{table}` SET {}{}", assignments.join(", "), where_clause);
    (sql, binds)
}

fn build_delete(table: &str, predicate: &BTreeMap<String, SqlValue>) -> (String, Vec<SqlValue>) {
    let (where_clause, binds) = build_where(predicate);
    (format!("DELETE FROM `{table}`{where_clause}"), binds)
}

async fn bind_and_execute(
    conn: &mut MySqlConnection,
    sql: &str,
    binds: &[SqlValue],
) -> Result<sqlx::mysql::MySqlQueryResult, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for v in binds {
        query = bind_one(query, v);
    }
    query.execute(conn).await
}

async fn bind_and_fetch_all(
    conn: &mut MySqlConnection,
    sql: &str,
    binds: &[SqlValue],
) -> Result<Vec<MySqlRow>, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for v in binds {
        query = bind_one(query, v);
    }
    query.fetch_all(conn).await
}

fn bind_one<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        SqlValue::Text(s) => query.bind(s.as_str()),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Null => query.bind(Option::<String>::None),
    }
}

fn row_to_map(row: &MySqlRow) -> SqlRow {
    let mut map = SqlRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, idx));
    }
    map
}

fn decode_column(row: &MySqlRow, idx: usize) -> SqlValue {
    let type_name = row.columns()[idx].type_info().name();
    match type_name {
        "TINYINT" | "SMALLINT" | "INT" | "MEDIUMINT" | "BIGINT" | "YEAR" => row
            .try_get::<i64, _>(idx)
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "BOOLEAN" | "BOOL" => row
            .try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    }
}

fn to_database_error(e: sqlx::Error) -> DatabaseError {
    match &e {
        sqlx::Error::Database(db) => DatabaseError {
            code: db.code().map(|c| c.to_string()),
            message: db.message().to_string(),
        },
        other => DatabaseError {
            code: None,
            message: other.to_string(),
        },
    }
}

/// The sole retry point at this layer: "server gone away" / connection
/// dropped triggers one transparent reconnect + retry. Any other error
/// (including a genuine constraint violation) is not retried.
fn should_reconnect(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("2006") | Some("2013"))
        }
        _ => false,
    }
}
