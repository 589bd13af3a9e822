use super::{StateStore, StateStoreError};
use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::{Map, Number, Value};

pub const DEFAULT_QUERY_LIMIT: usize = 20;
pub const MAX_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySummary {
    pub row_count: usize,
    pub columns: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub summary: QuerySummary,
    pub limit: usize,
}

pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_QUERY_LIMIT,
        Some(limit) => limit.clamp(1, MAX_QUERY_LIMIT as i64) as usize,
    }
}

/// Accepts a single `SELECT` statement; a trailing `;` is dropped.
pub fn validate_select(sql: &str) -> Result<&str, StateStoreError> {
    let trimmed = sql.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    let starts_with_select = body
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
    if !starts_with_select {
        return Err(StateStoreError::RejectedQuery {
            reason: "only SELECT statements are allowed".to_string(),
        });
    }
    if body.contains(';') {
        return Err(StateStoreError::RejectedQuery {
            reason: "multiple statements are not allowed".to_string(),
        });
    }
    Ok(body)
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::Number(Number::from(int)),
        ValueRef::Real(float) => Number::from_f64(float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

/// Runs `sql` on a read-only connection, wrapped so at most `limit` rows
/// come back.
pub fn query_select(
    store: &StateStore,
    sql: &str,
    limit: Option<i64>,
) -> Result<QueryResult, StateStoreError> {
    let body = validate_select(sql)?;
    let limit = clamp_limit(limit);
    let connection = store.connect_read_only()?;
    let mut statement = connection.prepare(&format!("SELECT * FROM ({body}) LIMIT ?1"))?;
    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = statement.query([(limit + 1) as i64])?;
    while let Some(row) = cursor.next()? {
        if rows.len() == limit {
            truncated = true;
            break;
        }
        let mut object = Map::new();
        for (index, column) in columns.iter().enumerate() {
            object.insert(column.clone(), json_from_sql(row.get_ref(index)?));
        }
        rows.push(object);
    }

    Ok(QueryResult {
        summary: QuerySummary {
            row_count: rows.len(),
            columns,
            truncated,
        },
        rows,
        limit,
    })
}
