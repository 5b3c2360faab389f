//! Rendering of statement operations to parameterized SQLite SQL

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};
use sigil_core::error::{Result, SigilError};
use sigil_core::statement::{Column, Condition, OnDuplicate, Operation, Value};

/// SQL text with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Rendered {
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        conn.execute(&self.sql, rusqlite::params_from_iter(self.params.iter()))
            .map_err(map_write_error)
    }
}

/// Map a write failure, keeping constraint violations distinguishable
pub fn map_write_error(e: rusqlite::Error) -> SigilError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            SigilError::Conflict(e.to_string())
        }
        _ => SigilError::Projection(e.to_string()),
    }
}

pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| SigilError::Serialization(format!("timestamp out of range: {}", micros)))
}

pub fn to_sql_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqlValue::Integer(to_micros(*ts)),
        Value::TextList(items) => SqlValue::Text(serde_json::to_string(items)?),
    })
}

/// Quote an identifier, rejecting anything but `[A-Za-z0-9_]`
pub fn ident(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(SigilError::InvalidArgument(format!(
            "invalid identifier: {:?}",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

struct Builder {
    sql: String,
    params: Vec<SqlValue>,
}

impl Builder {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn bind(&mut self, value: &Value) -> Result<()> {
        self.params.push(to_sql_value(value)?);
        self.sql.push_str(&format!("?{}", self.params.len()));
        Ok(())
    }

    fn where_clause(&mut self, qualifier: Option<&str>, conditions: &[Condition]) -> Result<()> {
        if conditions.is_empty() {
            return Ok(());
        }
        self.push(" WHERE ");
        for (i, c) in conditions.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            if let Some(q) = qualifier {
                self.push(q);
                self.push(".");
            }
            self.push(&ident(&c.column)?);
            if c.value.is_null() {
                self.push(" IS NULL");
            } else {
                self.push(" = ");
                self.bind(&c.value)?;
            }
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, columns: &[Column]) -> Result<()> {
        let names = columns
            .iter()
            .map(|c| ident(&c.name))
            .collect::<Result<Vec<_>>>()?;
        self.push(&format!("INSERT INTO {} ({}) VALUES (", table, names.join(", ")));
        for (i, c) in columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(&c.value)?;
        }
        self.push(")");
        Ok(())
    }

    fn finish(self) -> Rendered {
        Rendered {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Render a leaf operation; `Multi` and `NoOp` have no SQL of their own
pub fn render(op: &Operation) -> Result<Rendered> {
    let mut b = Builder::new();
    match op {
        Operation::Create {
            table,
            columns,
            on_duplicate,
        } => {
            b.insert(&ident(table)?, columns)?;
            if *on_duplicate == OnDuplicate::Ignore {
                b.push(" ON CONFLICT DO NOTHING");
            }
        }
        Operation::Update {
            table,
            columns,
            conditions,
        } => {
            b.push(&format!("UPDATE {} SET ", ident(table)?));
            for (i, c) in columns.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                b.push(&ident(&c.name)?);
                b.push(" = ");
                b.bind(&c.value)?;
            }
            b.where_clause(None, conditions)?;
        }
        Operation::Delete { table, conditions } => {
            b.push(&format!("DELETE FROM {}", ident(table)?));
            b.where_clause(None, conditions)?;
        }
        Operation::Upsert {
            table,
            columns,
            conflict_key,
            conditions,
        } => {
            let table = ident(table)?;
            b.insert(&table, columns)?;
            let keys = conflict_key
                .iter()
                .map(|k| ident(k))
                .collect::<Result<Vec<_>>>()?;
            let updates = columns
                .iter()
                .filter(|c| !conflict_key.contains(&c.name))
                .map(|c| ident(&c.name).map(|n| format!("{} = excluded.{}", n, n)))
                .collect::<Result<Vec<_>>>()?;
            b.push(&format!(" ON CONFLICT ({})", keys.join(", ")));
            if updates.is_empty() {
                b.push(" DO NOTHING");
            } else {
                b.push(&format!(" DO UPDATE SET {}", updates.join(", ")));
                b.where_clause(Some(&table), conditions)?;
            }
        }
        Operation::Multi(_) | Operation::NoOp => {
            return Err(SigilError::InvalidArgument(
                "only leaf operations render to SQL".into(),
            ))
        }
    }
    Ok(b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::statement::{col, cond};

    #[test]
    fn test_render_update_with_null_condition() {
        let op = Operation::update(
            "members",
            vec![col("roles", vec!["owner".to_string()])],
            vec![cond("project_id", "p1"), cond("deleted_at", Value::Null)],
        );
        let r = render(&op).unwrap();
        assert_eq!(
            r.sql,
            "UPDATE \"members\" SET \"roles\" = ?1 WHERE \"project_id\" = ?2 AND \"deleted_at\" IS NULL"
        );
        assert_eq!(r.params.len(), 2);
        assert_eq!(r.params[0], SqlValue::Text("[\"owner\"]".into()));
    }

    #[test]
    fn test_render_upsert() {
        let op = Operation::upsert(
            "org_metadata",
            &["tenant", "key"],
            vec![col("tenant", "t1"), col("key", "k"), col("value", b"v".to_vec())],
        )
        .when(vec![cond("owner", "org1")]);
        let r = render(&op).unwrap();
        assert_eq!(
            r.sql,
            "INSERT INTO \"org_metadata\" (\"tenant\", \"key\", \"value\") VALUES (?1, ?2, ?3) \
             ON CONFLICT (\"tenant\", \"key\") DO UPDATE SET \"value\" = excluded.\"value\" \
             WHERE \"org_metadata\".\"owner\" = ?4"
        );
        assert_eq!(r.params.len(), 4);
    }

    #[test]
    fn test_render_create_ignore() {
        let op = Operation::create_or_ignore("keys", vec![col("id", "k1")]);
        let r = render(&op).unwrap();
        assert!(r.sql.ends_with("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn test_identifier_injection_rejected() {
        let op = Operation::delete("keys; DROP TABLE x", vec![cond("id", "1")]);
        assert!(matches!(render(&op), Err(SigilError::InvalidArgument(_))));
    }
}
