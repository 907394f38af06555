//! Append-only audit trail (`infrastructure_changes`).
//!
//! Entries are written only by the reconciler and are immutable; the schema's
//! triggers reject any UPDATE or DELETE.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use serde_json::{Map, Value};

use infradb_core::{ChangeAttribution, ChangeLogEntry, ChangeType, EntityId, EntityKind};

use crate::error::StoreError;
use crate::store::Store;

/// An entry about to be appended.
pub(crate) struct NewChange<'a> {
    pub change_type: ChangeType,
    pub kind: EntityKind,
    pub entity_id: EntityId,
    pub by: &'a ChangeAttribution,
    pub old_values: Option<&'a Value>,
    pub new_values: &'a Map<String, Value>,
    pub description: Option<String>,
}

/// Appends `change` inside a savepoint of `tx`.
///
/// Returns whether the entry was written. A failure rolls back only the
/// savepoint and is reported as a warning; the caller's entity write stands.
pub(crate) fn append_in_savepoint(tx: &mut Transaction<'_>, change: &NewChange<'_>) -> bool {
    let result = tx.savepoint().map_err(StoreError::from).and_then(|sp| {
        insert(&sp, change)?;
        sp.commit()?;
        Ok(())
    });
    match result {
        Ok(()) => {
            tracing::info!(
                change_type = %change.change_type,
                entity = %change.kind,
                id = %change.entity_id,
                by = %change.by.changed_by,
                "logged change"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                change_type = %change.change_type,
                entity = %change.kind,
                id = %change.entity_id,
                error = %e,
                "failed to log change; entity write kept"
            );
            false
        }
    }
}

fn insert(conn: &Connection, change: &NewChange<'_>) -> Result<(), StoreError> {
    let old = change.old_values.map(serde_json::to_string).transpose()?;
    let new = serde_json::to_string(change.new_values)?;
    conn.execute(
        "INSERT INTO infrastructure_changes
         (change_type, entity_type, entity_id, changed_by, change_source,
          old_values, new_values, description, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            change.change_type.as_str(),
            change.kind.as_str(),
            change.entity_id.0,
            change.by.changed_by,
            change.by.source.as_str(),
            old,
            new,
            change.description,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filter for [`Store::changes`]; empty means every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<EntityId>,
    pub limit: Option<usize>,
}

impl Store {
    /// Audit entries, newest first.
    pub fn changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeLogEntry>, StoreError> {
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, change_type, entity_type, entity_id, changed_by, change_source,
                        old_values, new_values, description, changed_at
                 FROM infrastructure_changes
                 WHERE (?1 IS NULL OR entity_type = ?1)
                   AND (?2 IS NULL OR entity_id = ?2)
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![
                    filter.entity_type.map(EntityKind::as_str),
                    filter.entity_id.map(|id| id.0),
                    limit
                ],
                entry_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
        id: row.get(0)?,
        change_type: parse_text(row, 1)?,
        entity_type: parse_text(row, 2)?,
        entity_id: EntityId(row.get(3)?),
        changed_by: row.get(4)?,
        change_source: parse_text(row, 5)?,
        old_values: row
            .get::<_, Option<String>>(6)?
            .map(|s| json_column(6, &s))
            .transpose()?,
        new_values: json_column(7, &row.get::<_, String>(7)?)?,
        description: row.get(8)?,
        timestamp: timestamp_column(9, &row.get::<_, String>(9)?)?,
    })
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_column(idx: usize, text: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
