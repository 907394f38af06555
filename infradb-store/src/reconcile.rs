//! The reconciler: merge one discovered record into the store with an audit
//! entry, as one transaction.
//!
//! ## Protocol
//!
//! 1. Check every parent host reference; a missing host is `NotFound`.
//! 2. Look up the row by the kind's natural key.
//! 3. Absent: insert the present fields, log a `create`.
//! 4. Present: write only the present fields whose stored value differs.
//!    Nothing differs → no write, no log.
//! 5. Log an `update` unless the kind declares significant fields and none
//!    of them changed.
//!
//! The audit insert runs in a savepoint. If it fails the savepoint is rolled
//! back, a warning is emitted and the entity write still commits.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Transaction};
use serde::Serialize;
use serde_json::{Map, Value};

use infradb_core::{ChangeAttribution, ChangeType, EntityId, EntityKind, Record};

use crate::audit::{self, NewChange};
use crate::error::ReconcileError;
use crate::schema::NOW_SQL;
use crate::store::Store;
use crate::values::{self, to_sql};

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// What a reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created {
        audited: bool,
    },
    /// `fields` lists the columns that were written.
    Updated {
        fields: Vec<String>,
        audited: bool,
    },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub id: EntityId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Reconciliation {
    pub fn is_write(&self) -> bool {
        !matches!(self.outcome, Outcome::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Entry point for every inventory write.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'s> {
    store: &'s Store,
}

impl<'s> Reconciler<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Merges `record` into its table and returns the row id.
    pub fn reconcile<R: Record>(
        &self,
        record: &R,
        by: &ChangeAttribution,
    ) -> Result<Reconciliation, ReconcileError> {
        let kind = R::KIND;
        let result = self
            .store
            .with_transaction(|tx| reconcile_in(tx, record, by));
        match &result {
            Ok(r) if r.is_write() => {
                tracing::debug!(%kind, id = %r.id, outcome = ?r.outcome, "reconciled")
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(%kind, error = %e, "reconcile failed"),
        }
        result
    }
}

/// Reconciles inside a caller-owned transaction.
pub(crate) fn reconcile_in<R: Record>(
    tx: &mut Transaction<'_>,
    record: &R,
    by: &ChangeAttribution,
) -> Result<Reconciliation, ReconcileError> {
    let kind = R::KIND;
    let fields = record.fields()?;

    for (column, id) in record.parent_refs() {
        ensure_host(tx, column, id)?;
    }

    let key = natural_key(kind, &fields)?;
    let Some((id, existing)) = find_by_key(tx, kind, &key)? else {
        let id = insert(tx, kind, &key, &fields)?;
        let audited = audit::append_in_savepoint(
            tx,
            &NewChange {
                change_type: ChangeType::Create,
                kind,
                entity_id: id,
                by,
                old_values: None,
                new_values: &fields,
                description: record.description(ChangeType::Create),
            },
        );
        return Ok(Reconciliation {
            id,
            outcome: Outcome::Created { audited },
        });
    };

    let changed = changed_columns(kind, &fields, &existing)?;
    if changed.is_empty() {
        return Ok(Reconciliation {
            id,
            outcome: Outcome::Unchanged,
        });
    }
    update(tx, kind, id, &changed)?;

    let significant = match kind.significant_fields() {
        None => true,
        Some(sig) => changed.iter().any(|(column, _)| sig.contains(column)),
    };
    let audited = significant && {
        let old = existing_json(&existing);
        audit::append_in_savepoint(
            tx,
            &NewChange {
                change_type: ChangeType::Update,
                kind,
                entity_id: id,
                by,
                old_values: Some(&old),
                new_values: &fields,
                description: record.description(ChangeType::Update),
            },
        )
    };
    if !significant {
        tracing::debug!(%kind, %id, "update below audit threshold");
    }

    Ok(Reconciliation {
        id,
        outcome: Outcome::Updated {
            fields: changed.iter().map(|(c, _)| (*c).to_owned()).collect(),
            audited,
        },
    })
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn ensure_host(tx: &Transaction<'_>, column: &str, id: EntityId) -> Result<(), ReconcileError> {
    let found = tx
        .query_row("SELECT 1 FROM hosts WHERE id = ?1", [id.0], |_| Ok(()))
        .optional()?;
    match found {
        Some(()) => Ok(()),
        None => Err(ReconcileError::NotFound {
            kind: EntityKind::Host,
            key: format!("{column}={id}"),
        }),
    }
}

fn natural_key(
    kind: EntityKind,
    fields: &Map<String, Value>,
) -> Result<Vec<(&'static str, SqlValue)>, ReconcileError> {
    kind.natural_key()
        .iter()
        .map(|column| {
            let value = fields.get(*column).ok_or_else(|| {
                <serde_json::Error as serde::ser::Error>::custom(format!(
                    "{kind} record without {column}"
                ))
            })?;
            Ok((*column, to_sql(value)?))
        })
        .collect()
}

/// Row id plus every stored column, or `None`.
fn find_by_key(
    tx: &Transaction<'_>,
    kind: EntityKind,
    key: &[(&'static str, SqlValue)],
) -> Result<Option<(EntityId, BTreeMap<String, SqlValue>)>, ReconcileError> {
    let predicate = key
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!("SELECT * FROM {} WHERE {predicate}", kind.table());
    let mut stmt = tx.prepare(&sql)?;
    let row = stmt
        .query_row(params_from_iter(key.iter().map(|(_, v)| v)), |row| {
            let mut values = BTreeMap::new();
            for (idx, name) in row.as_ref().column_names().into_iter().enumerate() {
                values.insert(name.to_owned(), row.get::<_, SqlValue>(idx)?);
            }
            Ok(values)
        })
        .optional()?;
    Ok(row.and_then(|values| {
        let id = match values.get("id") {
            Some(SqlValue::Integer(id)) => *id,
            _ => return None,
        };
        Some((EntityId(id), values))
    }))
}

fn insert(
    tx: &Transaction<'_>,
    kind: EntityKind,
    key: &[(&'static str, SqlValue)],
    fields: &Map<String, Value>,
) -> Result<EntityId, ReconcileError> {
    let mut columns: Vec<&'static str> = key.iter().map(|(c, _)| *c).collect();
    let mut params: Vec<SqlValue> = key.iter().map(|(_, v)| v.clone()).collect();
    for column in kind.columns() {
        if let Some(value) = fields.get(*column) {
            columns.push(column);
            params.push(to_sql(value)?);
        }
    }
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        kind.table(),
        columns.join(", ")
    );
    tx.execute(&sql, params_from_iter(params.iter()))?;
    Ok(EntityId(tx.last_insert_rowid()))
}

/// Present, updatable fields whose stored value differs.
///
/// Fields the kind does not define are ignored.
fn changed_columns(
    kind: EntityKind,
    fields: &Map<String, Value>,
    existing: &BTreeMap<String, SqlValue>,
) -> Result<Vec<(&'static str, SqlValue)>, ReconcileError> {
    let mut changed = Vec::new();
    for column in kind.columns() {
        let Some(value) = fields.get(*column) else {
            continue;
        };
        let value = to_sql(value)?;
        if existing.get(*column) != Some(&value) {
            changed.push((*column, value));
        }
    }
    Ok(changed)
}

fn update(
    tx: &Transaction<'_>,
    kind: EntityKind,
    id: EntityId,
    changed: &[(&'static str, SqlValue)],
) -> Result<(), ReconcileError> {
    let assignments = changed
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {assignments}, updated_at = {NOW_SQL} WHERE id = ?{}",
        kind.table(),
        changed.len() + 1
    );
    let params = changed
        .iter()
        .map(|(_, v)| v.clone())
        .chain(std::iter::once(SqlValue::Integer(id.0)));
    tx.execute(&sql, params_from_iter(params))?;
    Ok(())
}

fn existing_json(existing: &BTreeMap<String, SqlValue>) -> Value {
    let map = existing
        .iter()
        .map(|(column, value)| (column.clone(), values::from_sql(column, value.into())))
        .collect::<Map<_, _>>();
    Value::Object(map)
}
