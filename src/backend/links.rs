//! Link storage.
//!
//! A link contract materializes as two directed edges sharing its id, one
//! per traversal direction, with verbs interned through the `strings`
//! table. The first link of a verb stamps `linked_at[verb]` on its endpoint
//! and later links leave it untouched.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use super::cards;
use super::errors::{map_query_error, BackendError};
use super::Backend;
use crate::contract::{type_base, Contract, ContractDraft, LinkEndpoint};

/// Intern a verb, returning its id. The do-nothing upsert still returns the
/// existing row.
async fn intern_string(
    connection: &mut PgConnection,
    string: &str,
) -> Result<i32, BackendError> {
    let row = sqlx::query(
        "INSERT INTO \"strings\" (\"string\") VALUES ($1) \
         ON CONFLICT (\"string\") DO UPDATE SET \"string\" = EXCLUDED.\"string\" \
         RETURNING \"id\"",
    )
    .bind(string)
    .fetch_one(connection)
    .await
    .map_err(map_query_error)?;
    Ok(row.try_get("id")?)
}

async fn upsert_edge(
    connection: &mut PgConnection,
    link_id: Uuid,
    forward: bool,
    from: Uuid,
    name: i32,
    to: Uuid,
) -> Result<(), BackendError> {
    sqlx::query(
        "INSERT INTO \"links2\" (\"id\", \"forward\", \"fromId\", \"name\", \"toId\") \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (\"id\", \"forward\") DO UPDATE SET \
         \"fromId\" = EXCLUDED.\"fromId\", \"name\" = EXCLUDED.\"name\", \
         \"toId\" = EXCLUDED.\"toId\"",
    )
    .bind(link_id)
    .bind(forward)
    .bind(from)
    .bind(name)
    .bind(to)
    .execute(connection)
    .await
    .map_err(map_query_error)?;
    Ok(())
}

/// Record the first link of `verb` on a contract; set at most once.
async fn stamp_linked_at(
    connection: &mut PgConnection,
    contract_id: Uuid,
    verb: &str,
    at: DateTime<Utc>,
) -> Result<(), BackendError> {
    sqlx::query(
        "UPDATE \"contracts\" SET \"linked_at\" = \"linked_at\" || \
         jsonb_build_object($2::text, to_jsonb($3::timestamptz)) \
         WHERE \"id\" = $1 AND NOT (\"linked_at\" ? $2)",
    )
    .bind(contract_id)
    .bind(verb)
    .bind(at)
    .execute(connection)
    .await
    .map_err(map_query_error)?;
    Ok(())
}

async fn endpoint_exists(
    connection: &mut PgConnection,
    id: Uuid,
) -> Result<bool, BackendError> {
    let row = sqlx::query("SELECT 1 AS \"one\" FROM \"contracts\" WHERE \"id\" = $1")
        .bind(id)
        .fetch_optional(connection)
        .await
        .map_err(map_query_error)?;
    Ok(row.is_some())
}

/// Whether a relationship side pattern admits a contract type. Patterns are
/// either `{"type": "t"}` objects or bare strings, with `*` as wildcard.
fn side_matches(pattern: Option<&Value>, contract_type: &str) -> bool {
    let pattern = match pattern {
        Some(Value::String(pattern)) => pattern.as_str(),
        Some(Value::Object(object)) => match object.get("type").and_then(Value::as_str) {
            Some(pattern) => pattern,
            None => return false,
        },
        _ => return false,
    };
    pattern == "*" || pattern == contract_type || type_base(pattern) == type_base(contract_type)
}

impl Backend {
    /// Insert a link contract and its two directed edges.
    pub(crate) async fn create_link(
        &self,
        draft: ContractDraft,
    ) -> Result<Contract, BackendError> {
        let verb = draft
            .name
            .clone()
            .ok_or_else(|| BackendError::InvalidLink("missing verb (name)".to_string()))?;
        let from: LinkEndpoint = draft
            .data
            .get("from")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| BackendError::InvalidLink("missing data.from".to_string()))?;
        let to: LinkEndpoint = draft
            .data
            .get("to")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| BackendError::InvalidLink("missing data.to".to_string()))?;
        let inverse = draft
            .data
            .get("inverseName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidLink("missing data.inverseName".to_string()))?;

        let mut tx = self.pool.begin().await?;

        if !endpoint_exists(&mut *tx, from.id).await? {
            return Err(BackendError::NoLinkTarget(from.id));
        }
        if !endpoint_exists(&mut *tx, to.id).await? {
            return Err(BackendError::NoLinkTarget(to.id));
        }

        self.check_relationship(&mut *tx, &verb, &from, &to)
            .await?;

        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let contract = cards::insert_on(&mut *tx, &draft, id).await?;

        let forward_name = intern_string(&mut *tx, &verb).await?;
        let inverse_name = intern_string(&mut *tx, &inverse).await?;
        upsert_edge(&mut *tx, id, true, from.id, forward_name, to.id).await?;
        upsert_edge(&mut *tx, id, false, to.id, inverse_name, from.id).await?;

        stamp_linked_at(&mut *tx, from.id, &verb, contract.created_at).await?;
        stamp_linked_at(&mut *tx, to.id, &inverse, contract.created_at).await?;

        tx.commit().await?;
        Ok(contract)
    }

    /// Validate the link against declared relationship contracts. Verbs with
    /// no relationship contract at all stay open; once any relationship
    /// declares the verb, one of them has to admit the endpoint types
    /// (either side may be the `*` wildcard).
    async fn check_relationship(
        &self,
        connection: &mut PgConnection,
        verb: &str,
        from: &LinkEndpoint,
        to: &LinkEndpoint,
    ) -> Result<(), BackendError> {
        let rows = sqlx::query(
            "SELECT \"data\" FROM \"contracts\" \
             WHERE \"type\" LIKE 'relationship@%' AND \"name\" = $1",
        )
        .bind(verb)
        .fetch_all(connection)
        .await
        .map_err(map_query_error)?;

        if rows.is_empty() {
            return Ok(());
        }

        for row in &rows {
            let data: Value = row.try_get("data")?;
            if side_matches(data.get("from"), &from.contract_type)
                && side_matches(data.get("to"), &to.contract_type)
            {
                return Ok(());
            }
        }
        Err(BackendError::UnknownRelationship {
            verb: verb.to_string(),
            from: from.contract_type.clone(),
            to: to.contract_type.clone(),
        })
    }

    /// Remove a link: both directed edges and the link contract row go.
    pub async fn remove_link(&self, link_id: Uuid) -> Result<bool, BackendError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM \"links2\" WHERE \"id\" = $1")
            .bind(link_id)
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
        let deleted = sqlx::query("DELETE FROM \"contracts\" WHERE \"id\" = $1")
            .bind(link_id)
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}
