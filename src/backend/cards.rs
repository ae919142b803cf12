//! Contract rows: insert, replace, point lookups, and compiled-query
//! execution.

use log::debug;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use super::errors::{map_db_error, map_query_error, BackendError};
use super::Backend;
use crate::contract::{
    parse_versioned_slug, type_base, Contract, ContractDraft, VersionedSlug,
};
use crate::schema::select_map::SelectMap;
use crate::schema::{QueryOptions, CONTRACTS_TABLE};
use crate::sql::fragment::quote_literal;

/// The full-contract payload expression used by point lookups and inserts.
fn full_projection() -> String {
    SelectMap::new().render_projection(CONTRACTS_TABLE)
}

fn contract_from_row(row: &PgRow) -> Result<Contract, BackendError> {
    let payload: Value = row.try_get("payload")?;
    serde_json::from_value(payload)
        .map_err(|error| BackendError::Database(sqlx::Error::Decode(Box::new(error))))
}

/// Parse and validate the version of a draft; `latest` is a lookup token,
/// not a storable version.
pub(crate) fn draft_version(draft: &ContractDraft) -> Result<VersionedSlug, BackendError> {
    let parsed = parse_versioned_slug(&format!("{}@{}", draft.slug, draft.version))?;
    if parsed.latest {
        return Err(BackendError::VersionInvalid(draft.version.clone()));
    }
    Ok(parsed)
}

/// Insert a contract row on an open connection. `links` and `linked_at` are
/// write-ignored: they start at their empty defaults regardless of input.
pub(crate) async fn insert_on(
    connection: &mut PgConnection,
    draft: &ContractDraft,
    id: Uuid,
) -> Result<Contract, BackendError> {
    let version = draft_version(draft)?;
    let sql = format!(
        "INSERT INTO \"contracts\" (\"id\", \"slug\", \"type\", \"active\", \
         \"version_major\", \"version_minor\", \"version_patch\", \
         \"version_prerelease\", \"version_build\", \"name\", \"tags\", \"markers\", \
         \"requires\", \"capabilities\", \"data\") \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
         ARRAY(SELECT jsonb_array_elements($13::jsonb)), \
         ARRAY(SELECT jsonb_array_elements($14::jsonb)), $15) \
         RETURNING {} AS \"payload\"",
        full_projection()
    );

    let row = sqlx::query(&sql)
        .bind(id)
        .bind(&draft.slug)
        .bind(&draft.contract_type)
        .bind(draft.active)
        .bind(version.major as i32)
        .bind(version.minor as i32)
        .bind(version.patch as i32)
        .bind(&version.prerelease)
        .bind(&version.build)
        .bind(&draft.name)
        .bind(&draft.tags)
        .bind(&draft.markers)
        .bind(Json(Value::Array(draft.requires.clone())))
        .bind(Json(Value::Array(draft.capabilities.clone())))
        .bind(Json(&draft.data))
        .fetch_one(connection)
        .await
        .map_err(|error| map_db_error(error, id, &draft.slug))?;

    contract_from_row(&row)
}

impl Backend {
    /// Insert a new contract. Link contracts additionally materialize their
    /// two directed edges and stamp `linked_at` on both endpoints; type
    /// contracts create the indexes they declare.
    pub async fn insert_contract(&self, draft: ContractDraft) -> Result<Contract, BackendError> {
        if type_base(&draft.contract_type) == "link" {
            return self.create_link(draft).await;
        }
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let mut connection = self.pool.acquire().await?;
        let contract = insert_on(&mut *connection, &draft, id).await?;
        drop(connection);
        if type_base(&contract.contract_type) == "type" {
            self.ensure_type_indexes(&contract).await?;
        }
        Ok(contract)
    }

    /// Create the indexes a type contract declares under
    /// `data.indexed_fields`: one expression index per field path, partial
    /// on contracts of that type.
    async fn ensure_type_indexes(&self, contract: &Contract) -> Result<(), BackendError> {
        let Some(fields) = contract.data.get("indexed_fields").and_then(Value::as_array) else {
            return Ok(());
        };
        let indexed_type = format!("{}@{}", contract.slug, contract.version);

        for field in fields {
            let segments: Vec<String> = match field {
                Value::String(path) => path.split('.').map(str::to_string).collect(),
                Value::Array(parts) => parts
                    .iter()
                    .filter_map(|part| part.as_str().map(str::to_string))
                    .collect(),
                _ => continue,
            };
            if segments.is_empty() {
                return Err(BackendError::Database(sqlx::Error::Protocol(format!(
                    "invalid indexed_fields entry on {}: {}",
                    contract.slug, field
                ))));
            }

            let index_name = format!(
                "contracts_{}_{}_idx",
                contract.slug.replace('-', "_"),
                segments.join("_").replace('-', "_")
            );
            let keypath = segments.join(",");
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON \"contracts\" \
                 ((\"data\"#>>{})) WHERE \"type\" = {}",
                crate::sql::fragment::quote_ident(&index_name),
                quote_literal(&format!("{{{}}}", keypath)),
                quote_literal(&indexed_type)
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(map_query_error)?;
        }
        Ok(())
    }

    /// Replace a contract in place: `id`, `created_at`, the stored `links`
    /// column and `linked_at` survive; `updated_at` is stamped.
    pub async fn replace_contract(
        &self,
        id: Uuid,
        draft: ContractDraft,
    ) -> Result<Contract, BackendError> {
        let version = draft_version(&draft)?;
        let sql = format!(
            "UPDATE \"contracts\" SET \
             \"slug\" = $2, \"type\" = $3, \"active\" = $4, \
             \"version_major\" = $5, \"version_minor\" = $6, \"version_patch\" = $7, \
             \"version_prerelease\" = $8, \"version_build\" = $9, \"name\" = $10, \
             \"tags\" = $11, \"markers\" = $12, \
             \"requires\" = ARRAY(SELECT jsonb_array_elements($13::jsonb)), \
             \"capabilities\" = ARRAY(SELECT jsonb_array_elements($14::jsonb)), \
             \"data\" = $15, \"updated_at\" = now() \
             WHERE \"id\" = $1 \
             RETURNING {} AS \"payload\"",
            full_projection()
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&draft.slug)
            .bind(&draft.contract_type)
            .bind(draft.active)
            .bind(version.major as i32)
            .bind(version.minor as i32)
            .bind(version.patch as i32)
            .bind(&version.prerelease)
            .bind(&version.build)
            .bind(&draft.name)
            .bind(&draft.tags)
            .bind(&draft.markers)
            .bind(Json(Value::Array(draft.requires.clone())))
            .bind(Json(Value::Array(draft.capabilities.clone())))
            .bind(Json(&draft.data))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_db_error(error, id, &draft.slug))?;

        match row {
            Some(row) => contract_from_row(&row),
            None => Err(BackendError::NoElement(id.to_string())),
        }
    }

    pub async fn get_contract_by_id(&self, id: Uuid) -> Result<Option<Contract>, BackendError> {
        let sql = format!(
            "SELECT {} AS \"payload\" FROM \"contracts\" WHERE \"id\" = $1",
            full_projection()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_query_error)?;
        row.as_ref().map(contract_from_row).transpose()
    }

    /// Look up `slug[@version]`. The `latest` token (and a bare slug)
    /// selects the highest non-pre-release version; the build component
    /// orders as text.
    pub async fn get_contract_by_slug(
        &self,
        reference: &str,
    ) -> Result<Option<Contract>, BackendError> {
        let parsed = parse_versioned_slug(reference)?;
        let row = if parsed.latest {
            let sql = format!(
                "SELECT {} AS \"payload\" FROM \"contracts\" \
                 WHERE \"slug\" = $1 AND \"version_prerelease\" = '' \
                 ORDER BY \"version_major\" DESC, \"version_minor\" DESC, \
                 \"version_patch\" DESC, \"version_build\" DESC LIMIT 1",
                full_projection()
            );
            sqlx::query(&sql)
                .bind(&parsed.base)
                .fetch_optional(&self.pool)
                .await
        } else {
            let sql = format!(
                "SELECT {} AS \"payload\" FROM \"contracts\" \
                 WHERE \"slug\" = $1 AND \"version_major\" = $2 AND \"version_minor\" = $3 \
                 AND \"version_patch\" = $4 AND \"version_prerelease\" = $5 \
                 AND \"version_build\" = $6",
                full_projection()
            );
            sqlx::query(&sql)
                .bind(&parsed.base)
                .bind(parsed.major as i32)
                .bind(parsed.minor as i32)
                .bind(parsed.patch as i32)
                .bind(&parsed.prerelease)
                .bind(&parsed.build)
                .fetch_optional(&self.pool)
                .await
        }
        .map_err(map_query_error)?;
        row.as_ref().map(contract_from_row).transpose()
    }

    /// Hard-delete a contract row. The common path marks contracts inactive
    /// instead; this exists for links and cleanup.
    pub async fn delete_contract(&self, id: Uuid) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM \"contracts\" WHERE \"id\" = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_query_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Compile and run a query; each returned value is one projected
    /// contract.
    pub async fn query(
        &self,
        schema: &Value,
        select: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>, BackendError> {
        let sql = crate::schema::compile(schema, select, options)?;
        if options.profile {
            debug!("compiled query: {}", sql);
        }
        let started = std::time::Instant::now();
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_query_error)?;
        if options.profile {
            debug!("query returned {} rows in {:?}", rows.len(), started.elapsed());
        }
        rows.iter()
            .map(|row| row.try_get::<Value, _>("payload").map_err(BackendError::from))
            .collect()
    }

    /// Run a compiled query restricted to one contract id; used by the
    /// stream matcher to re-check membership.
    pub(crate) async fn query_one(
        &self,
        schema: &Value,
        select: &Value,
        options: &QueryOptions,
        id: Uuid,
    ) -> Result<Option<Value>, BackendError> {
        let mut restricted = options.clone();
        restricted.extra_filter = Some(format!(
            "\"contracts\".\"id\" = {}::uuid",
            quote_literal(&id.to_string())
        ));
        restricted.skip = 0;
        restricted.limit = 1;
        let mut rows = self.query(schema, select, &restricted).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}
