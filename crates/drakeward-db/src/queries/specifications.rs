//! Database query functions for the `specifications` and
//! `specification_history` tables.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Specification, SpecificationHistoryEntry};

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Insert the first specification row for a project, at version 1.
pub async fn insert_specification(
    pool: &PgPool,
    project_id: Uuid,
    content: &str,
) -> Result<Specification> {
    let hash = content_hash(content);
    let spec = sqlx::query_as::<_, Specification>(
        "INSERT INTO specifications (project_id, content, content_hash, version) \
         VALUES ($1, $2, $3, 1) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(content)
    .bind(&hash)
    .fetch_one(pool)
    .await
    .context("failed to insert specification")?;

    Ok(spec)
}

/// Fetch the current specification for a project.
pub async fn get_specification(pool: &PgPool, project_id: Uuid) -> Result<Option<Specification>> {
    let spec = sqlx::query_as::<_, Specification>(
        "SELECT * FROM specifications WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch specification")?;

    Ok(spec)
}

/// Update a specification's content.
///
/// If the new content hashes differently from the stored `content_hash`,
/// bumps `version` and appends the prior version's hash to
/// `specification_history`; otherwise this is a no-op write (same content
/// resubmitted). Returns the updated specification and whether the version
/// was bumped.
pub async fn update_specification(
    pool: &PgPool,
    project_id: Uuid,
    content: &str,
) -> Result<(Specification, bool)> {
    let new_hash = content_hash(content);

    let existing = get_specification(pool, project_id)
        .await?
        .with_context(|| format!("no specification exists for project {project_id}"))?;

    if existing.content_hash == new_hash {
        return Ok((existing, false));
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        "INSERT INTO specification_history (specification_id, version, content_hash) \
         VALUES ($1, $2, $3)",
    )
    .bind(existing.id)
    .bind(existing.version)
    .bind(&existing.content_hash)
    .execute(&mut *tx)
    .await
    .context("failed to append specification history")?;

    let updated = sqlx::query_as::<_, Specification>(
        "UPDATE specifications \
         SET content = $1, content_hash = $2, version = version + 1, updated_at = now() \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(content)
    .bind(&new_hash)
    .bind(existing.id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to update specification")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok((updated, true))
}

/// List the full edit history for a specification, oldest first.
pub async fn list_specification_history(
    pool: &PgPool,
    specification_id: Uuid,
) -> Result<Vec<SpecificationHistoryEntry>> {
    let entries = sqlx::query_as::<_, SpecificationHistoryEntry>(
        "SELECT * FROM specification_history \
         WHERE specification_id = $1 \
         ORDER BY version ASC",
    )
    .bind(specification_id)
    .fetch_all(pool)
    .await
    .context("failed to list specification history")?;

    Ok(entries)
}
