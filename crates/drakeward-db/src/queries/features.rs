//! Database query functions for the `features` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Feature, FeatureStatus};

/// Insert a new feature under a specification. Starts in `new`.
pub async fn insert_feature(
    pool: &PgPool,
    specification_id: Uuid,
    name: &str,
    description: &str,
) -> Result<Feature> {
    let feature = sqlx::query_as::<_, Feature>(
        "INSERT INTO features (specification_id, name, description) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(specification_id)
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to insert feature")?;

    Ok(feature)
}

/// Fetch a feature by ID.
pub async fn get_feature(pool: &PgPool, id: Uuid) -> Result<Option<Feature>> {
    let feature = sqlx::query_as::<_, Feature>("SELECT * FROM features WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch feature")?;

    Ok(feature)
}

/// List all features for a specification, ordered by creation time.
pub async fn list_features_for_specification(
    pool: &PgPool,
    specification_id: Uuid,
) -> Result<Vec<Feature>> {
    let features = sqlx::query_as::<_, Feature>(
        "SELECT * FROM features WHERE specification_id = $1 ORDER BY created_at ASC",
    )
    .bind(specification_id)
    .fetch_all(pool)
    .await
    .context("failed to list features")?;

    Ok(features)
}

/// List every feature not yet assigned to wyvern -- the wyvern ticker's
/// intake query.
pub async fn list_unassigned_features(pool: &PgPool) -> Result<Vec<Feature>> {
    let features = sqlx::query_as::<_, Feature>(
        "SELECT * FROM features WHERE status = 'new' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list unassigned features")?;

    Ok(features)
}

/// Update a feature's status.
pub async fn update_feature_status(pool: &PgPool, id: Uuid, status: FeatureStatus) -> Result<()> {
    let result = sqlx::query("UPDATE features SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update feature status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("feature {id} not found");
    }

    Ok(())
}

/// A feature is `completed` once every task linked to it (via
/// `tasks.feature_id`) is `done`, and there is at least one such task.
pub async fn is_feature_complete(pool: &PgPool, feature_id: Uuid) -> Result<bool> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'done') \
         FROM tasks WHERE feature_id = $1",
    )
    .bind(feature_id)
    .fetch_one(pool)
    .await
    .context("failed to check feature completion")?;

    Ok(row.0 > 0 && row.0 == row.1)
}
