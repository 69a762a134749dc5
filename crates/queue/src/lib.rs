//! Durable job queue: enqueue-with-dedup, atomic lease, and terminal-state
//! transitions backed by the `job` table.

use chrono::{DateTime, Duration, Utc};
use mw_entities::job;
use mw_shared::{AppError, ErrorKind};
use sea_orm::{
  ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter, Statement,
  sea_query::Expr,
};

const NON_TERMINAL: [&str; 2] = ["pending", "leased"];

/// Inserts a new job, or returns the existing live row for `(job_type,
/// dedup_key)` when one is already pending or leased.
pub async fn enqueue(
  db: &DatabaseConnection,
  job_type: &str,
  dedup_key: Option<&str>,
  payload: String,
  max_attempts: i32,
) -> Result<job::Model, AppError> {
  if let Some(key) = dedup_key {
    if let Some(existing) = job::Entity::find()
      .filter(job::Column::JobType.eq(job_type.to_owned()))
      .filter(job::Column::DedupKey.eq(key.to_owned()))
      .filter(job::Column::State.is_in(NON_TERMINAL))
      .one(db)
      .await?
    {
      return Ok(existing);
    }
  }

  let now = Utc::now();
  let active = job::ActiveModel {
    job_type: Set(job_type.to_owned()),
    dedup_key: Set(dedup_key.map(str::to_owned)),
    payload: Set(payload),
    state: Set("pending".to_owned()),
    attempt: Set(0),
    max_attempts: Set(max_attempts),
    lease_owner: Set(None),
    lease_expires_at: Set(None),
    last_error: Set(None),
    enqueued_at: Set(now),
    updated_at: Set(now),
    ..Default::default()
  };
  Ok(active.insert(db).await?)
}

/// Atomically claims up to `batch_size` pending or lease-expired jobs for
/// `owner`, bumping `attempt` and setting a fresh lease. Implemented as a
/// single `UPDATE ... WHERE id IN (SELECT ...) RETURNING *` so the select
/// and claim cannot race with another worker's lease.
pub async fn lease(
  db: &DatabaseConnection,
  owner: &str,
  batch_size: u64,
  ttl_seconds: i64,
) -> Result<Vec<job::Model>, AppError> {
  let now = Utc::now();
  let lease_expires_at = now + Duration::seconds(ttl_seconds);

  let sql = r"
    UPDATE job
    SET state = 'leased', lease_owner = $1, lease_expires_at = $2, attempt = attempt + 1, updated_at = $3
    WHERE id IN (
      SELECT id FROM job
      WHERE state = 'pending' OR (state = 'leased' AND lease_expires_at < $4)
      ORDER BY id
      LIMIT $5
    )
    RETURNING *
  ";

  let stmt = Statement::from_sql_and_values(
    DbBackend::Sqlite,
    sql,
    [
      owner.into(),
      lease_expires_at.into(),
      now.into(),
      now.into(),
      (batch_size as i64).into(),
    ],
  );

  Ok(job::Entity::find_by_statement(stmt).all(db).await?)
}

pub async fn succeed(db: &DatabaseConnection, id: i64) -> Result<(), AppError> {
  let Some(row) = job::Entity::find_by_id(id).one(db).await? else {
    return Err(AppError::with_kind(ErrorKind::Validation, anyhow::anyhow!("unknown job id {id}")));
  };
  let mut active: job::ActiveModel = row.into();
  active.state = Set("succeeded".to_owned());
  active.updated_at = Set(Utc::now());
  active.update(db).await?;
  Ok(())
}

/// `attempt >= max_attempts` dead-letters the job; otherwise it is returned
/// to `pending` with its lease cleared so the next poll can retry it.
///
/// `force_dead` lets the caller dead-letter immediately regardless of
/// `max_attempts` — the engine sets this for non-retryable validation
/// failures (spec: "surfaces as a dead job after max_attempts=1"), since a
/// malformed payload will never become valid on a later attempt.
pub async fn fail(db: &DatabaseConnection, id: i64, err: &str) -> Result<(), AppError> {
  fail_with_policy(db, id, err, false).await
}

pub async fn fail_with_policy(db: &DatabaseConnection, id: i64, err: &str, force_dead: bool) -> Result<(), AppError> {
  let Some(row) = job::Entity::find_by_id(id).one(db).await? else {
    return Err(AppError::with_kind(ErrorKind::Validation, anyhow::anyhow!("unknown job id {id}")));
  };
  let dead = force_dead || row.attempt >= row.max_attempts;
  let mut active: job::ActiveModel = row.into();
  active.last_error = Set(Some(err.to_owned()));
  active.updated_at = Set(Utc::now());
  if dead {
    active.state = Set("dead".to_owned());
  } else {
    active.state = Set("pending".to_owned());
    active.lease_owner = Set(None);
    active.lease_expires_at = Set(None);
  }
  active.update(db).await?;
  Ok(())
}

/// Periodic sweep resetting any lease that expired without a terminal
/// transition back to `pending`. Returns the number of jobs reclaimed.
pub async fn requeue_expired(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<u64, AppError> {
  let result = job::Entity::update_many()
    .col_expr(job::Column::State, Expr::value("pending"))
    .col_expr(job::Column::LeaseOwner, Expr::value(Option::<String>::None))
    .col_expr(job::Column::LeaseExpiresAt, Expr::value(Option::<DateTime<Utc>>::None))
    .col_expr(job::Column::UpdatedAt, Expr::value(now))
    .filter(job::Column::State.eq("leased"))
    .filter(job::Column::LeaseExpiresAt.lt(now))
    .exec(db)
    .await?;
  Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use sea_orm::{ConnectionTrait, Database, Schema};

  async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(sea_orm::DatabaseBackend::Sqlite);
    let stmt = schema.create_table_from_entity(job::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    db
  }

  #[tokio::test]
  async fn enqueue_dedups_against_live_rows() {
    let db = setup().await;
    let first = enqueue(&db, "analysis", Some("convo-1"), "{}".to_owned(), 3).await.unwrap();
    let second = enqueue(&db, "analysis", Some("convo-1"), "{}".to_owned(), 3).await.unwrap();
    assert_eq!(first.id, second.id);
  }

  #[tokio::test]
  async fn enqueue_allows_reuse_after_terminal_state() {
    let db = setup().await;
    let first = enqueue(&db, "analysis", Some("convo-1"), "{}".to_owned(), 3).await.unwrap();
    succeed(&db, first.id).await.unwrap();
    let second = enqueue(&db, "analysis", Some("convo-1"), "{}".to_owned(), 3).await.unwrap();
    assert_ne!(first.id, second.id);
  }

  #[tokio::test]
  async fn lease_claims_pending_jobs_and_bumps_attempt() {
    let db = setup().await;
    enqueue(&db, "analysis", None, "{}".to_owned(), 3).await.unwrap();
    enqueue(&db, "analysis", None, "{}".to_owned(), 3).await.unwrap();

    let leased = lease(&db, "worker-1", 10, 60).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert!(leased.iter().all(|j| j.state == "leased" && j.attempt == 1));
  }

  #[tokio::test]
  async fn lease_respects_batch_size() {
    let db = setup().await;
    for _ in 0..5 {
      enqueue(&db, "analysis", None, "{}".to_owned(), 3).await.unwrap();
    }
    let leased = lease(&db, "worker-1", 2, 60).await.unwrap();
    assert_eq!(leased.len(), 2);
  }

  #[tokio::test]
  async fn fail_dead_letters_after_max_attempts() {
    let db = setup().await;
    let job = enqueue(&db, "analysis", None, "{}".to_owned(), 1).await.unwrap();
    lease(&db, "worker-1", 10, 60).await.unwrap();
    fail(&db, job.id, "boom").await.unwrap();

    let reloaded = job::Entity::find_by_id(job.id).one(&db).await.unwrap().unwrap();
    assert_eq!(reloaded.state, "dead");
  }

  #[tokio::test]
  async fn fail_with_policy_force_dead_ignores_remaining_attempts() {
    let db = setup().await;
    let job = enqueue(&db, "analysis", None, "{}".to_owned(), 5).await.unwrap();
    lease(&db, "worker-1", 10, 60).await.unwrap();
    fail_with_policy(&db, job.id, "malformed payload", true).await.unwrap();

    let reloaded = job::Entity::find_by_id(job.id).one(&db).await.unwrap().unwrap();
    assert_eq!(reloaded.state, "dead");
  }

  #[tokio::test]
  async fn fail_requeues_when_attempts_remain() {
    let db = setup().await;
    let job = enqueue(&db, "analysis", None, "{}".to_owned(), 5).await.unwrap();
    lease(&db, "worker-1", 10, 60).await.unwrap();
    fail(&db, job.id, "transient").await.unwrap();

    let reloaded = job::Entity::find_by_id(job.id).one(&db).await.unwrap().unwrap();
    assert_eq!(reloaded.state, "pending");
    assert!(reloaded.lease_owner.is_none());
  }

  #[tokio::test]
  async fn requeue_expired_resets_stale_leases() {
    let db = setup().await;
    let job = enqueue(&db, "analysis", None, "{}".to_owned(), 3).await.unwrap();
    lease(&db, "worker-1", 10, -60).await.unwrap();

    let count = requeue_expired(&db, Utc::now()).await.unwrap();
    assert_eq!(count, 1);

    let reloaded = job::Entity::find_by_id(job.id).one(&db).await.unwrap().unwrap();
    assert_eq!(reloaded.state, "pending");
  }
}
