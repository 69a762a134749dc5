use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "job")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub job_type: String,
  pub dedup_key: Option<String>,
  pub payload: String,
  pub state: String,
  pub attempt: i32,
  pub max_attempts: i32,
  pub lease_owner: Option<String>,
  pub lease_expires_at: Option<DateTimeUtc>,
  pub last_error: Option<String>,
  pub enqueued_at: DateTimeUtc,
  pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
