use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Job::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Job::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Job::JobType).string().not_null())
          .col(ColumnDef::new(Job::DedupKey).string())
          .col(ColumnDef::new(Job::Payload).text().not_null())
          .col(ColumnDef::new(Job::State).string().not_null())
          .col(ColumnDef::new(Job::Attempt).integer().not_null().default(0))
          .col(ColumnDef::new(Job::MaxAttempts).integer().not_null())
          .col(ColumnDef::new(Job::LeaseOwner).string())
          .col(ColumnDef::new(Job::LeaseExpiresAt).timestamp())
          .col(ColumnDef::new(Job::LastError).text())
          .col(ColumnDef::new(Job::EnqueuedAt).timestamp().not_null())
          .col(ColumnDef::new(Job::UpdatedAt).timestamp().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_job_state_lease_expires")
          .table(Job::Table)
          .col(Job::State)
          .col(Job::LeaseExpiresAt)
          .to_owned(),
      )
      .await?;

    // Dedup applies only while a key is present; sea-orm's index builder has
    // no partial-index clause, so this one is raw SQL.
    let db = manager.get_connection();
    db.execute_unprepared(
      "CREATE UNIQUE INDEX IF NOT EXISTS idx_job_dedup_key \
       ON job (job_type, dedup_key) WHERE dedup_key IS NOT NULL",
    )
    .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Job::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Job {
  Table,
  Id,
  JobType,
  DedupKey,
  Payload,
  State,
  Attempt,
  MaxAttempts,
  LeaseOwner,
  LeaseExpiresAt,
  LastError,
  EnqueuedAt,
  UpdatedAt,
}
