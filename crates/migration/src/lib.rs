pub use sea_orm_migration::*;

mod warehouse;
mod queue;

/// Migrator for the owned, read-write warehouse database.
pub struct WarehouseMigrator;

#[async_trait::async_trait]
impl MigratorTrait for WarehouseMigrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    warehouse::migrations()
  }
}

/// Migrator for the separate queue database (kept apart from the
/// warehouse so job-lease pressure never contends with warehouse writes).
pub struct QueueMigrator;

#[async_trait::async_trait]
impl MigratorTrait for QueueMigrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    queue::migrations()
  }
}
