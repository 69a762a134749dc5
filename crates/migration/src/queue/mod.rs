use sea_orm_migration::MigrationTrait;

mod m20260730_01_create_job_table;

pub fn migrations() -> Vec<Box<dyn MigrationTrait>> {
  vec![Box::new(m20260730_01_create_job_table::Migration)]
}
