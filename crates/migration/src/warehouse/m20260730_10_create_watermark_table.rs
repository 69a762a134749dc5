use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Watermark::Table)
          .if_not_exists()
          .col(ColumnDef::new(Watermark::Source).string().not_null())
          .col(ColumnDef::new(Watermark::Name).string().not_null())
          .col(ColumnDef::new(Watermark::ValueInt).big_integer())
          .col(ColumnDef::new(Watermark::ValueText).text())
          .col(ColumnDef::new(Watermark::UpdatedTs).timestamp().not_null())
          .primary_key(
            Index::create()
              .col(Watermark::Source)
              .col(Watermark::Name),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Watermark::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Watermark {
  Table,
  Source,
  Name,
  ValueInt,
  ValueText,
  UpdatedTs,
}
