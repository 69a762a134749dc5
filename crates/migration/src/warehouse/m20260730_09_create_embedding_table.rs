use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Embedding::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Embedding::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Embedding::EntityType).string().not_null())
          .col(ColumnDef::new(Embedding::EntityId).big_integer().not_null())
          .col(ColumnDef::new(Embedding::Model).string().not_null())
          .col(ColumnDef::new(Embedding::EmbeddingBlob).blob().not_null())
          .col(ColumnDef::new(Embedding::Dimension).integer().not_null())
          .col(ColumnDef::new(Embedding::CreatedAt).timestamp().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_embedding_unique")
          .table(Embedding::Table)
          .col(Embedding::EntityType)
          .col(Embedding::EntityId)
          .col(Embedding::Model)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Embedding::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Embedding {
  Table,
  Id,
  EntityType,
  EntityId,
  Model,
  EmbeddingBlob,
  Dimension,
  CreatedAt,
}
