use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Reaction::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Reaction::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Reaction::Guid).string().not_null())
          .col(ColumnDef::new(Reaction::OriginalMessageGuid).string().not_null())
          .col(ColumnDef::new(Reaction::SenderId).big_integer())
          .col(ColumnDef::new(Reaction::IsFromMe).boolean().not_null().default(false))
          .col(ColumnDef::new(Reaction::ReactionType).string().not_null())
          .col(ColumnDef::new(Reaction::ChatId).big_integer().not_null())
          .col(ColumnDef::new(Reaction::Timestamp).timestamp().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_reaction_guid_unique")
          .table(Reaction::Table)
          .col(Reaction::Guid)
          .unique()
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_reaction_original_message")
          .table(Reaction::Table)
          .col(Reaction::OriginalMessageGuid)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Reaction::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Reaction {
  Table,
  Id,
  Guid,
  OriginalMessageGuid,
  SenderId,
  IsFromMe,
  ReactionType,
  ChatId,
  Timestamp,
}
