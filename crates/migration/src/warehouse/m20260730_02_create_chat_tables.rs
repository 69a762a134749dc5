use sea_orm_migration::prelude::*;

use super::m20260730_01_create_contact_tables::Contact;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Chat::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Chat::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Chat::ChatIdentifier).string().not_null())
          .col(ColumnDef::new(Chat::ChatName).string())
          .col(ColumnDef::new(Chat::IsGroup).boolean().not_null().default(false))
          .col(ColumnDef::new(Chat::ServiceName).string().not_null())
          .col(ColumnDef::new(Chat::CreatedDate).timestamp().not_null())
          .col(ColumnDef::new(Chat::LastMessageDate).timestamp().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_chat_identifier_unique")
          .table(Chat::Table)
          .col(Chat::ChatIdentifier)
          .unique()
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(ChatParticipant::Table)
          .if_not_exists()
          .col(ColumnDef::new(ChatParticipant::ChatId).big_integer().not_null())
          .col(ColumnDef::new(ChatParticipant::ContactId).big_integer().not_null())
          .primary_key(
            Index::create()
              .col(ChatParticipant::ChatId)
              .col(ChatParticipant::ContactId),
          )
          .foreign_key(
            ForeignKey::create()
              .from(ChatParticipant::Table, ChatParticipant::ChatId)
              .to(Chat::Table, Chat::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(ChatParticipant::Table, ChatParticipant::ContactId)
              .to(Contact::Table, Contact::Id),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(ChatParticipant::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Chat::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Chat {
  Table,
  Id,
  ChatIdentifier,
  ChatName,
  IsGroup,
  ServiceName,
  CreatedDate,
  LastMessageDate,
}

#[derive(Iden)]
pub enum ChatParticipant {
  Table,
  ChatId,
  ContactId,
}
