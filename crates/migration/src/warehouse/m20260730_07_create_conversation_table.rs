use sea_orm_migration::prelude::*;

use super::m20260730_01_create_contact_tables::Contact;
use super::m20260730_02_create_chat_tables::Chat;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Conversation::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Conversation::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Conversation::ChatId).big_integer().not_null())
          .col(ColumnDef::new(Conversation::InitiatorId).big_integer())
          .col(ColumnDef::new(Conversation::StartTime).timestamp().not_null())
          .col(ColumnDef::new(Conversation::EndTime).timestamp().not_null())
          .col(ColumnDef::new(Conversation::MessageCount).big_integer().not_null())
          .col(ColumnDef::new(Conversation::GapThresholdSeconds).big_integer().not_null())
          .col(ColumnDef::new(Conversation::Summary).text())
          .foreign_key(
            ForeignKey::create()
              .from(Conversation::Table, Conversation::ChatId)
              .to(Chat::Table, Chat::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(Conversation::Table, Conversation::InitiatorId)
              .to(Contact::Table, Contact::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_conversation_chat_start")
          .table(Conversation::Table)
          .col(Conversation::ChatId)
          .col(Conversation::StartTime)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Conversation::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum Conversation {
  Table,
  Id,
  ChatId,
  InitiatorId,
  StartTime,
  EndTime,
  MessageCount,
  GapThresholdSeconds,
  Summary,
}
