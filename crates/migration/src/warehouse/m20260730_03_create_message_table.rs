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
          .table(Message::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Message::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Message::Guid).string().not_null())
          .col(ColumnDef::new(Message::ChatId).big_integer().not_null())
          .col(ColumnDef::new(Message::SenderId).big_integer())
          .col(ColumnDef::new(Message::Content).text().not_null())
          .col(ColumnDef::new(Message::Timestamp).timestamp().not_null())
          .col(ColumnDef::new(Message::IsFromMe).boolean().not_null().default(false))
          .col(ColumnDef::new(Message::MessageType).string().not_null())
          .col(ColumnDef::new(Message::ServiceName).string().not_null())
          .col(ColumnDef::new(Message::ReplyToGuid).string())
          .col(ColumnDef::new(Message::AssociatedMessageGuid).string())
          .col(ColumnDef::new(Message::ConversationId).big_integer())
          .foreign_key(
            ForeignKey::create()
              .from(Message::Table, Message::ChatId)
              .to(Chat::Table, Chat::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(Message::Table, Message::SenderId)
              .to(Contact::Table, Contact::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_message_guid_unique")
          .table(Message::Table)
          .col(Message::Guid)
          .unique()
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_message_chat_timestamp")
          .table(Message::Table)
          .col(Message::ChatId)
          .col(Message::Timestamp)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Message::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Message {
  Table,
  Id,
  Guid,
  ChatId,
  SenderId,
  Content,
  Timestamp,
  IsFromMe,
  MessageType,
  ServiceName,
  ReplyToGuid,
  AssociatedMessageGuid,
  ConversationId,
}
