use sea_orm_migration::prelude::*;

use super::m20260730_03_create_message_table::Message;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Attachment::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Attachment::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Attachment::Guid).string().not_null())
          .col(ColumnDef::new(Attachment::MessageId).big_integer().not_null())
          .col(ColumnDef::new(Attachment::FileName).string())
          .col(ColumnDef::new(Attachment::MimeType).string())
          .col(ColumnDef::new(Attachment::Size).big_integer())
          .col(ColumnDef::new(Attachment::MediaType).string().not_null())
          .col(ColumnDef::new(Attachment::IsSticker).boolean().not_null().default(false))
          .col(ColumnDef::new(Attachment::CreatedDate).timestamp().not_null())
          .foreign_key(
            ForeignKey::create()
              .from(Attachment::Table, Attachment::MessageId)
              .to(Message::Table, Message::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_attachment_guid_unique")
          .table(Attachment::Table)
          .col(Attachment::Guid)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Attachment::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Attachment {
  Table,
  Id,
  Guid,
  MessageId,
  FileName,
  MimeType,
  Size,
  MediaType,
  IsSticker,
  CreatedDate,
}
