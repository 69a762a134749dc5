use sea_orm_migration::prelude::*;

use super::m20260730_07_create_conversation_table::Conversation;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Completion::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Completion::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Completion::ConversationId).big_integer().not_null())
          .col(ColumnDef::new(Completion::Model).string().not_null())
          .col(ColumnDef::new(Completion::RawResponse).text().not_null())
          .col(ColumnDef::new(Completion::CreatedAt).timestamp().not_null())
          .foreign_key(
            ForeignKey::create()
              .from(Completion::Table, Completion::ConversationId)
              .to(Conversation::Table, Conversation::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(ConversationAnalysis::Table)
          .if_not_exists()
          .col(ColumnDef::new(ConversationAnalysis::ConversationId).big_integer().not_null())
          .col(ColumnDef::new(ConversationAnalysis::PromptId).string().not_null())
          .col(ColumnDef::new(ConversationAnalysis::Status).string().not_null())
          .col(ColumnDef::new(ConversationAnalysis::CompletionId).big_integer().not_null())
          .col(ColumnDef::new(ConversationAnalysis::CreatedAt).timestamp().not_null())
          .primary_key(
            Index::create()
              .col(ConversationAnalysis::ConversationId)
              .col(ConversationAnalysis::PromptId),
          )
          .foreign_key(
            ForeignKey::create()
              .from(ConversationAnalysis::Table, ConversationAnalysis::ConversationId)
              .to(Conversation::Table, Conversation::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(ConversationAnalysis::Table, ConversationAnalysis::CompletionId)
              .to(Completion::Table, Completion::Id),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(ConversationAnalysis::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Completion::Table).to_owned()).await
  }
}

#[derive(Iden)]
pub enum Completion {
  Table,
  Id,
  ConversationId,
  Model,
  RawResponse,
  CreatedAt,
}

#[derive(Iden)]
pub enum ConversationAnalysis {
  Table,
  ConversationId,
  PromptId,
  Status,
  CompletionId,
  CreatedAt,
}
