use sea_orm_migration::prelude::*;

use super::m20260730_01_create_contact_tables::Contact;
use super::m20260730_02_create_chat_tables::Chat;
use super::m20260730_07_create_conversation_table::Conversation;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// The four derived-facet tables share one shape: a conversation/chat/contact
/// scoped row plus a single text column, unique on the natural key. Built as
/// one migration since all four are the same table shape.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    create_facet_table(manager, EntityFacet::Table, EntityFacet::Title, "idx_entity_unique").await?;
    create_facet_table(manager, Topic::Table, Topic::Title, "idx_topic_unique").await?;
    create_facet_table(manager, Emotion::Table, Emotion::EmotionType, "idx_emotion_unique").await?;
    create_facet_table(manager, HumorItem::Table, HumorItem::Snippet, "idx_humor_item_unique").await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(HumorItem::Table).to_owned()).await?;
    manager.drop_table(Table::drop().table(Emotion::Table).to_owned()).await?;
    manager.drop_table(Table::drop().table(Topic::Table).to_owned()).await?;
    manager.drop_table(Table::drop().table(EntityFacet::Table).to_owned()).await
  }
}

async fn create_facet_table(
  manager: &SchemaManager<'_>,
  table: impl Iden + Copy + 'static,
  text_column: impl Iden + Copy + 'static,
  unique_index_name: &str,
) -> Result<(), DbErr> {
  manager
    .create_table(
      Table::create()
        .table(table)
        .if_not_exists()
        .col(
          ColumnDef::new(FacetColumn::Id)
            .big_integer()
            .not_null()
            .auto_increment()
            .primary_key(),
        )
        .col(ColumnDef::new(FacetColumn::ConversationId).big_integer().not_null())
        .col(ColumnDef::new(FacetColumn::ChatId).big_integer().not_null())
        .col(ColumnDef::new(FacetColumn::ContactId).big_integer())
        .col(ColumnDef::new(text_column).text().not_null())
        .foreign_key(
          ForeignKey::create()
            .from(table, FacetColumn::ConversationId)
            .to(Conversation::Table, Conversation::Id),
        )
        .foreign_key(
          ForeignKey::create()
            .from(table, FacetColumn::ChatId)
            .to(Chat::Table, Chat::Id),
        )
        .foreign_key(
          ForeignKey::create()
            .from(table, FacetColumn::ContactId)
            .to(Contact::Table, Contact::Id),
        )
        .to_owned(),
    )
    .await?;

  manager
    .create_index(
      Index::create()
        .if_not_exists()
        .name(unique_index_name)
        .table(table)
        .col(FacetColumn::ConversationId)
        .col(FacetColumn::ChatId)
        .col(FacetColumn::ContactId)
        .col(text_column)
        .unique()
        .to_owned(),
    )
    .await
}

#[derive(Iden, Clone, Copy)]
enum FacetColumn {
  Id,
  ConversationId,
  ChatId,
  ContactId,
}

#[derive(Iden, Clone, Copy)]
pub enum EntityFacet {
  #[iden = "entity"]
  Table,
  Title,
}

#[derive(Iden, Clone, Copy)]
pub enum Topic {
  Table,
  Title,
}

#[derive(Iden, Clone, Copy)]
pub enum Emotion {
  Table,
  EmotionType,
}

#[derive(Iden, Clone, Copy)]
pub enum HumorItem {
  Table,
  Snippet,
}
