use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "conversation")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub chat_id: i64,
  pub initiator_id: Option<i64>,
  pub start_time: DateTimeUtc,
  pub end_time: DateTimeUtc,
  pub message_count: i64,
  pub gap_threshold_seconds: i64,
  pub summary: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::chat::Entity",
    from = "Column::ChatId",
    to = "super::chat::Column::Id"
  )]
  Chat,
}

impl Related<super::chat::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Chat.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
