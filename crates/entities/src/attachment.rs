use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "attachment")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub guid: String,
  pub message_id: i64,
  pub file_name: Option<String>,
  pub mime_type: Option<String>,
  pub size: Option<i64>,
  pub media_type: String,
  pub is_sticker: bool,
  pub created_date: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::message::Entity",
    from = "Column::MessageId",
    to = "super::message::Column::Id"
  )]
  Message,
}

impl Related<super::message::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Message.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
