use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "emotion")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub conversation_id: i64,
  pub chat_id: i64,
  pub contact_id: Option<i64>,
  pub emotion_type: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
