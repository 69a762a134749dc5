use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "topic")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub conversation_id: i64,
  pub chat_id: i64,
  pub contact_id: Option<i64>,
  pub title: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
