use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "conversation_analysis")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub conversation_id: i64,
  #[sea_orm(primary_key, auto_increment = false)]
  pub prompt_id: String,
  pub status: String,
  pub completion_id: i64,
  pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
