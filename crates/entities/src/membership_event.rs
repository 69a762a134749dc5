use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "membership_event")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub guid: String,
  pub chat_id: i64,
  pub actor_id: Option<i64>,
  pub member_id: Option<i64>,
  pub action_type: String,
  pub timestamp: DateTimeUtc,
  pub is_from_me: bool,
  pub group_title: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
