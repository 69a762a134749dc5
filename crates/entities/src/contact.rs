use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "contact")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub name: String,
  pub nickname: Option<String>,
  pub is_me: bool,
  pub data_source: String,
  pub last_updated: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::contact_identifier::Entity")]
  ContactIdentifier,
}

impl Related<super::contact_identifier::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::ContactIdentifier.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
