use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "contact_identifier")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub contact_id: i64,
  pub identifier: String,
  pub identifier_type: String,
  pub is_primary: bool,
  pub last_used: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::contact::Entity",
    from = "Column::ContactId",
    to = "super::contact::Column::Id"
  )]
  Contact,
}

impl Related<super::contact::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Contact.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
