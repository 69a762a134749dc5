use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "watermark")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub source: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub name: String,
  pub value_int: Option<i64>,
  pub value_text: Option<String>,
  pub updated_ts: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
