use sea_orm::entity::prelude::*;

/// `embedding_blob` is a little-endian packed array of `dimension`
/// IEEE-754 float64 values; `len(blob) = 8 * dimension`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "embedding")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub entity_type: String,
  pub entity_id: i64,
  pub model: String,
  pub embedding_blob: Vec<u8>,
  pub dimension: i32,
  pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
