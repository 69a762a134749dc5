use chrono::Utc;
use mw_entities::watermark;
use mw_shared::AppError;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Reads the integer checkpoint for `(source, name)`, defaulting to `0` when
/// no row exists yet (the ETL's first run over a fresh warehouse).
pub async fn get_int(db: &DatabaseConnection, source: &str, name: &str) -> Result<i64, AppError> {
  let row = find(db, source, name).await?;
  Ok(row.and_then(|r| r.value_int).unwrap_or(0))
}

pub async fn set_int(db: &DatabaseConnection, source: &str, name: &str, value: i64) -> Result<(), AppError> {
  upsert(db, source, name, Some(value), None).await
}

pub async fn get_text(db: &DatabaseConnection, source: &str, name: &str) -> Result<Option<String>, AppError> {
  let row = find(db, source, name).await?;
  Ok(row.and_then(|r| r.value_text))
}

pub async fn set_text(db: &DatabaseConnection, source: &str, name: &str, value: &str) -> Result<(), AppError> {
  upsert(db, source, name, None, Some(value.to_owned())).await
}

async fn find(db: &DatabaseConnection, source: &str, name: &str) -> Result<Option<watermark::Model>, AppError> {
  Ok(
    watermark::Entity::find()
      .filter(watermark::Column::Source.eq(source.to_owned()))
      .filter(watermark::Column::Name.eq(name.to_owned()))
      .one(db)
      .await?,
  )
}

async fn upsert(
  db: &DatabaseConnection,
  source: &str,
  name: &str,
  value_int: Option<i64>,
  value_text: Option<String>,
) -> Result<(), AppError> {
  let existing = find(db, source, name).await?;

  let mut active = match existing {
    Some(row) => row.into(),
    None => watermark::ActiveModel {
      source: Set(source.to_owned()),
      name: Set(name.to_owned()),
      ..Default::default()
    },
  };

  if value_int.is_some() {
    active.value_int = Set(value_int);
  }
  if value_text.is_some() {
    active.value_text = Set(value_text);
  }
  active.updated_ts = Set(Utc::now());

  active.save(db).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use sea_orm::{ConnectionTrait, Database, Schema};

  async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(sea_orm::DatabaseBackend::Sqlite);
    let stmt = schema.create_table_from_entity(watermark::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    db
  }

  #[tokio::test]
  async fn defaults_to_zero_when_absent() {
    let db = setup().await;
    assert_eq!(get_int(&db, "imessage", "max_message_row_id").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn round_trips_int_value() {
    let db = setup().await;
    set_int(&db, "imessage", "max_message_row_id", 42).await.unwrap();
    assert_eq!(get_int(&db, "imessage", "max_message_row_id").await.unwrap(), 42);

    set_int(&db, "imessage", "max_message_row_id", 99).await.unwrap();
    assert_eq!(get_int(&db, "imessage", "max_message_row_id").await.unwrap(), 99);
  }

  #[tokio::test]
  async fn round_trips_text_value() {
    let db = setup().await;
    set_text(&db, "imessage", "last_cursor", "abc").await.unwrap();
    assert_eq!(get_text(&db, "imessage", "last_cursor").await.unwrap().as_deref(), Some("abc"));
  }

  #[tokio::test]
  async fn distinct_names_are_independent() {
    let db = setup().await;
    set_int(&db, "imessage", "a", 1).await.unwrap();
    set_int(&db, "imessage", "b", 2).await.unwrap();
    assert_eq!(get_int(&db, "imessage", "a").await.unwrap(), 1);
    assert_eq!(get_int(&db, "imessage", "b").await.unwrap(), 2);
  }
}
