use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(MembershipEvent::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(MembershipEvent::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(MembershipEvent::Guid).string().not_null())
          .col(ColumnDef::new(MembershipEvent::ChatId).big_integer().not_null())
          .col(ColumnDef::new(MembershipEvent::ActorId).big_integer())
          .col(ColumnDef::new(MembershipEvent::MemberId).big_integer())
          .col(ColumnDef::new(MembershipEvent::ActionType).string().not_null())
          .col(ColumnDef::new(MembershipEvent::Timestamp).timestamp().not_null())
          .col(
            ColumnDef::new(MembershipEvent::IsFromMe)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(MembershipEvent::GroupTitle).string())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_membership_event_guid_unique")
          .table(MembershipEvent::Table)
          .col(MembershipEvent::Guid)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(MembershipEvent::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum MembershipEvent {
  Table,
  Id,
  Guid,
  ChatId,
  ActorId,
  MemberId,
  ActionType,
  Timestamp,
  IsFromMe,
  GroupTitle,
}
