use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Contact::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Contact::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Contact::Name).string().not_null())
          .col(ColumnDef::new(Contact::Nickname).string())
          .col(ColumnDef::new(Contact::IsMe).boolean().not_null().default(false))
          .col(ColumnDef::new(Contact::DataSource).string().not_null())
          .col(ColumnDef::new(Contact::LastUpdated).timestamp().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(ContactIdentifier::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(ContactIdentifier::Id)
              .big_integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(ContactIdentifier::ContactId).big_integer().not_null())
          .col(ColumnDef::new(ContactIdentifier::Identifier).string().not_null())
          .col(ColumnDef::new(ContactIdentifier::IdentifierType).string().not_null())
          .col(
            ColumnDef::new(ContactIdentifier::IsPrimary)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(ContactIdentifier::LastUsed).timestamp().not_null())
          .foreign_key(
            ForeignKey::create()
              .from(ContactIdentifier::Table, ContactIdentifier::ContactId)
              .to(Contact::Table, Contact::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .if_not_exists()
          .name("idx_contact_identifier_unique")
          .table(ContactIdentifier::Table)
          .col(ContactIdentifier::Identifier)
          .col(ContactIdentifier::IdentifierType)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(ContactIdentifier::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(Contact::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum Contact {
  Table,
  Id,
  Name,
  Nickname,
  IsMe,
  DataSource,
  LastUpdated,
}

#[derive(Iden)]
pub enum ContactIdentifier {
  Table,
  Id,
  ContactId,
  Identifier,
  IdentifierType,
  IsPrimary,
  LastUsed,
}
