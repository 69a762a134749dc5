use sea_orm_migration::{MigrationTrait};

mod m20260730_01_create_contact_tables;
mod m20260730_02_create_chat_tables;
mod m20260730_03_create_message_table;
mod m20260730_04_create_reaction_table;
mod m20260730_05_create_membership_event_table;
mod m20260730_06_create_attachment_table;
mod m20260730_07_create_conversation_table;
mod m20260730_08_create_facet_tables;
mod m20260730_09_create_embedding_table;
mod m20260730_10_create_watermark_table;
mod m20260730_11_create_completion_tables;

pub fn migrations() -> Vec<Box<dyn MigrationTrait>> {
  vec![
    Box::new(m20260730_01_create_contact_tables::Migration),
    Box::new(m20260730_02_create_chat_tables::Migration),
    Box::new(m20260730_03_create_message_table::Migration),
    Box::new(m20260730_04_create_reaction_table::Migration),
    Box::new(m20260730_05_create_membership_event_table::Migration),
    Box::new(m20260730_06_create_attachment_table::Migration),
    Box::new(m20260730_07_create_conversation_table::Migration),
    Box::new(m20260730_08_create_facet_tables::Migration),
    Box::new(m20260730_09_create_embedding_table::Migration),
    Box::new(m20260730_10_create_watermark_table::Migration),
    Box::new(m20260730_11_create_completion_tables::Migration),
  ]
}
