//! Warehouse, queue, and watermark entity models.
//!
//! Hand-written rather than `sea-orm-cli` generated, but in the shape the
//! generator produces: one `Model`/`Column`/`Relation` module per table.

pub mod attachment;
pub mod chat;
pub mod chat_participant;
pub mod completion;
pub mod contact;
pub mod contact_identifier;
pub mod conversation;
pub mod conversation_analysis;
pub mod embedding;
pub mod emotion;
pub mod entity_facet;
pub mod humor_item;
pub mod job;
pub mod membership_event;
pub mod message;
pub mod reaction;
pub mod topic;
pub mod watermark;
