//! Read-only access to the source chat database.
//!
//! The source schema is owned by an external application; this crate never
//! writes to it and never runs migrations against it. Every query is bounded
//! by a source-native row id so callers can resume from a watermark.

mod reader;

pub use reader::{
  SourceAttachment, SourceChat, SourceChatParticipant, SourceHandle, SourceMembershipEvent,
  SourceMessage, SourceReaction, SourceReader,
};
