mod etl;
pub use etl::{
  StageStats, build_handle_contact_map, sync_attachments, sync_chat_participants, sync_chats, sync_contacts,
  sync_membership_events, sync_messages, sync_reactions,
};

mod grouper;
pub use grouper::regroup_all;

mod watermark;
pub use watermark::{get_int, get_text, set_int, set_text};

mod encoder;
pub use encoder::{EncodeOptions, encode_conversation};
