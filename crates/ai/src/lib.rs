// Re-export async_openai types for consumers building prompts
pub use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage,
};

mod embed;
pub use embed::embed;

mod generate;
pub use generate::{Generated, generate_structured};

mod outcome;
pub use outcome::{Outcome, classify};
