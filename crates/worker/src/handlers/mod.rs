mod analysis;
mod embedding;

pub use analysis::{AnalysisHandler, AnalysisJobPayload};
pub use embedding::{EmbeddingHandler, EmbeddingJobPayload};
