use anyhow::anyhow;
use async_openai::{Client, config::OpenAIConfig, types::embeddings::CreateEmbeddingRequestArgs};
use mw_shared::{APP_ENV, AppError};

/// Embeds a single piece of text. The warehouse has no native vector
/// column, so the raw float vector is returned as-is; the caller packs it
/// little-endian into `embedding_blob` alongside its own `dimension`.
pub async fn embed(input: &str) -> Result<Vec<f64>, AppError> {
  let config = OpenAIConfig::new().with_api_key(&APP_ENV.api_key).with_api_base(&APP_ENV.api_base_url);
  let client = Client::with_config(config);

  let request = CreateEmbeddingRequestArgs::default().model(&APP_ENV.embed_model).input(input).build()?;

  let embedding = client
    .embeddings()
    .create(request)
    .await
    .map(|r| r.data.into_iter())?
    .map(|e| e.embedding)
    .next()
    .ok_or_else(|| anyhow!("empty embedding response"))?;

  Ok(embedding.into_iter().map(f64::from).collect())
}
