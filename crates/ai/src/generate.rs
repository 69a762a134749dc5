use anyhow::anyhow;
use async_openai::{
  Client,
  config::OpenAIConfig,
  types::chat::{
    ChatCompletionRequestMessage, CreateChatCompletionRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
  },
};
use mw_shared::{APP_ENV, AppError};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// The four documented Gemini safety categories, set to the most permissive
/// threshold: this workload is benign structured extraction over the
/// device owner's own messages, not third-party generation.
const SAFETY_CATEGORIES: [&str; 4] = [
  "HARM_CATEGORY_HARASSMENT",
  "HARM_CATEGORY_HATE_SPEECH",
  "HARM_CATEGORY_SEXUALLY_EXPLICIT",
  "HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn permissive_safety_settings() -> serde_json::Value {
  serde_json::Value::Array(
    SAFETY_CATEGORIES
      .iter()
      .map(|category| serde_json::json!({ "category": category, "threshold": "BLOCK_NONE" }))
      .collect(),
  )
}

/// A decoded structured result plus the provider's own account of why
/// generation stopped, carried alongside so a caller whose parsed output
/// turns out empty can report something more useful than silence.
pub struct Generated<T> {
  pub value: T,
  pub finish_reason: Option<String>,
  pub safety_summary: Option<String>,
}

/// Best-effort extraction of any safety/moderation fields a provider's
/// response includes outside the OpenAI chat-completion schema proper
/// (Gemini's OpenAI-compatibility layer passes `promptFeedback` and
/// per-choice `safetyRatings` through verbatim).
fn extract_safety_summary(raw: &serde_json::Value) -> Option<String> {
  let mut parts = Vec::new();
  if let Some(feedback) = raw.get("promptFeedback").or_else(|| raw.get("prompt_feedback")) {
    parts.push(feedback.to_string());
  }
  if let Some(ratings) = raw
    .get("choices")
    .and_then(|choices| choices.get(0))
    .and_then(|choice| choice.get("safetyRatings").or_else(|| choice.get("safety_ratings")))
  {
    parts.push(ratings.to_string());
  }
  if parts.is_empty() { None } else { Some(parts.join("; ")) }
}

/// Recursively fix a JSON schema for OpenAI strict mode:
/// - additionalProperties: false on all objects
/// - required must include all property keys
/// - oneOf-of-consts collapses to an enum; anyOf\[T, null\] unwraps to T
fn fix_schema_for_strict(schema: &mut serde_json::Value) {
  let Some(obj) = schema.as_object_mut() else { return };

  // OpenAI strict mode (draft 7): $ref must be the only key — strip siblings
  if obj.contains_key("$ref") {
    obj.retain(|k, _| k == "$ref");
    return;
  }

  // Convert oneOf of const strings → enum (OpenAI strict mode forbids oneOf)
  if let Some(one_of) = obj.get("oneOf").and_then(|v| v.as_array()).cloned() {
    let consts: Option<Vec<serde_json::Value>> =
      one_of.iter().map(|v| v.get("const").cloned()).collect();
    if let Some(values) = consts {
      obj.clear();
      obj.insert("type".to_owned(), serde_json::Value::String("string".to_owned()));
      obj.insert("enum".to_owned(), serde_json::Value::Array(values));
      return;
    }
  }

  // Unwrap anyOf [T, null] → T (OpenAI strict mode forbids anyOf; Option<T> uses this pattern)
  if let Some(any_of) = obj.get("anyOf").and_then(|v| v.as_array()).cloned() {
    let non_null: Vec<&serde_json::Value> =
      any_of.iter().filter(|v| v.get("type").and_then(|t| t.as_str()) != Some("null")).collect();
    if non_null.len() == 1 {
      let inner = non_null[0].clone();
      obj.clear();
      obj.extend(inner.as_object().cloned().unwrap_or_default());
      fix_schema_for_strict(schema);
      return;
    }
  }

  if obj.contains_key("properties") {
    let keys: Vec<serde_json::Value> = obj["properties"]
      .as_object()
      .map(|p| p.keys().map(|k| serde_json::Value::String(k.clone())).collect())
      .unwrap_or_default();
    obj.insert("required".to_owned(), serde_json::Value::Array(keys));
    obj.insert("additionalProperties".to_owned(), serde_json::Value::Bool(false));

    if let Some(props) = obj.get_mut("properties").and_then(|p| p.as_object_mut()) {
      for v in props.values_mut() {
        fix_schema_for_strict(v);
      }
    }
  }

  if let Some(items) = obj.get_mut("items") {
    fix_schema_for_strict(items);
  }

  if let Some(defs) = obj.get_mut("definitions").and_then(|d| d.as_object_mut()) {
    for v in defs.values_mut() {
      fix_schema_for_strict(v);
    }
  }

  if let Some(defs) = obj.get_mut("$defs").and_then(|d| d.as_object_mut()) {
    for v in defs.values_mut() {
      fix_schema_for_strict(v);
    }
  }
}

/// Calls the chat model with a JSON-schema-constrained response format and
/// decodes the result into `T`.
///
/// The schema is generated from `T` via `schemars` and passed through
/// [`fix_schema_for_strict`] so strict mode's extra requirements
/// (`additionalProperties: false`, full `required`) are satisfied without
/// hand-writing the schema. Callers with response shapes that mix bare
/// strings and objects in the same position (the analysis job's union
/// fields) should deserialize into an intermediate type with a custom
/// `Deserialize` impl rather than relying on this schema inference for that
/// part of the shape.
pub async fn generate_structured<T>(
  messages: Vec<ChatCompletionRequestMessage>,
  schema_name: String,
  schema_description: Option<String>,
) -> Result<Generated<T>, AppError>
where
  T: DeserializeOwned + JsonSchema,
{
  let config = OpenAIConfig::new().with_api_key(&APP_ENV.api_key).with_api_base(&APP_ENV.api_base_url);
  let client = Client::with_config(config);

  let schema = schemars::schema_for!(T);
  let mut schema = serde_json::to_value(&schema)?;
  fix_schema_for_strict(&mut schema);

  let request = CreateChatCompletionRequestArgs::default()
    .model(&APP_ENV.analysis_model)
    .messages(messages)
    .response_format(ResponseFormat::JsonSchema {
      json_schema: ResponseFormatJsonSchema {
        description: schema_description,
        name: schema_name,
        schema: Some(schema),
        strict: Some(true),
      },
    })
    .build()?;

  // Sent as a raw JSON body (rather than through the typed `chat()`
  // wrapper) so the most-permissive safety-category settings can ride
  // along as an extra top-level field: the typed request builder has no
  // such field, but a Gemini-backed OpenAI-compatible endpoint honors it.
  let mut request_body = serde_json::to_value(&request)?;
  if let Some(obj) = request_body.as_object_mut() {
    obj.insert("safety_settings".to_owned(), permissive_safety_settings());
  }

  let raw: serde_json::Value = client.post("/chat/completions", request_body).await?;

  let choice = raw.get("choices").and_then(|choices| choices.get(0));
  let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()).map(str::to_owned);
  let safety_summary = extract_safety_summary(&raw);
  let content = choice
    .and_then(|c| c.get("message"))
    .and_then(|m| m.get("content"))
    .and_then(|v| v.as_str())
    .ok_or_else(|| {
      anyhow!(
        "empty message content (finish_reason={}, safety={})",
        finish_reason.clone().unwrap_or_else(|| "unknown".to_owned()),
        safety_summary.clone().unwrap_or_else(|| "none".to_owned())
      )
    })?;

  let value: T = serde_json::from_str(extract_json_object(content))?;
  Ok(Generated {
    value,
    finish_reason,
    safety_summary,
  })
}

/// Strict-mode JSON schema responses are already bare JSON, but some
/// providers still wrap the content in a Markdown code fence or prepend
/// prose. Strip a fence if present, then narrow to the first `{` through
/// the last `}` so a stray preamble/epilogue doesn't break parsing.
fn extract_json_object(raw: &str) -> &str {
  let trimmed = raw.trim();
  let unfenced = trimmed
    .strip_prefix("```json")
    .or_else(|| trimmed.strip_prefix("```"))
    .map(|s| s.strip_suffix("```").unwrap_or(s))
    .unwrap_or(trimmed)
    .trim();

  match (unfenced.find('{'), unfenced.rfind('}')) {
    (Some(start), Some(end)) if start <= end => &unfenced[start..=end],
    _ => unfenced,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Deserialize, JsonSchema)]
  struct Nested {
    name: String,
    note: Option<String>,
  }

  #[derive(Deserialize, JsonSchema)]
  struct Example {
    score: f32,
    tags: Vec<Nested>,
  }

  #[test]
  fn strict_fixup_adds_required_and_forbids_extra_properties() {
    let schema = schemars::schema_for!(Example);
    let mut value = serde_json::to_value(&schema).unwrap();
    fix_schema_for_strict(&mut value);

    assert_eq!(value["additionalProperties"], serde_json::json!(false));
    let required = value["required"].as_array().unwrap();
    assert!(required.iter().any(|v| v == "score"));
    assert!(required.iter().any(|v| v == "tags"));
  }

  #[test]
  fn extract_json_object_strips_code_fence() {
    let raw = "```json\n{\"summary\":\"ok\"}\n```";
    assert_eq!(extract_json_object(raw), "{\"summary\":\"ok\"}");
  }

  #[test]
  fn extract_json_object_trims_surrounding_prose() {
    let raw = "Sure, here you go:\n{\"summary\":\"ok\"}\nHope that helps!";
    assert_eq!(extract_json_object(raw), "{\"summary\":\"ok\"}");
  }

  #[test]
  fn extract_json_object_passes_through_bare_json() {
    let raw = "{\"summary\":\"ok\"}";
    assert_eq!(extract_json_object(raw), "{\"summary\":\"ok\"}");
  }
}
