use mw_shared::AppError;

/// Classification of a single LLM call, observed by the rate/latency
/// controllers to decide whether to back off or ramp up concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Ok,
  RateLimited,
  Timeout,
  NetError,
  ServerError,
  Other,
}

impl Outcome {
  #[must_use]
  pub const fn is_congestion(self) -> bool {
    matches!(self, Self::RateLimited | Self::Timeout | Self::NetError | Self::ServerError)
  }
}

/// Classify a failed call by sniffing the provider error's message text.
/// `async-openai` surfaces heterogeneous provider errors as a loosely typed
/// `ApiError`/`reqwest::Error` union, so string matching on well-known
/// substrings is more robust across provider/SDK versions than trying to
/// match every transport variant.
#[must_use]
pub fn classify(err: &AppError) -> Outcome {
  let text = err.to_string().to_lowercase();

  if text.contains("429") || text.contains("rate limit") || text.contains("rate_limit") {
    Outcome::RateLimited
  } else if text.contains("timed out") || text.contains("timeout") || text.contains("deadline exceeded") {
    Outcome::Timeout
  } else if text.contains("connection") || text.contains("dns") || text.contains("network") {
    Outcome::NetError
  } else if text.contains("500") || text.contains("502") || text.contains("503") || text.contains("internal server error") {
    Outcome::ServerError
  } else {
    Outcome::Other
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mw_shared::ErrorKind;

  #[test]
  fn classifies_rate_limit_text() {
    let err = AppError::with_kind(ErrorKind::RetryableTransient, anyhow::anyhow!("429 rate limit exceeded"));
    assert_eq!(classify(&err), Outcome::RateLimited);
  }

  #[test]
  fn classifies_timeout_text() {
    let err = AppError::with_kind(ErrorKind::RetryableTransient, anyhow::anyhow!("request timed out after 30s"));
    assert_eq!(classify(&err), Outcome::Timeout);
  }

  #[test]
  fn falls_back_to_other() {
    let err = AppError::with_kind(ErrorKind::Validation, anyhow::anyhow!("missing field foo"));
    assert_eq!(classify(&err), Outcome::Other);
  }
}
