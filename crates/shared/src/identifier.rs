use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
  Phone,
  Email,
  Handle,
}

/// A normalized contact identifier ready for `(identifier, type)` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
  pub value: String,
  pub kind: IdentifierType,
}

/// Normalize a phone number to US-biased digits: strip all non-digit
/// characters, then drop a leading `1` if the result is 11 digits.
///
/// This is lossy for non-US numbers with a genuine leading `1` country
/// code ambiguity, which the source data does not disambiguate either.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
  let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
  if digits.len() == 11 && digits.starts_with('1') {
    digits[1..].to_owned()
  } else {
    digits
  }
}

/// Normalize a phone number to E.164 (`+<country><digits>`) for
/// cross-reference against sources that already store E.164.
#[must_use]
pub fn normalize_phone_e164(raw: &str) -> String {
  let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
  if digits.len() == 10 {
    format!("+1{digits}")
  } else if digits.len() == 11 && digits.starts_with('1') {
    format!("+{digits}")
  } else {
    format!("+{digits}")
  }
}

/// Lowercase and trim an email address.
#[must_use]
pub fn normalize_email(raw: &str) -> String {
  raw.trim().to_lowercase()
}

impl Identifier {
  /// Classify and normalize a raw source identifier. Handles (iMessage IDs
  /// that are neither phone numbers nor emails, e.g. `urn:biz:...`) pass
  /// through unchanged beyond trimming.
  #[must_use]
  pub fn normalize(raw: &str) -> Self {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
      Self {
        value: normalize_email(trimmed),
        kind: IdentifierType::Email,
      }
    } else if trimmed.chars().filter(|c| c.is_ascii_digit()).count() >= 7
      && trimmed.chars().all(|c| c.is_ascii_digit() || "+-(). ".contains(c))
    {
      Self {
        value: normalize_phone(trimmed),
        kind: IdentifierType::Phone,
      }
    } else {
      Self {
        value: trimmed.to_owned(),
        kind: IdentifierType::Handle,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_us_country_code() {
    assert_eq!(normalize_phone("1 (415) 555-0100"), "4155550100");
  }

  #[test]
  fn keeps_ten_digit_numbers() {
    assert_eq!(normalize_phone("415-555-0100"), "4155550100");
  }

  #[test]
  fn lowercases_email() {
    assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
  }

  #[test]
  fn classifies_phone_vs_email_vs_handle() {
    assert_eq!(Identifier::normalize("alice@example.com").kind, IdentifierType::Email);
    assert_eq!(Identifier::normalize("+14155550100").kind, IdentifierType::Phone);
    assert_eq!(Identifier::normalize("urn:biz:abcdef").kind, IdentifierType::Handle);
  }
}
