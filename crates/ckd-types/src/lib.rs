//! Validated value types shared across the CKD calculator crates.
//!
//! Each type checks its invariant once at construction, so code holding a value can rely on it
//! without re-validating. Deserialisation goes through the same constructors.

use once_cell::sync::Lazy;
use regex::Regex;

/// Errors that can occur when creating validated value types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input was not a well-formed e-mail address
    #[error("Invalid e-mail address")]
    InvalidEmail,
    /// The input was not a 10-digit natural identifier
    #[error("Invalid identifier format: {0}")]
    InvalidNaturalId(i64),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?",
        r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ))
    .expect("e-mail pattern is a valid regex")
});

/// An e-mail address in canonical (trimmed, lower-case) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parses and canonicalises an e-mail address.
    ///
    /// Matching is case-insensitive: the input is trimmed and lower-cased before it is checked.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let canonical = input.as_ref().trim().to_lowercase();
        if canonical.is_empty() {
            return Err(TextError::Empty);
        }
        if !EMAIL_RE.is_match(&canonical) {
            return Err(TextError::InvalidEmail);
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for EmailAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EmailAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EmailAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A 10-digit external identifier: an NHS number or a professional ID.
///
/// The only shape rule is that the value has at least ten digits, i.e.
/// `value / 1_000_000_000 >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalId(i64);

impl NaturalId {
    const MIN_TEN_DIGIT: i64 = 1_000_000_000;

    pub fn new(value: i64) -> Result<Self, TextError> {
        if value / Self::MIN_TEN_DIGIT < 1 {
            return Err(TextError::InvalidNaturalId(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for NaturalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for NaturalId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NaturalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = i64::deserialize(deserializer)?;
        NaturalId::new(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  abc ").unwrap().as_str(), "abc");
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn email_is_trimmed_and_lower_cased() {
        let email = EmailAddress::parse("  Jane.Doe@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "jane.doe@example.com");
    }

    #[test]
    fn email_rejects_missing_domain_and_spaces() {
        assert_eq!(
            EmailAddress::parse("jane@"),
            Err(TextError::InvalidEmail)
        );
        assert_eq!(
            EmailAddress::parse("jane doe@example.com"),
            Err(TextError::InvalidEmail)
        );
        assert_eq!(EmailAddress::parse(""), Err(TextError::Empty));
    }

    #[test]
    fn natural_id_requires_ten_digits() {
        assert!(NaturalId::new(1_000_000_000).is_ok());
        assert!(NaturalId::new(9_999_999_999).is_ok());
        assert_eq!(
            NaturalId::new(999_999_999),
            Err(TextError::InvalidNaturalId(999_999_999))
        );
        assert!(NaturalId::new(-4_000_000_000).is_err());
    }

    #[test]
    fn natural_id_deserialises_through_validation() {
        let ok: NaturalId = serde_json::from_str("4857773456").unwrap();
        assert_eq!(ok.value(), 4_857_773_456);
        assert!(serde_json::from_str::<NaturalId>("12345").is_err());
    }
}
