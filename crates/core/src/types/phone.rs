//! Buyer phone number in E.164 form.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Phone`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    /// The input string is empty.
    #[error("phone number cannot be empty")]
    Empty,
    /// The number does not start with a `+` country prefix.
    #[error("phone number must start with + and a country code")]
    MissingCountryCode,
    /// The number contains something other than digits and separators.
    #[error("phone number contains invalid character {0:?}")]
    InvalidCharacter(char),
    /// The digit count is outside the E.164 range.
    #[error("phone number must have between {min} and {max} digits")]
    InvalidLength {
        /// Minimum digit count.
        min: usize,
        /// Maximum digit count.
        max: usize,
    },
}

/// A phone number normalized to E.164 (`+15551234567`).
///
/// Spaces, dashes, dots and parentheses are accepted on input and stripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Phone(String);

impl Phone {
    const MIN_DIGITS: usize = 8;
    const MAX_DIGITS: usize = 15;

    /// Parse and normalize a `Phone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, lacks the leading `+`, contains
    /// characters other than digits and common separators, or has a digit
    /// count outside 8..=15.
    pub fn parse(s: &str) -> Result<Self, PhoneError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PhoneError::Empty);
        }
        let rest = s.strip_prefix('+').ok_or(PhoneError::MissingCountryCode)?;

        let mut digits = String::with_capacity(Self::MAX_DIGITS + 1);
        digits.push('+');
        for c in rest.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                other => return Err(PhoneError::InvalidCharacter(other)),
            }
        }

        let count = digits.len() - 1;
        if !(Self::MIN_DIGITS..=Self::MAX_DIGITS).contains(&count) {
            return Err(PhoneError::InvalidLength {
                min: Self::MIN_DIGITS,
                max: Self::MAX_DIGITS,
            });
        }

        Ok(Self(digits))
    }

    /// Returns the E.164 string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe rendering keeping the last two digits.
    #[must_use]
    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .skip(self.0.len().saturating_sub(2))
            .collect();
        format!("+***{tail}")
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Phone {
    type Error = PhoneError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.0
    }
}
