//! Recipient Keys
//!
//! Recipients are email addresses. Validation happens before any quota logic
//! runs; a malformed address never reaches the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an address (RFC 5321 path limit)
pub const MAX_RECIPIENT_LEN: usize = 254;

/// Maximum length of the local part
pub const MAX_LOCAL_PART_LEN: usize = 64;

/// Maximum length of the domain
pub const MAX_DOMAIN_LEN: usize = 253;

/// Reasons an address is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipientError {
    #[error("recipient is empty")]
    Empty,

    #[error("recipient exceeds {MAX_RECIPIENT_LEN} characters")]
    TooLong,

    #[error("recipient contains whitespace or control characters")]
    InvalidCharacter,

    #[error("recipient must contain exactly one '@'")]
    MissingAt,

    #[error("recipient local part is not a valid dot-string")]
    InvalidLocalPart,

    #[error("recipient domain is not a valid domain name")]
    InvalidDomain,
}

/// Validated recipient key
///
/// Split into local part and domain like an SMTP mailbox. The local part is
/// kept as given; the domain is lowercased so that `A@Example.COM` and
/// `A@example.com` share one quota. Quoted local parts and address literals
/// are not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Recipient {
    local_part: String,
    domain: String,
}

impl Recipient {
    /// Parse and normalize an address
    pub fn parse(raw: &str) -> Result<Self, RecipientError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RecipientError::Empty);
        }
        if trimmed.len() > MAX_RECIPIENT_LEN {
            return Err(RecipientError::TooLong);
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RecipientError::InvalidCharacter);
        }

        let (local, domain) = match trimmed.split_once('@') {
            Some((local, domain)) if !domain.contains('@') => (local, domain),
            _ => return Err(RecipientError::MissingAt),
        };

        Ok(Self {
            local_part: parse_local_part(local)?,
            domain: parse_domain(domain)?,
        })
    }

    /// Part before the `@`, as given
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// Lowercased domain
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// Dot-string: atoms of atext separated by single dots
fn parse_local_part(input: &str) -> Result<String, RecipientError> {
    if input.is_empty() || input.len() > MAX_LOCAL_PART_LEN {
        return Err(RecipientError::InvalidLocalPart);
    }
    let atoms_ok = input
        .split('.')
        .all(|atom| !atom.is_empty() && atom.chars().all(is_atext));
    if !atoms_ok {
        return Err(RecipientError::InvalidLocalPart);
    }
    Ok(input.to_string())
}

/// Dotted sub-domains of letters, digits and inner hyphens; at least two labels
fn parse_domain(input: &str) -> Result<String, RecipientError> {
    if input.len() > MAX_DOMAIN_LEN || !input.contains('.') {
        return Err(RecipientError::InvalidDomain);
    }
    let labels_ok = input.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if !labels_ok {
        return Err(RecipientError::InvalidDomain);
    }
    Ok(input.to_ascii_lowercase())
}

const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl TryFrom<String> for Recipient {
    type Error = RecipientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for Recipient {
    type Err = RecipientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
