use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum IdentError {
    #[snafu(display("Invalid identifier: {:?}", value))]
    Invalid { value: String },
}

/// A table, column or index name that matched `^[A-Za-z0-9_]+$`.
///
/// This is the only way an identifier reaches a statement builder; anything
/// that fails the check never gets interpolated into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SafeIdent(String);

impl SafeIdent {
    pub fn parse(value: &str) -> Result<Self, IdentError> {
        if is_safe_identifier(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(IdentError::Invalid {
                value: value.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backtick-quoted form. Safe because the allow-list excludes backticks.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl fmt::Display for SafeIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SafeIdent {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SafeIdent> for String {
    fn from(value: SafeIdent) -> Self {
        value.0
    }
}

pub fn is_safe_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Validates every name, failing on the first bad one.
pub fn parse_all<S: AsRef<str>>(values: &[S]) -> Result<Vec<SafeIdent>, IdentError> {
    values.iter().map(|v| SafeIdent::parse(v.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("wp_posts", true)]
    #[case("meta_key", true)]
    #[case("Table9", true)]
    #[case("", false)]
    #[case("wp_posts`; DROP TABLE x", false)]
    #[case("wp-posts", false)]
    #[case("wp posts", false)]
    #[case("naïve", false)]
    #[case("a.b", false)]
    fn identifier_allow_list(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(is_safe_identifier(input), ok);
        assert_eq!(SafeIdent::parse(input).is_ok(), ok);
    }

    #[test]
    fn quoted_wraps_in_backticks() {
        let ident = SafeIdent::parse("wp_options").unwrap();
        assert_eq!(ident.quoted(), "`wp_options`");
    }

    #[test]
    fn deserializing_rejects_unsafe_names() {
        let err = serde_json::from_str::<SafeIdent>("\"bad name\"");
        assert!(err.is_err());
    }
}
