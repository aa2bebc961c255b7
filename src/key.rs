use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::StoreError;
use crate::types::RowValues;

static BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid bucket regex"));

/// Key of one object inside a bucket.
///
/// Numeric buckets are addressed by [`ObjectKey::Id`]; string-keyed buckets store arbitrary
/// byte-string ids as text and are addressed by [`ObjectKey::Name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKey {
    Id(i64),
    Name(String),
}

impl ObjectKey {
    /// Build a key from a raw byte-string id. Invalid UTF-8 is replaced, matching how the
    /// id is stored in the text column.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ObjectKey::Name(String::from_utf8_lossy(bytes).into_owned())
    }

    #[must_use]
    pub fn as_id(&self) -> Option<i64> {
        match self {
            ObjectKey::Id(id) => Some(*id),
            ObjectKey::Name(_) => None,
        }
    }

    pub(crate) fn to_param(&self) -> RowValues {
        match self {
            ObjectKey::Id(id) => RowValues::Int(*id),
            ObjectKey::Name(name) => RowValues::Text(name.clone()),
        }
    }

    /// Read a key back from the `id` column of a bucket row.
    pub(crate) fn from_row_value(value: &RowValues) -> Result<Self, StoreError> {
        match value {
            RowValues::Int(id) => Ok(ObjectKey::Id(*id)),
            RowValues::Text(name) => Ok(ObjectKey::Name(name.clone())),
            RowValues::Blob(bytes) => Ok(ObjectKey::from_bytes(bytes)),
            other => Err(StoreError::ExecutionError(format!(
                "unexpected value in id column: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Id(id) => write!(f, "{id}"),
            ObjectKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for ObjectKey {
    fn from(id: i64) -> Self {
        ObjectKey::Id(id)
    }
}

impl From<i32> for ObjectKey {
    fn from(id: i32) -> Self {
        ObjectKey::Id(i64::from(id))
    }
}

impl From<u32> for ObjectKey {
    fn from(id: u32) -> Self {
        ObjectKey::Id(i64::from(id))
    }
}

impl From<&str> for ObjectKey {
    fn from(name: &str) -> Self {
        ObjectKey::Name(name.to_owned())
    }
}

impl From<String> for ObjectKey {
    fn from(name: String) -> Self {
        ObjectKey::Name(name)
    }
}

impl From<&[u8]> for ObjectKey {
    fn from(bytes: &[u8]) -> Self {
        ObjectKey::from_bytes(bytes)
    }
}

impl From<&ObjectKey> for ObjectKey {
    fn from(key: &ObjectKey) -> Self {
        key.clone()
    }
}

/// Validate a bucket name and return it as a quoted SQL identifier.
///
/// Bucket names become table names, so only `[A-Za-z_][A-Za-z0-9_]*` up to 63 characters
/// is accepted.
///
/// # Errors
/// Returns [`StoreError::InvalidBucketName`] for anything else.
pub fn quote_bucket(name: &str) -> Result<String, StoreError> {
    if BUCKET_NAME.is_match(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidBucketName(name.to_string()))
    }
}

/// Escape a key prefix for use in `LIKE ... ESCAPE '\'` and append the wildcard.
pub(crate) fn like_prefix_pattern(prefix: &[u8]) -> String {
    let prefix = String::from_utf8_lossy(prefix);
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_are_validated_and_quoted() {
        assert_eq!(quote_bucket("endpoints").unwrap(), "\"endpoints\"");
        assert_eq!(quote_bucket("_tmp_1").unwrap(), "\"_tmp_1\"");
        let too_long = "x".repeat(64);
        for bad in ["", "1abc", "drop table x", "a;b", "quote\"d", too_long.as_str()] {
            assert!(
                matches!(quote_bucket(bad), Err(StoreError::InvalidBucketName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_prefix_pattern(b"env_"), "env\\_%");
        assert_eq!(like_prefix_pattern(b"50%"), "50\\%%");
        assert_eq!(like_prefix_pattern(b"a\\b"), "a\\\\b%");
        assert_eq!(like_prefix_pattern(b""), "%");
    }

    #[test]
    fn keys_render_and_convert() {
        assert_eq!(ObjectKey::from(5).to_string(), "5");
        assert_eq!(ObjectKey::from("abc").to_string(), "abc");
        assert_eq!(ObjectKey::from(&b"k1"[..]), ObjectKey::Name("k1".into()));
        assert_eq!(ObjectKey::from(7).to_param(), RowValues::Int(7));
        assert_eq!(
            ObjectKey::from_row_value(&RowValues::Text("x".into())).unwrap(),
            ObjectKey::Name("x".into())
        );
        assert!(ObjectKey::from_row_value(&RowValues::Null).is_err());
    }
}
