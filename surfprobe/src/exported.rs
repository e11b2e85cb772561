use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const RAW_TRUE: &str = "true";
const RAW_FALSE: &str = "false";

/// The literal `android:exported` value of a component
///
/// The platform default for a missing attribute depends on the presence of
/// intent filters and the target SDK, so the absent case is carried through as
/// [Exported::Unset] and decided by the classifier.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum Exported {
    True,
    False,
    Unset,
}

impl Exported {
    /// Parse the raw attribute value
    ///
    /// The value is trimmed and compared case-insensitively. Anything that
    /// isn't `true` or `false` (typically an unresolved `@bool/..` reference)
    /// is treated as [Exported::Unset].
    pub fn parse(raw: Option<&str>) -> Self {
        let value = match raw {
            None => return Self::Unset,
            Some(v) => v.trim(),
        };

        if value.eq_ignore_ascii_case(RAW_TRUE) {
            Self::True
        } else if value.eq_ignore_ascii_case(RAW_FALSE) {
            Self::False
        } else {
            if !value.is_empty() {
                log::warn!("unrecognized exported value `{}`, treating as unset", value);
            }
            Self::Unset
        }
    }

    /// The stored form of the value, `None` for [Exported::Unset]
    pub const fn as_raw(&self) -> Option<&'static str> {
        match self {
            Self::True => Some(RAW_TRUE),
            Self::False => Some(RAW_FALSE),
            Self::Unset => None,
        }
    }
}

impl Default for Exported {
    fn default() -> Self {
        Self::Unset
    }
}

impl Display for Exported {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_raw().unwrap_or(""))
    }
}

impl Serialize for Exported {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.as_raw() {
            Some(v) => serializer.serialize_some(v),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Exported {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case(Some("true"), Exported::True)]
    #[case(Some("TRUE"), Exported::True)]
    #[case(Some("  True \n"), Exported::True)]
    #[case(Some("false"), Exported::False)]
    #[case(Some(" FaLsE"), Exported::False)]
    #[case(Some(""), Exported::Unset)]
    #[case(Some("@bool/is_exported"), Exported::Unset)]
    #[case(None, Exported::Unset)]
    fn test_parse(#[case] raw: Option<&str>, #[case] expected: Exported) {
        assert_eq!(Exported::parse(raw), expected);
    }

    #[test]
    fn test_raw_round_trip() {
        for ex in [Exported::True, Exported::False, Exported::Unset] {
            assert_eq!(Exported::parse(ex.as_raw()), ex);
        }
    }

    #[test]
    fn test_serde() {
        assert_eq!(serde_json::to_string(&Exported::True).unwrap(), "\"true\"");
        assert_eq!(serde_json::to_string(&Exported::Unset).unwrap(), "null");
        let ex: Exported = serde_json::from_str("\"false\"").unwrap();
        assert_eq!(ex, Exported::False);
        let ex: Exported = serde_json::from_str("null").unwrap();
        assert_eq!(ex, Exported::Unset);
    }
}
