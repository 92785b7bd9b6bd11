//! Process-wide crawl limits.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A positive count or the literal `"unlimited"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Limit {
    #[default]
    Unlimited,
    Count(u64),
}

impl Limit {
    /// Whether `used` is still below the limit.
    pub fn allows(&self, used: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Count(cap) => used < *cap,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => write!(f, "unlimited"),
            Limit::Count(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Unlimited => serializer.serialize_str("unlimited"),
            Limit::Count(n) => serializer.serialize_u64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LimitVisitor;

        impl Visitor<'_> for LimitVisitor {
            type Value = Limit;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive integer or the string \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Limit, E> {
                if v == 0 {
                    return Err(E::custom("limit must be positive"));
                }
                Ok(Limit::Count(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Limit, E> {
                if v <= 0 {
                    return Err(E::custom("limit must be positive"));
                }
                Ok(Limit::Count(v as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Limit, E> {
                if v.eq_ignore_ascii_case("unlimited") {
                    Ok(Limit::Unlimited)
                } else {
                    Err(E::custom(format!("unrecognized limit '{}'", v)))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

/// Process-wide crawl configuration shared by every task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Hard cap on the number of pages requested per crawl session.
    #[serde(default)]
    pub max_pages_to_crawl: Limit,
    /// Token budget per output batch, counted with a GPT-style tokenizer.
    #[serde(default)]
    pub max_tokens: Limit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_number_and_unlimited() {
        let l: Limit = serde_json::from_str("50").unwrap();
        assert_eq!(l, Limit::Count(50));
        let l: Limit = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(l, Limit::Unlimited);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(serde_json::from_str::<Limit>("0").is_err());
        assert!(serde_json::from_str::<Limit>("\"lots\"").is_err());
    }

    #[test]
    fn allows_respects_cap() {
        assert!(Limit::Unlimited.allows(u64::MAX - 1));
        assert!(Limit::Count(3).allows(2));
        assert!(!Limit::Count(3).allows(3));
    }

    #[test]
    fn global_config_defaults_to_unlimited() {
        let cfg: GlobalConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.max_pages_to_crawl.is_unlimited());
        assert!(cfg.max_tokens.is_unlimited());
    }

    #[test]
    fn global_config_parses_camel_case() {
        let cfg: GlobalConfig =
            serde_json::from_str(r#"{"maxPagesToCrawl": 25, "maxTokens": "unlimited"}"#).unwrap();
        assert_eq!(cfg.max_pages_to_crawl, Limit::Count(25));
        assert!(cfg.max_tokens.is_unlimited());
    }
}
