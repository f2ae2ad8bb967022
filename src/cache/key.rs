//! Cache keys and sprite variant URL derivation.
//!
//! A cache key is a primary id with an optional secondary id, dot-joined
//! (`"1.2"` or `"25"`). Variant descriptors are suffixes appended to the
//! key when building the sprite URL:
//!
//! ```text
//! <base>/<primary>.<secondary><variant>.png
//! <base>/<primary><variant>.png
//! ```

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("cache key is empty")]
    Empty,

    #[error("invalid variant descriptor {0:?}")]
    InvalidVariant(String),

    #[error("cannot build sprite URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Primary/secondary id pair identifying a logical sprite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub primary: String,
    pub secondary: Option<String>,
}

impl CacheKey {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.filter(|s| !s.is_empty()),
        }
    }

    /// Split on the first `.`; an empty secondary counts as absent.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let raw = raw.trim();
        let (primary, secondary) = match raw.split_once('.') {
            Some((p, s)) => (p, Some(s.to_string())),
            None => (raw, None),
        };
        if primary.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self::new(primary, secondary))
    }

    /// The file stem for a variant, without extension.
    pub fn variant_stem(&self, variant: &str) -> Result<String, KeyError> {
        validate_variant(variant)?;
        Ok(match &self.secondary {
            Some(secondary) => format!("{}.{}{}", self.primary, secondary, variant),
            None => format!("{}{}", self.primary, variant),
        })
    }

    /// Derive the sprite URL for one variant under `base`.
    pub fn variant_url(&self, base: &Url, variant: &str) -> Result<Url, KeyError> {
        let stem = self.variant_stem(variant)?;
        sprite_url(base, &stem)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary {
            Some(secondary) => write!(f, "{}.{}", self.primary, secondary),
            None => write!(f, "{}", self.primary),
        }
    }
}

impl FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Variants are short suffixes; anything that could escape the base path is refused.
fn validate_variant(variant: &str) -> Result<(), KeyError> {
    let bad = variant.contains('/')
        || variant.contains('\\')
        || variant.contains('?')
        || variant.contains('#')
        || variant.contains("..");
    if bad {
        return Err(KeyError::InvalidVariant(variant.to_string()));
    }
    Ok(())
}

/// `<base>/<stem>.png`.
pub fn sprite_url(base: &Url, stem: &str) -> Result<Url, KeyError> {
    let raw = format!("{}/{}.png", base.as_str().trim_end_matches('/'), stem);
    Url::parse(&raw).map_err(|e| KeyError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}
