use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::error::TenancyError;

/// Maximum accepted length for a tenant identifier
const MAX_TENANT_ID_LEN: usize = 100;

/// Case-normalized tenant identifier (e.g. "tenant1", "super-tenant").
///
/// Construction trims and lower-cases the input, then rejects empty values and
/// anything outside `[a-z0-9_-]`. Whether the tenant actually exists is a
/// separate question answered by a [`TenantValidator`](super::TenantValidator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, TenancyError> {
        let normalized = raw.trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(TenancyError::InvalidTenantId(
                "tenant identifier must not be empty".to_string(),
            ));
        }

        if normalized.len() > MAX_TENANT_ID_LEN {
            return Err(TenancyError::InvalidTenantId(format!(
                "tenant identifier must be at most {} characters",
                MAX_TENANT_ID_LEN
            )));
        }

        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TenancyError::InvalidTenantId(format!(
                "tenant identifier '{}' may only contain letters, numbers, hyphens and underscores",
                normalized
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier usable as an unquoted SQL identifier (hyphens become underscores)
    pub fn to_identifier(&self) -> String {
        self.0.replace('-', "_")
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
