pub(crate) mod applications;
pub(crate) mod content;
pub(crate) mod meta;
pub(crate) mod resources;
pub(crate) mod search;

use std::collections::HashMap;

use companion_core::UriScope;
use serde::Deserialize;

use crate::responses::ServiceError;

/// Version prefix a route was mounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RouteVersion(pub &'static str);

impl RouteVersion {
    pub(crate) fn scope(&self, device_id: &str) -> UriScope {
        UriScope::new(self.0, device_id)
    }
}

/// Decoded query string.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub(crate) struct Params(HashMap<String, String>);

impl Params {
    pub(crate) fn require(&self, name: &str) -> Result<&str, ServiceError> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ServiceError::missing_param(name))
    }

    /// Empty values count as absent.
    pub(crate) fn optional(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn number(&self, name: &str) -> Result<Option<usize>, ServiceError> {
        self.optional(name)
            .map(|raw| {
                raw.parse::<usize>().map_err(|_| {
                    ServiceError::invalid_request(format!("{name} must be a non-negative integer"))
                })
            })
            .transpose()
    }

    /// `;` separated list, empty entries dropped.
    pub(crate) fn list(&self, name: &str) -> Option<Vec<String>> {
        self.optional(name).map(|raw| {
            raw.split(';')
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[cfg(test)]
impl<const N: usize> From<[(&str, &str); N]> for Params {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Params(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}
