//! Header normalization
//!
//! Events arrive as an ordered list of `name: value` pairs in which a name
//! may repeat. Routing works on a lookup map instead: the last value for a
//! name wins, while the name keeps the position where it was first seen so
//! the published map reads in wire order.

use esl_common::Header;
use indexmap::IndexMap;
use serde::Serialize;

/// Normalized event headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EventHeaders(IndexMap<String, String>);

impl EventHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Value of `name`, treating an empty value as missing
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn normalize(headers: &[Header]) -> EventHeaders {
    let mut map = IndexMap::with_capacity(headers.len());
    for header in headers {
        map.insert(header.name.clone(), header.value.clone());
    }
    EventHeaders(map)
}
