use crate::id::Id;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata attached to a record.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// A stored URL record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned by the store on first write; invalid until then.
    #[serde(default, skip_serializing_if = "is_unset")]
    pub id: Id,
    /// The original URL that was shortened.
    pub url: String,
    /// The record is dropped once `now > id.time() + max_age`.
    /// Zero or negative means it never expires.
    #[serde(
        rename = "maxAge",
        default,
        skip_serializing_if = "SignedDuration::is_zero"
    )]
    pub max_age: SignedDuration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

fn is_unset(id: &Id) -> bool {
    !id.is_valid()
}

impl Record {
    /// Creates a record without an identifier or expiry.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_max_age(mut self, max_age: SignedDuration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Returns when the record expires, if ever.
    pub fn expire_at(&self) -> Option<Timestamp> {
        if !self.max_age.is_positive() {
            return None;
        }
        self.id.time()?.checked_add(self.max_age).ok()
    }

    /// Checks whether the record has expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expire_at().is_some_and(|expire_at| now > expire_at)
    }
}
