//! Expiry bookkeeping stored in a container's metadata slot.
//!
//! Two clocks are tracked. Second-based expiry compares absolute Unix
//! timestamps against the request time. Hop-based expiry counts request
//! boundaries: a boundary is observed when the storage's request access time
//! differs from the `ts` recorded in the budget, at which point one hop is
//! consumed and `ts` moves forward. Re-evaluating within the same request is
//! therefore a no-op.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remaining hops and the request access time they were last charged at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HopBudget {
    pub hops: i64,
    pub ts: f64,
}

impl HopBudget {
    pub fn new(hops: i64, ts: f64) -> Self {
        Self { hops, ts }
    }

    /// Charge one hop if `access_time` is a new request. Returns whether the
    /// budget changed.
    fn charge(&mut self, access_time: f64) -> bool {
        if self.ts == access_time {
            return false;
        }
        self.hops = self.hops.saturating_sub(1);
        self.ts = access_time;
        true
    }

    fn exhausted(&self) -> bool {
        self.hops <= 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpiryMetadata {
    #[serde(rename = "EXPIRE", default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<i64>,

    #[serde(
        rename = "EXPIRE_KEYS",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub expire_keys: BTreeMap<String, i64>,

    #[serde(rename = "EXPIRE_HOPS", default, skip_serializing_if = "Option::is_none")]
    pub expire_hops: Option<HopBudget>,

    #[serde(
        rename = "EXPIRE_HOPS_KEYS",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub expire_hops_keys: BTreeMap<String, HopBudget>,

    /// Anything else stored under the container's metadata slot.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Outcome of one expiry pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub container_expired: bool,
    pub expired_keys: BTreeSet<String>,
    /// Whether the metadata was modified and should be written back.
    pub changed: bool,
}

impl Evaluation {
    pub fn hides(&self, key: &str) -> bool {
        self.container_expired || self.expired_keys.contains(key)
    }
}

impl ExpiryMetadata {
    /// Parse from a metadata slot. Missing or malformed slots read as empty.
    pub fn from_slot(slot: Option<&Value>) -> Self {
        match slot {
            Some(value @ Value::Object(_)) => match serde_json::from_value(value.clone()) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::debug!("Ignoring malformed expiry metadata: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    pub fn to_slot(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.expire.is_none()
            && self.expire_keys.is_empty()
            && self.expire_hops.is_none()
            && self.expire_hops_keys.is_empty()
            && self.other.is_empty()
    }

    /// Advance hop budgets and work out what has expired at `now` (whole
    /// seconds) for a request stamped `access_time`.
    ///
    /// Markers of expired entries stay in place so the result still holds
    /// when the data cannot be purged; [`ExpiryMetadata::settle`] drops them
    /// once it has been.
    pub fn evaluate(&mut self, now: i64, access_time: f64) -> Evaluation {
        let mut evaluation = Evaluation::default();

        let mut container_expired = self.expire.is_some_and(|expire| now > expire);
        if let Some(budget) = self.expire_hops.as_mut() {
            evaluation.changed |= budget.charge(access_time);
            container_expired |= budget.exhausted();
        }

        if container_expired {
            evaluation.container_expired = true;
            evaluation.changed = true;
            return evaluation;
        }

        for (key, expire) in &self.expire_keys {
            if now > *expire {
                evaluation.expired_keys.insert(key.clone());
            }
        }
        for (key, budget) in self.expire_hops_keys.iter_mut() {
            evaluation.changed |= budget.charge(access_time);
            if budget.exhausted() {
                evaluation.expired_keys.insert(key.clone());
            }
        }
        evaluation.changed |= !evaluation.expired_keys.is_empty();

        evaluation
    }

    /// Drop the markers `evaluation` found expired, after their data is gone.
    pub fn settle(&mut self, evaluation: &Evaluation) {
        if evaluation.container_expired {
            self.clear_markers();
            return;
        }
        for key in &evaluation.expired_keys {
            self.forget_key(key);
        }
    }

    /// Drop every expiry marker for the container and its keys.
    pub fn clear_markers(&mut self) {
        self.expire = None;
        self.expire_hops = None;
        self.expire_keys.clear();
        self.expire_hops_keys.clear();
    }

    /// Drop the per-key markers for `key`. Returns whether any existed.
    pub fn forget_key(&mut self, key: &str) -> bool {
        let by_time = self.expire_keys.remove(key).is_some();
        let by_hops = self.expire_hops_keys.remove(key).is_some();
        by_time || by_hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_container_expires_after_timestamp() {
        let mut metadata = ExpiryMetadata {
            expire: Some(100),
            ..Default::default()
        };
        assert!(!metadata.evaluate(100, 100.0).container_expired);
        let evaluation = metadata.evaluate(101, 101.0);
        assert!(evaluation.container_expired);
        assert_eq!(metadata.expire, Some(100));
        metadata.settle(&evaluation);
        assert!(metadata.expire.is_none());
    }

    #[test]
    fn test_hops_are_charged_once_per_request() {
        let mut metadata = ExpiryMetadata {
            expire_hops: Some(HopBudget::new(2, 10.0)),
            ..Default::default()
        };
        assert!(!metadata.evaluate(10, 10.0).changed);

        let evaluation = metadata.evaluate(11, 11.5);
        assert!(evaluation.changed);
        assert!(!evaluation.container_expired);
        assert_eq!(metadata.expire_hops, Some(HopBudget::new(1, 11.5)));

        assert!(!metadata.evaluate(11, 11.5).changed);
        assert!(metadata.evaluate(12, 12.0).container_expired);
    }

    #[test]
    fn test_key_expiry_leaves_other_keys() {
        let mut metadata = ExpiryMetadata::default();
        metadata.expire_keys.insert("foo".to_string(), 50);
        metadata.expire_keys.insert("bar".to_string(), 500);
        metadata
            .expire_hops_keys
            .insert("baz".to_string(), HopBudget::new(1, 1.0));

        let evaluation = metadata.evaluate(100, 2.0);
        assert!(!evaluation.container_expired);
        assert!(evaluation.hides("foo"));
        assert!(evaluation.hides("baz"));
        assert!(!evaluation.hides("bar"));
        metadata.settle(&evaluation);
        assert_eq!(metadata.expire_keys.len(), 1);
        assert!(metadata.expire_hops_keys.is_empty());
    }

    #[test]
    fn test_unsettled_budget_keeps_counting() {
        let mut metadata = ExpiryMetadata {
            expire_hops: Some(HopBudget::new(1, 1.0)),
            ..Default::default()
        };
        assert!(metadata.evaluate(2, 2.0).container_expired);
        assert!(metadata.evaluate(3, 3.0).container_expired);
        assert_eq!(metadata.expire_hops, Some(HopBudget::new(-1, 3.0)));
    }

    #[test]
    fn test_charge_saturates() {
        let mut budget = HopBudget::new(i64::MIN, 1.0);
        assert!(budget.charge(2.0));
        assert_eq!(budget.hops, i64::MIN);
    }

    #[test]
    fn test_slot_round_trip_keeps_unknown_entries() {
        let slot = json!({
            "EXPIRE": 10,
            "EXPIRE_HOPS_KEYS": {"foo": {"hops": 2, "ts": 1.5}},
            "custom": true
        });
        let metadata = ExpiryMetadata::from_slot(Some(&slot));
        assert_eq!(metadata.expire, Some(10));
        assert_eq!(metadata.expire_hops_keys["foo"], HopBudget::new(2, 1.5));
        assert_eq!(metadata.to_slot(), slot);
    }

    #[test]
    fn test_malformed_slot_reads_empty() {
        let metadata = ExpiryMetadata::from_slot(Some(&json!({"EXPIRE": "soon"})));
        assert!(metadata.is_empty());
        assert!(ExpiryMetadata::from_slot(Some(&json!(false))).is_empty());
    }
}
