use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::types::Series;

/// Bucket that absent field values fall into.
pub const UNKNOWN: &str = "Unknown";

/// Which side of the closed set a value landed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    /// One of the predefined keys.
    Known(&'static str),
    /// Any value outside the predefined set, kept verbatim.
    Other(String),
}

/// Counts over a closed, ordered set of known keys plus a catch-all group.
///
/// Known keys are always present (zero when unmatched) and keep their
/// predefined order. Unrecognized values are appended to the catch-all group
/// in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCounts {
    known: Vec<(&'static str, u64)>,
    other: Vec<(String, u64)>,
}

impl BucketCounts {
    /// Zero-filled counts over `keys`.
    pub fn with_known(keys: &[&'static str]) -> Self {
        Self {
            known: keys.iter().map(|k| (*k, 0)).collect(),
            other: Vec::new(),
        }
    }

    pub fn classify(&self, value: &str) -> BucketKey {
        match self.known.iter().find(|(k, _)| *k == value) {
            Some((k, _)) => BucketKey::Known(*k),
            None => BucketKey::Other(value.to_string()),
        }
    }

    pub fn add(&mut self, value: &str) {
        match self.classify(value) {
            BucketKey::Known(key) => {
                if let Some((_, n)) = self.known.iter_mut().find(|(k, _)| *k == key) {
                    *n += 1;
                }
            }
            BucketKey::Other(raw) => match self.other.iter_mut().find(|(k, _)| *k == raw) {
                Some((_, n)) => *n += 1,
                None => self.other.push((raw, 1)),
            },
        }
    }

    /// Count for `key`, zero when never seen.
    #[cfg(test)]
    pub fn get(&self, key: &str) -> u64 {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, n)| n)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn known(&self) -> &[(&'static str, u64)] {
        &self.known
    }

    #[cfg(test)]
    pub fn other(&self) -> &[(String, u64)] {
        &self.other
    }

    /// Known keys in predefined order, then catch-all values in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.known
            .iter()
            .map(|(k, n)| (*k, *n))
            .chain(self.other.iter().map(|(k, n)| (k.as_str(), *n)))
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<&str> {
        self.iter().map(|(k, _)| k).collect()
    }

    pub fn total(&self) -> u64 {
        self.iter().map(|(_, n)| n).sum()
    }

    pub fn to_series(&self) -> Series {
        Series::from_pairs(self.iter().map(|(k, n)| (k, n as f64)))
    }
}

impl Serialize for BucketCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.known.len() + self.other.len()))?;
        for (k, n) in self.iter() {
            map.serialize_entry(k, &n)?;
        }
        map.end()
    }
}

/// Count `rows` by the value `field` extracts.
///
/// Absent values count under [`UNKNOWN`]; callers wanting a type-specific
/// default map `None` themselves before returning.
pub fn bucket_by_field<R, F>(rows: &[R], field: F, known_keys: &[&'static str]) -> BucketCounts
where
    F: Fn(&R) -> Option<&str>,
{
    let mut counts = BucketCounts::with_known(known_keys);
    for row in rows {
        counts.add(field(row).unwrap_or(UNKNOWN));
    }
    counts
}
