use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::types::{Listing, PriceMode, Series};

/// Fixed price brackets. Each bracket is open on its lower bound and closed on
/// its upper bound; `Free` takes zero-priced and free-mode listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceRange {
    Free,
    UpTo50,
    UpTo100,
    UpTo200,
    UpTo500,
    UpTo1000,
    Over1000,
}

impl PriceRange {
    pub const ALL: [PriceRange; 7] = [
        PriceRange::Free,
        PriceRange::UpTo50,
        PriceRange::UpTo100,
        PriceRange::UpTo200,
        PriceRange::UpTo500,
        PriceRange::UpTo1000,
        PriceRange::Over1000,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PriceRange::Free => "Free",
            PriceRange::UpTo50 => "₱1 - ₱50",
            PriceRange::UpTo100 => "₱51 - ₱100",
            PriceRange::UpTo200 => "₱101 - ₱200",
            PriceRange::UpTo500 => "₱201 - ₱500",
            PriceRange::UpTo1000 => "₱501 - ₱1,000",
            PriceRange::Over1000 => "₱1,001+",
        }
    }

    /// Bracket for a resolved price. Non-positive (and NaN) prices land in `Free`.
    pub fn from_price(price: f64) -> Self {
        if !(price > 0.0) {
            PriceRange::Free
        } else if price <= 50.0 {
            PriceRange::UpTo50
        } else if price <= 100.0 {
            PriceRange::UpTo100
        } else if price <= 200.0 {
            PriceRange::UpTo200
        } else if price <= 500.0 {
            PriceRange::UpTo500
        } else if price <= 1000.0 {
            PriceRange::UpTo1000
        } else {
            PriceRange::Over1000
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for PriceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Zero values count as "no price".
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|p| *p != 0.0)
}

fn negotiable_price(l: &Listing) -> f64 {
    match (present(l.item_price_min), present(l.item_price_max)) {
        (Some(min), Some(max)) => (min + max) / 2.0,
        (Some(min), None) => min,
        (None, Some(max)) => max,
        (None, None) => present(l.item_price).unwrap_or(0.0),
    }
}

/// Resolve the listing's price by its mode and place it in one bracket.
///
/// A free-mode listing, or any listing whose price is exactly zero, is `Free`
/// regardless of the other price columns.
pub fn classify(l: &Listing) -> PriceRange {
    let mode = l.item_price_type.as_deref().and_then(PriceMode::parse);

    let price = match (mode, present(l.item_price)) {
        (Some(PriceMode::Fixed), Some(p)) => p,
        (Some(PriceMode::Negotiable), _) => negotiable_price(l),
        _ if mode == Some(PriceMode::Free) || l.item_price == Some(0.0) => {
            return PriceRange::Free
        }
        (_, Some(p)) => p,
        (_, None) => 0.0,
    };

    PriceRange::from_price(price)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceRangeCounts {
    counts: [u64; 7],
}

impl PriceRangeCounts {
    #[cfg(test)]
    pub fn get(&self, range: PriceRange) -> u64 {
        self.counts[range.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PriceRange, u64)> + '_ {
        PriceRange::ALL.iter().map(|r| (*r, self.counts[r.index()]))
    }

    #[cfg(test)]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn to_series(&self) -> Series {
        Series::from_pairs(self.iter().map(|(r, n)| (r.label(), n as f64)))
    }
}

impl Serialize for PriceRangeCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (range, n) in self.iter() {
            map.serialize_entry(range.label(), &n)?;
        }
        map.end()
    }
}

pub fn bucket_by_price_range(rows: &[Listing]) -> PriceRangeCounts {
    let mut out = PriceRangeCounts::default();
    for row in rows {
        out.counts[classify(row).index()] += 1;
    }
    out
}
