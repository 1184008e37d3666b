use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Rows read from the remote store
// ---------------------------------------------------------------------------

/// A marketplace item post (`item` table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Listing {
    #[serde(deserialize_with = "lenient::text")]
    pub item_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub item_name: Option<String>,
    /// Category, e.g. "books & school supplies".
    #[serde(deserialize_with = "lenient::text")]
    pub item_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub item_status: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub item_condition: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub item_price_type: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub item_price: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub item_price_min: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub item_price_max: Option<f64>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::text")]
    pub stud_id: Option<String>,
}

/// A buyer/seller exchange (`transactions` table), with embedded relations
/// when the query selects them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    #[serde(deserialize_with = "lenient::text")]
    pub transac_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    pub item: Option<Listing>,
    pub buyer: Option<Person>,
    pub seller: Option<Person>,
}

/// A violation report (`report` table). `reporter` and `reported` are
/// filled when the query embeds the two people relations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    #[serde(deserialize_with = "lenient::text")]
    pub report_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub violation_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub violation_details: Option<String>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub photo_urls: Vec<String>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    pub reporter: Option<Person>,
    pub reported: Option<Person>,
}

/// A registered campus user (`student` table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
    #[serde(deserialize_with = "lenient::text")]
    pub stud_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub stud_fname: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub stud_lname: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub stud_email: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub stud_school: Option<String>,
    #[serde(deserialize_with = "lenient::integer")]
    pub stud_warning_count: Option<i64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub is_role: Option<i64>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub restriction_start_date: Option<DateTime<Utc>>,
}

impl Person {
    /// "first last", with absent parts treated as empty.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.stud_fname.as_deref().unwrap_or(""),
            self.stud_lname.as_deref().unwrap_or("")
        )
    }

    pub fn warnings(&self) -> i64 {
        self.stud_warning_count.unwrap_or(0)
    }

    pub fn role(&self) -> Role {
        Role::from_code(self.is_role.unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Price mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    Fixed,
    Negotiable,
    Free,
}

impl PriceMode {
    pub const ALL: [PriceMode; 3] = [PriceMode::Fixed, PriceMode::Negotiable, PriceMode::Free];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(PriceMode::Fixed),
            "negotiable" => Some(PriceMode::Negotiable),
            "free" => Some(PriceMode::Free),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceMode::Fixed => "fixed",
            PriceMode::Negotiable => "negotiable",
            PriceMode::Free => "free",
        }
    }
}

impl std::fmt::Display for PriceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// `student.is_role` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Normal,
    Admin,
    Banned,
    Restricted,
    /// Any code the back-office does not know about.
    Other(i64),
}

impl Role {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Role::Normal,
            1 => Role::Admin,
            2 => Role::Banned,
            3 => Role::Restricted,
            other => Role::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Role::Normal => 0,
            Role::Admin => 1,
            Role::Banned => 2,
            Role::Restricted => 3,
            Role::Other(c) => *c,
        }
    }
}

// ---------------------------------------------------------------------------
// Presenter contract
// ---------------------------------------------------------------------------

/// Chart-ready series: ordered labels with a parallel sequence of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn from_pairs<L: Into<String>>(pairs: impl IntoIterator<Item = (L, f64)>) -> Self {
        let (labels, values) = pairs
            .into_iter()
            .map(|(l, v)| (l.into(), v))
            .unzip();
        Self { labels, values }
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Field deserializers that never fail: values of the wrong shape decode as
/// `None` so one malformed column cannot reject the whole row.
pub mod lenient {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        })
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    }

    /// Array of strings; non-string entries are skipped, anything else is empty.
    pub fn text_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => super::parse_timestamp(&s),
            _ => None,
        })
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp / date taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}
