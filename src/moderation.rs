//! User standing, user/transaction search, item and report review, and
//! moderation actions.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::aggregator::UNKNOWN;
use crate::config::{tables, ITEMS_PER_PAGE};
use crate::error::{AppError, Result};
use crate::fetcher::{fetch_as, Direction, Filter, RowQuery, RowSource, RowWriter};
use crate::notify::{notify_detached, Notification, NotificationSink};
use crate::types::{Listing, Person, Report, Role, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Standing {
    Active,
    Warned,
    Restricted,
    Banned,
}

impl Standing {
    /// Banned outranks restricted, which outranks warned.
    pub fn of(p: &Person) -> Self {
        match p.role() {
            Role::Banned => Standing::Banned,
            Role::Restricted => Standing::Restricted,
            _ if p.warnings() >= 1 => Standing::Warned,
            _ => Standing::Active,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Standing::Active),
            "warned" => Some(Standing::Warned),
            "restricted" => Some(Standing::Restricted),
            "banned" => Some(Standing::Banned),
            _ => None,
        }
    }

    /// Status-filter semantics. `Active` only admits normal-role users with
    /// a clean record.
    pub fn admits(&self, p: &Person) -> bool {
        let role = p.role();
        match self {
            Standing::Active => role == Role::Normal && p.warnings() == 0,
            Standing::Banned => role == Role::Banned,
            Standing::Restricted => role == Role::Restricted,
            Standing::Warned => {
                p.warnings() >= 1 && role != Role::Banned && role != Role::Restricted
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub total: usize,
    pub active: usize,
    /// Banned, restricted, or carrying at least one warning.
    pub flagged: usize,
}

pub fn summarize(users: &[Person]) -> UserSummary {
    let active = users
        .iter()
        .filter(|p| p.role() == Role::Normal && p.warnings() == 0)
        .count();
    let flagged = users
        .iter()
        .filter(|p| {
            matches!(p.role(), Role::Banned | Role::Restricted) || p.warnings() >= 1
        })
        .count();
    UserSummary { total: users.len(), active, flagged }
}

fn school_of(p: &Person) -> &str {
    p.stud_school.as_deref().unwrap_or(UNKNOWN)
}

/// Distinct schools, absent shown as "Unknown", sorted.
pub fn school_options(users: &[Person]) -> Vec<String> {
    users
        .iter()
        .map(|p| school_of(p).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Query-string filter for the user list. Empty values mean "any".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub search: Option<String>,
    pub school: Option<String>,
    pub status: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl UserFilter {
    pub fn standing(&self) -> Result<Option<Standing>> {
        match non_empty(&self.status) {
            None => Ok(None),
            Some(s) => Standing::parse(s)
                .map(Some)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown status filter: {s}"))),
        }
    }

    pub fn apply(&self, users: Vec<Person>) -> Result<Vec<Person>> {
        let standing = self.standing()?;
        let needle = non_empty(&self.search).map(str::to_lowercase);
        let school = non_empty(&self.school);

        Ok(users
            .into_iter()
            .filter(|p| {
                let matches_search = needle.as_deref().map_or(true, |n| {
                    p.full_name().to_lowercase().contains(n)
                        || p.stud_id.as_deref().unwrap_or("").to_lowercase().contains(n)
                        || p.stud_email.as_deref().unwrap_or("").to_lowercase().contains(n)
                });
                let matches_school = school.map_or(true, |s| school_of(p) == s);
                let matches_status = standing.map_or(true, |st| st.admits(p));
                matches_search && matches_school && matches_status
            })
            .collect())
    }
}

/// Query-string filter for the item view. `item_type` and `status` take
/// comma-separated lists; `page` is 1-based.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    pub item_type: Option<String>,
    pub status: Option<String>,
    pub school: Option<String>,
    pub page: Option<usize>,
}

fn list_values(v: &Option<String>) -> Vec<&str> {
    non_empty(v)
        .map(|s| s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

impl ItemFilter {
    pub fn types(&self) -> Vec<&str> {
        list_values(&self.item_type)
    }

    pub fn statuses(&self) -> Vec<&str> {
        list_values(&self.status)
    }

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<Listing>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: u64,
}

impl ItemPage {
    fn new(items: Vec<Listing>, total: u64, page: usize) -> Self {
        let size = ITEMS_PER_PAGE as u64;
        Self {
            items,
            total,
            page,
            page_size: ITEMS_PER_PAGE,
            total_pages: total.div_ceil(size),
        }
    }
}

/// Case-insensitive match on transaction id, buyer name, seller name, or item name.
pub fn transaction_matches(tx: &Transaction, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    let contains = |s: &str| s.to_lowercase().contains(&q);
    tx.transac_id.as_deref().is_some_and(contains)
        || tx.buyer.as_ref().is_some_and(|p| contains(&p.full_name()))
        || tx.seller.as_ref().is_some_and(|p| contains(&p.full_name()))
        || tx
            .item
            .as_ref()
            .and_then(|i| i.item_name.as_deref())
            .is_some_and(contains)
}

/// "st", "nd", "rd" or "th"; 11 through 13 take "th".
pub fn ordinal_suffix(n: i64) -> &'static str {
    let (j, k) = (n % 10, n % 100);
    match (j, k) {
        (1, k) if k != 11 => "st",
        (2, k) if k != 12 => "nd",
        (3, k) if k != 13 => "rd",
        _ => "th",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Warn,
    Ban,
    Unban,
    Restrict,
    Unrestrict,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warn" => Some(Action::Warn),
            "ban" => Some(Action::Ban),
            "unban" => Some(Action::Unban),
            "restrict" => Some(Action::Restrict),
            "unrestrict" => Some(Action::Unrestrict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    #[serde(flatten)]
    pub person: Person,
    pub standing: Standing,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserListing {
    pub summary: UserSummary,
    pub schools: Vec<String>,
    pub users: Vec<UserRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub stud_id: String,
    pub action: Action,
    pub standing: Standing,
    pub warning_count: i64,
}

pub struct Moderator {
    rows: Arc<dyn RowSource>,
    writer: Arc<dyn RowWriter>,
    notifier: Arc<dyn NotificationSink>,
}

impl Moderator {
    pub fn new(
        rows: Arc<dyn RowSource>,
        writer: Arc<dyn RowWriter>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { rows, writer, notifier }
    }

    /// Non-admin users. Summary and school options describe the whole
    /// population, the user list is filtered.
    pub async fn list_users(&self, filter: &UserFilter) -> Result<UserListing> {
        let query = RowQuery::new(tables::PEOPLE)
            .select(
                "stud_id, user_id, stud_fname, stud_lname, stud_school, stud_email, \
                 stud_warning_count, is_role, restriction_start_date",
            )
            .neq("is_role", Role::Admin.code());
        let people: Vec<Person> = fetch_as(self.rows.as_ref(), &query).await?;

        let summary = summarize(&people);
        let schools = school_options(&people);
        let users = filter
            .apply(people)?
            .into_iter()
            .map(|person| UserRow { standing: Standing::of(&person), person })
            .collect();

        Ok(UserListing { summary, schools, users })
    }

    /// Newest first, narrowed by `query` when non-empty.
    pub async fn search_transactions(&self, query: &str) -> Result<Vec<Transaction>> {
        let q = RowQuery::new(tables::TRANSACTIONS)
            .select(
                "transac_id, status, created_at, updated_at, \
                 buyer:buyer_id(stud_id, stud_fname, stud_lname), \
                 seller:seller_id(stud_id, stud_fname, stud_lname), \
                 item:item_uuid(item_id, item_name)",
            )
            .order("created_at", Direction::Descending);
        let txs: Vec<Transaction> = fetch_as(self.rows.as_ref(), &q).await?;
        Ok(txs.into_iter().filter(|t| transaction_matches(t, query)).collect())
    }

    /// Listings newest first, one page at a time. A school with no students
    /// yields an empty page without querying listings.
    pub async fn list_items(&self, filter: &ItemFilter) -> Result<ItemPage> {
        let page = filter.page();
        let mut query = RowQuery::new(tables::LISTINGS).select(
            "item_id, item_name, item_type, item_status, item_condition, item_price_type, \
             item_price, item_price_min, item_price_max, created_at, stud_id",
        );

        if let Some(school) = non_empty(&filter.school) {
            let sellers = self.students_in_school(school).await?;
            if sellers.is_empty() {
                return Ok(ItemPage::new(Vec::new(), 0, page));
            }
            query = query.is_in("stud_id", sellers);
        }
        let types = filter.types();
        if !types.is_empty() {
            query = query.is_in("item_type", types);
        }
        let statuses = filter.statuses();
        if !statuses.is_empty() {
            query = query.is_in("item_status", statuses);
        }

        let total = self.rows.count(&query).await?;
        let query = query
            .order("created_at", Direction::Descending)
            .offset((page - 1) * ITEMS_PER_PAGE)
            .limit(ITEMS_PER_PAGE);
        let items: Vec<Listing> = fetch_as(self.rows.as_ref(), &query).await?;
        Ok(ItemPage::new(items, total, page))
    }

    async fn students_in_school(&self, school: &str) -> Result<Vec<String>> {
        let q = RowQuery::new(tables::PEOPLE).select("stud_id").eq("stud_school", school);
        let people: Vec<Person> = fetch_as(self.rows.as_ref(), &q).await?;
        Ok(people.into_iter().filter_map(|p| p.stud_id).collect())
    }

    /// Delete a listing and tell its seller why it disappeared.
    pub async fn remove_item(&self, item_id: &str) -> Result<Listing> {
        let filters = [Filter::Eq("item_id".to_string(), item_id.to_string())];
        let removed = self.writer.delete(tables::LISTINGS, &filters).await?;
        let row = removed
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Item {item_id} not found")))?;
        let listing: Listing = serde_json::from_value(row)?;

        match &listing.stud_id {
            Some(seller) => {
                notify_detached(
                    self.notifier.clone(),
                    Notification {
                        receiver_id: seller.clone(),
                        kind: "admin_item_removal".to_string(),
                        content: format!(
                            "The item \"{}\" has been removed by the admin as it violated the rules \
                             and regulation of the app.",
                            listing.item_name.as_deref().unwrap_or("")
                        ),
                    },
                );
            }
            None => warn!(item_id, "Removed item has no seller; no notification sent"),
        }

        info!(item_id, "Item removed");
        Ok(listing)
    }

    /// Violation reports newest first, with reporter and reported names.
    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        let q = RowQuery::new(tables::REPORTS)
            .select(
                "report_id, violation_type, violation_details, photo_urls, created_at, \
                 reporter:reporter_user_id(stud_fname, stud_lname), \
                 reported:reported_user_id(stud_fname, stud_lname)",
            )
            .order("created_at", Direction::Descending);
        fetch_as(self.rows.as_ref(), &q).await
    }

    async fn person(&self, stud_id: &str) -> Result<Person> {
        let q = RowQuery::new(tables::PEOPLE).eq("stud_id", stud_id).limit(1);
        let people: Vec<Person> = fetch_as(self.rows.as_ref(), &q).await?;
        people
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("User {stud_id} not found")))
    }

    async fn patch(&self, stud_id: &str, patch: serde_json::Value) -> Result<Person> {
        let filters = [Filter::Eq("stud_id".to_string(), stud_id.to_string())];
        let updated = self.writer.update(tables::PEOPLE, &filters, patch).await?;
        let row = updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("User {stud_id} not found")))?;
        Ok(serde_json::from_value(row)?)
    }

    pub async fn apply(&self, stud_id: &str, action: Action) -> Result<ActionOutcome> {
        let person = match action {
            Action::Warn => {
                let current = self.person(stud_id).await?;
                let count = current.warnings() + 1;
                let person = self.patch(stud_id, json!({ "stud_warning_count": count })).await?;
                notify_detached(
                    self.notifier.clone(),
                    Notification {
                        receiver_id: stud_id.to_string(),
                        kind: "warning".to_string(),
                        content: format!(
                            "You have received your {count}{} warning from admin, please always \
                             follow the rules and regulation of the app (current warning: {count})",
                            ordinal_suffix(count)
                        ),
                    },
                );
                person
            }
            Action::Ban => self.patch(stud_id, json!({ "is_role": Role::Banned.code() })).await?,
            Action::Unban => self.patch(stud_id, json!({ "is_role": Role::Normal.code() })).await?,
            Action::Restrict => {
                self.patch(
                    stud_id,
                    json!({
                        "is_role": Role::Restricted.code(),
                        "restriction_start_date": Utc::now().to_rfc3339(),
                    }),
                )
                .await?
            }
            Action::Unrestrict => {
                self.patch(
                    stud_id,
                    json!({ "is_role": Role::Normal.code(), "restriction_start_date": null }),
                )
                .await?
            }
        };

        info!(stud_id, action = ?action, "Moderation action applied");
        Ok(ActionOutcome {
            stud_id: stud_id.to_string(),
            action,
            standing: Standing::of(&person),
            warning_count: person.warnings(),
        })
    }
}
