//! CRM wire records and their normalised form.
//!
//! CRM properties arrive as strings. Amounts are major-unit decimals; they are
//! parsed into [`Money`] here, and a line whose price cannot be parsed keeps
//! the raw text so validation can report it.

use serde::Deserialize;
use tasksync_core::Money;

#[derive(Debug, Deserialize)]
pub struct DealsResponse {
    #[serde(default)]
    pub results: Vec<DealRecord>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl DealsResponse {
    pub fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
            .filter(|after| !after.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
pub struct NextPage {
    pub after: String,
}

#[derive(Debug, Deserialize)]
pub struct DealRecord {
    pub id: String,
    #[serde(default)]
    pub properties: DealProperties,
    #[serde(default, rename = "lineItems", alias = "line_items")]
    pub line_items: Vec<LineItemRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DealProperties {
    #[serde(default)]
    pub dealname: Option<String>,
    #[serde(default, alias = "projectCode")]
    pub project_code: Option<String>,
    /// Quote total in major units
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineItemRecord {
    pub id: String,
    #[serde(default)]
    pub properties: LineItemProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct LineItemProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default, alias = "durationMinutes")]
    pub duration_minutes: Option<String>,
    #[serde(default, alias = "chargeType")]
    pub charge_type: Option<String>,
}

/// A deal with its quote lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deal {
    pub id: String,
    pub name: String,
    pub project_code: Option<String>,
    /// Quote total as recorded on the deal
    pub quote_total: Option<Money>,
    /// Total text as received
    pub quote_total_raw: Option<String>,
    pub line_items: Vec<LineItem>,
}

impl Deal {
    /// Parent reference used when mapping lines to desired entities.
    pub fn parent_key(&self) -> &str {
        self.project_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub price: Option<Money>,
    pub price_raw: Option<String>,
    pub quantity: i64,
    pub duration_minutes: i64,
    pub charge_type: Option<String>,
}

impl LineItem {
    /// `price * quantity`, or `None` on a missing price or overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.and_then(|p| p.checked_mul(self.quantity))
    }
}

fn parse_amount(raw: Option<&str>) -> Option<Money> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Money::parse_major(s).ok())
}

fn parse_count(raw: Option<&str>, default: i64) -> i64 {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v.round() as i64)
        .unwrap_or(default)
}

impl From<LineItemRecord> for LineItem {
    fn from(record: LineItemRecord) -> Self {
        let props = record.properties;
        Self {
            id: record.id,
            name: props.name.map(|n| n.trim().to_string()).unwrap_or_default(),
            price: parse_amount(props.price.as_deref()),
            price_raw: props.price,
            quantity: parse_count(props.quantity.as_deref(), 1),
            duration_minutes: parse_count(props.duration_minutes.as_deref(), 0),
            charge_type: props.charge_type.filter(|c| !c.trim().is_empty()),
        }
    }
}

impl From<DealRecord> for Deal {
    fn from(record: DealRecord) -> Self {
        let props = record.properties;
        Self {
            name: props
                .dealname
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| record.id.clone()),
            id: record.id,
            project_code: props.project_code.filter(|c| !c.trim().is_empty()),
            quote_total: parse_amount(props.amount.as_deref()),
            quote_total_raw: props.amount,
            line_items: record.line_items.into_iter().map(LineItem::from).collect(),
        }
    }
}
