use serde::{Deserialize, Serialize};
use tasksync_core::Money;

use crate::types::Deal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteIssueKind {
    MissingName,
    MissingPrice,
    NegativePrice,
    /// Deal total differs from the sum of its lines
    TotalMismatch { expected: Money, actual: Money },
    UnreadableTotal,
    /// Sum of lines does not fit in minor units
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteIssue {
    pub deal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
    #[serde(flatten)]
    pub kind: QuoteIssueKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteValidation {
    pub deal_id: String,
    pub parent_key: String,
    pub checked_lines: usize,
    pub issues: Vec<QuoteIssue>,
}

impl QuoteValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check a deal's quote: every line named and priced non-negatively, and the
/// recorded total equal to the sum of `price * quantity` in minor units.
///
/// A deal without a recorded total is only checked line by line.
pub fn validate_quote(deal: &Deal) -> QuoteValidation {
    let mut issues = Vec::new();
    let issue = |line_id: Option<&str>, kind: QuoteIssueKind, message: String| QuoteIssue {
        deal_id: deal.id.clone(),
        line_id: line_id.map(str::to_string),
        kind,
        message,
    };

    let mut sum = Some(Money::ZERO);
    for line in &deal.line_items {
        if line.name.is_empty() {
            issues.push(issue(
                Some(&line.id),
                QuoteIssueKind::MissingName,
                format!("line {} has no name", line.id),
            ));
        }

        match line.price {
            None => {
                let message = match line.price_raw.as_deref() {
                    Some(raw) if !raw.trim().is_empty() => {
                        format!("line {} has unreadable price '{}'", line.id, raw)
                    }
                    _ => format!("line {} has no price", line.id),
                };
                issues.push(issue(Some(&line.id), QuoteIssueKind::MissingPrice, message));
            }
            Some(price) if price.is_negative() => {
                issues.push(issue(
                    Some(&line.id),
                    QuoteIssueKind::NegativePrice,
                    format!("line {} has negative price {}", line.id, price),
                ));
            }
            Some(_) => {}
        }

        sum = match (sum, line.line_total()) {
            (Some(acc), Some(total)) => acc.checked_add(total),
            (acc, None) if line.price.is_none() => acc,
            _ => None,
        };
    }

    match (deal.quote_total, deal.quote_total_raw.as_deref(), sum) {
        (Some(recorded), _, Some(expected)) if recorded != expected => {
            issues.push(issue(
                None,
                QuoteIssueKind::TotalMismatch {
                    expected,
                    actual: recorded,
                },
                format!(
                    "deal {} total {} does not match line sum {}",
                    deal.id, recorded, expected
                ),
            ));
        }
        (Some(_), _, None) => {
            issues.push(issue(
                None,
                QuoteIssueKind::Overflow,
                format!("deal {} line sum overflows", deal.id),
            ));
        }
        (None, Some(raw), _) if !raw.trim().is_empty() => {
            issues.push(issue(
                None,
                QuoteIssueKind::UnreadableTotal,
                format!("deal {} has unreadable total '{}'", deal.id, raw),
            ));
        }
        _ => {}
    }

    QuoteValidation {
        deal_id: deal.id.clone(),
        parent_key: deal.parent_key().to_string(),
        checked_lines: deal.line_items.len(),
        issues,
    }
}
