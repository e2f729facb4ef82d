use tasksync_core::{DesiredEntity, TaskCategory};
use tracing::debug;

use crate::types::Deal;

/// Turns deal line items into desired accounting tasks.
#[derive(Debug, Clone, Default)]
pub struct DealMapper {
    default_category: TaskCategory,
}

impl DealMapper {
    pub fn new(default_category: TaskCategory) -> Self {
        Self { default_category }
    }

    /// Lines without a name or a readable price are left out; validation
    /// reports them.
    pub fn map(&self, deal: &Deal) -> Vec<DesiredEntity> {
        let parent_key = deal.parent_key();

        deal.line_items
            .iter()
            .filter_map(|line| {
                let price = line.price?;
                if line.name.is_empty() {
                    return None;
                }
                let category = match line.charge_type.as_deref() {
                    Some(raw) => TaskCategory::parse(raw).unwrap_or_else(|| {
                        debug!(deal = %deal.id, line = %line.id, charge_type = raw, "Unknown charge type, using default");
                        self.default_category
                    }),
                    None => self.default_category,
                };
                Some(
                    DesiredEntity::new(parent_key, &line.name, price, line.duration_minutes.max(0))
                        .with_category(category),
                )
            })
            .collect()
    }

    pub fn map_all<'a>(&self, deals: impl IntoIterator<Item = &'a Deal>) -> Vec<DesiredEntity> {
        deals.into_iter().flat_map(|deal| self.map(deal)).collect()
    }
}
