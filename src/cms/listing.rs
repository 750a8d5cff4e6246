use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::ItemStatus;

/// One row of an item listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DraftFilter {
    #[default]
    All,
    Drafts,
    Published,
}

impl DraftFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Some(DraftFilter::All),
            "draft" | "drafts" => Some(DraftFilter::Drafts),
            "published" => Some(DraftFilter::Published),
            _ => None,
        }
    }

    fn admits(self, status: ItemStatus) -> bool {
        match self {
            DraftFilter::All => true,
            DraftFilter::Drafts => status == ItemStatus::Draft,
            DraftFilter::Published => status == ItemStatus::Published,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "desc" | "newest" => Some(SortOrder::NewestFirst),
            "asc" | "oldest" => Some(SortOrder::OldestFirst),
            _ => None,
        }
    }
}

/// Filter by status, then sort by creation date. Items without a date sort
/// last in either order; ties keep their incoming order.
pub fn filter_and_sort(items: Vec<ItemSummary>, filter: DraftFilter, order: SortOrder) -> Vec<ItemSummary> {
    let mut items: Vec<ItemSummary> = items.into_iter().filter(|i| filter.admits(i.status)).collect();
    items.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => match order {
            SortOrder::NewestFirst => y.cmp(&x),
            SortOrder::OldestFirst => x.cmp(&y),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    items
}
