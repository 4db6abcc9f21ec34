//! Donation portal records.

use crate::cache::TtlCache;
use crate::config::{LoaderConfig, LoaderOptions};
use crate::fallback::{Record, StaticFallback};
use crate::loader::ResilientListLoader;
use crate::network::RemoteQuery;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of a donated item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Reserved,
    Donated,
    #[serde(other)]
    Unknown,
}

/// An item offered for donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub status: ItemStatus,
    #[serde(default)]
    pub donor_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Item {
    fn record_id(&self) -> &str {
        &self.id
    }
}

fn sample(n: u32, title: &str, category: &str, description: &str) -> Item {
    // 2024-01-01T00:00:00Z plus one day per item, so ordering is stable
    let created_at = Utc
        .timestamp_opt(1_704_067_200 + i64::from(n) * 86_400, 0)
        .single()
        .unwrap_or_default();
    Item {
        id: format!("{}{}", LoaderConfig::FALLBACK_ID_PREFIX, n),
        title: title.to_string(),
        description: Some(description.to_string()),
        category: Some(category.to_string()),
        status: ItemStatus::Available,
        donor_name: None,
        created_at,
    }
}

/// Sample items shown while the live list is unavailable.
pub fn sample_items() -> Vec<Item> {
    vec![
        sample(1, "Winter coats", "clothing", "Assorted adult coats, sizes M to XL"),
        sample(2, "School backpacks", "education", "Backpacks with basic stationery"),
        sample(3, "Canned food box", "food", "Non-perishable pantry staples"),
        sample(4, "Children's books", "education", "Picture books and early readers"),
        sample(5, "Blankets", "household", "Washed wool and fleece blankets"),
        sample(6, "Hygiene kits", "health", "Soap, toothpaste and toothbrushes"),
    ]
}

/// The default fallback provider for the available-items list.
pub fn item_fallback() -> StaticFallback<Item> {
    StaticFallback::new(sample_items())
}

/// Loader for the portal's "available items" list.
///
/// Pass the same `cache` to every loader that shows this list so they share
/// one fetched copy.
pub fn available_items_loader(
    source: Arc<dyn RemoteQuery<Item>>,
    cache: Arc<TtlCache<Vec<Item>>>,
    options: LoaderOptions,
) -> Result<ResilientListLoader<Item>> {
    ResilientListLoader::<Item>::builder(
        LoaderConfig::AVAILABLE_ITEMS_KEY,
        source,
        Arc::new(item_fallback()),
    )
    .cache(cache)
    .options(options)
    .build()
}
