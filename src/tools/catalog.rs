use crate::orchestrator::types::{Coupon, Deal, StoreInfo};
use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deal catalog backing the built-in tools.
///
/// Loaded from a JSON file of the shape
/// `{"deals": [...], "coupons": [...], "stores": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub deals: Vec<Deal>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub stores: Vec<StoreInfo>,
}

/// Filters for [`Catalog::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilter<'a> {
    pub query: &'a str,
    pub store: Option<&'a str>,
    pub category: Option<&'a str>,
    pub max_price: Option<f64>,
    pub limit: usize,
}

impl Catalog {
    pub fn from_json_str(json: &str) -> Result<Self, ToolError> {
        serde_json::from_str(json).map_err(|e| ToolError::Catalog(e.to_string()))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ToolError::Catalog(format!("{}: {}", path.display(), e)))?;
        let catalog = Self::from_json_str(&content)?;
        tracing::info!(
            "Loaded catalog from {}: {} deals, {} coupons",
            path.display(),
            catalog.deals.len(),
            catalog.coupons.len()
        );
        Ok(catalog)
    }

    /// Deals matching the query terms, best match first.
    pub fn search(&self, filter: &SearchFilter<'_>) -> Vec<Deal> {
        let terms: Vec<String> = filter
            .query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, &Deal)> = self
            .deals
            .iter()
            .filter(|deal| filter.store.is_none_or(|s| deal.store.eq_ignore_ascii_case(s)))
            .filter(|deal| {
                filter.category.is_none_or(|c| {
                    deal.category
                        .as_deref()
                        .is_some_and(|dc| dc.eq_ignore_ascii_case(c))
                })
            })
            .filter(|deal| filter.max_price.is_none_or(|max| deal.price <= max))
            .filter_map(|deal| {
                let haystack = format!(
                    "{} {} {}",
                    deal.title,
                    deal.store,
                    deal.category.as_deref().unwrap_or_default()
                )
                .to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (terms.is_empty() || score > 0).then_some((score, deal))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa).then_with(|| {
                b.discount_pct()
                    .unwrap_or(0.0)
                    .total_cmp(&a.discount_pct().unwrap_or(0.0))
            })
        });
        scored
            .into_iter()
            .take(filter.limit)
            .map(|(_, deal)| deal.clone())
            .collect()
    }

    /// Unexpired coupons, optionally for one store.
    pub fn coupons(&self, store: Option<&str>, today: chrono::NaiveDate) -> Vec<Coupon> {
        self.coupons
            .iter()
            .filter(|c| store.is_none_or(|s| c.store.eq_ignore_ascii_case(s)))
            .filter(|c| c.expires.is_none_or(|exp| exp >= today))
            .cloned()
            .collect()
    }

    /// Most popular deals, optionally within a category.
    pub fn trending(&self, category: Option<&str>, limit: usize) -> Vec<Deal> {
        let mut deals: Vec<&Deal> = self
            .deals
            .iter()
            .filter(|d| {
                category.is_none_or(|c| {
                    d.category
                        .as_deref()
                        .is_some_and(|dc| dc.eq_ignore_ascii_case(c))
                })
            })
            .collect();
        deals.sort_by(|a, b| b.popularity.cmp(&a.popularity));
        deals.into_iter().take(limit).cloned().collect()
    }

    pub fn store(&self, name: &str) -> Option<StoreInfo> {
        self.stores
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}
