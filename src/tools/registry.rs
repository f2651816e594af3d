use crate::llm::ToolDefinition;
use crate::orchestrator::collaborators::{ToolExecutor, ToolOutput};
use crate::tools::catalog::{Catalog, SearchFilter};
use crate::tools::{GET_COUPONS, GET_TRENDING_DEALS, SEARCH_DEALS, ToolError};
use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchDealsArgs {
    /// Free-text product query, e.g. "4k tv".
    pub query: String,
    /// Restrict to one store.
    #[serde(default)]
    pub store: Option<String>,
    /// Restrict to one category.
    #[serde(default)]
    pub category: Option<String>,
    /// Maximum price in dollars.
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Maximum number of deals to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetCouponsArgs {
    /// Store to list coupons for; all stores when omitted.
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TrendingDealsArgs {
    /// Restrict to one category.
    #[serde(default)]
    pub category: Option<String>,
    /// Maximum number of deals to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Memoized results kept before the oldest is evicted.
pub const DEFAULT_MEMO_ENTRIES: usize = 1000;

/// The fixed set of catalog tools.
///
/// Results are memoized per (tool, arguments) for the tool TTL, with at most
/// `max_memo_entries` results resident.
pub struct ToolRegistry {
    catalog: Arc<Catalog>,
    max_results: usize,
    ttl: Duration,
    max_memo_entries: usize,
    memo: DashMap<String, (Instant, ToolOutput)>,
}

impl ToolRegistry {
    pub fn new(catalog: Arc<Catalog>, max_results: usize, ttl: Duration) -> Self {
        Self {
            catalog,
            max_results: max_results.max(1),
            ttl,
            max_memo_entries: DEFAULT_MEMO_ENTRIES,
            memo: DashMap::new(),
        }
    }

    pub fn with_memo_capacity(mut self, entries: usize) -> Self {
        self.max_memo_entries = entries.max(1);
        self
    }

    /// Number of memoized results currently resident.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    fn remember(&self, key: String, output: ToolOutput) {
        if !self.memo.contains_key(&key) && self.memo.len() >= self.max_memo_entries {
            self.memo.retain(|_, (at, _)| at.elapsed() < self.ttl);
            if self.memo.len() >= self.max_memo_entries {
                let oldest = self
                    .memo
                    .iter()
                    .min_by_key(|entry| entry.value().0)
                    .map(|entry| entry.key().clone());
                if let Some(oldest) = oldest {
                    self.memo.remove(&oldest);
                }
            }
        }
        self.memo.insert(key, (Instant::now(), output));
    }

    fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
        // Models send `null` or nothing for argument-less calls.
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: e.to_string(),
        })
    }

    fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.max_results).clamp(1, self.max_results)
    }

    fn run(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        match name {
            SEARCH_DEALS => {
                let args: SearchDealsArgs = Self::parse_args(name, arguments)?;
                let deals = self.catalog.search(&SearchFilter {
                    query: &args.query,
                    store: args.store.as_deref(),
                    category: args.category.as_deref(),
                    max_price: args.max_price,
                    limit: self.limit(args.limit),
                });
                Ok(ToolOutput {
                    success: true,
                    store: args.store.as_deref().and_then(|s| self.catalog.store(s)),
                    deals,
                    coupons: Vec::new(),
                })
            }
            GET_COUPONS => {
                let args: GetCouponsArgs = Self::parse_args(name, arguments)?;
                let today = chrono::Utc::now().date_naive();
                let mut coupons = self.catalog.coupons(args.store.as_deref(), today);
                coupons.truncate(self.max_results);
                Ok(ToolOutput {
                    success: true,
                    store: args.store.as_deref().and_then(|s| self.catalog.store(s)),
                    deals: Vec::new(),
                    coupons,
                })
            }
            GET_TRENDING_DEALS => {
                let args: TrendingDealsArgs = Self::parse_args(name, arguments)?;
                Ok(ToolOutput {
                    success: true,
                    deals: self
                        .catalog
                        .trending(args.category.as_deref(), self.limit(args.limit)),
                    ..ToolOutput::default()
                })
            }
            unknown => Err(ToolError::UnknownTool(unknown.to_string())),
        }
    }
}

fn definition<T: JsonSchema>(name: &str, description: &str) -> ToolDefinition {
    let parameters = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({ "type": "object" }));
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            definition::<SearchDealsArgs>(
                SEARCH_DEALS,
                "Search current deals by product, optionally filtered by store, category and maximum price.",
            ),
            definition::<GetCouponsArgs>(
                GET_COUPONS,
                "List active coupon codes, optionally for one store.",
            ),
            definition::<TrendingDealsArgs>(
                GET_TRENDING_DEALS,
                "List the most popular deals right now, optionally within a category.",
            ),
        ]
    }

    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let key = format!("{}:{}", name, arguments);
        if let Some(entry) = self.memo.get(&key) {
            let (at, output) = entry.value();
            if at.elapsed() < self.ttl {
                tracing::debug!("Tool {} served from memo", name);
                return Ok(output.clone());
            }
        }
        self.memo.remove_if(&key, |_, (at, _)| at.elapsed() >= self.ttl);

        let output = self.run(name, arguments)?;
        tracing::debug!(
            "Tool {} returned {} deals, {} coupons",
            name,
            output.deals.len(),
            output.coupons.len()
        );
        self.remember(key, output.clone());
        Ok(output)
    }
}
