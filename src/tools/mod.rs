//! Catalog-backed tools callable by the model or by the orchestrator's
//! manual preflight.

pub mod catalog;
pub mod registry;


pub use catalog::{Catalog, SearchFilter};
pub use registry::{
    DEFAULT_MEMO_ENTRIES, GetCouponsArgs, SearchDealsArgs, ToolRegistry, TrendingDealsArgs,
};

pub const SEARCH_DEALS: &str = "search_deals";
pub const GET_COUPONS: &str = "get_coupons";
pub const GET_TRENDING_DEALS: &str = "get_trending_deals";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("Catalog error: {0}")]
    Catalog(String),
}
