//! Terminal rendering of chat results.

use crate::orchestrator::{ChatResult, Deal};
use std::fmt::Write;

/// Human-readable summary of a finished request.
pub fn render_result(result: &ChatResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", result.content.trim_end());

    let deals: Vec<&Deal> = result
        .deal_ids
        .iter()
        .filter_map(|id| result.deals.iter().find(|d| d.id == *id))
        .collect();
    if !deals.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Deals:");
        for deal in deals {
            let _ = writeln!(out, "  {}", render_deal(deal));
        }
    } else if !result.deal_ids.is_empty() {
        let ids: Vec<String> = result.deal_ids.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "Deal ids: {}", ids.join(", "));
    }

    if !result.coupons.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Coupons:");
        for coupon in &result.coupons {
            let _ = writeln!(
                out,
                "  {} ({}) - {}",
                coupon.code, coupon.store, coupon.description
            );
        }
    }

    if let Some(error) = &result.error {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{:?}] {}", error.kind, error.message);
        if let Some(secs) = error.retry_after_secs {
            let _ = writeln!(out, "Retry after {}s", secs);
        }
    }

    out
}

/// One-line status footer: model, tokens, cost, latency.
pub fn render_footer(result: &ChatResult) -> String {
    let model = result.model.as_deref().unwrap_or("-");
    let cached = if result.cached { " (cached)" } else { "" };
    format!(
        "model {} | {} tokens | ${:.6} | {} ms{}",
        model, result.usage.total_tokens, result.cost, result.latency_ms, cached
    )
}

fn render_deal(deal: &Deal) -> String {
    let mut line = format!("#{} {} @ {} ${:.2}", deal.id, deal.title, deal.store, deal.price);
    if let Some(pct) = deal.discount_pct() {
        let _ = write!(line, " ({:.0}% off)", pct);
    }
    line
}
