use crate::config::BackendKind;
use crate::llm::Usage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// In-process token and cost accounting for completed chat requests.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    retention: chrono::Duration,
    usage_data: Arc<Mutex<UsageData>>,
}

#[derive(Debug, Default)]
struct UsageData {
    daily_usage: HashMap<String, DailyUsage>, // Date string -> usage
    model_usage: HashMap<String, ModelUsage>,
    total_usage: TotalUsage,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u32,
    pub cached_count: u32,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub backend: Option<BackendKind>,
    pub total_tokens: u64,
    pub request_count: u32,
    pub total_cost: f64,
    pub average_latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalUsage {
    pub total_tokens: u64,
    pub total_requests: u64,
    pub cached_requests: u64,
    pub fallback_requests: u64,
    pub total_cost: f64,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
}

/// One completed, billable request.
#[derive(Debug, Clone)]
pub struct UsageRecord<'a> {
    pub model: &'a str,
    pub backend: Option<BackendKind>,
    pub usage: Usage,
    pub cost: f64,
    pub latency_ms: u64,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub period_days: u32,
    pub total_requests: u32,
    pub cached_requests: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_tokens_per_request: f64,
    pub average_cost_per_request: f64,
    pub daily_breakdown: Vec<DailyUsage>,
    pub models: Vec<ModelUsage>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(chrono::Duration::days(30))
    }
}

impl UsageTracker {
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            retention,
            usage_data: Arc::new(Mutex::new(UsageData::default())),
        }
    }

    pub async fn record(&self, record: UsageRecord<'_>) {
        self.record_at(record, Utc::now()).await
    }

    async fn record_at(&self, record: UsageRecord<'_>, now: DateTime<Utc>) {
        let mut data = self.usage_data.lock().await;

        let date_key = now.format(DATE_FORMAT).to_string();
        let daily = data
            .daily_usage
            .entry(date_key.clone())
            .or_insert_with(|| DailyUsage {
                date: date_key,
                ..Default::default()
            });
        daily.request_count += 1;
        daily.input_tokens += record.usage.input_tokens;
        daily.output_tokens += record.usage.output_tokens;
        daily.total_tokens += record.usage.total_tokens;
        daily.total_cost += record.cost;

        let model = data
            .model_usage
            .entry(record.model.to_string())
            .or_insert_with(|| ModelUsage {
                model: record.model.to_string(),
                backend: record.backend,
                ..Default::default()
            });
        model.request_count += 1;
        model.total_tokens += record.usage.total_tokens;
        model.total_cost += record.cost;
        let total_latency = model.average_latency_ms * (model.request_count - 1) as u64
            + record.latency_ms;
        model.average_latency_ms = total_latency / model.request_count as u64;

        let total = &mut data.total_usage;
        total.total_requests += 1;
        total.total_tokens += record.usage.total_tokens;
        total.total_cost += record.cost;
        if record.used_fallback {
            total.fallback_requests += 1;
        }
        if total.first_request.is_none() {
            total.first_request = Some(now);
        }
        total.last_request = Some(now);

        self.cleanup_old_data(&mut data, now);
    }

    /// Cache hits and canned answers cost nothing but are still counted.
    pub async fn record_cached(&self) {
        let now = Utc::now();
        let mut data = self.usage_data.lock().await;
        let date_key = now.format(DATE_FORMAT).to_string();
        data.daily_usage
            .entry(date_key.clone())
            .or_insert_with(|| DailyUsage {
                date: date_key,
                ..Default::default()
            })
            .cached_count += 1;
        data.total_usage.cached_requests += 1;
    }

    fn cleanup_old_data(&self, data: &mut UsageData, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        data.daily_usage
            .retain(|date_str, _| day_start(date_str).is_some_and(|day| day > cutoff));
    }

    pub async fn get_daily_usage(&self, date: &str) -> Option<DailyUsage> {
        let data = self.usage_data.lock().await;
        data.daily_usage.get(date).cloned()
    }

    pub async fn get_total_usage(&self) -> TotalUsage {
        let data = self.usage_data.lock().await;
        data.total_usage.clone()
    }

    pub async fn get_usage_summary(&self, days: u32) -> UsageSummary {
        let data = self.usage_data.lock().await;
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);

        let mut summary = UsageSummary {
            period_days: days,
            total_requests: 0,
            cached_requests: 0,
            total_tokens: 0,
            total_cost: 0.0,
            average_tokens_per_request: 0.0,
            average_cost_per_request: 0.0,
            daily_breakdown: Vec::new(),
            models: data.model_usage.values().cloned().collect(),
        };

        for daily in data.daily_usage.values() {
            if day_start(&daily.date).is_some_and(|day| day >= cutoff) {
                summary.total_requests += daily.request_count;
                summary.cached_requests += daily.cached_count;
                summary.total_tokens += daily.total_tokens;
                summary.total_cost += daily.total_cost;
                summary.daily_breakdown.push(daily.clone());
            }
        }

        if summary.total_requests > 0 {
            summary.average_tokens_per_request =
                summary.total_tokens as f64 / summary.total_requests as f64;
            summary.average_cost_per_request = summary.total_cost / summary.total_requests as f64;
        }

        summary.daily_breakdown.sort_by(|a, b| a.date.cmp(&b.date));
        summary.models.sort_by(|a, b| a.model.cmp(&b.model));
        summary
    }
}

fn day_start(date: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}
