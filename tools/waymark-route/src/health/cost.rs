//! Per-day request and bandwidth accounting with cost projections

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Route,
    Probe,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Route => "route",
            RequestType::Probe => "probe",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub per_request_usd: f64,
    pub per_gb_usd: f64,
}

impl ProviderPricing {
    fn cost(&self, counters: UsageCounters) -> f64 {
        counters.requests as f64 * self.per_request_usd
            + counters.bytes as f64 / 1e9 * self.per_gb_usd
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub requests: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub requests: u64,
    pub bytes: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSpike {
    pub date: NaiveDate,
    pub previous_cost_usd: f64,
    pub cost_usd: f64,
    pub increase_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostForecast {
    pub days: u32,
    pub cost_usd: f64,
    pub requests: f64,
    pub bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub history: Vec<DailyTotal>,
    pub monthly_projection_usd: f64,
    pub spike: Option<CostSpike>,
    pub forecast_7d: CostForecast,
    pub forecast_30d: CostForecast,
}

#[derive(Debug)]
pub struct CostTracker {
    pricing: HashMap<String, ProviderPricing>,
    usage: BTreeMap<(NaiveDate, String, RequestType), UsageCounters>,
    trailing_days: u32,
    spike_threshold_pct: f64,
}

impl CostTracker {
    pub fn new(trailing_days: u32, spike_threshold_pct: f64) -> Self {
        Self {
            pricing: HashMap::new(),
            usage: BTreeMap::new(),
            trailing_days: trailing_days.max(1),
            spike_threshold_pct,
        }
    }

    pub fn set_pricing(&mut self, provider: &str, pricing: ProviderPricing) {
        self.pricing.insert(provider.to_string(), pricing);
    }

    pub fn record(&mut self, provider: &str, request_type: RequestType, bytes: u64, day: NaiveDate) {
        let counters = self
            .usage
            .entry((day, provider.to_string(), request_type))
            .or_default();
        counters.requests += 1;
        counters.bytes += bytes;
    }

    fn cost_of(&self, provider: &str, counters: UsageCounters) -> f64 {
        self.pricing
            .get(provider)
            .map_or(0.0, |p| p.cost(counters))
    }

    /// Totals per calendar day that has any recorded usage.
    pub fn daily_totals(&self) -> BTreeMap<NaiveDate, DailyTotal> {
        let mut out: BTreeMap<NaiveDate, DailyTotal> = BTreeMap::new();
        for ((date, provider, _), counters) in &self.usage {
            let total = out.entry(*date).or_insert_with(|| DailyTotal {
                date: *date,
                requests: 0,
                bytes: 0,
                cost_usd: 0.0,
            });
            total.requests += counters.requests;
            total.bytes += counters.bytes;
            total.cost_usd += self.cost_of(provider, *counters);
        }
        out
    }

    /// Days with usage in the `days`-day window ending at `today`.
    pub fn history(&self, today: NaiveDate, days: u32) -> Vec<DailyTotal> {
        let start = window_start(today, days);
        self.daily_totals()
            .into_values()
            .filter(|t| t.date >= start && t.date <= today)
            .collect()
    }

    /// Average over the days with usage in the trailing window. Days with
    /// no recorded usage are not counted, so a service started yesterday
    /// projects from yesterday alone.
    fn trailing_average(&self, today: NaiveDate) -> (f64, f64, f64) {
        let days = self.history(today, self.trailing_days);
        if days.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let n = days.len() as f64;
        let cost: f64 = days.iter().map(|d| d.cost_usd).sum();
        let requests: u64 = days.iter().map(|d| d.requests).sum();
        let bytes: u64 = days.iter().map(|d| d.bytes).sum();
        (cost / n, requests as f64 / n, bytes as f64 / n)
    }

    /// Trailing daily average cost times 30.
    pub fn monthly_projection(&self, today: NaiveDate) -> f64 {
        self.trailing_average(today).0 * 30.0
    }

    pub fn forecast(&self, today: NaiveDate, days: u32) -> CostForecast {
        let (cost, requests, bytes) = self.trailing_average(today);
        let d = f64::from(days);
        CostForecast {
            days,
            cost_usd: cost * d,
            requests: requests * d,
            bytes: bytes * d,
        }
    }

    /// Compares the latest recorded day up to `today` with the calendar
    /// day before it.
    pub fn detect_spike(&self, today: NaiveDate) -> Option<CostSpike> {
        let totals = self.daily_totals();
        let (date, current) = totals.range(..=today).next_back()?;
        let previous = totals.get(&date.checked_sub_days(Days::new(1))?)?;
        if previous.cost_usd <= 0.0 {
            return None;
        }
        let increase_pct = (current.cost_usd - previous.cost_usd) / previous.cost_usd * 100.0;
        (increase_pct > self.spike_threshold_pct).then(|| CostSpike {
            date: *date,
            previous_cost_usd: previous.cost_usd,
            cost_usd: current.cost_usd,
            increase_pct,
        })
    }

    pub fn report(&self, today: NaiveDate, history_days: u32) -> CostReport {
        CostReport {
            history: self.history(today, history_days),
            monthly_projection_usd: self.monthly_projection(today),
            spike: self.detect_spike(today),
            forecast_7d: self.forecast(today, 7),
            forecast_30d: self.forecast(today, 30),
        }
    }

    /// One row per day, provider and request type.
    pub fn export_csv(&self) -> String {
        let mut out = String::from("date,provider,request_type,requests,bytes,cost_usd\n");
        for ((date, provider, request_type), counters) in &self.usage {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{:.6}",
                date,
                provider,
                request_type.as_str(),
                counters.requests,
                counters.bytes,
                self.cost_of(provider, *counters)
            );
        }
        out
    }
}

fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MIN)
}
