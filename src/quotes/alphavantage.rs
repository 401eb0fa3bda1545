//! Alpha Vantage Quote Provider
//!
//! Fetches stock and ETF prices, company overviews and price series from the Alpha Vantage API.
//! Free tier: 25 API calls/day, 5 per minute.
//! API key required - get one at https://www.alphavantage.co/support/#api-key

use super::{
    metric, Fundamentals, HistoryPeriod, LatestQuote, MarketDataProvider, Moat, Quote,
};
use crate::error::ComposerError;
use crate::models::Metrics;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "AlphaVantage";

/// Suggested wait after a call-frequency note
pub const RATE_LIMIT_RETRY_SECS: u32 = 60;

const DAILY_SERIES_KEY: &str = "Time Series (Daily)";
const WEEKLY_SERIES_KEY: &str = "Weekly Time Series";
const MONTHLY_SERIES_KEY: &str = "Monthly Time Series";

/// Global Quote response
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesBar {
    #[serde(rename = "1. open")]
    open: Option<String>,
    #[serde(rename = "2. high")]
    high: Option<String>,
    #[serde(rename = "3. low")]
    low: Option<String>,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: Option<String>,
}

/// Company overview response; every field arrives as a string ("None" when unknown)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OverviewResponse {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "ReturnOnEquityTTM")]
    return_on_equity: Option<String>,
    #[serde(rename = "PERatio")]
    pe_ratio: Option<String>,
    #[serde(rename = "ProfitMargin")]
    profit_margin: Option<String>,
    #[serde(rename = "DebtToEquity")]
    debt_to_equity: Option<String>,
    #[serde(rename = "GrossProfitTTM")]
    gross_profit: Option<String>,
    #[serde(rename = "RevenueTTM")]
    revenue: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_cap: Option<String>,
    #[serde(rename = "Beta")]
    beta: Option<String>,
    #[serde(rename = "DividendYield")]
    dividend_yield: Option<String>,
    #[serde(rename = "EPS")]
    eps: Option<String>,
    #[serde(rename = "52WeekHigh")]
    week52_high: Option<String>,
    #[serde(rename = "52WeekLow")]
    week52_low: Option<String>,
}

pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageProvider {
    /// A missing or blank key is fatal here, before any request is made.
    pub fn new(api_key: Option<&str>, timeout: Duration) -> Result<Self, ComposerError> {
        let api_key = api_key.map(str::trim).unwrap_or_default();
        if api_key.is_empty() {
            return Err(ComposerError::invalid_credential(
                PROVIDER,
                "Alpha Vantage API key required",
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| ComposerError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn query(&self, function: &str, symbol: &str, extra: &str) -> Result<String, ComposerError> {
        log::debug!("Fetching {} for {} from Alpha Vantage", function, symbol);

        let url = format!(
            "{}?function={}&symbol={}{}&apikey={}",
            self.base_url,
            function,
            urlencoding::encode(symbol),
            extra,
            urlencoding::encode(&self.api_key)
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            let cause = if e.is_timeout() {
                "request timed out".to_string()
            } else if e.is_connect() {
                "connection failed".to_string()
            } else {
                // reqwest includes the URL (and with it the key) in its message
                e.without_url().to_string()
            };
            ComposerError::data_unavailable(symbol, cause)
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ComposerError::rate_limited(PROVIDER, Some(RATE_LIMIT_RETRY_SECS)));
        }
        if !status.is_success() {
            return Err(ComposerError::data_unavailable(
                symbol,
                format!("Alpha Vantage API error: {}", status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| ComposerError::data_unavailable(symbol, e.without_url()))
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn latest_quote(&self, symbol: &str) -> Result<LatestQuote, ComposerError> {
        let body = self.query("GLOBAL_QUOTE", symbol, "").await?;
        parse_global_quote(symbol, &body)
    }

    async fn latest_daily_close(&self, symbol: &str) -> Result<LatestQuote, ComposerError> {
        let body = self
            .query("TIME_SERIES_DAILY", symbol, "&outputsize=compact")
            .await?;
        parse_daily_close(symbol, &body)
    }

    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals, ComposerError> {
        let body = self.query("OVERVIEW", symbol, "").await?;
        parse_overview(symbol, &body)
    }

    async fn history(&self, symbol: &str, period: HistoryPeriod) -> Result<Vec<Quote>, ComposerError> {
        let (function, extra, key) = match period {
            HistoryPeriod::OneMonth | HistoryPeriod::ThreeMonths => {
                ("TIME_SERIES_DAILY", "&outputsize=compact", DAILY_SERIES_KEY)
            }
            HistoryPeriod::OneYear => ("TIME_SERIES_WEEKLY", "", WEEKLY_SERIES_KEY),
            HistoryPeriod::FiveYears => ("TIME_SERIES_MONTHLY", "&outputsize=full", MONTHLY_SERIES_KEY),
        };
        let body = self.query(function, symbol, extra).await?;
        let bars = parse_series(symbol, &body, key)?;
        Ok(trim_to_period(bars, period))
    }
}

// ============================================================================
// Response parsing
// ============================================================================

fn parse_body(symbol: &str, body: &str) -> Result<Value, ComposerError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ComposerError::data_unavailable(symbol, format!("malformed response: {}", e)))?;
    check_api_messages(symbol, &value)?;
    Ok(value)
}

/// Alpha Vantage reports throttling and errors inside HTTP 200 bodies.
fn check_api_messages(symbol: &str, value: &Value) -> Result<(), ComposerError> {
    for field in ["Note", "Information"] {
        if let Some(note) = value.get(field).and_then(Value::as_str) {
            let lower = note.to_lowercase();
            if lower.contains("call frequency")
                || lower.contains("rate limit")
                || lower.contains("requests per")
            {
                log::warn!("Alpha Vantage rate limit exceeded: {}", note);
                return Err(ComposerError::rate_limited(PROVIDER, Some(RATE_LIMIT_RETRY_SECS)));
            }
            return Err(ComposerError::data_unavailable(symbol, note));
        }
    }

    if let Some(error) = value.get("Error Message").and_then(Value::as_str) {
        return Err(ComposerError::data_unavailable(
            symbol,
            format!("Alpha Vantage error: {}", error),
        ));
    }
    Ok(())
}

/// Parse a numeric field; "None", "-" and empty strings are unknown.
fn parse_number(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    match raw {
        "" | "None" | "-" => None,
        _ => raw.trim_end_matches('%').parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

fn positive_price(symbol: &str, raw: Option<&str>) -> Result<f64, ComposerError> {
    parse_number(raw)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ComposerError::data_unavailable(symbol, "missing or non-positive price"))
}

pub(crate) fn parse_global_quote(symbol: &str, body: &str) -> Result<LatestQuote, ComposerError> {
    let value = parse_body(symbol, body)?;
    let data: GlobalQuoteResponse = serde_json::from_value(value)
        .map_err(|e| ComposerError::data_unavailable(symbol, format!("malformed quote: {}", e)))?;

    let quote_data = data
        .global_quote
        .ok_or_else(|| ComposerError::data_unavailable(symbol, "no quote data"))?;

    let price = positive_price(symbol, quote_data.price.as_deref())?;
    let date = quote_data
        .latest_trading_day
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive());

    Ok(LatestQuote {
        symbol: quote_data.symbol.unwrap_or_else(|| symbol.to_string()),
        name: None,
        currency: Some("USD".to_string()), // Alpha Vantage returns USD by default
        quote: Quote {
            date,
            close: price,
            high: parse_number(quote_data.high.as_deref()),
            low: parse_number(quote_data.low.as_deref()),
            open: parse_number(quote_data.open.as_deref()),
            volume: quote_data.volume.as_deref().and_then(|v| v.parse().ok()),
        },
    })
}

pub(crate) fn parse_series(symbol: &str, body: &str, key: &str) -> Result<Vec<Quote>, ComposerError> {
    let value = parse_body(symbol, body)?;
    let series = value
        .get(key)
        .cloned()
        .ok_or_else(|| ComposerError::data_unavailable(symbol, "no time series data"))?;
    let series: HashMap<String, SeriesBar> = serde_json::from_value(series)
        .map_err(|e| ComposerError::data_unavailable(symbol, format!("malformed series: {}", e)))?;

    let mut quotes: Vec<Quote> = series
        .iter()
        .filter_map(|(date_str, bar)| {
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
            let close = parse_number(Some(bar.close.as_str())).filter(|c| *c > 0.0)?;
            Some(Quote {
                date,
                close,
                high: parse_number(bar.high.as_deref()),
                low: parse_number(bar.low.as_deref()),
                open: parse_number(bar.open.as_deref()),
                volume: bar.volume.as_deref().and_then(|v| v.parse().ok()),
            })
        })
        .collect();

    quotes.sort_by_key(|q| q.date);
    Ok(quotes)
}

pub(crate) fn parse_daily_close(symbol: &str, body: &str) -> Result<LatestQuote, ComposerError> {
    let quotes = parse_series(symbol, body, DAILY_SERIES_KEY)?;
    let latest = quotes
        .into_iter()
        .last()
        .ok_or_else(|| ComposerError::data_unavailable(symbol, "empty daily series"))?;

    Ok(LatestQuote {
        symbol: symbol.to_string(),
        name: None,
        currency: Some("USD".to_string()),
        quote: latest,
    })
}

/// Keep bars within the period window, measured back from the newest bar.
fn trim_to_period(bars: Vec<Quote>, period: HistoryPeriod) -> Vec<Quote> {
    let days = match period {
        HistoryPeriod::OneMonth => 31,
        HistoryPeriod::ThreeMonths => 92,
        HistoryPeriod::OneYear => 366,
        HistoryPeriod::FiveYears => 1827,
    };
    let Some(newest) = bars.last().map(|q| q.date) else {
        return bars;
    };
    let from = newest - ChronoDuration::days(days);
    bars.into_iter().filter(|q| q.date >= from).collect()
}

pub(crate) fn parse_overview(symbol: &str, body: &str) -> Result<Fundamentals, ComposerError> {
    let value = parse_body(symbol, body)?;
    let data: OverviewResponse = serde_json::from_value(value)
        .map_err(|e| ComposerError::data_unavailable(symbol, format!("malformed overview: {}", e)))?;

    // An unknown symbol yields `{}`
    let reported = data
        .symbol
        .as_deref()
        .ok_or_else(|| ComposerError::data_unavailable(symbol, "no overview data"))?;
    if !reported.eq_ignore_ascii_case(symbol) {
        return Err(ComposerError::data_unavailable(
            symbol,
            format!("overview returned symbol {}", reported),
        ));
    }

    let roe = parse_number(data.return_on_equity.as_deref());
    let profit_margin = parse_number(data.profit_margin.as_deref());
    let gross_margin = match (
        parse_number(data.gross_profit.as_deref()),
        parse_number(data.revenue.as_deref()),
    ) {
        (Some(gross), Some(revenue)) if revenue > 0.0 => Some(gross / revenue),
        _ => None,
    };

    let mut metrics = Metrics::new();
    metrics.insert(metric::ROE.into(), roe.map(|r| r * 100.0));
    metrics.insert(metric::PE.into(), parse_number(data.pe_ratio.as_deref()));
    metrics.insert(metric::PROFIT_MARGIN.into(), profit_margin.map(|m| m * 100.0));
    metrics.insert(
        metric::DEBT_RATIO.into(),
        parse_number(data.debt_to_equity.as_deref()).map(|d| d / 100.0),
    );
    // Not reported by this provider
    metrics.insert(metric::FCF_GROWTH.into(), None);

    let mut additional = BTreeMap::new();
    additional.insert("market_cap".to_string(), parse_number(data.market_cap.as_deref()));
    additional.insert("beta".to_string(), parse_number(data.beta.as_deref()));
    additional.insert("dividend_yield".to_string(), parse_number(data.dividend_yield.as_deref()));
    additional.insert("eps".to_string(), parse_number(data.eps.as_deref()));
    additional.insert("week52_high".to_string(), parse_number(data.week52_high.as_deref()));
    additional.insert("week52_low".to_string(), parse_number(data.week52_low.as_deref()));
    additional.insert("gross_margin".to_string(), gross_margin.map(|g| g * 100.0));

    Ok(Fundamentals {
        ticker: symbol.to_string(),
        name: data.name.filter(|n| n != "None"),
        sector: data.sector.filter(|s| s != "None"),
        industry: data.industry.filter(|s| s != "None"),
        metrics,
        moat: classify_moat(profit_margin, roe, gross_margin),
        additional,
        observed_at: Utc::now(),
    })
}

/// All inputs are fractions (0.25 = 25%).
pub fn classify_moat(profit_margin: Option<f64>, roe: Option<f64>, gross_margin: Option<f64>) -> Moat {
    let (Some(pm), Some(roe), Some(gm)) = (profit_margin, roe, gross_margin) else {
        return Moat::Unknown;
    };
    if pm > 0.2 && roe > 0.2 && gm > 0.4 {
        Moat::High
    } else if pm > 0.1 && roe > 0.15 && gm > 0.3 {
        Moat::Medium
    } else {
        Moat::Low
    }
}
