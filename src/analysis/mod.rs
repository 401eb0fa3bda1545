//! Rule-based fundamentals assessment for a single stock.

use crate::error::{ComposerError, ErrorBody};
use crate::models::{normalize_ticker, Metrics};
use crate::quotes::{metric, Fundamentals, MarketDataClient, Moat, PriceQuote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Positive,
    Caution,
    Negative,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Valuation,
    Profitability,
    FinancialHealth,
    Growth,
    CompetitiveAdvantage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionAssessment {
    pub dimension: Dimension,
    pub assessment: Assessment,
    pub detail: String,
}

impl DimensionAssessment {
    fn new(dimension: Dimension, assessment: Assessment, detail: &str) -> Self {
        Self {
            dimension,
            assessment,
            detail: detail.to_string(),
        }
    }

    fn unknown(dimension: Dimension) -> Self {
        Self::new(dimension, Assessment::Unknown, "not available")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Excellent,
    Good,
    Acceptable,
    Mixed,
    Weak,
}

impl Verdict {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent opportunity with solid fundamentals",
            Self::Good => "Good opportunity with generally solid fundamentals",
            Self::Acceptable => "Acceptable opportunity with some strengths and weaknesses",
            Self::Mixed => "Invest with caution: mixed metrics",
            Self::Weak => "Not recommended as a core holding: weak fundamentals",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAnalysis {
    pub ticker: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub price: Option<PriceQuote>,
    pub metrics: Metrics,
    pub moat: Moat,
    pub dimensions: Vec<DimensionAssessment>,
    pub verdict: Verdict,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

fn assess_valuation(pe: Option<f64>) -> DimensionAssessment {
    use Assessment::*;
    let Some(pe) = pe else {
        return DimensionAssessment::unknown(Dimension::Valuation);
    };
    let (assessment, detail) = if pe < 15.0 {
        (Positive, "attractive (low P/E)")
    } else if pe < 25.0 {
        (Caution, "reasonable (moderate P/E)")
    } else {
        (Negative, "expensive (high P/E)")
    };
    DimensionAssessment::new(Dimension::Valuation, assessment, detail)
}

fn assess_profitability(roe: Option<f64>, margin: Option<f64>) -> DimensionAssessment {
    use Assessment::*;
    let (Some(roe), Some(margin)) = (roe, margin) else {
        return DimensionAssessment::unknown(Dimension::Profitability);
    };
    let (assessment, detail) = if roe > 20.0 && margin > 20.0 {
        (Positive, "excellent (high ROE and margin)")
    } else if roe > 15.0 && margin > 10.0 {
        (Positive, "good (solid ROE and margin)")
    } else if roe > 10.0 && margin > 5.0 {
        (Caution, "acceptable (moderate ROE and margin)")
    } else {
        (Negative, "weak (low ROE and margin)")
    };
    DimensionAssessment::new(Dimension::Profitability, assessment, detail)
}

fn assess_financial_health(debt_ratio: Option<f64>) -> DimensionAssessment {
    use Assessment::*;
    let Some(debt) = debt_ratio else {
        return DimensionAssessment::unknown(Dimension::FinancialHealth);
    };
    let (assessment, detail) = if debt < 0.3 {
        (Positive, "excellent (low debt)")
    } else if debt < 0.6 {
        (Positive, "good (moderate debt)")
    } else if debt < 1.0 {
        (Caution, "acceptable (considerable debt)")
    } else {
        (Negative, "risky (high debt)")
    };
    DimensionAssessment::new(Dimension::FinancialHealth, assessment, detail)
}

fn assess_growth(fcf_growth: Option<f64>) -> DimensionAssessment {
    use Assessment::*;
    let Some(growth) = fcf_growth else {
        return DimensionAssessment::unknown(Dimension::Growth);
    };
    let (assessment, detail) = if growth > 15.0 {
        (Positive, "strong (fast FCF growth)")
    } else if growth > 8.0 {
        (Positive, "good (solid FCF growth)")
    } else if growth > 3.0 {
        (Caution, "moderate (slow FCF growth)")
    } else {
        (Negative, "weak (flat or declining FCF)")
    };
    DimensionAssessment::new(Dimension::Growth, assessment, detail)
}

fn assess_moat(moat: Moat) -> DimensionAssessment {
    use Assessment::*;
    let dimension = Dimension::CompetitiveAdvantage;
    match moat {
        Moat::High => DimensionAssessment::new(dimension, Positive, "strong (significant moat)"),
        Moat::Medium => DimensionAssessment::new(dimension, Positive, "moderate (moat present)"),
        Moat::Low => DimensionAssessment::new(dimension, Negative, "weak (limited moat)"),
        Moat::Unknown => DimensionAssessment::unknown(dimension),
    }
}

/// Per-dimension assessments in a fixed order
pub fn assess(fundamentals: &Fundamentals) -> Vec<DimensionAssessment> {
    vec![
        assess_valuation(fundamentals.metric(metric::PE)),
        assess_profitability(
            fundamentals.metric(metric::ROE),
            fundamentals.metric(metric::PROFIT_MARGIN),
        ),
        assess_financial_health(fundamentals.metric(metric::DEBT_RATIO)),
        assess_growth(fundamentals.metric(metric::FCF_GROWTH)),
        assess_moat(fundamentals.moat),
    ]
}

pub fn verdict(dimensions: &[DimensionAssessment]) -> Verdict {
    let count = |a: Assessment| dimensions.iter().filter(|d| d.assessment == a).count();
    let positive = count(Assessment::Positive);

    if positive >= 4 {
        Verdict::Excellent
    } else if positive >= 3 {
        Verdict::Good
    } else if positive >= 2 {
        Verdict::Acceptable
    } else if count(Assessment::Caution) >= 3 {
        Verdict::Mixed
    } else {
        Verdict::Weak
    }
}

fn summarize(
    ticker: &str,
    name: Option<&str>,
    price: Option<&PriceQuote>,
    dimensions: &[DimensionAssessment],
    verdict: Verdict,
) -> String {
    let mut summary = match price {
        Some(p) => format!("{} ({}) at {:.2}\n", name.unwrap_or(ticker), ticker, p.price),
        None => format!("{} ({})\n", name.unwrap_or(ticker), ticker),
    };
    for d in dimensions {
        let label = match d.dimension {
            Dimension::Valuation => "Valuation",
            Dimension::Profitability => "Profitability",
            Dimension::FinancialHealth => "Financial health",
            Dimension::Growth => "Growth",
            Dimension::CompetitiveAdvantage => "Competitive advantage",
        };
        summary.push_str(&format!("- {}: {}\n", label, d.detail));
    }
    summary.push_str(&format!("Conclusion: {}.", verdict.describe()));
    summary
}

/// Build an analysis from already-fetched data.
pub fn build_analysis(fundamentals: Fundamentals, price: Option<PriceQuote>) -> StockAnalysis {
    let dimensions = assess(&fundamentals);
    let verdict = verdict(&dimensions);
    let summary = summarize(
        &fundamentals.ticker,
        fundamentals.name.as_deref(),
        price.as_ref(),
        &dimensions,
        verdict,
    );

    StockAnalysis {
        ticker: fundamentals.ticker,
        name: fundamentals.name,
        sector: fundamentals.sector,
        price,
        metrics: fundamentals.metrics,
        moat: fundamentals.moat,
        dimensions,
        verdict,
        summary,
        generated_at: Utc::now(),
    }
}

/// Fundamentals are required; a missing price only drops it from the summary.
pub async fn analyze_stock(client: &MarketDataClient, ticker: &str) -> Result<StockAnalysis, ComposerError> {
    let symbol = normalize_ticker(ticker)?;
    let fundamentals = client.get_fundamentals(&symbol).await?;

    let price = match client.get_price(&symbol).await {
        Ok(price) => Some(price),
        Err(e) => {
            log::warn!("Analysis of {} continues without price: {}", symbol, e);
            None
        }
    };

    Ok(build_analysis(fundamentals, price))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsComparison {
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moat: Option<Moat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Metric maps for several tickers, in request order.
pub async fn compare_metrics(client: &MarketDataClient, tickers: &[String]) -> Vec<MetricsComparison> {
    let mut results = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        let fetched = match normalize_ticker(ticker) {
            Ok(symbol) => client.get_fundamentals(&symbol).await,
            Err(e) => Err(e),
        };

        results.push(match fetched {
            Ok(f) => MetricsComparison {
                ticker: f.ticker,
                name: f.name,
                metrics: Some(f.metrics),
                moat: Some(f.moat),
                error: None,
            },
            Err(e) => {
                log::warn!("Comparison skipped {}: {}", ticker, e);
                MetricsComparison {
                    ticker: ticker.trim().to_uppercase(),
                    name: None,
                    metrics: None,
                    moat: None,
                    error: Some(e.to_body()),
                }
            }
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::error::ErrorKind;
    use crate::quotes::client::tests::{settings, FakeProvider};
    use std::sync::Arc;

    fn fundamentals(pairs: &[(&str, Option<f64>)], moat: Moat) -> Fundamentals {
        Fundamentals {
            ticker: "TEST".into(),
            name: Some("Test Corp".into()),
            sector: None,
            industry: None,
            metrics: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            moat,
            additional: Default::default(),
            observed_at: Utc::now(),
        }
    }

    fn assessments(dimensions: &[DimensionAssessment]) -> Vec<Assessment> {
        dimensions.iter().map(|d| d.assessment).collect()
    }

    #[test]
    fn test_valuation_thresholds() {
        assert_eq!(assess_valuation(Some(12.0)).assessment, Assessment::Positive);
        assert_eq!(assess_valuation(Some(15.0)).assessment, Assessment::Caution);
        assert_eq!(assess_valuation(Some(25.0)).assessment, Assessment::Negative);
        assert_eq!(assess_valuation(None).assessment, Assessment::Unknown);
    }

    #[test]
    fn test_profitability_needs_both_metrics() {
        assert_eq!(assess_profitability(Some(30.0), None).assessment, Assessment::Unknown);
        assert_eq!(assess_profitability(Some(18.0), Some(12.0)).assessment, Assessment::Positive);
        assert_eq!(assess_profitability(Some(12.0), Some(6.0)).assessment, Assessment::Caution);
        assert_eq!(assess_profitability(Some(25.0), Some(4.0)).assessment, Assessment::Negative);
    }

    #[test]
    fn test_strong_company_is_excellent() {
        let f = fundamentals(
            &[
                (metric::PE, Some(14.0)),
                (metric::ROE, Some(30.0)),
                (metric::PROFIT_MARGIN, Some(25.0)),
                (metric::DEBT_RATIO, Some(0.2)),
                (metric::FCF_GROWTH, None),
            ],
            Moat::High,
        );
        let dims = assess(&f);
        assert_eq!(
            assessments(&dims),
            [
                Assessment::Positive,
                Assessment::Positive,
                Assessment::Positive,
                Assessment::Unknown,
                Assessment::Positive
            ]
        );
        assert_eq!(verdict(&dims), Verdict::Excellent);
    }

    #[test]
    fn test_mixed_and_weak_verdicts() {
        let mixed = fundamentals(
            &[
                (metric::PE, Some(20.0)),
                (metric::ROE, Some(12.0)),
                (metric::PROFIT_MARGIN, Some(8.0)),
                (metric::DEBT_RATIO, Some(0.8)),
                (metric::FCF_GROWTH, Some(1.0)),
            ],
            Moat::Low,
        );
        assert_eq!(verdict(&assess(&mixed)), Verdict::Mixed);

        let unknown = fundamentals(&[], Moat::Unknown);
        assert_eq!(verdict(&assess(&unknown)), Verdict::Weak);
    }

    #[test]
    fn test_summary_lists_every_dimension() {
        let analysis = build_analysis(
            fundamentals(&[(metric::PE, Some(30.0))], Moat::Medium),
            Some(PriceQuote::live("TEST", 42.5)),
        );
        assert!(analysis.summary.starts_with("Test Corp (TEST) at 42.50"));
        assert!(analysis.summary.contains("Valuation: expensive"));
        assert!(analysis.summary.contains("Growth: not available"));
        assert!(analysis.summary.ends_with("weak fundamentals."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_stock() {
        let fake = Arc::new(FakeProvider::with_quotes(&[("KO", 60.0)]));
        let client = MarketDataClient::new(fake, settings(0, FailurePolicy::Strict));

        let analysis = analyze_stock(&client, " ko ").await.unwrap();
        assert_eq!(analysis.ticker, "KO");
        assert_eq!(analysis.price.as_ref().map(|p| p.price), Some(60.0));
        assert_eq!(analysis.verdict, Verdict::Excellent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_unknown_ticker_fails() {
        let fake = Arc::new(FakeProvider::default());
        let client = MarketDataClient::new(fake, settings(0, FailurePolicy::DegradeToFallback));

        let err = analyze_stock(&client, "NOPE").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
        assert_eq!(analyze_stock(&client, "B@D").await.unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_reports_failures_per_ticker() {
        let fake = Arc::new(FakeProvider::with_quotes(&[("JNJ", 150.0), ("PG", 160.0)]));
        let client = MarketDataClient::new(fake, settings(0, FailurePolicy::Strict));
        let tickers: Vec<String> = ["jnj", "MISSING", "PG"].iter().map(|s| s.to_string()).collect();

        let results = compare_metrics(&client, &tickers).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].ticker, "JNJ");
        assert!(results[0].metrics.is_some());
        assert_eq!(results[1].ticker, "MISSING");
        assert_eq!(results[1].error.as_ref().map(|e| e.kind), Some(ErrorKind::DataUnavailable));
        assert!(results[2].error.is_none());
    }
}
