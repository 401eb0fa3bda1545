//! Portfolio risk/return summary from static per-bucket assumptions.

use super::{AllocationLine, PortfolioMetrics};
use crate::config::AllocationConfig;
use std::collections::BTreeMap;

/// Share of the total held in each bucket (sum of line weights)
pub fn bucket_weights(lines: &[AllocationLine]) -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    for line in lines {
        *weights.entry(line.bucket.clone()).or_insert(0.0) += line.weight;
    }
    weights
}

/// Excess return per unit of volatility; zero when there is no volatility.
pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility > 0.0 {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    }
}

pub fn portfolio_metrics(lines: &[AllocationLine], settings: &AllocationConfig) -> PortfolioMetrics {
    let (expected_return, volatility) = bucket_weights(lines).iter().fold(
        (0.0, 0.0),
        |(ret, vol), (bucket, weight)| {
            let assumption = settings.assumption_for(bucket);
            (
                ret + weight * assumption.expected_return,
                vol + weight * assumption.volatility,
            )
        },
    );

    PortfolioMetrics {
        expected_return,
        volatility,
        sharpe_ratio: sharpe_ratio(expected_return, volatility, settings.risk_free_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketAssumption;
    use crate::quotes::PriceSource;

    fn line(bucket: &str, weight: f64) -> AllocationLine {
        AllocationLine {
            ticker: "X".into(),
            name: None,
            bucket: bucket.into(),
            weight,
            amount: 0.0,
            shares: 0.0,
            price: 1.0,
            price_source: PriceSource::Live,
            metrics: Default::default(),
        }
    }

    #[test]
    fn test_weighted_metrics() {
        let lines = vec![
            line("value", 0.2),
            line("value", 0.2),
            line("growth", 0.4),
            line("bonds", 0.2),
        ];
        let m = portfolio_metrics(&lines, &AllocationConfig::default());

        assert!((m.expected_return - 0.076).abs() < 1e-12);
        assert!((m.volatility - 0.17).abs() < 1e-12);
        assert!((m.sharpe_ratio - (0.056 / 0.17)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_volatility_gives_zero_sharpe() {
        let mut settings = AllocationConfig::default();
        settings
            .bucket_assumptions
            .insert("cash".into(), BucketAssumption::new(0.03, 0.0));
        let m = portfolio_metrics(&[line("cash", 1.0)], &settings);
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(sharpe_ratio(0.1, 0.0, 0.02), 0.0);
    }

    #[test]
    fn test_unknown_bucket_uses_default_assumption() {
        let m = portfolio_metrics(&[line("crypto", 1.0)], &AllocationConfig::default());
        assert_eq!(m.expected_return, 0.06);
        assert_eq!(m.volatility, 0.20);
    }

    #[test]
    fn test_empty_lines() {
        let m = portfolio_metrics(&[], &AllocationConfig::default());
        assert_eq!(m.expected_return, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }
}
