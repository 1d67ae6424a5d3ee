use crate::error::{AppError, Result};
use crate::types::Quote;

/// URL for one symbol's daily chart on the NSE listing.
pub fn chart_url(base: &str, symbol: &str) -> String {
    let safe = symbol.replace('&', "%26");
    format!("{}/{}.NS?interval=1d&range=1d", base.trim_end_matches('/'), safe)
}

/// Extract price and percentage change from a chart response:
/// `chart.result[0].meta.{regularMarketPrice, previousClose}`.
pub fn parse_chart_quote(v: &serde_json::Value) -> Result<Quote> {
    let meta = v
        .pointer("/chart/result/0/meta")
        .ok_or_else(|| AppError::Feed("chart response has no meta".to_string()))?;

    let price = meta
        .get("regularMarketPrice")
        .and_then(|p| p.as_f64())
        .ok_or_else(|| AppError::Feed("chart meta missing regularMarketPrice".to_string()))?;
    let prev_close = meta
        .get("previousClose")
        .or_else(|| meta.get("chartPreviousClose"))
        .and_then(|p| p.as_f64())
        .ok_or_else(|| AppError::Feed("chart meta missing previousClose".to_string()))?;

    if prev_close == 0.0 {
        return Err(AppError::Feed("chart previousClose is zero".to_string()));
    }

    Ok(Quote {
        price,
        change_percent: (price - prev_close) / prev_close * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_ampersand_symbols() {
        assert_eq!(
            chart_url("https://example.test/chart/", "M&M"),
            "https://example.test/chart/M%26M.NS?interval=1d&range=1d"
        );
    }

    #[test]
    fn computes_percent_change() {
        let v = json!({"chart": {"result": [{"meta": {"regularMarketPrice": 101.0, "previousClose": 100.0}}]}});
        let q = parse_chart_quote(&v).unwrap();
        assert!((q.price - 101.0).abs() < 1e-9);
        assert!((q.change_percent - 1.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_chart_previous_close() {
        let v = json!({"chart": {"result": [{"meta": {"regularMarketPrice": 99.0, "chartPreviousClose": 100.0}}]}});
        let q = parse_chart_quote(&v).unwrap();
        assert!((q.change_percent + 1.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_is_feed_error() {
        assert!(matches!(parse_chart_quote(&json!({"chart": {"result": []}})), Err(AppError::Feed(_))));
        let zero = json!({"chart": {"result": [{"meta": {"regularMarketPrice": 1.0, "previousClose": 0.0}}]}});
        assert!(parse_chart_quote(&zero).is_err());
    }
}
