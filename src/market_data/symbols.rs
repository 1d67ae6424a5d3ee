/// Nifty 50 constituents offered in the stock picker.
pub const NIFTY_50_SYMBOLS: &[&str] = &[
    "RELIANCE", "HDFCBANK", "TCS", "INFY", "ICICIBANK",
    "HINDUNILVR", "ITC", "SBIN", "BHARTIARTL", "KOTAKBANK",
    "LT", "AXISBANK", "BAJFINANCE", "ASIANPAINT", "MARUTI",
    "HCLTECH", "SUNPHARMA", "TITAN", "ULTRACEMCO", "WIPRO",
    "NESTLEIND", "ONGC", "NTPC", "POWERGRID", "M&M",
    "TATAMOTORS", "TATASTEEL", "JSWSTEEL", "ADANIENT", "ADANIPORTS",
    "COALINDIA", "BAJAJFINSV", "TECHM", "GRASIM", "HINDALCO",
    "DRREDDY", "CIPLA", "BRITANNIA", "EICHERMOT", "HEROMOTOCO",
    "APOLLOHOSP", "DIVISLAB", "BAJAJ-AUTO", "SBILIFE", "HDFCLIFE",
    "INDUSINDBK", "TATACONSUM", "BPCL", "SHRIRAMFIN", "TRENT",
];

/// Case-insensitive lookup returning the canonical symbol.
pub fn canonical_symbol(input: &str) -> Option<&'static str> {
    let needle = input.trim();
    NIFTY_50_SYMBOLS
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(needle))
}

/// Symbols containing `query`, case-insensitive. Empty query matches all.
pub fn search(query: &str) -> Vec<&'static str> {
    let q = query.trim().to_ascii_lowercase();
    NIFTY_50_SYMBOLS
        .iter()
        .copied()
        .filter(|s| s.to_ascii_lowercase().contains(&q))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_unique_symbols() {
        let mut v: Vec<_> = NIFTY_50_SYMBOLS.to_vec();
        v.sort_unstable();
        v.dedup();
        assert_eq!(v.len(), 50);
    }

    #[test]
    fn canonicalizes_case() {
        assert_eq!(canonical_symbol(" infy "), Some("INFY"));
        assert_eq!(canonical_symbol("m&m"), Some("M&M"));
        assert_eq!(canonical_symbol("GOOG"), None);
    }

    #[test]
    fn search_filters_by_substring() {
        let hits = search("bank");
        assert!(hits.contains(&"HDFCBANK"));
        assert!(hits.contains(&"KOTAKBANK"));
        assert!(!hits.contains(&"TCS"));
        assert_eq!(search("").len(), NIFTY_50_SYMBOLS.len());
    }
}
