//! Normalized key derivation (spec.md §3, resolved Open Question in §9 of
//! SPEC_FULL.md).
//!
//! Venue A raw symbols are concatenated (`XRPUSDT`); we strip the quote
//! suffix and re-append the canonical `USD` quote. Venue B raw symbols are
//! slash-separated (`XRP/USD`); we strip only the separator, keeping the
//! quote asset as written. Both converge on the same `BASEUSD` key as long
//! as venue A's quote table collapses onto `USD`.

const VENUE_A_QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BUSD", "USD"];

/// Normalize a venue-A raw symbol, e.g. `XRPUSDT` -> `XRPUSD`.
pub fn normalize_venue_a(raw: &str) -> String {
    let upper = raw.to_ascii_uppercase();
    for suffix in VENUE_A_QUOTE_SUFFIXES {
        if let Some(base) = upper.strip_suffix(suffix) {
            if !base.is_empty() {
                return format!("{base}USD");
            }
        }
    }
    upper
}

/// Normalize a venue-B raw symbol, e.g. `XRP/USD` -> `XRPUSD`.
pub fn normalize_venue_b(raw: &str) -> String {
    raw.to_ascii_uppercase().replace('/', "")
}

/// Venue-dispatching normalizer, for call sites that only know the
/// `BookKey`'s venue tag (metrics aggregation, C9 cross-venue merge).
pub fn normalized_of(venue: crate::book::Venue, raw: &str) -> String {
    match venue {
        crate::book::Venue::A => normalize_venue_a(raw),
        crate::book::Venue::B => normalize_venue_b(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_a_strips_usdt() {
        assert_eq!(normalize_venue_a("XRPUSDT"), "XRPUSD");
    }

    #[test]
    fn venue_a_strips_usd_directly() {
        assert_eq!(normalize_venue_a("XRPUSD"), "XRPUSD");
    }

    #[test]
    fn venue_b_strips_separator_only() {
        assert_eq!(normalize_venue_b("XRP/USD"), "XRPUSD");
    }

    #[test]
    fn cross_venue_keys_align() {
        assert_eq!(normalize_venue_a("XYZUSDT"), normalize_venue_b("XYZ/USD"));
    }

    #[test]
    fn lowercase_input_is_handled() {
        assert_eq!(normalize_venue_a("xrpusdt"), "XRPUSD");
        assert_eq!(normalize_venue_b("xrp/usd"), "XRPUSD");
    }
}
