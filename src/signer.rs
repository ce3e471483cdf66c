//! Request signing for the BingX REST API.
//!
//! Every authenticated request carries its parameters as a canonical query
//! string (keys sorted ascending, `key=value` joined by `&`) followed by
//! `&timestamp=<epoch ms>`, plus `&signature=<hex HMAC-SHA256>` computed over
//! that exact string with the account secret.

use crate::config::Interval;
use crate::error::ConfigError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Typed parameters of one endpoint.
pub trait SignedParams {
    /// Parameter pairs, excluding `timestamp` and `signature`.
    fn params(&self) -> Vec<(&'static str, String)>;
}

/// `GET /openApi/spot/v1/common/symbols`
#[derive(Debug, Clone, Default)]
pub struct SymbolsRequest {
    /// Empty lists every symbol.
    pub symbol: String,
}

impl SignedParams for SymbolsRequest {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![("symbol", self.symbol.clone())]
    }
}

/// `GET /openApi/spot/v1/market/kline`
#[derive(Debug, Clone)]
pub struct KlineRequest {
    pub symbol: String,
    pub interval: Interval,
    pub start_time: i64,
}

impl SignedParams for KlineRequest {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.as_str().to_string()),
            ("startTime", self.start_time.to_string()),
        ]
    }
}

/// Sorted `key=value&...` string without the timestamp.
pub fn canonical_params<P: SignedParams + ?Sized>(params: &P) -> String {
    let mut pairs = params.params();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// A signed query, ready to be appended to an endpoint path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuery {
    /// Canonical parameters without timestamp or signature; stable across requests.
    pub canonical: String,
    /// The exact string that was signed.
    pub payload: String,
    pub signature: String,
}

impl SignedQuery {
    pub fn query_string(&self) -> String {
        format!("{}&signature={}", self.payload, self.signature)
    }
}

/// Holds the HMAC already keyed with the account secret; each signature
/// starts from a clone of it.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer { .. }")
    }
}

impl Signer {
    pub fn new(secret_key: &str) -> Result<Self, ConfigError> {
        if secret_key.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|e| {
            ConfigError::Invalid {
                name: "BINGX_SECRET_KEY",
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { mac })
    }

    /// Lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn sign_params<P: SignedParams + ?Sized>(&self, params: &P, timestamp_ms: i64) -> SignedQuery {
        let canonical = canonical_params(params);
        let payload = if canonical.is_empty() {
            format!("timestamp={timestamp_ms}")
        } else {
            format!("{canonical}&timestamp={timestamp_ms}")
        };
        let signature = self.sign(&payload);
        SignedQuery {
            canonical,
            payload,
            signature,
        }
    }

    /// Signs with the current wall-clock time. Never reuse the result.
    pub fn sign_now<P: SignedParams + ?Sized>(&self, params: &P) -> SignedQuery {
        self.sign_params(params, chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(symbol: &str) -> KlineRequest {
        KlineRequest {
            symbol: symbol.to_string(),
            interval: Interval::M15,
            start_time: 1_700_000_000_000,
        }
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(matches!(Signer::new(""), Err(ConfigError::EmptySecret)));
    }

    #[test]
    fn signer_is_reusable_across_payloads() {
        let signer = Signer::new("Jefe").unwrap();
        let first = signer.sign("what do ya want for nothing?");
        signer.sign("something else entirely");
        assert_eq!(signer.sign("what do ya want for nothing?"), first);
    }

    #[test]
    fn keys_are_sorted_before_signing() {
        let signer = Signer::new("secret").unwrap();
        let signed = signer.sign_params(&kline("BTC-USDT"), 42);

        assert_eq!(signed.canonical, "interval=15m&startTime=1700000000000&symbol=BTC-USDT");
        assert_eq!(signed.payload, "interval=15m&startTime=1700000000000&symbol=BTC-USDT&timestamp=42");
        assert_eq!(
            signed.query_string(),
            format!("{}&signature={}", signed.payload, signed.signature)
        );
    }

    #[test]
    fn symbols_request_keeps_empty_symbol() {
        let signer = Signer::new("secret").unwrap();
        let signed = signer.sign_params(&SymbolsRequest::default(), 7);
        assert_eq!(signed.payload, "symbol=&timestamp=7");
    }

    #[test]
    fn matches_known_hmac_vector() {
        // RFC 4231 test case 2.
        let signer = Signer::new("Jefe").unwrap();
        assert_eq!(
            signer.sign("what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_is_deterministic_for_fixed_timestamp() {
        let signer = Signer::new("secret").unwrap();
        let a = signer.sign_params(&kline("BTC-USDT"), 1_000);
        let b = signer.sign_params(&kline("BTC-USDT"), 1_000);
        assert_eq!(a, b);
        assert_eq!(a.signature.len(), 64);
        assert!(a.signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signature_changes_with_any_parameter() {
        let signer = Signer::new("secret").unwrap();
        let base = signer.sign_params(&kline("BTC-USDT"), 1_000);

        let other_symbol = signer.sign_params(&kline("ETH-USDT"), 1_000);
        let mut later = kline("BTC-USDT");
        later.start_time += 1;
        let other_start = signer.sign_params(&later, 1_000);
        let other_timestamp = signer.sign_params(&kline("BTC-USDT"), 1_001);

        assert_ne!(base.signature, other_symbol.signature);
        assert_ne!(base.signature, other_start.signature);
        assert_ne!(base.signature, other_timestamp.signature);
    }
}
