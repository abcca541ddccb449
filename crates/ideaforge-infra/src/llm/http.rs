//! HTTP plumbing shared by the provider adapters.
//!
//! Status classification lives here so every backend maps the same HTTP
//! codes to the same [`ProviderError`] variants. Backend quirks (Gemini's
//! `API_KEY_INVALID`, each vendor's rate-limit headers) stay in the
//! adapter modules.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use ideaforge_types::error::ConfigError;
use ideaforge_types::provider::{ProviderError, ProviderKind};

/// Upper bound on a single HTTP exchange. The router applies its own,
/// shorter per-call timeout on top of this.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body excerpt carried into an error message.
const MAX_ERROR_EXCERPT: usize = 300;

/// Build the reqwest client every adapter uses.
pub(crate) fn build_client() -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}

/// Classify a non-success response.
///
/// - 401/403: `AuthFailed`
/// - 400/404/413/422: `BadRequest`
/// - 429: `RateLimited`, with `retry-after` when the backend sent one
/// - anything else (5xx, Anthropic's 529, odd 4xx): `ServerError`
pub(crate) fn classify_status(
    provider: ProviderKind,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed { provider },
        400 | 404 | 413 | 422 => ProviderError::BadRequest {
            provider,
            message: format!("HTTP {status}: {}", excerpt(body)),
        },
        429 => ProviderError::RateLimited {
            provider,
            retry_after_ms: retry_after_ms(headers),
        },
        _ => ProviderError::ServerError {
            provider,
            message: format!("HTTP {status}: {}", excerpt(body)),
        },
    }
}

/// Fill a 429 that came without `retry-after` from the reset the backend
/// reported in its rate-limit headers.
pub(crate) fn with_reset_hint(err: ProviderError, reset_after_ms: Option<u64>) -> ProviderError {
    match err {
        ProviderError::RateLimited {
            provider,
            retry_after_ms: None,
        } => ProviderError::RateLimited {
            provider,
            retry_after_ms: reset_after_ms,
        },
        other => other,
    }
}

/// A request that never produced a response: connect failure, reset,
/// client-side timeout, or an unreadable body.
pub(crate) fn transport_error(provider: ProviderKind, err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    ProviderError::ServerError {
        provider,
        message: format!("{kind}: {err}"),
    }
}

/// A 2xx whose body did not match the expected schema.
pub(crate) fn decode_error(provider: ProviderKind, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::ServerError {
        provider,
        message: format!("failed to parse response: {err}"),
    }
}

/// Trim and shorten an error body for inclusion in an error message.
pub(crate) fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_EXCERPT {
        return body.to_string();
    }
    let cut: String = body.chars().take(MAX_ERROR_EXCERPT).collect();
    format!("{cut}...")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Parse a numeric header. Missing or malformed values are ignored.
pub(crate) fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// `retry-after-ms` if present, else `retry-after` in (possibly fractional)
/// seconds. HTTP-date forms are not supported and read as absent.
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(ms) = header_str(headers, "retry-after-ms").and_then(|v| v.parse::<u64>().ok()) {
        return Some(ms);
    }
    header_str(headers, "retry-after")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).round() as u64)
}

/// Parse a Go-style duration such as `6m0s`, `1.5s`, `20ms`, or `1h2m`
/// into milliseconds.
pub(crate) fn parse_duration_ms(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut total = 0.0_f64;
    let mut rest = text;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let value: f64 = number.parse().ok()?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        total += value * scale;
        rest = next;
    }
    Some(total.round() as u64)
}

/// Milliseconds from `now` until an RFC 3339 instant; zero if it has passed.
pub(crate) fn rfc3339_delay_ms(text: &str, now: DateTime<Utc>) -> Option<u64> {
    let at = DateTime::parse_from_rfc3339(text.trim()).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(u64::try_from(delta.num_milliseconds()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_status_classification() {
        let none = HeaderMap::new();
        let p = ProviderKind::Anthropic;
        for code in [401, 403] {
            let err = classify_status(p, StatusCode::from_u16(code).unwrap(), &none, "");
            assert_eq!(err, ProviderError::AuthFailed { provider: p });
        }
        for code in [400, 404, 413, 422] {
            let err = classify_status(p, StatusCode::from_u16(code).unwrap(), &none, "nope");
            assert!(matches!(err, ProviderError::BadRequest { .. }), "{code}");
            assert!(!err.is_transient());
        }
        for code in [500, 502, 503, 529] {
            let err = classify_status(p, StatusCode::from_u16(code).unwrap(), &none, "");
            assert!(matches!(err, ProviderError::ServerError { .. }), "{code}");
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_429_reads_retry_after() {
        let err = classify_status(
            ProviderKind::OpenAi,
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "2")]),
            "",
        );
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: ProviderKind::OpenAi,
                retry_after_ms: Some(2000),
            }
        );
    }

    #[test]
    fn test_reset_hint_only_fills_missing_retry_after() {
        let p = ProviderKind::OpenAi;
        let bare = ProviderError::RateLimited {
            provider: p,
            retry_after_ms: None,
        };
        assert_eq!(
            with_reset_hint(bare, Some(20_000)),
            ProviderError::RateLimited {
                provider: p,
                retry_after_ms: Some(20_000),
            }
        );

        let explicit = ProviderError::RateLimited {
            provider: p,
            retry_after_ms: Some(500),
        };
        assert_eq!(with_reset_hint(explicit.clone(), Some(20_000)), explicit);

        let auth = ProviderError::AuthFailed { provider: p };
        assert_eq!(with_reset_hint(auth.clone(), Some(20_000)), auth);
    }

    #[test]
    fn test_retry_after_variants() {
        assert_eq!(retry_after_ms(&headers(&[("retry-after", "0.5")])), Some(500));
        assert_eq!(
            retry_after_ms(&headers(&[("retry-after-ms", "750"), ("retry-after", "9")])),
            Some(750)
        );
        assert_eq!(
            retry_after_ms(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("1s"), Some(1_000));
        assert_eq!(parse_duration_ms("6m0s"), Some(360_000));
        assert_eq!(parse_duration_ms("20ms"), Some(20));
        assert_eq!(parse_duration_ms("1.5s"), Some(1_500));
        assert_eq!(parse_duration_ms("1h2m"), Some(3_720_000));
        assert_eq!(parse_duration_ms(""), None);
        assert_eq!(parse_duration_ms("soon"), None);
        assert_eq!(parse_duration_ms("5d"), None);
    }

    #[test]
    fn test_rfc3339_delay() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(rfc3339_delay_ms("2025-03-10T12:00:30Z", now), Some(30_000));
        assert_eq!(rfc3339_delay_ms("2025-03-10T11:59:00Z", now), Some(0));
        assert_eq!(rfc3339_delay_ms("garbage", now), None);
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(1_000);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), MAX_ERROR_EXCERPT + 3);
        assert_eq!(excerpt("  hi \n"), "hi");
    }
}
