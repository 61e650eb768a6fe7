//! Payment webhook signatures.
//!
//! The gateway sends `x-signature: ts=<unix>,v1=<hex>` where `v1` is the
//! HMAC-SHA256 of the manifest `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`
//! keyed with the shared webhook secret. `ts` is in Unix seconds and must be
//! within [`TOLERANCE_SECS`] of the receiver's clock.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Largest accepted distance between `ts` and now, either direction.
pub const TOLERANCE_SECS: i64 = 300;

/// Why a signature was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No `x-signature` header.
    #[error("Missing signature header")]
    Missing,

    /// The header lacks `ts` or `v1`, or `v1` is not hex.
    #[error("Malformed signature header")]
    Malformed,

    /// The digest does not match.
    #[error("Signature mismatch")]
    Mismatch,

    /// `ts` is too far from now.
    #[error("Signature timestamp outside tolerance")]
    Stale,
}

/// Parsed `x-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader<'a> {
    ts: &'a str,
    v1: Vec<u8>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, SignatureError> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.trim()),
            Some(("v1", value)) => v1 = Some(value.trim()),
            _ => {}
        }
    }

    let (Some(ts), Some(v1)) = (ts, v1) else {
        return Err(SignatureError::Malformed);
    };
    let v1 = hex::decode(v1).map_err(|_| SignatureError::Malformed)?;
    Ok(SignatureHeader { ts, v1 })
}

fn manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!(
        "id:{};request-id:{request_id};ts:{ts};",
        data_id.to_ascii_lowercase()
    )
}

fn mac(secret: &str, manifest: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(manifest.as_bytes());
    Ok(mac)
}

/// Verify a webhook signature received at `now`.
///
/// The digest is checked before the timestamp, so a forged header reports
/// [`SignatureError::Mismatch`] whatever its `ts`.
///
/// # Errors
///
/// Returns the reason the signature was refused.
pub fn verify(
    secret: &str,
    header: Option<&str>,
    data_id: &str,
    request_id: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let header = parse_header(header.ok_or(SignatureError::Missing)?)?;
    let ts: i64 = header.ts.parse().map_err(|_| SignatureError::Malformed)?;
    mac(secret, &manifest(data_id, request_id, header.ts))?
        .verify_slice(&header.v1)
        .map_err(|_| SignatureError::Mismatch)?;

    if now.timestamp().abs_diff(ts) > TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Stale);
    }
    Ok(())
}

/// Produce an `x-signature` header value.
///
/// # Errors
///
/// Never fails for HMAC keys; the error type is shared with [`verify`].
pub fn sign(
    secret: &str,
    data_id: &str,
    request_id: &str,
    ts: i64,
) -> Result<String, SignatureError> {
    let ts = ts.to_string();
    let digest = mac(secret, &manifest(data_id, request_id, &ts))?
        .finalize()
        .into_bytes();
    Ok(format!("ts={ts},v1={}", hex::encode(digest)))
}
