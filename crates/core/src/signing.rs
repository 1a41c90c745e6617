//! Hawk-style request signing for traffic with the HMRC integration.
//!
//! The authorization header carries `id`, `ts`, `nonce`, `hash` and `mac`.
//! `hash` covers the content type and body; `mac` is an HMAC-SHA256 over the
//! normalized request string keyed with the shared secret. Both are hex.
//! A receiver accepts each `id`/`nonce` pair once while it is remembered.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HEADER_SCHEME: &str = "Hawk";

#[derive(Clone, Debug)]
pub struct HawkCredentials {
    pub id: String,
    pub key: SecretString,
}

impl HawkCredentials {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self { id: id.into(), key: SecretString::from(key.into()) }
    }
}

/// The parts of an HTTP request covered by the signature.
#[derive(Clone, Copy, Debug)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HawkHeader {
    pub id: String,
    pub ts: i64,
    pub nonce: String,
    pub hash: String,
    pub mac: String,
}

impl HawkHeader {
    pub fn to_header_value(&self) -> String {
        format!(
            "{HEADER_SCHEME} id=\"{}\", ts=\"{}\", nonce=\"{}\", hash=\"{}\", mac=\"{}\"",
            self.id, self.ts, self.nonce, self.hash, self.mac
        )
    }

    pub fn parse(value: &str) -> Result<Self, SignatureError> {
        let attributes = value
            .trim()
            .strip_prefix(HEADER_SCHEME)
            .ok_or(SignatureError::Malformed("missing Hawk scheme"))?;

        let (mut id, mut ts, mut nonce, mut hash, mut mac) = (None, None, None, None, None);
        for attribute in attributes.split(',') {
            let Some((key, raw)) = attribute.trim().split_once('=') else {
                return Err(SignatureError::Malformed("attribute without value"));
            };
            let value = raw.trim().trim_matches('"').to_owned();
            match key.trim() {
                "id" => id = Some(value),
                "ts" => ts = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed("ts is not a number"))?),
                "nonce" => nonce = Some(value),
                "hash" => hash = Some(value),
                "mac" => mac = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            id: id.ok_or(SignatureError::Malformed("missing id"))?,
            ts: ts.ok_or(SignatureError::Malformed("missing ts"))?,
            nonce: nonce.ok_or(SignatureError::Malformed("missing nonce"))?,
            hash: hash.ok_or(SignatureError::Malformed("missing hash"))?,
            mac: mac.ok_or(SignatureError::Malformed("missing mac"))?,
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed authorization header: {0}")]
    Malformed(&'static str),
    #[error("unknown credentials id `{0}`")]
    UnknownId(String),
    #[error("timestamp outside the allowed skew of {skew_seconds}s")]
    StaleTimestamp { skew_seconds: i64 },
    #[error("payload hash mismatch")]
    PayloadMismatch,
    #[error("request mac mismatch")]
    BadMac,
    #[error("nonce `{0}` has already been used")]
    Replayed(String),
    #[error("signing key cannot be used")]
    InvalidKey,
}

/// Nonces of authenticated requests, keyed `hawk:{id}:{nonce}`. Entries are
/// forgotten once they are older than the time-to-live.
#[derive(Debug)]
pub struct NonceCache {
    ttl: Duration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NonceCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self { ttl: Duration::seconds(ttl_seconds.max(1)), seen: Mutex::new(HashMap::new()) }
    }

    /// Sized for a receiver allowing `skew_seconds` of clock skew: a nonce
    /// outlives every timestamp that still passes the skew check.
    pub fn for_skew(skew_seconds: i64) -> Self {
        Self::new(skew_seconds.saturating_mul(2))
    }

    /// Remembers the pair. Returns false when it is already remembered.
    pub fn insert(&self, id: &str, nonce: &str, now: DateTime<Utc>) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.retain(|_, first_seen| now - *first_seen < self.ttl);
        let key = format!("hawk:{id}:{nonce}");
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(seen) => seen.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn sign(
    credentials: &HawkCredentials,
    request: &SignedRequest<'_>,
    ts: i64,
    nonce: &str,
) -> Result<HawkHeader, SignatureError> {
    let hash = payload_hash(request.content_type, request.body);
    let mac = request_mac(credentials, request, ts, nonce, &hash)?.finalize().into_bytes();
    Ok(HawkHeader { id: credentials.id.clone(), ts, nonce: nonce.to_owned(), hash, mac: hex::encode(mac) })
}

/// Signs with the current time and a fresh random nonce.
pub fn sign_now(
    credentials: &HawkCredentials,
    request: &SignedRequest<'_>,
    now: DateTime<Utc>,
) -> Result<HawkHeader, SignatureError> {
    let nonce: String = rand::thread_rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    sign(credentials, request, now.timestamp(), &nonce)
}

/// Checks an inbound authorization header against the known credentials and
/// records its nonce. Returns the credentials id on success.
pub fn verify(
    header_value: &str,
    known: &[HawkCredentials],
    request: &SignedRequest<'_>,
    now: DateTime<Utc>,
    skew_seconds: i64,
    nonces: &NonceCache,
) -> Result<String, SignatureError> {
    let header = HawkHeader::parse(header_value)?;
    let credentials = known
        .iter()
        .find(|credentials| credentials.id == header.id)
        .ok_or_else(|| SignatureError::UnknownId(header.id.clone()))?;

    if (now.timestamp() - header.ts).abs() > skew_seconds {
        return Err(SignatureError::StaleTimestamp { skew_seconds });
    }
    let expected_hash = payload_hash(request.content_type, request.body);
    if !bool::from(header.hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
        return Err(SignatureError::PayloadMismatch);
    }
    let provided = hex::decode(&header.mac).map_err(|_| SignatureError::BadMac)?;
    request_mac(credentials, request, header.ts, &header.nonce, &header.hash)?
        .verify_slice(&provided)
        .map_err(|_| SignatureError::BadMac)?;

    if !nonces.insert(&header.id, &header.nonce, now) {
        return Err(SignatureError::Replayed(header.nonce));
    }
    Ok(header.id)
}

fn payload_hash(content_type: &str, body: &[u8]) -> String {
    let mut digest = Sha256::new();
    digest.update(b"hawk.1.payload\n");
    digest.update(content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase().as_bytes());
    digest.update(b"\n");
    digest.update(body);
    digest.update(b"\n");
    hex::encode(digest.finalize())
}

fn request_mac(
    credentials: &HawkCredentials,
    request: &SignedRequest<'_>,
    ts: i64,
    nonce: &str,
    hash: &str,
) -> Result<HmacSha256, SignatureError> {
    let normalized = format!(
        "hawk.1.header\n{ts}\n{nonce}\n{}\n{}\n{}\n{}\n{hash}\n\n",
        request.method.to_ascii_uppercase(),
        request.path,
        request.host.to_ascii_lowercase(),
        request.port,
    );
    let mut mac = HmacSha256::new_from_slice(credentials.key.expose_secret().as_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(normalized.as_bytes());
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::signing::{
        sign, sign_now, verify, HawkCredentials, HawkHeader, NonceCache, SignatureError, SignedRequest,
    };

    fn request(body: &[u8]) -> SignedRequest<'_> {
        SignedRequest {
            method: "POST",
            path: "/api/v1/licences/hmrc-integration",
            host: "lite.local",
            port: 8080,
            content_type: "application/json",
            body,
        }
    }

    fn credentials() -> Vec<HawkCredentials> {
        vec![HawkCredentials::new("hmrc-integration", "shared-secret")]
    }

    #[test]
    fn signed_request_verifies_and_header_round_trips() {
        let now = Utc::now();
        let body = br#"{"usage_data_id":"u-1"}"#;
        let header = sign_now(&credentials()[0], &request(body), now).unwrap();
        let value = header.to_header_value();

        assert_eq!(HawkHeader::parse(&value).unwrap(), header);
        assert_eq!(
            verify(&value, &credentials(), &request(body), now, 60, &NonceCache::for_skew(60)).unwrap(),
            "hmrc-integration"
        );
    }

    #[test]
    fn tampering_and_stale_timestamps_are_rejected() {
        let now = Utc::now();
        let nonces = NonceCache::for_skew(60);
        let header = sign_now(&credentials()[0], &request(b"{}"), now).unwrap().to_header_value();

        assert_eq!(
            verify(&header, &credentials(), &request(b"{\"x\":1}"), now, 60, &nonces),
            Err(SignatureError::PayloadMismatch)
        );
        assert_eq!(
            verify(&header, &credentials(), &request(b"{}"), now + Duration::seconds(120), 60, &nonces),
            Err(SignatureError::StaleTimestamp { skew_seconds: 60 })
        );
        let other = vec![HawkCredentials::new("hmrc-integration", "another-secret")];
        assert_eq!(verify(&header, &other, &request(b"{}"), now, 60, &nonces), Err(SignatureError::BadMac));
        assert!(matches!(
            verify(&header, &[], &request(b"{}"), now, 60, &nonces),
            Err(SignatureError::UnknownId(_))
        ));
        assert!(matches!(HawkHeader::parse("Bearer abc"), Err(SignatureError::Malformed(_))));
        assert!(nonces.is_empty());
    }

    #[test]
    fn macs_that_are_not_hex_or_truncated_are_rejected() {
        let now = Utc::now();
        let nonces = NonceCache::for_skew(60);
        let mut header = sign_now(&credentials()[0], &request(b"{}"), now).unwrap();
        let genuine = header.mac.clone();

        header.mac = "zz".repeat(32);
        assert_eq!(
            verify(&header.to_header_value(), &credentials(), &request(b"{}"), now, 60, &nonces),
            Err(SignatureError::BadMac)
        );
        header.mac = genuine[..genuine.len() - 2].to_owned();
        assert_eq!(
            verify(&header.to_header_value(), &credentials(), &request(b"{}"), now, 60, &nonces),
            Err(SignatureError::BadMac)
        );
        header.mac = genuine.to_uppercase();
        assert_eq!(
            verify(&header.to_header_value(), &credentials(), &request(b"{}"), now, 60, &nonces).unwrap(),
            "hmrc-integration"
        );
    }

    #[test]
    fn a_nonce_is_accepted_once_within_its_lifetime() {
        let now = Utc::now();
        let nonces = NonceCache::for_skew(60);
        let header = sign(&credentials()[0], &request(b"{}"), now.timestamp(), "nonce-1").unwrap().to_header_value();

        assert!(verify(&header, &credentials(), &request(b"{}"), now, 60, &nonces).is_ok());
        assert_eq!(
            verify(&header, &credentials(), &request(b"{}"), now + Duration::seconds(30), 60, &nonces),
            Err(SignatureError::Replayed("nonce-1".to_owned()))
        );
        assert_eq!(nonces.len(), 1);

        // Once the nonce is forgotten the timestamp is already stale.
        assert_eq!(
            verify(&header, &credentials(), &request(b"{}"), now + Duration::seconds(121), 60, &nonces),
            Err(SignatureError::StaleTimestamp { skew_seconds: 60 })
        );
    }

    #[test]
    fn nonces_expire_per_credentials_id() {
        let now = Utc::now();
        let nonces = NonceCache::new(60);

        assert!(nonces.insert("hmrc-integration", "abc", now));
        assert!(!nonces.insert("hmrc-integration", "abc", now + Duration::seconds(59)));
        assert!(nonces.insert("lite-e2e", "abc", now));
        assert!(nonces.insert("hmrc-integration", "abc", now + Duration::seconds(60)));
    }
}
