//! GitHub App installation-token authentication (spec §4.4 step 1): encode
//! an RS256 app JWT, exchange it for a short-lived installation token, and
//! cache the result until it's due for refresh.

use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use skillsmith_core::collaborators::Clock;

use crate::error::{Result, RuntimeError};

/// Refresh this long before actual expiry (spec §4.4: "≥ 5 minutes before
/// expiry").
pub const REFRESH_SKEW: chrono::Duration = chrono::Duration::minutes(5);

/// App JWTs are valid for at most 10 minutes per GitHub's API; a minute of
/// backdating absorbs clock skew between this host and GitHub's servers.
const JWT_BACKDATE_SECONDS: i64 = 60;
const JWT_LIFETIME_SECONDS: i64 = 9 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// The three auth strategies the ingestion pipeline falls back through, in
/// order (spec §4.4 step 1).
#[derive(Debug, Clone)]
pub enum AuthHeader {
    AppInstallation(String),
    StaticBearer(String),
    Anonymous,
}

/// Exchanges a signed app JWT for a short-lived installation token. Kept as
/// a trait so tests never need a real GitHub App registration.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn create_installation_token(
        &self,
        app_jwt: &str,
        installation_id: &str,
    ) -> Result<(String, DateTime<Utc>)>;
}

/// Converts PKCS#1 RSA DER (the `RSA PRIVATE KEY` form) into PKCS#8 DER (the
/// `PRIVATE KEY` form `jsonwebtoken`/`ring` require) by prefixing the
/// standard `rsaEncryption` `AlgorithmIdentifier` wrapper (spec §4.4).
pub fn pkcs1_der_to_pkcs8_der(pkcs1_der: &[u8]) -> Vec<u8> {
    const RSA_ENCRYPTION_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

    fn der_len(len: usize, out: &mut Vec<u8>) {
        if len < 0x80 {
            out.push(len as u8);
            return;
        }
        let bytes = len.to_be_bytes();
        let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(&significant);
    }

    fn der_seq(tag: u8, content: &[u8], out: &mut Vec<u8>) {
        out.push(tag);
        der_len(content.len(), out);
        out.extend_from_slice(content);
    }

    let mut algorithm = Vec::new();
    der_seq(0x06, &RSA_ENCRYPTION_OID, &mut algorithm); // OID
    algorithm.push(0x05);
    algorithm.push(0x00); // NULL
    let mut algorithm_identifier = Vec::new();
    der_seq(0x30, &algorithm, &mut algorithm_identifier);

    let mut private_key_octets = Vec::new();
    der_seq(0x04, pkcs1_der, &mut private_key_octets);

    let mut body = Vec::new();
    body.extend_from_slice(&[0x02, 0x01, 0x00]); // version INTEGER 0
    body.extend_from_slice(&algorithm_identifier);
    body.extend_from_slice(&private_key_octets);

    let mut out = Vec::new();
    der_seq(0x30, &body, &mut out);
    out
}

fn looks_like_pkcs1(pem: &str) -> bool {
    pem.contains("BEGIN RSA PRIVATE KEY")
}

pub struct AppAuthenticator {
    app_id: String,
    encoding_key: EncodingKey,
    exchange: Arc<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedToken>>,
}

impl AppAuthenticator {
    /// `private_key_pem` may be either PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
    /// (`PRIVATE KEY`); `jsonwebtoken::EncodingKey::from_rsa_pem` already
    /// performs the PKCS#1 → PKCS#8 rewrap internally for the PEM path —
    /// [`pkcs1_der_to_pkcs8_der`] exists for the raw-DER case (e.g. a key
    /// pulled out of a keyring entry with its PEM armor stripped).
    pub fn new(
        app_id: impl Into<String>,
        private_key_pem: &str,
        exchange: Arc<dyn TokenExchange>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if looks_like_pkcs1(private_key_pem) {
            tracing::debug!("app private key is PKCS#1; jsonwebtoken will rewrap it to PKCS#8");
        }
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| RuntimeError::Internal(format!("invalid app private key: {e}")))?;
        Ok(Self {
            app_id: app_id.into(),
            encoding_key,
            exchange,
            clock,
            cached: RwLock::new(None),
        })
    }

    fn mint_app_jwt(&self) -> Result<String> {
        let now = self.clock.now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_BACKDATE_SECONDS,
            exp: now + JWT_LIFETIME_SECONDS,
            iss: self.app_id.clone(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| RuntimeError::Internal(format!("failed to sign app jwt: {e}")))
    }

    pub async fn installation_token(&self, installation_id: &str) -> Result<String> {
        if let Some(cached) = self.cached.read().unwrap().as_ref() {
            if cached.expires_at - self.clock.now() > REFRESH_SKEW {
                return Ok(cached.token.clone());
            }
        }
        let jwt = self.mint_app_jwt()?;
        let (token, expires_at) = self.exchange.create_installation_token(&jwt, installation_id).await?;
        *self.cached.write().unwrap() = Some(CachedToken { token: token.clone(), expires_at });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkcs1_to_pkcs8_wraps_with_rsa_oid() {
        let fake_pkcs1 = vec![0x30, 0x03, 0x02, 0x01, 0x00]; // minimal SEQUENCE stand-in
        let pkcs8 = pkcs1_der_to_pkcs8_der(&fake_pkcs1);
        assert_eq!(pkcs8[0], 0x30); // outer SEQUENCE
        // rsaEncryption OID bytes must appear somewhere in the wrapper.
        let oid = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
        assert!(pkcs8.windows(oid.len()).any(|w| w == oid));
        // original PKCS#1 bytes are carried verbatim inside the OCTET STRING.
        assert!(pkcs8.windows(fake_pkcs1.len()).any(|w| w == fake_pkcs1.as_slice()));
    }
}
