//! Request signing for Coinbase Advanced Trade. Two key types are in the
//! wild and [`Credentials::mode`] auto-detects which: legacy HMAC-SHA256
//! retail keys, and Cloud API keys that sign a short-lived ES256 JWT per
//! request.

use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::Sha256;

use crate::config::credentials::{AuthMode, Credentials};
use crate::domain::errors::ErrorKind;

type HmacSha256 = Hmac<Sha256>;

const JWT_LIFETIME_SECONDS: i64 = 120;

#[derive(Serialize)]
struct JwtClaims {
    sub: String,
    iss: String,
    nbf: i64,
    exp: i64,
    uri: String,
}

/// `(header_name, header_value)` pairs to attach to the outgoing request.
pub fn sign_request(
    credentials: &Credentials,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<Vec<(&'static str, String)>, ErrorKind> {
    match credentials.mode {
        AuthMode::Hmac => sign_hmac(credentials, method, request_path, body),
        AuthMode::JwtEs256 => sign_jwt(credentials, method, request_path),
    }
}

fn sign_hmac(
    credentials: &Credentials,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<Vec<(&'static str, String)>, ErrorKind> {
    let timestamp = Utc::now().timestamp().to_string();
    let prehash = format!("{timestamp}{method}{request_path}{body}");

    let mut mac = HmacSha256::new_from_slice(credentials.secret.as_bytes())
        .map_err(|err| ErrorKind::ValidationError(format!("invalid HMAC secret: {err}")))?;
    mac.update(prehash.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(vec![
        ("CB-ACCESS-KEY", credentials.api_key.clone()),
        ("CB-ACCESS-SIGN", signature),
        ("CB-ACCESS-TIMESTAMP", timestamp),
    ])
}

fn sign_jwt(credentials: &Credentials, method: &str, request_path: &str) -> Result<Vec<(&'static str, String)>, ErrorKind> {
    let now = Utc::now().timestamp();
    let host = "api.coinbase.com";
    let claims = JwtClaims {
        sub: credentials.api_key.clone(),
        iss: "cdp".to_string(),
        nbf: now,
        exp: now + JWT_LIFETIME_SECONDS,
        uri: format!("{method} {host}{request_path}"),
    };

    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(credentials.api_key.clone());
    header.typ = Some("JWT".to_string());

    let encoding_key = EncodingKey::from_ec_pem(credentials.secret.as_bytes())
        .map_err(|err| ErrorKind::ValidationError(format!("invalid EC private key: {err}")))?;

    let token = jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|err| ErrorKind::ValidationError(format!("failed to sign JWT: {err}")))?;

    Ok(vec![("Authorization", format!("Bearer {token}"))])
}
