//! Pre-authentication credentials.
//!
//! The mailbox server accepts a login for a known address when the caller can
//! prove knowledge of the domain pre-auth key:
//!
//! ```text
//! preauth = hex( HMAC-SHA1( key, "<address>|name|<expires>|<timestamp_ms>" ) )
//! ```
//!
//! `expires` is always `0` (server default lifetime).

use hmac::{Hmac, Mac};
use reqwest::Url;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Account selector sent alongside the credential
pub const BY_NAME: &str = "name";
const EXPIRES: &str = "0";

/// A computed credential, valid for the timestamp it was signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreauthCredential {
    pub address: String,
    pub timestamp_ms: u64,
    pub signature: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PreauthError {
    #[error("pre-auth key is not configured")]
    MissingKey,

    #[error("invalid pre-auth URL {0}: {1}")]
    InvalidUrl(String, String),
}

/// Sign a pre-auth credential for `address` at `timestamp_ms`.
pub fn sign(key: &str, address: &str, timestamp_ms: u64) -> Result<PreauthCredential, PreauthError> {
    if key.is_empty() {
        return Err(PreauthError::MissingKey);
    }

    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).map_err(|_| PreauthError::MissingKey)?;
    mac.update(format!("{}|{}|{}|{}", address, BY_NAME, EXPIRES, timestamp_ms).as_bytes());

    Ok(PreauthCredential {
        address: address.to_string(),
        timestamp_ms,
        signature: hex::encode(mac.finalize().into_bytes()),
    })
}

/// Direct-login URL that lets a browser open a session without a password.
pub fn preauth_url(endpoint: &str, credential: &PreauthCredential) -> Result<Url, PreauthError> {
    let timestamp = credential.timestamp_ms.to_string();
    Url::parse_with_params(
        endpoint,
        &[
            ("account", credential.address.as_str()),
            ("by", BY_NAME),
            ("timestamp", timestamp.as_str()),
            ("expires", EXPIRES),
            ("preauth", credential.signature.as_str()),
        ],
    )
    .map_err(|e| PreauthError::InvalidUrl(endpoint.to_string(), e.to_string()))
}
