use std::sync::Arc;

use jwt_simple::prelude::{Claims, Duration as JwtDuration, ECDSAP256KeyPairLike};
use url::Url;

use crate::error::CryptoError;
use crate::push::keys::ServerIdentity;

pub const TOKEN_TTL_HOURS: u64 = 12;

/// A signed delivery token together with the key that verifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub public_key: String,
}

impl AuthToken {
    /// Value of the `Authorization` header for a push request.
    pub fn header_value(&self) -> String {
        format!("vapid t={}, k={}", self.token, self.public_key)
    }
}

/// Issues ES256-signed VAPID tokens (RFC 8292) on behalf of the server
/// identity.
#[derive(Debug, Clone)]
pub struct AuthTokenIssuer {
    identity: Arc<ServerIdentity>,
    subject: String,
}

impl AuthTokenIssuer {
    pub fn new(identity: Arc<ServerIdentity>, contact_email: &str) -> Self {
        Self {
            identity,
            subject: format!("mailto:{}", contact_email.trim()),
        }
    }

    pub fn issue(&self, endpoint: &str) -> Result<AuthToken, CryptoError> {
        let claims = Claims::create(JwtDuration::from_hours(TOKEN_TTL_HOURS))
            .with_audience(audience(endpoint)?)
            .with_subject(&self.subject);
        let token = self
            .identity
            .signing_key()
            .sign(claims)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        Ok(AuthToken {
            token,
            public_key: self.identity.public_key_base64().to_string(),
        })
    }
}

/// Origin of the push service behind `endpoint`. Default ports are left out.
pub(crate) fn audience(endpoint: &str) -> Result<String, CryptoError> {
    let invalid = |reason: &str| CryptoError::Endpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(endpoint).map_err(|err| invalid(&err.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}
