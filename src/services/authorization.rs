//! Token verification, password digests and per-tournament permission resolution.

use std::{
    collections::HashSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::ServiceError,
    state::{
        AppState,
        connections::Identity,
        models::ClientType,
        permissions::{Permission, default_roles, default_roles_for, permissions_of},
    },
};

/// Literal token granting a read-only identity.
pub const READONLY_TOKEN: &str = "readonly";

const WEBSOCKET_TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 24 * 60 * 60);
const REST_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Surface a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Websocket,
    Rest,
}

/// Connection token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Platform id.
    pub sub: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_id: Option<String>,
    pub client_type: ClientType,
    pub typ: TokenKind,
    pub exp: u64,
    pub iat: u64,
}

impl Claims {
    fn into_identity(self) -> Identity {
        Identity {
            client_type: Some(self.client_type),
            platform_id: self.sub,
            name: self.name,
            discord_id: self.discord_id,
        }
    }
}

/// Issues and verifies HS256 connection tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    /// Service signing with `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a token for `identity`.
    pub fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<String, ServiceError> {
        let client_type = identity
            .client_type
            .ok_or_else(|| ServiceError::Unauthorized("cannot issue a token for an anonymous identity".into()))?;
        let now = unix_timestamp();
        let lifetime = match kind {
            TokenKind::Websocket => WEBSOCKET_TOKEN_LIFETIME,
            TokenKind::Rest => REST_TOKEN_LIFETIME,
        };
        let claims = Claims {
            sub: identity.platform_id.clone(),
            name: identity.name.clone(),
            discord_id: identity.discord_id.clone(),
            client_type,
            typ: kind,
            exp: now + lifetime.as_secs(),
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ServiceError::InvalidInput(format!("token generation failed: {err}")))
    }

    /// Decode a token of one of the `accepted` kinds.
    pub fn verify(&self, token: &str, accepted: &[TokenKind]) -> Result<Claims, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => ServiceError::Unauthorized("token expired".into()),
                _ => ServiceError::Unauthorized("invalid token".into()),
            }
        })?;

        if !accepted.contains(&data.claims.typ) {
            return Err(ServiceError::Unauthorized("token not accepted here".into()));
        }
        Ok(data.claims)
    }

    /// Identity behind an optional bearer token. Anything unverifiable is anonymous.
    pub fn identify(&self, token: Option<&str>, accepted: &[TokenKind]) -> Identity {
        match token {
            None | Some("") => Identity::anonymous(),
            Some(READONLY_TOKEN) => Identity::read_only(),
            Some(token) => match self.verify(token, accepted) {
                Ok(claims) => claims.into_identity(),
                Err(err) => {
                    debug!(error = %err, "rejecting bearer token");
                    Identity::anonymous()
                }
            },
        }
    }

    /// Exchange a websocket token for a REST token of the same subject.
    pub fn convert_websocket_token(&self, token: &str) -> Result<String, ServiceError> {
        let claims = self.verify(token, &[TokenKind::Websocket])?;
        self.issue(&claims.into_identity(), TokenKind::Rest)
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hex SHA-256 digest of a join password. The empty password stays empty.
pub fn hash_password(password: &str) -> String {
    if password.is_empty() {
        return String::new();
    }
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Whether `candidate` opens a tournament protected by `stored_hash`.
pub fn password_matches(stored_hash: &str, candidate: &str) -> bool {
    stored_hash.is_empty() || stored_hash.eq_ignore_ascii_case(&hash_password(candidate))
}

/// Effective permissions of `identity` in a tournament.
///
/// Roster grants are unioned over both identity keys. Identities holding no
/// grant fall back to the player role when the tournament allows unauthorized viewing.
pub async fn resolve_permissions(state: &AppState, tournament_id: Uuid, identity: &Identity) -> HashSet<Permission> {
    let granted = state
        .manager()
        .permissions(tournament_id, &identity.keys())
        .await;
    if !granted.is_empty() {
        return granted;
    }

    match state.manager().settings(tournament_id).await {
        Some(settings) if settings.allow_unauthorized_view => permissions_of(
            &default_roles_for(tournament_id),
            &[default_roles::PLAYER.to_string()],
        ),
        _ => HashSet::new(),
    }
}

/// Whether `identity` holds `permission` in a tournament.
pub async fn has_permission(
    state: &AppState,
    tournament_id: Uuid,
    identity: &Identity,
    permission: Permission,
) -> bool {
    resolve_permissions(state, tournament_id, identity)
        .await
        .contains(&permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Identity {
        Identity {
            client_type: Some(ClientType::Player),
            platform_id: "76561198000000000".into(),
            name: "Player".into(),
            discord_id: Some("1234".into()),
        }
    }

    #[test]
    fn websocket_token_roundtrip() {
        let service = TokenService::new("test-secret");
        let token = service.issue(&player(), TokenKind::Websocket).unwrap();
        let identity = service.identify(Some(&token), &[TokenKind::Websocket]);
        assert_eq!(identity, player());
    }

    #[test]
    fn rest_token_is_not_a_websocket_token() {
        let service = TokenService::new("test-secret");
        let token = service.issue(&player(), TokenKind::Rest).unwrap();
        assert!(service.verify(&token, &[TokenKind::Websocket]).is_err());
        assert!(!service.identify(Some(&token), &[TokenKind::Websocket]).is_authenticated());
    }

    #[test]
    fn conversion_keeps_subject() {
        let service = TokenService::new("test-secret");
        let ws = service.issue(&player(), TokenKind::Websocket).unwrap();
        let rest = service.convert_websocket_token(&ws).unwrap();
        let claims = service.verify(&rest, &[TokenKind::Rest]).unwrap();
        assert_eq!(claims.sub, "76561198000000000");
        assert_eq!(claims.typ, TokenKind::Rest);
        assert!(service.convert_websocket_token(&rest).is_err());
    }

    #[test]
    fn foreign_signature_is_anonymous() {
        let token = TokenService::new("other").issue(&player(), TokenKind::Websocket).unwrap();
        let identity = TokenService::new("test-secret").identify(Some(&token), &[TokenKind::Websocket]);
        assert_eq!(identity, Identity::anonymous());
    }

    #[test]
    fn readonly_and_missing_tokens() {
        let service = TokenService::new("test-secret");
        assert_eq!(
            service.identify(Some(READONLY_TOKEN), &[TokenKind::Websocket]).client_type,
            Some(ClientType::ReadOnly)
        );
        assert!(!service.identify(None, &[TokenKind::Websocket]).is_authenticated());
    }

    #[test]
    fn password_digests() {
        let hash = hash_password("abc123");
        assert_eq!(hash.len(), 64);
        assert!(password_matches(&hash, "abc123"));
        assert!(!password_matches(&hash, "wrong"));
        assert!(password_matches("", "anything"));
        assert_eq!(hash_password(""), "");
    }
}
