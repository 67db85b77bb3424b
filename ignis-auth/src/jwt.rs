use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Map, Value};
use tracing::debug;

use ignis_core::{CurrentUser, IgnisError, RequestContext};

use crate::crypto::{AesCipher, AesMode};
use crate::strategy::AuthStrategy;

/// Standard JWT claims preserved verbatim in the token.
pub const STANDARD_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "jti", "nbf", "exp", "iat"];

/// A role carried inside the token, transported as a pipe-separated
/// `id|identifier|priority` string before encryption.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub id: String,
    pub identifier: String,
    pub priority: i64,
}

impl Role {
    pub fn to_pipe(&self) -> String {
        format!("{}|{}|{}", self.id, self.identifier, self.priority)
    }

    pub fn from_pipe(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '|');
        Some(Self {
            id: parts.next()?.to_string(),
            identifier: parts.next()?.to_string(),
            priority: parts.next()?.parse().ok()?,
        })
    }
}

/// JWT strategy configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for the outer JWT signature.
    pub secret: String,
    pub algorithm: Algorithm,
    /// Secret for the symmetric claim encryption.
    pub aes_secret: String,
    pub aes_mode: AesMode,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Token lifetime applied at issue time.
    pub expires_in_secs: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>, aes_secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            aes_secret: aes_secret.into(),
            aes_mode: AesMode::default(),
            issuer: None,
            audience: None,
            expires_in_secs: 3600,
        }
    }
}

/// Issues and verifies tokens whose non-standard claims are encrypted.
///
/// Standard claims stay verbatim; every other claim has both key and
/// value AES-encrypted. `null` claim values are skipped at issue time.
pub struct JwtTokenService {
    config: JwtConfig,
    cipher: AesCipher,
}

impl JwtTokenService {
    pub fn new(config: JwtConfig) -> Self {
        let cipher = AesCipher::new(&config.aes_secret, config.aes_mode);
        Self { config, cipher }
    }

    /// Issue a token from claims and roles.
    pub fn issue(&self, claims: &Map<String, Value>, roles: &[Role]) -> Result<String, IgnisError> {
        let mut out = Map::new();
        for (key, value) in claims {
            if STANDARD_CLAIMS.contains(&key.as_str()) {
                out.insert(key.clone(), value.clone());
                continue;
            }
            if value.is_null() {
                continue;
            }
            self.seal_claim(&mut out, key, value)?;
        }

        if !roles.is_empty() {
            let pipes = Value::Array(roles.iter().map(|r| Value::String(r.to_pipe())).collect());
            self.seal_claim(&mut out, "roles", &pipes)?;
        }

        let now = chrono::Utc::now().timestamp();
        out.entry("iat".to_string()).or_insert(json!(now));
        out.entry("exp".to_string())
            .or_insert(json!(now + self.config.expires_in_secs));
        if let Some(issuer) = &self.config.issuer {
            out.entry("iss".to_string()).or_insert(json!(issuer));
        }
        if let Some(audience) = &self.config.audience {
            out.entry("aud".to_string()).or_insert(json!(audience));
        }

        encode(
            &Header::new(self.config.algorithm),
            &Value::Object(out),
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| IgnisError::internal(format!("token encoding failed: {e}")))
    }

    /// Verify a token: outer signature plus standard claims, then decrypt
    /// the non-standard claims. Returns the flattened claims and roles.
    pub fn verify(&self, token: &str) -> Result<(Map<String, Value>, Vec<Role>), IgnisError> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &self.config.audience {
            validation.set_audience(&[audience]);
        }

        let data = decode::<Value>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| IgnisError::unauthenticated(format!("invalid token: {e}")))?;

        let raw = data
            .claims
            .as_object()
            .cloned()
            .ok_or_else(|| IgnisError::unauthenticated("token claims are not an object"))?;

        let mut claims = Map::new();
        let mut roles = Vec::new();
        for (key, value) in raw {
            if STANDARD_CLAIMS.contains(&key.as_str()) {
                claims.insert(key, value);
                continue;
            }
            let name = self
                .cipher
                .decrypt(&key)
                .map_err(|_| IgnisError::unauthenticated("claim key decryption failed"))?;
            let sealed = value
                .as_str()
                .ok_or_else(|| IgnisError::unauthenticated("encrypted claim is not a string"))?;
            let plain = self
                .cipher
                .decrypt(sealed)
                .map_err(|_| IgnisError::unauthenticated("claim value decryption failed"))?;
            let value: Value = serde_json::from_str(&plain)
                .unwrap_or_else(|_| Value::String(plain.clone()));

            if name == "roles" {
                if let Some(items) = value.as_array() {
                    roles = items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(Role::from_pipe)
                        .collect();
                }
            }
            claims.insert(name, value);
        }

        Ok((claims, roles))
    }

    fn seal_claim(
        &self,
        out: &mut Map<String, Value>,
        key: &str,
        value: &Value,
    ) -> Result<(), IgnisError> {
        let sealed_key = self.cipher.encrypt(key)?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| IgnisError::internal(format!("claim serialization failed: {e}")))?;
        let sealed_value = self.cipher.encrypt(&serialized)?;
        out.insert(sealed_key, Value::String(sealed_value));
        Ok(())
    }
}

/// Bearer-token strategy backed by [`JwtTokenService`].
pub struct JwtStrategy {
    service: JwtTokenService,
}

impl JwtStrategy {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            service: JwtTokenService::new(config),
        }
    }

    pub fn service(&self) -> &JwtTokenService {
        &self.service
    }

    fn bearer_token<'a>(ctx: &'a RequestContext) -> Option<&'a str> {
        ctx.header("authorization")?.strip_prefix("Bearer ")
    }
}

#[async_trait]
impl AuthStrategy for JwtStrategy {
    fn name(&self) -> &str {
        "jwt"
    }

    async fn extract_credentials(&self, ctx: &RequestContext) -> Option<Value> {
        Self::bearer_token(ctx).map(|token| json!({ "token": token }))
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Result<Option<CurrentUser>, IgnisError> {
        let Some(token) = Self::bearer_token(ctx) else {
            return Ok(None);
        };
        match self.service.verify(token) {
            Ok((claims, _roles)) => {
                let user_id = claims
                    .get("userId")
                    .and_then(Value::as_str)
                    .or_else(|| claims.get("sub").and_then(Value::as_str))
                    .map(str::to_string);
                Ok(Some(CurrentUser {
                    user_id,
                    claims,
                }))
            }
            Err(err) => {
                debug!(error = %err, "JWT verification failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn service() -> JwtTokenService {
        JwtTokenService::new(JwtConfig::new("signing-secret", "encryption-secret"))
    }

    fn claims() -> Map<String, Value> {
        json!({
            "sub": "user-1",
            "jti": "token-1",
            "userId": "user-1",
            "plan": {"tier": "pro", "seats": 5},
            "nickname": null
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn roles() -> Vec<Role> {
        vec![
            Role {
                id: "1".into(),
                identifier: "admin".into(),
                priority: 10,
            },
            Role {
                id: "2".into(),
                identifier: "editor".into(),
                priority: 5,
            },
        ]
    }

    #[test]
    fn issue_verify_round_trip() {
        let service = service();
        let token = service.issue(&claims(), &roles()).unwrap();
        let (decoded, decoded_roles) = service.verify(&token).unwrap();

        assert_eq!(decoded["sub"], "user-1");
        assert_eq!(decoded["jti"], "token-1");
        assert_eq!(decoded["userId"], "user-1");
        assert_eq!(decoded["plan"]["tier"], "pro");
        assert_eq!(decoded_roles, roles());
        assert!(decoded.get("exp").is_some());
        assert!(decoded.get("iat").is_some());
    }

    #[test]
    fn null_claims_are_skipped() {
        let service = service();
        let token = service.issue(&claims(), &[]).unwrap();
        let (decoded, _) = service.verify(&token).unwrap();
        assert!(!decoded.contains_key("nickname"));
    }

    #[test]
    fn non_standard_claims_are_not_plaintext_in_payload() {
        let service = service();
        let token = service.issue(&claims(), &roles()).unwrap();
        let payload_b64 = token.split('.').nth(1).unwrap();
        let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(payload_b64).unwrap()).unwrap();

        // Standard claims are verbatim; non-standard keys and values are not.
        assert!(payload.contains("user-1"));
        assert!(!payload.contains("userId"));
        assert!(!payload.contains("plan"));
        assert!(!payload.contains("admin|"));
        assert!(!payload.contains("admin"));
    }

    #[test]
    fn wrong_signing_secret_is_rejected() {
        let service = service();
        let token = service.issue(&claims(), &[]).unwrap();
        let other = JwtTokenService::new(JwtConfig::new("other-secret", "encryption-secret"));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn wrong_aes_secret_fails_claim_decryption() {
        let service = service();
        let token = service.issue(&claims(), &[]).unwrap();
        let other = JwtTokenService::new(JwtConfig::new("signing-secret", "other-encryption"));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn role_pipe_round_trip() {
        let role = Role {
            id: "42".into(),
            identifier: "ops".into(),
            priority: 3,
        };
        assert_eq!(role.to_pipe(), "42|ops|3");
        assert_eq!(Role::from_pipe("42|ops|3"), Some(role));
        assert!(Role::from_pipe("no-priority|x").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut config = JwtConfig::new("signing-secret", "encryption-secret");
        config.expires_in_secs = -120;
        let service = JwtTokenService::new(config);
        let token = service.issue(&claims(), &[]).unwrap();
        let err = JwtTokenService::new(JwtConfig::new("signing-secret", "encryption-secret"))
            .verify(&token)
            .unwrap_err();
        assert_eq!(err.kind, ignis_core::ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn strategy_extracts_bearer_and_authenticates() {
        let strategy = JwtStrategy::new(JwtConfig::new("signing-secret", "encryption-secret"));
        let token = strategy.service().issue(&claims(), &[]).unwrap();
        let ctx = RequestContext::new("get", "/me")
            .with_header("Authorization", format!("Bearer {token}"));

        assert!(strategy.extract_credentials(&ctx).await.is_some());
        let user = strategy.authenticate(&ctx).await.unwrap().unwrap();
        assert_eq!(user.user_id.as_deref(), Some("user-1"));
        assert_eq!(user.claims["plan"]["seats"], 5);

        let anonymous = RequestContext::new("get", "/me");
        assert!(strategy.extract_credentials(&anonymous).await.is_none());
    }

    #[tokio::test]
    async fn strategy_rejects_tampered_token() {
        let strategy = JwtStrategy::new(JwtConfig::new("signing-secret", "encryption-secret"));
        let token = strategy.service().issue(&claims(), &[]).unwrap();
        let tampered = format!("{token}x");
        let ctx = RequestContext::new("get", "/me")
            .with_header("Authorization", format!("Bearer {tampered}"));
        assert!(strategy.authenticate(&ctx).await.unwrap().is_none());
    }
}
