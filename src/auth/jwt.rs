//! JWT issuance and validation
//! Access + refresh token pair, HS256, exact `nbf <= now < exp` window

use crate::{
    config::SecurityConfig,
    error::AppError,
    models::user::{Role, User},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Token kind, carried in the `token_type` claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub token_type: TokenKind,

    /// Issuer
    pub iss: String,
    /// Issued at
    pub iat: i64,
    /// Not before
    pub nbf: i64,
    /// Expiration
    pub exp: i64,
    /// Unique token identifier
    pub jti: String,
}

impl Claims {
    /// Claims for `user` valid from `now` for `ttl`
    pub fn for_user(
        user: &User,
        kind: TokenKind,
        issuer: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: user.id.to_string(),
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            token_type: kind,
            iss: issuer.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_access(&self) -> bool {
        self.token_type == TokenKind::Access
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type == TokenKind::Refresh
    }

    /// Seconds left before expiry (0 once expired)
    pub fn time_to_expire(&self, now: DateTime<Utc>) -> u64 {
        (self.exp - now.timestamp()).max(0) as u64
    }
}

/// Access/refresh pair issued at login
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// seconds until the access token expires
    pub expires_in: u64,
}

/// Stateless token service: secret, issuer and the two TTLs, nothing else
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_exp_secs: u64,
    refresh_token_exp_secs: u64,
}

impl TokenService {
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let secret = config.jwt_secret.expose_secret();

        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            access_token_exp_secs: config.access_token_exp_secs,
            refresh_token_exp_secs: config.refresh_token_exp_secs,
        })
    }

    pub fn access_token_ttl_secs(&self) -> u64 {
        self.access_token_exp_secs
    }

    pub fn refresh_token_ttl_secs(&self) -> u64 {
        self.refresh_token_exp_secs
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        let secs = match kind {
            TokenKind::Access => self.access_token_exp_secs,
            TokenKind::Refresh => self.refresh_token_exp_secs,
        };
        Duration::seconds(secs as i64)
    }

    /// Sign a claim set with the service secret
    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", claims.token_type.as_str(), e);
            AppError::Internal(format!("Failed to encode token: {}", e))
        })
    }

    fn issue(&self, user: &User, kind: TokenKind) -> Result<String, AppError> {
        let claims = Claims::for_user(user, kind, &self.issuer, Utc::now(), self.ttl(kind));
        self.sign(&claims)
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AppError> {
        self.issue(user, TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, user: &User) -> Result<String, AppError> {
        self.issue(user, TokenKind::Refresh)
    }

    /// Both tokens or neither
    pub fn issue_token_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let access_token = self.issue_access_token(user)?;
        let refresh_token = self.issue_refresh_token(user)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_token_exp_secs,
        })
    }

    /// Validate signature, algorithm, issuer and time window against the wall clock.
    /// The token kind is not checked here.
    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        self.validate_at(token, Utc::now())
    }

    /// Same as [`validate`](Self::validate) with an explicit "now"
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AppError> {
        let mut validation = Validation::new(ALGORITHM);
        // time window is checked below against `now`, without leeway
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "sub", "iss"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| classify(&e))?;

        let now = now.timestamp();
        if now >= claims.exp {
            return Err(AppError::TokenExpired);
        }
        if now < claims.nbf {
            return Err(AppError::TokenInvalid("token not yet valid".to_string()));
        }
        if claims.sub != claims.user_id.to_string() {
            return Err(AppError::TokenInvalid("subject mismatch".to_string()));
        }

        Ok(claims)
    }
}

/// Map a jsonwebtoken failure onto the token error kinds
fn classify(err: &jsonwebtoken::errors::Error) -> AppError {
    let kind = err.kind();
    tracing::debug!(error = %err, "Token rejected");

    match kind {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        ErrorKind::InvalidSignature => AppError::TokenInvalidSignature,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::MissingRequiredClaim(_) => {
            AppError::TokenMalformed("token could not be decoded".to_string())
        }
        ErrorKind::ImmatureSignature => AppError::TokenInvalid("token not yet valid".to_string()),
        ErrorKind::InvalidIssuer => AppError::TokenInvalid("unexpected issuer".to_string()),
        _ => AppError::TokenInvalid("token rejected".to_string()),
    }
}
