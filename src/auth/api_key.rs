//! Static API keys for the risk-report usage ingestion endpoints

use crate::{config::RiskReportConfig, error::AppError};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "x-api-key";

/// API key generator
pub struct ApiKeyGenerator;

impl ApiKeyGenerator {
    /// Format: rr_<40-char-random>
    pub fn generate() -> String {
        let random: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(40)
            .map(char::from)
            .collect();

        format!("rr_{}", random)
    }

    /// SHA-256 hex digest
    pub fn hash(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// First 8 characters followed by `****`, for logs
    pub fn mask(key: &str) -> String {
        let prefix: String = key.chars().take(8).collect();
        format!("{}****", prefix)
    }
}

/// Configured keys, kept only as digests
#[derive(Debug, Clone, Default)]
pub struct ApiKeySet {
    digests: Arc<[String]>,
}

impl ApiKeySet {
    pub fn from_config(config: &RiskReportConfig) -> Self {
        let digests: Vec<String> = config
            .api_keys
            .iter()
            .map(|k| k.expose_secret().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| ApiKeyGenerator::hash(&k))
            .collect();

        if digests.is_empty() {
            tracing::warn!(
                "No risk-report API keys configured; ingestion endpoints will reject all calls"
            );
        }

        Self {
            digests: Arc::from(digests),
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Check the `X-API-Key` header
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AppError::ApiKeyMissing)?;

        let digest = ApiKeyGenerator::hash(key);
        if self.digests.iter().any(|d| d == &digest) {
            Ok(())
        } else {
            tracing::warn!(api_key = %ApiKeyGenerator::mask(key), "Rejected API key");
            Err(AppError::ApiKeyInvalid)
        }
    }
}

/// API key middleware
pub async fn require_api_key(
    State(keys): State<ApiKeySet>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    keys.verify(req.headers())?;
    Ok(next.run(req).await)
}
