use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
    upload_audience: String,
    upload_expiry: Duration,
}

/// Why an upload token was rejected. There is no revocation list, so expiry
/// is the only way a well-formed token stops working.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadTokenError {
    #[error("upload token expired")]
    Expired,
    #[error("upload token invalid")]
    Invalid,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        anyhow::ensure!(!config.jwt_secret.is_empty(), "JWT_SECRET must not be empty");
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
            upload_audience: config.upload_token_audience.clone(),
            upload_expiry: Duration::days(config.upload_token_expiry_days),
        })
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        active_institution: Option<Uuid>,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            active_institution,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn session_expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn generate_upload_token(&self, application_id: Uuid, user_id: Uuid) -> Result<String> {
        self.generate_upload_token_with_ttl(application_id, user_id, self.upload_expiry)
    }

    pub fn generate_upload_token_with_ttl(
        &self,
        application_id: Uuid,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + ttl;
        let claims = UploadClaims {
            application_id,
            user_id,
            iss: self.issuer.clone(),
            aud: self.upload_audience.clone(),
            iat: now.timestamp().max(0) as usize,
            exp: exp.timestamp().max(0) as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_upload_token(&self, token: &str) -> Result<UploadClaims, UploadTokenError> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.upload_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        decode::<UploadClaims>(token.trim(), &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => UploadTokenError::Expired,
                _ => UploadTokenError::Invalid,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub active_institution: Option<Uuid>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadClaims {
    pub application_id: Uuid,
    pub user_id: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}
