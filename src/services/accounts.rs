use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::user::{Plan, UserProfile};

/// Credit bucket debited by image generation.
pub const IMAGE_GEN_API: &str = "image-gen";

/// Identity, plan and credit checks for callers.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Resolve a bearer token to a user. Fails with `Unauthorized` for bad
    /// tokens and unknown users.
    async fn authenticate(&self, token: &str) -> Result<UserProfile, AccountError>;

    async fn has_run_out_of_credits(&self, user_id: Uuid) -> Result<bool, AccountError>;

    async fn subtract_credit(&self, user_id: Uuid) -> Result<(), AccountError>;

    async fn add_usage_entry(&self, user_id: Uuid) -> Result<(), AccountError>;

    async fn health_check(&self) -> Result<(), AccountError>;
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: Uuid,
}

/// Accounts backed by Postgres, with HS256 access tokens issued by the auth
/// provider.
pub struct PgAccountService {
    db: PgPool,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl PgAccountService {
    pub fn new(db: PgPool, jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);
        Self {
            db,
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
        }
    }

    fn verify_token(&self, token: &str) -> Result<Uuid, AccountError> {
        decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.sub)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected access token");
                AccountError::Unauthorized
            })
    }
}

#[async_trait]
impl AccountService for PgAccountService {
    async fn authenticate(&self, token: &str) -> Result<UserProfile, AccountError> {
        let user_id = self.verify_token(token)?;

        let plan = queries::get_profile_plan(&self.db, user_id)
            .await?
            .ok_or(AccountError::Unauthorized)?;
        Ok(UserProfile {
            id: user_id,
            plan: Plan::from_profile(&plan),
        })
    }

    async fn has_run_out_of_credits(&self, user_id: Uuid) -> Result<bool, AccountError> {
        let balance = queries::get_credit_balance(&self.db, user_id, IMAGE_GEN_API).await?;
        Ok(balance.unwrap_or(0) <= 0)
    }

    async fn subtract_credit(&self, user_id: Uuid) -> Result<(), AccountError> {
        queries::subtract_credit(&self.db, user_id, IMAGE_GEN_API).await?;
        Ok(())
    }

    async fn add_usage_entry(&self, user_id: Uuid) -> Result<(), AccountError> {
        queries::add_usage_entry(&self.db, user_id, IMAGE_GEN_API).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AccountError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
