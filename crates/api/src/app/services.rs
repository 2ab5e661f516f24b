//! Service wiring for the two gateways.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use paybridge_auth::{
    AssertionIssuer, AssertionSigner, AssertionVerifier, FederationConfig, HrSessionValidator, Hs256HrSessionValidator,
    PinHasher, SessionManager, SignatureVerifier,
};
use paybridge_infra::{FederationStores, IdentityResolver, StepUpAuthenticator, store::postgres};

use crate::app::cookies::CookiePolicy;
use crate::config::{HrGatewayConfig, PayrollGatewayConfig};

/// HR gateway: mints assertions for logged-in HR users.
pub struct HrServices {
    pub issuer: AssertionIssuer,
    pub validator: Arc<dyn HrSessionValidator>,
}

impl HrServices {
    pub fn new(
        signer: Arc<dyn AssertionSigner>,
        validator: Arc<dyn HrSessionValidator>,
        config: &FederationConfig,
        payroll_base_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer: AssertionIssuer::new(signer, config, payroll_base_url),
            validator,
        }
    }

    pub fn from_config(config: &HrGatewayConfig) -> anyhow::Result<Self> {
        let signer = config.load_signer()?;
        tracing::info!(kid = %config.signing_key_id, "loaded assertion signing key");

        Ok(Self::new(
            Arc::new(signer),
            Arc::new(Hs256HrSessionValidator::new(config.login_secret.as_bytes())),
            &config.federation,
            config.payroll_base_url.clone(),
        ))
    }
}

/// Payroll gateway: consumes assertions and runs the step-up flow.
pub struct PayrollServices {
    pub verifier: AssertionVerifier,
    pub resolver: IdentityResolver,
    pub step_up: StepUpAuthenticator,
    pub sessions: Arc<SessionManager>,
    pub stores: FederationStores,
    pub cookies: CookiePolicy,
}

impl PayrollServices {
    pub fn new(
        keys: Arc<dyn SignatureVerifier>,
        stores: FederationStores,
        hasher: PinHasher,
        session_secret: &[u8],
        config: &FederationConfig,
        cookies: CookiePolicy,
    ) -> Self {
        Self {
            verifier: AssertionVerifier::new(keys, config),
            resolver: IdentityResolver::new(stores.identities.clone()),
            step_up: StepUpAuthenticator::new(stores.pins.clone(), hasher, config),
            sessions: Arc::new(SessionManager::new(session_secret, config)),
            stores,
            cookies,
        }
    }

    pub async fn from_config(config: &PayrollGatewayConfig) -> anyhow::Result<Self> {
        let keys = config.load_trusted_keys()?;
        tracing::info!(kids = ?keys.key_ids().collect::<Vec<_>>(), "loaded trusted HR keys");

        let stores = build_stores(config.database_url.as_deref()).await?;
        let hasher = PinHasher::new().context("failed to configure PIN hasher")?;

        Ok(Self::new(
            Arc::new(keys),
            stores,
            hasher,
            config.session_secret.as_bytes(),
            &config.federation,
            CookiePolicy {
                secure: config.secure_cookies,
            },
        ))
    }
}

/// Postgres stores when a database URL is configured, in-memory otherwise.
pub async fn build_stores(database_url: Option<&str>) -> anyhow::Result<FederationStores> {
    match database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await.context("failed to connect to Postgres")?;
            postgres::migrate(&pool).await.context("failed to apply federation schema")?;
            tracing::info!("using Postgres federation stores");
            Ok(FederationStores::postgres(pool))
        }
        None => {
            tracing::warn!("using in-memory federation stores; state is lost on restart");
            Ok(FederationStores::in_memory())
        }
    }
}
