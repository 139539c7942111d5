//! Account service
//!
//! Username/password accounts and the opaque bearer tokens that authorize
//! scans and device management:
//! - Registration with unique username and email
//! - Login issuing a UUID access token
//! - Token resolution into a per-request `AuthClaim`
//! - Logout and expired token cleanup

use crate::db::{bounded, is_unique_violation};
use crate::db::repositories::{AccessTokenRepository, UserRepository};
use crate::models::{AccessToken, AuthClaim, User};
use crate::services::clock::DynClock;
use crate::services::password::{hash_password, verify_password};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Error types for account operations
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Username or email already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad credentials, unknown or expired token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Underlying store failed
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Input for registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// Account management and token authentication
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn AccessTokenRepository>,
    clock: DynClock,
    token_ttl: Duration,
    store_timeout: std::time::Duration,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn AccessTokenRepository>,
        clock: DynClock,
        token_ttl: Duration,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            clock,
            token_ttl,
            store_timeout,
        }
    }

    /// Register a new account
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty username or password or a malformed email
    /// - `Conflict` if the username or email is taken
    pub async fn register(&self, input: RegisterInput) -> Result<User, AccountError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        validate_register_input(&username, &email, &input.password)?;

        if bounded(self.store_timeout, self.users.get_by_username(&username))
            .await?
            .is_some()
        {
            return Err(AccountError::Conflict(format!(
                "Username '{}' is already taken",
                username
            )));
        }
        if bounded(self.store_timeout, self.users.get_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AccountError::Conflict(format!(
                "Email '{}' is already registered",
                email
            )));
        }

        let password_hash = hash_password(&input.password)?;
        let user = User::new(username, email, password_hash, self.clock.now());
        // A concurrent registration can still win between the checks and the insert
        let created = match bounded(self.store_timeout, self.users.create(&user)).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(username = %user.username, "Lost registration race");
                return Err(AccountError::Conflict(
                    "Username or email is already registered".to_string(),
                ));
            }
            Err(e) => return Err(e.context("Failed to create user").into()),
        };

        tracing::info!(user_id = created.id, username = %created.username, "Registered user");
        Ok(created)
    }

    /// Verify credentials and issue a new access token
    pub async fn login(&self, input: LoginInput) -> Result<(AccessToken, User), AccountError> {
        let invalid = || AccountError::Unauthorized("Invalid username or password".to_string());

        let user = self
            .find_user_by_username_or_email(input.username_or_email.trim())
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&input.password, &user.password_hash)? {
            tracing::debug!(user_id = user.id, "Rejected login with bad password");
            return Err(invalid());
        }
        if !user.is_active {
            return Err(AccountError::Unauthorized("Account is disabled".to_string()));
        }

        let now = self.clock.now();
        let token = AccessToken {
            token: Uuid::new_v4().to_string(),
            user_id: user.id,
            issued_at: now,
            expires_at: now + self.token_ttl,
        };
        bounded(self.store_timeout, self.tokens.create(&token)).await?;

        tracing::info!(user_id = user.id, "User logged in");
        Ok((token, user))
    }

    /// Resolve a bearer token into the identity it stands for.
    ///
    /// Expired tokens are deleted on sight.
    pub async fn resolve(&self, token: &str) -> Result<AuthClaim, AccountError> {
        let stored = bounded(self.store_timeout, self.tokens.get(token))
            .await?
            .ok_or_else(|| AccountError::Unauthorized("Invalid access token".to_string()))?;

        if stored.is_expired(self.clock.now()) {
            if let Err(e) = bounded(self.store_timeout, self.tokens.delete(token)).await {
                tracing::warn!(error = %e, "Failed to delete expired access token");
            }
            return Err(AccountError::Unauthorized("Access token expired".to_string()));
        }

        Ok(stored.claim())
    }

    /// Invalidate a token. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), AccountError> {
        bounded(self.store_timeout, self.tokens.delete(token)).await?;
        Ok(())
    }

    /// Get an account by id
    pub async fn get_user(&self, user_id: i64) -> Result<User, AccountError> {
        bounded(self.store_timeout, self.users.get_by_id(user_id))
            .await?
            .ok_or_else(|| AccountError::Unauthorized("User no longer exists".to_string()))
    }

    /// Delete every expired token, returning how many were removed
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AccountError> {
        Ok(bounded(self.store_timeout, self.tokens.delete_expired(self.clock.now())).await?)
    }

    async fn find_user_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> Result<Option<User>, AccountError> {
        if let Some(user) =
            bounded(self.store_timeout, self.users.get_by_username(username_or_email)).await?
        {
            return Ok(Some(user));
        }
        Ok(bounded(self.store_timeout, self.users.get_by_email(username_or_email)).await?)
    }
}

fn validate_register_input(
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), AccountError> {
    if username.is_empty() {
        return Err(AccountError::Validation(
            "Username cannot be empty".to_string(),
        ));
    }
    if username.chars().count() > 50 {
        return Err(AccountError::Validation(
            "Username must be at most 50 characters".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AccountError::Validation(
            "Password cannot be empty".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AccountError::Validation("Invalid email format".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxAccessTokenRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use crate::services::clock::ManualClock;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    async fn setup_test_service() -> (AccountService, Arc<ManualClock>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = AccountService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxAccessTokenRepository::boxed(pool),
            clock.clone(),
            Duration::hours(168),
            std::time::Duration::from_secs(5),
        );
        (service, clock)
    }

    // ========================================================================
    // Registration tests
    // ========================================================================

    #[tokio::test]
    async fn test_register_success() {
        let (service, _clock) = setup_test_service().await;
        let user = service
            .register(RegisterInput::new("alice", "alice@example.com", "password123"))
            .await
            .expect("Failed to register");

        assert!(user.id > 0);
        assert_eq!(user.username, "alice");
        assert!(user.password_hash.starts_with("$argon2id$"));
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn test_register_duplicate_username_fails() {
        let (service, _clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "a1@example.com", "pw"))
            .await
            .unwrap();

        let result = service
            .register(RegisterInput::new("alice", "a2@example.com", "pw"))
            .await;
        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_fails() {
        let (service, _clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("a1", "same@example.com", "pw"))
            .await
            .unwrap();

        let result = service
            .register(RegisterInput::new("a2", "same@example.com", "pw"))
            .await;
        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    /// Lookups miss, as when a concurrent registration commits between the
    /// uniqueness checks and the insert.
    struct StaleLookupUsers {
        inner: SqlxUserRepository,
    }

    #[async_trait::async_trait]
    impl UserRepository for StaleLookupUsers {
        async fn create(&self, user: &User) -> anyhow::Result<User> {
            self.inner.create(user).await
        }
        async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
            self.inner.get_by_id(id).await
        }
        async fn get_by_username(&self, _username: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
        async fn get_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_register_race_is_conflict_not_storage() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let service = AccountService::new(
            Arc::new(StaleLookupUsers {
                inner: SqlxUserRepository::new(pool.clone()),
            }),
            SqlxAccessTokenRepository::boxed(pool),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::hours(1),
            std::time::Duration::from_secs(5),
        );

        service
            .register(RegisterInput::new("alice", "alice@example.com", "pw"))
            .await
            .unwrap();
        let result = service
            .register(RegisterInput::new("alice", "other@example.com", "pw"))
            .await;
        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (service, _clock) = setup_test_service().await;

        for input in [
            RegisterInput::new("  ", "x@example.com", "pw"),
            RegisterInput::new("bob", "x@example.com", ""),
            RegisterInput::new("bob", "not-an-email", "pw"),
            RegisterInput::new("b".repeat(51), "x@example.com", "pw"),
        ] {
            let result = service.register(input).await;
            assert!(matches!(result, Err(AccountError::Validation(_))));
        }
    }

    // ========================================================================
    // Login / token tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_with_username_or_email() {
        let (service, _clock) = setup_test_service().await;
        let user = service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();

        let (by_name, _) = service.login(LoginInput::new("alice", "secret")).await.unwrap();
        let (by_email, logged_in) = service
            .login(LoginInput::new("alice@example.com", "secret"))
            .await
            .unwrap();

        assert_ne!(by_name.token, by_email.token);
        assert_eq!(logged_in.id, user.id);
        assert!(Uuid::parse_str(&by_name.token).is_ok());
    }

    #[tokio::test]
    async fn test_login_bad_password_is_unauthorized() {
        let (service, _clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();

        let result = service.login(LoginInput::new("alice", "wrong")).await;
        assert!(matches!(result, Err(AccountError::Unauthorized(_))));

        let result = service.login(LoginInput::new("nobody", "secret")).await;
        assert!(matches!(result, Err(AccountError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_resolve_rejects_expired_token() {
        let (service, clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();
        let (token, _) = service.login(LoginInput::new("alice", "secret")).await.unwrap();

        clock.advance(Duration::hours(167));
        assert!(service.resolve(&token.token).await.is_ok());

        clock.advance(Duration::hours(1));
        assert!(matches!(
            service.resolve(&token.token).await,
            Err(AccountError::Unauthorized(_))
        ));
        // Deleted on sight, so rewinding does not revive it
        clock.advance(Duration::hours(-10));
        assert!(service.resolve(&token.token).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let (service, _clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();
        let (token, _) = service.login(LoginInput::new("alice", "secret")).await.unwrap();

        service.logout(&token.token).await.unwrap();
        assert!(service.resolve(&token.token).await.is_err());
        // Unknown tokens are a no-op
        service.logout("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_expired_tokens() {
        let (service, clock) = setup_test_service().await;
        service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();
        service.login(LoginInput::new("alice", "secret")).await.unwrap();
        service.login(LoginInput::new("alice", "secret")).await.unwrap();

        assert_eq!(service.cleanup_expired_tokens().await.unwrap(), 0);
        clock.advance(Duration::hours(169));
        assert_eq!(service.cleanup_expired_tokens().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_user() {
        let (service, _clock) = setup_test_service().await;
        let user = service
            .register(RegisterInput::new("alice", "alice@example.com", "secret"))
            .await
            .unwrap();

        assert_eq!(service.get_user(user.id).await.unwrap().username, "alice");
        assert!(service.get_user(user.id + 100).await.is_err());
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10))]

        /// A token issued at login resolves to the user that logged in.
        #[test]
        fn property_login_token_resolves_to_user(
            username in "[a-z]{3,10}",
            password in "[a-zA-Z0-9!@#$%^&*]{8,20}"
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let (service, _clock) = setup_test_service().await;
                let suffix = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
                let username = format!("{}_{}", username, suffix);

                let user = service
                    .register(RegisterInput::new(
                        username.clone(),
                        format!("{}@example.com", username),
                        password.clone(),
                    ))
                    .await
                    .expect("Registration should succeed");
                let (token, _) = service
                    .login(LoginInput::new(username, password))
                    .await
                    .expect("Login should succeed");
                let claim = service.resolve(&token.token).await.expect("Token should resolve");

                prop_assert_eq!(claim.user_id, user.id);
                prop_assert_eq!(claim.issued_at, token.issued_at);
                Ok(())
            });
            result?;
        }
    }
}
