//! Credential lifecycle: registration, login, bearer validation and the
//! profile operations built on top of them.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::TokenKind,
    dto::{AuthResponse, LoginRequest, ProfileUpdate, PublicUser, RegisterRequest},
    errors::AuthError,
    jwt::{SessionIssuer, TokenPair},
    password::CredentialHasher,
    repo_types::{NewUser, Role},
    store::{StoreError, UserStore},
    validation::{validate_login, validate_profile_update, validate_registration},
};

/// Tokens plus the sanitized account they were issued for.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub tokens: TokenPair,
    pub user: PublicUser,
}

impl From<LoginResult> for AuthResponse {
    fn from(r: LoginResult) -> Self {
        Self {
            access_token: r.tokens.access_token,
            refresh_token: r.tokens.refresh_token,
            access_expires_at: r.tokens.access_expires_at,
            refresh_expires_at: r.tokens.refresh_expires_at,
            user: r.user,
        }
    }
}

/// The credential engine. Holds only shared, immutable collaborators, so clones
/// can serve any number of concurrent requests.
///
/// Every operation is cancelled by dropping its future. Store writes are single
/// statements, so a cancelled call never leaves a partial mutation behind.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn CredentialHasher>,
    issuer: Arc<dyn SessionIssuer>,
    // hash checked against on unknown emails, built on first use
    dummy_hash: Arc<OnceCell<String>>,
}

const DUMMY_PASSWORD: &str = "not-a-real-account";

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn CredentialHasher>,
        issuer: Arc<dyn SessionIssuer>,
    ) -> Self {
        Self {
            store,
            hasher,
            issuer,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email.trim()))]
    pub async fn register(&self, req: RegisterRequest) -> Result<PublicUser, AuthError> {
        let req = RegisterRequest {
            first_name: req.first_name.trim().to_owned(),
            surname: req.surname.trim().to_owned(),
            email: req.email.trim().to_owned(),
            ..req
        };
        validate_registration(&req).map_err(AuthError::Validation)?;

        if self.store.get_user_by_email(&req.email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::AlreadyExists);
        }

        let RegisterRequest {
            first_name,
            surname,
            birthday,
            email,
            password,
            phone,
        } = req;
        let password_hash = self.hash_password(password).await?;

        let now = OffsetDateTime::now_utc();
        let new_user = NewUser {
            first_name,
            surname,
            birthday,
            email,
            phone,
            password_hash,
            is_active: true,
            is_verified: false,
            role: Role::User,
            created_at: now,
            updated_at: now,
        };

        let user = match self.store.create_user(new_user).await {
            Ok(u) => u,
            Err(StoreError::DuplicateEmail) => {
                warn!("email registered concurrently");
                return Err(AuthError::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user.id, "user registered");
        Ok(user.into())
    }

    #[instrument(skip(self, req), fields(email = %req.email.trim()))]
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResult, AuthError> {
        let LoginRequest { email, password } = req;
        let email = email.trim();
        validate_login(email, &password).map_err(AuthError::Validation)?;

        let Some(mut user) = self.store.get_user_by_email(email).await? else {
            // same Argon2 cost as a wrong password
            let dummy = self.dummy_hash().await?;
            self.verify_password(password, dummy).await?;
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !user.is_active {
            warn!(user_id = %user.id, "login to deactivated account");
            return Err(AuthError::AccountDeactivated);
        }

        if !self
            .verify_password(password, user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let now = OffsetDateTime::now_utc();
        self.store.update_last_login(user.id, now).await?;
        user.last_login = Some(now);
        user.updated_at = now;

        let tokens = self.issuer.issue(user.id)?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginResult {
            tokens,
            user: user.into(),
        })
    }

    /// Resolves an access token to its (still active) owner. Every failure is
    /// reported as [`AuthError::InvalidToken`]; the reason is only logged.
    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<PublicUser, AuthError> {
        let claims = self
            .issuer
            .parse(token, TokenKind::Access)
            .map_err(|e| {
                debug!(reason = %e, "access token rejected");
                AuthError::InvalidToken
            })?;

        match self.store.get_user_by_id(claims.sub).await? {
            Some(user) if user.is_active => Ok(user.into()),
            Some(user) => {
                debug!(user_id = %user.id, "token owner is deactivated");
                Err(AuthError::InvalidToken)
            }
            None => {
                debug!(user_id = %claims.sub, "token owner no longer exists");
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Exchanges a refresh token for a new pair. Does not touch the store.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<LoginResult, AuthError> {
        let claims = self
            .issuer
            .parse(refresh_token, TokenKind::Refresh)
            .map_err(|e| {
                debug!(reason = %e, "refresh token rejected");
                AuthError::InvalidToken
            })?;

        let Some(user) = self.store.get_user_by_id(claims.sub).await? else {
            debug!(user_id = %claims.sub, "refresh for missing user");
            return Err(AuthError::InvalidToken);
        };
        if !user.is_active {
            warn!(user_id = %user.id, "refresh for deactivated account");
            return Err(AuthError::AccountDeactivated);
        }

        let tokens = self.issuer.issue(user.id)?;
        debug!(user_id = %user.id, "token pair refreshed");
        Ok(LoginResult {
            tokens,
            user: user.into(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        self.store
            .get_user_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or(AuthError::NotFound)
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<PublicUser, AuthError> {
        validate_profile_update(&update).map_err(AuthError::Validation)?;

        let mut user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if let Some(first_name) = update.first_name {
            user.first_name = first_name.trim().to_owned();
        }
        if let Some(surname) = update.surname {
            user.surname = surname.trim().to_owned();
        }
        if let Some(birthday) = update.birthday {
            user.birthday = birthday;
        }
        if let Some(phone) = update.phone {
            user.phone = Some(phone);
        }
        user.updated_at = OffsetDateTime::now_utc();

        self.store.update_user(&user).await?;
        info!(user_id = %user.id, "profile updated");
        Ok(user.into())
    }

    // hashing runs on the blocking pool
    async fn hash_password(&self, plain: String) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(AuthError::internal)??;
        Ok(hash)
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash_password(DUMMY_PASSWORD.to_owned()))
            .await
            .cloned()
    }

    async fn verify_password(&self, plain: String, hash: String) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .map_err(AuthError::internal)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::date;

    use super::*;
    use crate::auth::{
        jwt::{test_config, test_keys, JwtKeys},
        memory::MemoryUserStore,
        password::{fast_hasher, Argon2Hasher, HashError},
        repo_types::User,
    };

    /// Fast hasher that counts verifications.
    struct CountingHasher {
        inner: Argon2Hasher,
        verifies: AtomicUsize,
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, plain: &str) -> Result<String, HashError> {
            self.inner.hash(plain)
        }

        fn verify(&self, plain: &str, hash: &str) -> bool {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(plain, hash)
        }
    }

    /// Memory store that counts calls and can simulate a lost race or an outage.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryUserStore,
        reads: AtomicUsize,
        writes: AtomicUsize,
        hide_existing: AtomicBool,
        unavailable: AtomicBool,
    }

    impl CountingStore {
        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("pool timed out".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserStore for CountingStore {
        async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.check()?;
            let created = self.inner.create_user(user).await?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(created)
        }

        async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.check()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.hide_existing.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_user_by_email(email).await
        }

        async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.check()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_user_by_id(id).await
        }

        async fn update_user(&self, user: &User) -> Result<(), StoreError> {
            self.check()?;
            self.inner.update_user(user).await?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
            self.check()?;
            self.inner.update_last_login(id, at).await?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service() -> (AuthService, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        let svc = AuthService::new(
            store.clone(),
            Arc::new(fast_hasher()),
            Arc::new(test_keys()),
        );
        (svc, store)
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ann".into(),
            surname: "Lee".into(),
            birthday: date!(1990 - 01 - 01),
            email: email.into(),
            password: "longpass1".into(),
            phone: None,
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    async fn deactivate(store: &CountingStore, email: &str) {
        let user = store.inner.get_user_by_email(email).await.unwrap().unwrap();
        store.inner.set_active(user.id, false).await;
    }

    #[tokio::test]
    async fn register_then_login_example() {
        let (svc, store) = service();

        let user = svc.register(registration("a@x.com")).await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(user.is_active);
        assert!(!user.is_verified);
        assert_eq!(user.role, Role::User);
        assert!(user.last_login.is_none());
        assert_eq!(user.created_at, user.updated_at);

        let stored = store.inner.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "longpass1");
        assert!(fast_hasher().verify("longpass1", &stored.password_hash));

        let result = svc.login(login("a@x.com", "longpass1")).await.unwrap();
        assert_eq!(result.user.id, user.id);
        assert!(result.user.last_login.is_some());
        assert!(!result.tokens.access_token.is_empty());
        assert!(!result.tokens.refresh_token.is_empty());
        assert!(result.tokens.access_expires_at < result.tokens.refresh_expires_at);

        let stored = store.inner.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_login, result.user.last_login);
    }

    #[tokio::test]
    async fn distinct_emails_get_distinct_ids() {
        let (svc, store) = service();
        let a = svc.register(registration("a@x.com")).await.unwrap();
        let b = svc.register(registration("b@x.com")).await.unwrap();
        let c = svc.register(registration("c@x.com")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.inner.len().await, 3);
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn register_trims_email_and_names() {
        let (svc, store) = service();
        let req = RegisterRequest {
            first_name: " Ann ".into(),
            ..registration("  a@x.com ")
        };
        let user = svc.register(req).await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.first_name, "Ann");
        assert!(store.inner.get_user_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();
        let err = svc.register(registration("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));
        assert_eq!(store.inner.len().await, 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_registration_admits_one() {
        let (svc, store) = service();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.register(registration("race@x.com")).await })
            })
            .collect();

        let mut created = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(AuthError::AlreadyExists) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((created, rejected), (1, 1));
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn unique_violation_after_lookup_maps_to_already_exists() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();

        // lookup misses, the insert hits the unique index
        store.hide_existing.store(true, Ordering::SeqCst);
        let err = svc.register(registration("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn invalid_registration_never_reaches_the_store() {
        let (svc, store) = service();
        let req = RegisterRequest {
            password: "short".into(),
            ..registration("a@x.com")
        };
        let err = svc.register(req).await.unwrap_err();
        match err {
            AuthError::Validation(fields) => assert_eq!(fields[0].field, "password"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn store_outage_is_internal() {
        let (svc, store) = service();
        store.unavailable.store(true, Ordering::SeqCst);
        let err = svc.register(registration("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        let err = svc.login(login("a@x.com", "longpass1")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();
        let writes = store.writes();

        let wrong = svc.login(login("a@x.com", "not-the-password")).await.unwrap_err();
        let unknown = svc.login(login("nobody@x.com", "longpass1")).await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn unknown_email_still_runs_a_verification() {
        let hasher = Arc::new(CountingHasher {
            inner: fast_hasher(),
            verifies: AtomicUsize::new(0),
        });
        let svc = AuthService::new(
            Arc::new(MemoryUserStore::new()),
            hasher.clone(),
            Arc::new(test_keys()),
        );
        svc.register(registration("a@x.com")).await.unwrap();

        let err = svc.login(login("nobody@x.com", "longpass1")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);

        let err = svc.login(login("a@x.com", "wrong-password")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);

        // the dummy hash is built once and reused
        svc.login(login("other@x.com", "longpass1")).await.unwrap_err();
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unrepresentable_token_expiry_fails_login_cleanly() {
        let keys = JwtKeys::from_config(&crate::config::JwtConfig {
            ttl_minutes: 60,
            refresh_ttl_minutes: 10_000_000_000,
            ..test_config()
        });
        let svc = AuthService::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(fast_hasher()),
            Arc::new(keys),
        );
        svc.register(registration("a@x.com")).await.unwrap();

        let err = svc.login(login("a@x.com", "longpass1")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn deactivated_account_cannot_login() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();
        deactivate(&store, "a@x.com").await;
        let writes = store.writes();

        for password in ["longpass1", "wrong-password"] {
            let err = svc.login(login("a@x.com", password)).await.unwrap_err();
            assert!(matches!(err, AuthError::AccountDeactivated));
        }
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn login_moves_last_login_forward() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();

        let first = svc.login(login("a@x.com", "longpass1")).await.unwrap();
        let second = svc.login(login("a@x.com", "longpass1")).await.unwrap();
        assert!(second.user.last_login >= first.user.last_login);
        assert_eq!(second.user.updated_at, second.user.last_login.unwrap());
        // one insert plus one last-login update per login
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn validate_token_resolves_owner() {
        let (svc, _) = service();
        let user = svc.register(registration("a@x.com")).await.unwrap();
        let result = svc.login(login("a@x.com", "longpass1")).await.unwrap();

        let owner = svc.validate_token(&result.tokens.access_token).await.unwrap();
        assert_eq!(owner.id, user.id);
        assert_eq!(owner.email, "a@x.com");
    }

    #[tokio::test]
    async fn validate_token_failures_are_uniform() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();
        let result = svc.login(login("a@x.com", "longpass1")).await.unwrap();

        let garbage = svc.validate_token("garbage").await.unwrap_err();
        let refresh = svc
            .validate_token(&result.tokens.refresh_token)
            .await
            .unwrap_err();
        deactivate(&store, "a@x.com").await;
        let inactive = svc
            .validate_token(&result.tokens.access_token)
            .await
            .unwrap_err();

        for err in [garbage, refresh, inactive] {
            assert!(matches!(err, AuthError::InvalidToken));
        }
    }

    #[tokio::test]
    async fn validate_token_for_unknown_user_is_invalid() {
        let (svc, _) = service();
        let tokens = test_keys().issue(Uuid::new_v4()).unwrap();
        let err = svc.validate_token(&tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_issues_new_pair() {
        let (svc, store) = service();
        svc.register(registration("a@x.com")).await.unwrap();
        let result = svc.login(login("a@x.com", "longpass1")).await.unwrap();
        let writes = store.writes();

        let refreshed = svc.refresh(&result.tokens.refresh_token).await.unwrap();
        assert_eq!(refreshed.user.id, result.user.id);
        assert!(svc.validate_token(&refreshed.tokens.access_token).await.is_ok());
        assert_eq!(store.writes(), writes);

        let err = svc.refresh(&result.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        deactivate(&store, "a@x.com").await;
        let err = svc.refresh(&result.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDeactivated));
    }

    #[tokio::test]
    async fn profile_lookup_and_update() {
        let (svc, _) = service();
        let user = svc.register(registration("a@x.com")).await.unwrap();

        let fetched = svc.get_profile(user.id).await.unwrap();
        assert_eq!(fetched.id, user.id);
        assert!(matches!(
            svc.get_profile(Uuid::new_v4()).await,
            Err(AuthError::NotFound)
        ));

        let updated = svc
            .update_profile(
                user.id,
                ProfileUpdate {
                    first_name: Some("Anna".into()),
                    phone: Some("+14155552671".into()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Anna");
        assert_eq!(updated.surname, "Lee");
        assert_eq!(updated.phone.as_deref(), Some("+14155552671"));
        assert!(updated.updated_at >= user.updated_at);

        // credential survives a profile update
        assert!(svc.login(login("a@x.com", "longpass1")).await.is_ok());
    }

    #[tokio::test]
    async fn profile_update_rejects_bad_input_and_unknown_user() {
        let (svc, store) = service();
        let user = svc.register(registration("a@x.com")).await.unwrap();
        let writes = store.writes();

        let bad = ProfileUpdate {
            phone: Some("12345".into()),
            ..ProfileUpdate::default()
        };
        assert!(matches!(
            svc.update_profile(user.id, bad).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            svc.update_profile(Uuid::new_v4(), ProfileUpdate::default())
                .await,
            Err(AuthError::NotFound)
        ));
        assert_eq!(store.writes(), writes);
    }
}
