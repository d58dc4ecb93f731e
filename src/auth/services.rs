use tracing::{info, instrument, warn};

use crate::{
    error::{AccountError, ApiResult},
    state::AppState,
    users::{PublicUser, StoreError, UniqueField},
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) const REGISTER_FIELDS_REQUIRED: &str = "Все поля обязательны для заполнения";
pub(crate) const LOGIN_FIELDS_REQUIRED: &str = "Все поля обязательны";
pub(crate) const PASSWORD_TOO_SHORT: &str = "Пароль должен быть не менее 6 символов";

/// Argon2 is CPU bound; keep it off the async workers.
async fn hash_blocking(st: &AppState, plain: &str) -> ApiResult<String> {
    let passwords = st.passwords.clone();
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || passwords.hash(&plain))
        .await
        .map_err(|e| AccountError::Internal(e.into()))?
        .map_err(AccountError::Internal)
}

async fn verify_blocking(st: &AppState, plain: &str, hash: &str) -> ApiResult<bool> {
    let passwords = st.passwords.clone();
    let plain = plain.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || passwords.verify(&plain, &hash))
        .await
        .map_err(|e| AccountError::Internal(e.into()))?
        .map_err(AccountError::Internal)
}

/// Validate, check both unique fields, hash, then insert. Returns the new id.
///
/// The pre-checks give ordered messages (username before email); the UNIQUE
/// constraints still decide races between concurrent registrations.
#[instrument(skip(st, email, password))]
pub async fn register(st: &AppState, username: &str, email: &str, password: &str) -> ApiResult<i64> {
    if username.is_empty() || email.is_empty() || password.is_empty() {
        warn!("register with missing fields");
        return Err(AccountError::Validation(REGISTER_FIELDS_REQUIRED));
    }
    // Counted in characters, so "🔑🔑🔑" is three characters and too short.
    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AccountError::Validation(PASSWORD_TOO_SHORT));
    }

    if st.users.find_by_username(username).await?.is_some() {
        warn!("username already taken");
        return Err(AccountError::Conflict(UniqueField::Username));
    }
    if st.users.find_by_email(email).await?.is_some() {
        warn!("email already registered");
        return Err(AccountError::Conflict(UniqueField::Email));
    }

    let hash = hash_blocking(st, password).await?;

    let user_id = match st.users.create(username, email, &hash).await {
        Ok(id) => id,
        Err(StoreError::Duplicate(field)) => {
            warn!(%field, "lost registration race on unique field");
            return Err(AccountError::Conflict(field));
        }
        Err(StoreError::Database(e)) => return Err(AccountError::SaveFailed(e.into())),
    };

    info!(user_id, "user registered");
    Ok(user_id)
}

/// Unknown usernames and wrong passwords both end in [`AccountError::Auth`].
#[instrument(skip(st, password))]
pub async fn login(st: &AppState, username: &str, password: &str) -> ApiResult<i64> {
    if username.is_empty() || password.is_empty() {
        warn!("login with missing fields");
        return Err(AccountError::Validation(LOGIN_FIELDS_REQUIRED));
    }

    let Some(user) = st.users.find_by_username(username).await? else {
        // Pay the Argon2 cost anyway so a miss is not faster than a bad password.
        let dummy = st.passwords.dummy_hash().to_owned();
        verify_blocking(st, password, &dummy).await?;
        warn!("login unknown username");
        return Err(AccountError::Auth);
    };

    if !verify_blocking(st, password, &user.password_hash).await? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AccountError::Auth);
    }

    info!(user_id = user.id, "user logged in");
    Ok(user.id)
}

#[instrument(skip(st))]
pub async fn get_user(st: &AppState, id: i64) -> ApiResult<PublicUser> {
    st.users.find_by_id(id).await?.ok_or(AccountError::NotFound)
}

#[instrument(skip(st))]
pub async fn list_users(st: &AppState) -> ApiResult<Vec<PublicUser>> {
    Ok(st.users.list_all().await?)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use axum::http::StatusCode;

    use super::*;
    use crate::{
        auth::password,
        state::{self, test_config},
        users::{User, UserStore},
    };

    /// Counts calls and fails every one of them.
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn touch<T>(&self) -> Result<T, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[async_trait]
    impl UserStore for CountingStore {
        async fn create(&self, _u: &str, _e: &str, _h: &str) -> Result<i64, StoreError> {
            self.touch()
        }
        async fn find_by_username(&self, _u: &str) -> Result<Option<User>, StoreError> {
            self.touch()
        }
        async fn find_by_email(&self, _e: &str) -> Result<Option<User>, StoreError> {
            self.touch()
        }
        async fn find_by_id(&self, _id: i64) -> Result<Option<PublicUser>, StoreError> {
            self.touch()
        }
        async fn list_all(&self) -> Result<Vec<PublicUser>, StoreError> {
            self.touch()
        }
    }

    /// Finds nothing, then fails the insert with the given error.
    struct FailingInsertStore {
        on_create: fn() -> StoreError,
    }

    #[async_trait]
    impl UserStore for FailingInsertStore {
        async fn create(&self, _u: &str, _e: &str, _h: &str) -> Result<i64, StoreError> {
            Err((self.on_create)())
        }
        async fn find_by_username(&self, _u: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_email(&self, _e: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, _id: i64) -> Result<Option<PublicUser>, StoreError> {
            Ok(None)
        }
        async fn list_all(&self) -> Result<Vec<PublicUser>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn failing_insert_state(on_create: fn() -> StoreError) -> AppState {
        let store = Arc::new(FailingInsertStore { on_create });
        AppState::from_parts(store, password::fast(), test_config())
    }

    fn counting_state() -> (AppState, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        let st = AppState::from_parts(store.clone(), password::fast(), test_config());
        (st, store)
    }

    #[tokio::test]
    async fn register_then_login_returns_same_id() {
        let st = state::memory().await;
        let id = register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(login(&st, "alice", "secret1").await.unwrap(), id);
    }

    #[tokio::test]
    async fn duplicate_username_conflicts_regardless_of_email() {
        let st = state::memory().await;
        register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        let err = register(&st, "alice", "b@x.com", "other12").await.unwrap_err();
        assert!(matches!(err, AccountError::Conflict(UniqueField::Username)));
        assert_eq!(err.public_message(), "Имя пользователя уже занято");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_regardless_of_username() {
        let st = state::memory().await;
        register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        let err = register(&st, "bob", "a@x.com", "other12").await.unwrap_err();
        assert!(matches!(err, AccountError::Conflict(UniqueField::Email)));
    }

    #[tokio::test]
    async fn username_conflict_reported_before_email_conflict() {
        let st = state::memory().await;
        register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        let err = register(&st, "alice", "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Conflict(UniqueField::Username)));
    }

    #[tokio::test]
    async fn concurrent_same_username_registers_once() {
        let st = state::memory().await;
        let (a, b) = tokio::join!(
            register(&st, "alice", "a@x.com", "secret1"),
            register(&st, "alice", "b@x.com", "secret2"),
        );
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(AccountError::Conflict(UniqueField::Username))))
            .count();
        assert_eq!(conflicts, 1);
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(list_users(&st).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_time_duplicate_becomes_conflict() {
        let st = failing_insert_state(|| StoreError::Duplicate(UniqueField::Email));
        let err = register(&st, "bob", "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Conflict(UniqueField::Email)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Email уже зарегистрирован");
    }

    #[tokio::test]
    async fn insert_database_failure_becomes_save_failed() {
        let st = failing_insert_state(|| StoreError::Database(sqlx::Error::PoolTimedOut));
        let err = register(&st, "bob", "b@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::SaveFailed(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Ошибка при сохранении пользователя");
    }

    #[tokio::test]
    async fn password_length_is_not_utf16_units() {
        let st = state::memory().await;
        // six UTF-16 units, three characters
        let err = register(&st, "kim", "k@x.com", "🔑🔑🔑").await.unwrap_err();
        assert!(matches!(err, AccountError::Validation(PASSWORD_TOO_SHORT)));
        assert!(register(&st, "kim", "k@x.com", "🔑🔑🔑🔑🔑🔑").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_user_login_still_verifies_a_hash() {
        let st = state::memory().await;
        let err = login(&st, "nobody", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Auth));

        // A broken stand-in hash surfaces, so the miss path really runs Argon2.
        let mut st = st;
        st.passwords = password::fast().with_dummy_hash("not-a-phc-string");
        let err = login(&st, "nobody", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Internal(_)));
    }

    #[tokio::test]
    async fn failed_registration_persists_nothing() {
        let st = state::memory().await;
        register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        let _ = register(&st, "bob", "a@x.com", "secret1").await;
        let _ = register(&st, "carol", "c@x.com", "123").await;
        assert_eq!(list_users(&st).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_identically() {
        let st = state::memory().await;
        register(&st, "alice", "a@x.com", "secret1").await.unwrap();

        let wrong = login(&st, "alice", "not-it").await.unwrap_err();
        let unknown = login(&st, "nobody", "secret1").await.unwrap_err();

        assert!(matches!(wrong, AccountError::Auth));
        assert!(matches!(unknown, AccountError::Auth));
        assert_eq!(wrong.public_message(), unknown.public_message());
        assert_eq!(wrong.status(), unknown.status());
    }

    #[tokio::test]
    async fn short_password_rejected_before_store_access() {
        let (st, store) = counting_state();
        let err = register(&st, "alice", "a@x.com", "12345").await.unwrap_err();
        assert!(matches!(err, AccountError::Validation(PASSWORD_TOO_SHORT)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn password_length_counts_characters_not_bytes() {
        let st = state::memory().await;
        // six Cyrillic letters are twelve bytes
        assert!(register(&st, "ivan", "i@x.com", "пароль").await.is_ok());
        let err = register(&st, "petr", "p@x.com", "ключ").await.unwrap_err();
        assert!(matches!(err, AccountError::Validation(PASSWORD_TOO_SHORT)));
    }

    #[tokio::test]
    async fn empty_fields_rejected_before_store_access() {
        let (st, store) = counting_state();
        for (u, e, p) in [("", "a@x.com", "secret1"), ("a", "", "secret1"), ("a", "a@x.com", "")] {
            let err = register(&st, u, e, p).await.unwrap_err();
            assert!(matches!(err, AccountError::Validation(REGISTER_FIELDS_REQUIRED)));
        }
        let err = login(&st, "", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Validation(LOGIN_FIELDS_REQUIRED)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_internal() {
        let (st, _store) = counting_state();
        let err = register(&st, "alice", "a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AccountError::Internal(_)));
        let err = list_users(&st).await.unwrap_err();
        assert_eq!(err.public_message(), "Ошибка сервера");
    }

    #[tokio::test]
    async fn get_user_returns_public_view() {
        let st = state::memory().await;
        let id = register(&st, "alice", "a@x.com", "secret1").await.unwrap();
        let user = get_user(&st, id).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@x.com");

        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("created_at"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password"));
    }

    #[tokio::test]
    async fn get_user_unknown_id_is_not_found() {
        let st = state::memory().await;
        assert!(matches!(
            get_user(&st, 99).await.unwrap_err(),
            AccountError::NotFound
        ));
    }
}
