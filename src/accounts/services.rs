use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use super::{
    forms::{FormErrors, SignupForm, DUPLICATE_USERNAME, USERNAME},
    password::{check_password, equalize_timing, hash_password},
    repo::CreateAccountError,
    repo_types::{Account, NewAccount},
};
use crate::{
    error::AppError,
    sessions::{SessionKey, SessionRecord},
    state::AppState,
};

#[derive(Debug)]
pub enum SignupOutcome {
    /// The account exists and is signed in under `session`.
    Created {
        account: Account,
        session: SessionRecord,
    },
    Invalid(FormErrors),
}

/// Registers an account and signs it in.
///
/// Nothing is written unless the whole submission is valid. After creation
/// the credentials are checked again through [`authenticate`]; if that fails
/// the account is removed and the request ends in [`AppError::Inconsistent`].
#[instrument(skip(state, form, previous), fields(username = %form.username.trim()))]
pub async fn signup(
    state: &AppState,
    form: &SignupForm,
    previous: Option<&SessionKey>,
) -> Result<SignupOutcome, AppError> {
    let mut errors = form.validate();
    let cleaned = form.cleaned();

    if !errors.has(USERNAME) && state.accounts.username_exists(&cleaned.username).await? {
        errors.add(USERNAME, DUPLICATE_USERNAME);
    }
    if !errors.is_empty() {
        debug!(fields = errors.len(), "signup rejected");
        return Ok(SignupOutcome::Invalid(errors));
    }

    let password_hash = hash_password(&cleaned.password)?;
    let created = state
        .accounts
        .create(NewAccount {
            username: cleaned.username.clone(),
            email: cleaned.email.clone(),
            password_hash,
        })
        .await;
    let created = match created {
        Ok(account) => account,
        Err(CreateAccountError::DuplicateUsername) => {
            warn!("username taken between check and insert");
            errors.add(USERNAME, DUPLICATE_USERNAME);
            return Ok(SignupOutcome::Invalid(errors));
        }
        Err(CreateAccountError::Other(e)) => return Err(e.into()),
    };

    let Some(account) = authenticate(state, &cleaned.username, &cleaned.password).await? else {
        error!(account_id = %created.id, "new account failed re-authentication; removing it");
        if let Err(e) = state.accounts.delete(created.id).await {
            error!(error = %e, account_id = %created.id, "could not remove unusable account");
        }
        return Err(AppError::Inconsistent(format!(
            "account {} could not be authenticated right after creation",
            created.id
        )));
    };

    let session = login(state, &account, previous).await?;
    info!(account_id = %account.id, "account created");
    Ok(SignupOutcome::Created { account, session })
}

/// Checks credentials. Unknown usernames, wrong passwords and inactive
/// accounts are indistinguishable to the caller.
pub async fn authenticate(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Option<Account>, AppError> {
    let Some(account) = state.accounts.find_by_username(username).await? else {
        equalize_timing(password);
        return Ok(None);
    };
    if !check_password(password, &account.password_hash) {
        return Ok(None);
    }
    if !account.is_active {
        debug!(account_id = %account.id, "inactive account refused");
        return Ok(None);
    }
    Ok(Some(account))
}

/// Starts a session for `account`, discarding whatever session the client held.
pub async fn login(
    state: &AppState,
    account: &Account,
    previous: Option<&SessionKey>,
) -> Result<SessionRecord, AppError> {
    if let Some(previous) = previous {
        state.sessions.terminate(previous).await?;
    }
    let session = state
        .sessions
        .establish(account.id, state.config.session.ttl())
        .await?;
    state
        .accounts
        .touch_last_login(account.id, OffsetDateTime::now_utc())
        .await?;
    info!(account_id = %account.id, "logged in");
    Ok(session)
}

pub async fn logout(state: &AppState, key: Option<&SessionKey>) -> Result<(), AppError> {
    if let Some(key) = key {
        state.sessions.terminate(key).await?;
        debug!("session terminated");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::accounts::{
        forms::{EMAIL, PASSWORD1, PASSWORD2, PASSWORD_MISMATCH, REQUIRED},
        repo::{AccountStore, MemoryAccountStore},
    };

    fn form(username: &str, email: &str, p1: &str, p2: &str) -> SignupForm {
        SignupForm {
            username: username.into(),
            email: email.into(),
            password1: p1.into(),
            password2: p2.into(),
        }
    }

    fn valid_form() -> SignupForm {
        form("testuser", "test@test.com", "testpassword", "testpassword")
    }

    async fn testuser_exists(state: &AppState) -> bool {
        state.accounts.username_exists("testuser").await.unwrap()
    }

    #[tokio::test]
    async fn signup_creates_account_and_session() {
        let state = AppState::fake();
        let outcome = signup(&state, &valid_form(), None).await.unwrap();
        let SignupOutcome::Created { account, session } = outcome else {
            panic!("expected account to be created");
        };
        assert_eq!(account.username, "testuser");
        assert_eq!(account.email, "test@test.com");
        assert_ne!(account.password_hash, "testpassword");
        assert_eq!(session.account_id, account.id);

        let live = state.sessions.lookup(&session.key).await.unwrap();
        assert!(live.is_some());
        let stored = state.accounts.find_by_id(account.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn empty_username_creates_nothing() {
        let state = AppState::fake();
        let blank = form("", "test@test.com", "testpassword", "testpassword");
        let outcome = signup(&state, &blank, None).await.unwrap();
        let SignupOutcome::Invalid(errors) = outcome else {
            panic!("expected validation errors");
        };
        assert!(errors.contains(USERNAME, REQUIRED));
        assert!(!state.accounts.username_exists("").await.unwrap());
    }

    #[tokio::test]
    async fn missing_email_and_passwords_are_each_reported() {
        let state = AppState::fake();
        let SignupOutcome::Invalid(errors) = signup(&state, &form("testuser", "", "", ""), None)
            .await
            .unwrap()
        else {
            panic!("expected validation errors");
        };
        assert!(errors.contains(EMAIL, REQUIRED));
        assert!(errors.contains(PASSWORD1, REQUIRED));
        assert!(errors.contains(PASSWORD2, REQUIRED));
        assert!(!testuser_exists(&state).await);
    }

    #[tokio::test]
    async fn mismatched_passwords_create_nothing() {
        let state = AppState::fake();
        let SignupOutcome::Invalid(errors) = signup(
            &state,
            &form("testuser", "test@test.com", "testpassword", "testpas"),
            None,
        )
        .await
        .unwrap() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.field(PASSWORD2), [PASSWORD_MISMATCH.to_string()]);
        assert!(!testuser_exists(&state).await);
    }

    #[tokio::test]
    async fn weak_passwords_are_rejected() {
        let state = AppState::fake();
        for weak in ["83945798", "testuser", "password", "short1"] {
            let outcome = signup(&state, &form("testuser", "test@test.com", weak, weak), None)
                .await
                .unwrap();
            assert!(
                matches!(&outcome, SignupOutcome::Invalid(e) if e.has(PASSWORD2)),
                "{weak} should be rejected"
            );
        }
        assert!(!testuser_exists(&state).await);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_field_error() {
        let state = AppState::fake();
        assert!(matches!(
            signup(&state, &valid_form(), None).await.unwrap(),
            SignupOutcome::Created { .. }
        ));
        let outcome = signup(&state, &valid_form(), None).await.unwrap();
        let SignupOutcome::Invalid(errors) = outcome else {
            panic!("second signup should fail");
        };
        assert!(errors.contains(USERNAME, DUPLICATE_USERNAME));
    }

    #[tokio::test]
    async fn full_width_username_collides_with_ascii() {
        let state = AppState::fake();
        signup(&state, &valid_form(), None).await.unwrap();
        let wide = form("ｔｅｓｔｕｓｅｒ", "test@test.com", "testpassword", "testpassword");
        let SignupOutcome::Invalid(errors) = signup(&state, &wide, None).await.unwrap() else {
            panic!("normalized duplicate should be rejected");
        };
        assert!(errors.contains(USERNAME, DUPLICATE_USERNAME));
        assert!(authenticate(&state, "testuser", "testpassword").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrected_resubmission_succeeds_once() {
        let state = AppState::fake();
        let bad = form("testuser", "test@test.com", "testpassword", "nope");
        assert!(matches!(
            signup(&state, &bad, None).await.unwrap(),
            SignupOutcome::Invalid(_)
        ));
        assert!(matches!(
            signup(&state, &valid_form(), None).await.unwrap(),
            SignupOutcome::Created { .. }
        ));
    }

    #[tokio::test]
    async fn signup_rotates_previous_session() {
        let state = AppState::fake();
        let stale = state
            .sessions
            .establish(Uuid::new_v4(), state.config.session.ttl())
            .await
            .unwrap();
        let SignupOutcome::Created { session, .. } =
            signup(&state, &valid_form(), Some(&stale.key)).await.unwrap()
        else {
            panic!("expected account to be created");
        };
        assert_ne!(session.key, stale.key);
        assert!(state.sessions.lookup(&stale.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password_unknown_user_and_inactive() {
        let accounts = Arc::new(MemoryAccountStore::new());
        let state = AppState::fake_with_accounts(accounts.clone());
        signup(&state, &valid_form(), None).await.unwrap();

        assert!(authenticate(&state, "testuser", "testpassword").await.unwrap().is_some());
        assert!(authenticate(&state, "testuser", "wrong").await.unwrap().is_none());
        assert!(authenticate(&state, "nobody", "testpassword").await.unwrap().is_none());
        assert!(authenticate(&state, "TESTUSER", "testpassword").await.unwrap().is_none());

        accounts.set_active("testuser", false).await;
        assert!(authenticate(&state, "testuser", "testpassword").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logout_terminates_session() {
        let state = AppState::fake();
        let outcome = signup(&state, &valid_form(), None).await.unwrap();
        let SignupOutcome::Created { session, .. } = outcome else {
            panic!("expected account to be created");
        };
        logout(&state, Some(&session.key)).await.unwrap();
        assert!(state.sessions.lookup(&session.key).await.unwrap().is_none());
        logout(&state, None).await.unwrap();
    }

    /// Store that loses track of accounts by name, as a broken replica might.
    struct ForgetfulStore(MemoryAccountStore);

    #[async_trait]
    impl AccountStore for ForgetfulStore {
        async fn create(&self, new: NewAccount) -> Result<Account, CreateAccountError> {
            self.0.create(new).await
        }
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
            self.0.find_by_id(id).await
        }
        async fn find_by_username(&self, _username: &str) -> anyhow::Result<Option<Account>> {
            Ok(None)
        }
        async fn username_exists(&self, username: &str) -> anyhow::Result<bool> {
            self.0.username_exists(username).await
        }
        async fn touch_last_login(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<()> {
            self.0.touch_last_login(id, at).await
        }
        async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn failed_reauthentication_removes_account() {
        let store = Arc::new(ForgetfulStore(MemoryAccountStore::new()));
        let state = AppState::fake_with_accounts(store.clone());
        let err = signup(&state, &valid_form(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Inconsistent(_)));
        assert!(!store.0.username_exists("testuser").await.unwrap());
        assert_eq!(store.0.len().await, 0);
    }

    /// Store whose pre-check misses a concurrent insert of the same name.
    struct RacingStore;

    #[async_trait]
    impl AccountStore for RacingStore {
        async fn create(&self, _new: NewAccount) -> Result<Account, CreateAccountError> {
            Err(CreateAccountError::DuplicateUsername)
        }
        async fn find_by_id(&self, _id: Uuid) -> anyhow::Result<Option<Account>> {
            Ok(None)
        }
        async fn find_by_username(&self, _username: &str) -> anyhow::Result<Option<Account>> {
            Ok(None)
        }
        async fn username_exists(&self, _username: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn touch_last_login(&self, _id: Uuid, _at: OffsetDateTime) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn insert_race_maps_to_duplicate_username() {
        let state = AppState::fake_with_accounts(Arc::new(RacingStore));
        let outcome = signup(&state, &valid_form(), None).await.unwrap();
        let SignupOutcome::Invalid(errors) = outcome else {
            panic!("race loser should see a field error");
        };
        assert!(errors.contains(USERNAME, DUPLICATE_USERNAME));
    }
}
