use crate::onboarding::{UserRecord, VerificationState};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A user with the same id is already stored.
    #[error("User {user_id} already exists")]
    DuplicateUserId { user_id: String },
    /// Another user already registered with the same email.
    #[error("Email already registered to user {existing_user_id}")]
    DuplicateEmail { existing_user_id: String },
    #[error("The user store is unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// The persistence collaborator of the onboarding flow.
///
/// Lookups are case-insensitive. Deliveries are at-least-once: `insert` must reject a second
/// record with the same `user_id` with [`StoreError::DuplicateUserId`], and a record whose email
/// belongs to another user with [`StoreError::DuplicateEmail`].
#[async_trait::async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn insert(&self, record: UserRecord) -> Result<(), StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Set the verification state of a user. Returns `false` if there is no such user.
    async fn update_verification(
        &self,
        user_id: &str,
        state: VerificationState,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
impl<S> UserStore for Arc<S>
where
    S: UserStore + ?Sized,
{
    async fn insert(&self, record: UserRecord) -> Result<(), StoreError> {
        S::insert(self, record).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        S::find_by_email(self, email).await
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        S::find_by_user_id(self, user_id).await
    }

    async fn update_verification(
        &self,
        user_id: &str,
        state: VerificationState,
    ) -> Result<bool, StoreError> {
        S::update_verification(self, user_id, state).await
    }
}

/// A [`UserStore`] keeping users in memory.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<Vec<UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users
            .iter()
            .any(|user| user.user_id.eq_ignore_ascii_case(&record.user_id))
        {
            return Err(StoreError::DuplicateUserId {
                user_id: record.user_id,
            });
        }
        if let Some(owner) = users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(&record.email))
        {
            return Err(StoreError::DuplicateEmail {
                existing_user_id: owner.user_id.clone(),
            });
        }
        users.push(record);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|user| user.user_id.eq_ignore_ascii_case(user_id))
            .cloned())
    }

    async fn update_verification(
        &self,
        user_id: &str,
        state: VerificationState,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users
            .iter_mut()
            .find(|user| user.user_id.eq_ignore_ascii_case(user_id))
        {
            Some(user) => {
                user.verification_state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
