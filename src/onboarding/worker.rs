use crate::consumers::Handler;
use crate::onboarding::{OnboardingMessage, StoreError, UserRecord, UserStore};
use tracing::{error, info};

/// Persist onboarding messages: the processing function of the onboarding worker.
///
/// - the user is stored: `true`, the message is acked;
/// - the user was already stored (a redelivery): `true` as well;
/// - the email belongs to another user, or the store failed: `false`, the message is
///   dead-lettered.
pub struct PersistOnboarding<S> {
    store: S,
}

impl<S: UserStore> PersistOnboarding<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl<S: UserStore> Handler<OnboardingMessage> for PersistOnboarding<S> {
    #[tracing::instrument(name = "persist_user", skip_all, fields(user_id = %message.user_id))]
    async fn handle(&self, message: OnboardingMessage) -> Result<bool, anyhow::Error> {
        let record = UserRecord::from_message(&message);
        match self.store.insert(record).await {
            Ok(()) => {
                info!(verification = %message.verification, "User persisted");
                Ok(true)
            }
            Err(StoreError::DuplicateUserId { .. }) => {
                info!("User already persisted, skipping");
                Ok(true)
            }
            Err(StoreError::DuplicateEmail { existing_user_id }) => {
                error!(%existing_user_id, "Email already registered to another user");
                Ok(false)
            }
            Err(e) => {
                error!(error = %e, "Failed to persist user");
                Ok(false)
            }
        }
    }
}
