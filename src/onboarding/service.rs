use crate::amqp::ConnectionFactory;
use crate::connection::Transport;
use crate::onboarding::{
    OnboardingMessage, SignupRequest, StoreError, UserDetails, UserStore, VerificationState,
};
use crate::publishers::{Publisher, PublisherError};
use crate::topology::USER_ONBOARDING_QUEUE;
use serde::Serialize;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum OnboardingError {
    /// A user with the same email is already registered.
    #[error("User already exists")]
    AlreadyExists {
        user_id: String,
        verification: VerificationState,
    },
    #[error("User {user_id} not found")]
    NotFound { user_id: String },
    /// The store or the broker failed: callers should report a generic internal error.
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for OnboardingError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<PublisherError> for OnboardingError {
    fn from(e: PublisherError) -> Self {
        Self::Internal(e.into())
    }
}

/// The user was handed over to the onboarding queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OnboardingReceipt {
    pub user_id: String,
    pub verification: VerificationState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
}

/// The operations the API layer exposes on users.
///
/// Signups are not persisted here: they are published to the onboarding queue and stored by
/// the worker. Reads and verification go straight to the store.
pub struct OnboardingService<S, T: Transport = ConnectionFactory> {
    store: S,
    publisher: Publisher<T>,
    queue_name: String,
}

impl<S: UserStore, T: Transport> OnboardingService<S, T> {
    pub fn new(store: S, publisher: Publisher<T>) -> Self {
        Self {
            store,
            publisher,
            queue_name: USER_ONBOARDING_QUEUE.to_owned(),
        }
    }

    /// Publish to `queue_name` instead of the default onboarding queue.
    #[must_use]
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Register a new user.
    ///
    /// Fails with [`OnboardingError::AlreadyExists`] if the email is taken. Otherwise a `user_id`
    /// is assigned and the user is queued for persistence, in the `PENDING` state.
    #[tracing::instrument(name = "onboard_user", skip_all)]
    pub async fn onboard(
        &self,
        request: SignupRequest,
    ) -> Result<OnboardingReceipt, OnboardingError> {
        if let Some(existing) = self.store.find_by_email(&request.email).await? {
            warn!(user_id = %existing.user_id, "User already exists");
            return Err(OnboardingError::AlreadyExists {
                user_id: existing.user_id,
                verification: existing.verification_state,
            });
        }

        let message = OnboardingMessage::new(request);
        self.publisher.publish(&self.queue_name, &message).await?;
        info!(user_id = %message.user_id, "User onboarded");

        Ok(OnboardingReceipt {
            user_id: message.user_id,
            verification: message.verification,
        })
    }

    pub async fn user_details(&self, user_id: &str) -> Result<UserDetails, OnboardingError> {
        self.store
            .find_by_user_id(user_id)
            .await?
            .map(UserDetails::from)
            .ok_or_else(|| OnboardingError::NotFound {
                user_id: user_id.to_owned(),
            })
    }

    /// Mark a user as verified.
    #[tracing::instrument(name = "verify_user", skip(self))]
    pub async fn verify(&self, user_id: &str) -> Result<VerificationOutcome, OnboardingError> {
        let user = self
            .store
            .find_by_user_id(user_id)
            .await?
            .ok_or_else(|| OnboardingError::NotFound {
                user_id: user_id.to_owned(),
            })?;
        if user.verification_state == VerificationState::Verified {
            return Ok(VerificationOutcome::AlreadyVerified);
        }

        if !self
            .store
            .update_verification(&user.user_id, VerificationState::Verified)
            .await?
        {
            return Err(OnboardingError::NotFound {
                user_id: user_id.to_owned(),
            });
        }
        info!("User verified");
        Ok(VerificationOutcome::Verified)
    }
}
