use crate::onboarding::{OnboardingMessage, VerificationState};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use redact::Secret;
use serde::Serialize;

/// A persisted user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Base64-encoded password.
    pub password: Secret<String>,
    pub verification_state: VerificationState,
    pub created_on: DateTime<Utc>,
}

impl UserRecord {
    /// Map an onboarding message to the record the worker stores, stamped with the current time.
    pub fn from_message(message: &OnboardingMessage) -> Self {
        Self {
            user_id: message.user_id.clone(),
            email: message.email.clone(),
            first_name: message.first_name.clone(),
            last_name: message.last_name.clone(),
            password: STANDARD
                .encode(message.password.expose_secret().as_bytes())
                .into(),
            verification_state: message.verification,
            created_on: Utc::now(),
        }
    }
}

/// What the API exposes about a user: everything but the password.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserDetails {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub verification_state: VerificationState,
    pub created_on: DateTime<Utc>,
}

impl From<UserRecord> for UserDetails {
    fn from(record: UserRecord) -> Self {
        Self {
            user_id: record.user_id,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            verification_state: record.verification_state,
            created_on: record.created_on,
        }
    }
}
