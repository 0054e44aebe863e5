use redact::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where a user stands in the verification flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationState {
    Pending,
    Verified,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationState::Pending => f.write_str("PENDING"),
            VerificationState::Verified => f.write_str("VERIFIED"),
        }
    }
}

/// A signup, as received by the API layer.
#[derive(Clone, Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: Secret<String>,
}

/// The unit of work carried by the onboarding queue.
///
/// On the wire it's a JSON object:
///
/// ```json
/// {"email": "a@x.com", "first_name": "A", "last_name": "X",
///  "password": "pw", "user_id": "u1", "verification": "PENDING"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingMessage {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Opaque at this layer: encoding is up to whoever persists the message.
    #[serde(serialize_with = "redact::expose_secret")]
    pub password: Secret<String>,
    pub user_id: String,
    pub verification: VerificationState,
}

impl OnboardingMessage {
    /// Turn a signup into a message, assigning it a fresh `user_id`.
    ///
    /// This is the only place where user ids are generated: consumers never assign a new one.
    pub fn new(request: SignupRequest) -> Self {
        Self {
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            password: request.password,
            user_id: Uuid::new_v4().to_string(),
            verification: VerificationState::Pending,
        }
    }
}
