//! The user onboarding flow built on top of the queue plumbing.
//!
//! ```text
//! OnboardingService::onboard ──► Publisher ──► user_onboarding_queue ──► Consumer
//!                                                                          │
//!                                                   PersistOnboarding ◄────┘
//!                                                          │
//!                                                      UserStore
//! ```
mod message;
mod record;
mod service;
mod store;
mod worker;

pub use message::{OnboardingMessage, SignupRequest, VerificationState};
pub use record::{UserDetails, UserRecord};
pub use service::{OnboardingError, OnboardingReceipt, OnboardingService, VerificationOutcome};
pub use store::{InMemoryUserStore, StoreError, UserStore};
pub use worker::PersistOnboarding;
