//! Schedule Recommender: guided onboarding and persona-routed course
//! planning chat.

pub mod bridge;
pub mod config;
pub mod error;
pub mod llm;
pub mod lookup;
pub mod onboarding;
pub mod retrieval;
pub mod router;
pub mod session;
