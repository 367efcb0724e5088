//! Onboarding flow: student verification, major, term and courses, then
//! the planning chat.
//!
//! The coordinator moves each session forward through fixed gates. Each gate
//! validates its input, makes at most one remote call, and only then commits
//! the next stage. The REST routes and the chat WebSocket sit on top.

pub mod coordinator;
pub mod prompts;
pub mod routes;
pub mod verification;
pub mod ws;

pub use coordinator::{ChatReply, DebugView, OnboardingCoordinator, SessionView, parse_courses};
pub use routes::{AppState, DEFAULT_USER_ID, app_routes};
pub use verification::{VerificationGate, VerificationResult};
