//! Session state: the identifier pair, the onboarding stage machine and the
//! in-memory store.

pub mod model;
pub mod store;

pub use model::{
    ChatEntry, ChatRole, Major, Quarter, Session, SessionKey, Stage, StageKind, Term, TurnTrace,
    VerifiedStudent,
};
pub use store::{SessionHandle, SessionStore, spawn_prune_task};
