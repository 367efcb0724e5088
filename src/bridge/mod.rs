//! Conversation bridge: forwards routed turns to the agent runner.
//!
//! Turns for one identifier pair run strictly one at a time in submission
//! order. Different pairs never wait on each other.

pub mod persona_runner;
pub mod runner;

pub use persona_runner::PersonaRunner;
pub use runner::{AgentRunner, EventSender, TurnEvent, TurnRequest, TurnResult, emit};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::router::Persona;
use crate::session::SessionKey;

pub struct ConversationBridge {
    runner: Arc<dyn AgentRunner>,
    /// One FIFO lock per pair. `tokio::sync::Mutex` queues waiters fairly.
    in_flight: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl ConversationBridge {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            runner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> Arc<dyn AgentRunner> {
        Arc::clone(&self.runner)
    }

    async fn turn_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.in_flight.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Send `message` to `persona` within the conversation for `key`.
    pub async fn send_turn(
        &self,
        key: &SessionKey,
        persona: Persona,
        message: &str,
        events: Option<&EventSender>,
    ) -> Result<TurnResult> {
        let lock = self.turn_lock(key).await;
        let outcome = {
            let _turn = lock.lock().await;
            self.run(key, persona, message, events).await
        };
        self.release(key, lock).await;
        outcome
    }

    /// Clear the runner's memory for `key`, after any in-flight turn.
    pub async fn reset(&self, key: &SessionKey) -> Result<()> {
        let lock = self.turn_lock(key).await;
        let outcome = {
            let _turn = lock.lock().await;
            self.runner.reset(key).await
        };
        self.release(key, lock).await;
        outcome
    }

    async fn run(
        &self,
        key: &SessionKey,
        persona: Persona,
        message: &str,
        events: Option<&EventSender>,
    ) -> Result<TurnResult> {
        info!(session = %key, persona = %persona, "Sending turn");
        let request = TurnRequest {
            key: key.clone(),
            persona,
            message: message.to_string(),
        };
        match self.runner.run_turn(request, events).await {
            Ok(result) => {
                info!(
                    session = %key,
                    persona = %persona,
                    tool_calls = result.tool_calls.len(),
                    "Turn completed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(session = %key, persona = %persona, error = %e, "Turn failed");
                Err(e)
            }
        }
    }

    /// Drop the lock entry for `key` once no other turn is queued on it.
    async fn release(&self, key: &SessionKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.in_flight.lock().await;
        // Held by the map and by `lock` alone: nobody is waiting.
        let idle = locks
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(key);
        }
    }
}
