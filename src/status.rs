//! Terse status string for an external display collaborator

use crate::tunnel::ConnectionState;
use std::sync::{Arc, RwLock};

/// Holds the single current-status string. The element only exists between
/// `register` and `clear`; updates while unregistered are dropped, and
/// shutdown clears whatever was registered. Status is derived purely from
/// current state; there are no timed cosmetic overrides.
#[derive(Clone, Default)]
pub struct StatusBoard {
    element: Arc<RwLock<Option<String>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) {
        if let Ok(mut element) = self.element.write() {
            *element = Some(ConnectionState::Uninitialized.as_str().to_string());
        }
    }

    /// Derive the status text from connection state plus the last completed
    /// transfer count (shown only while up).
    pub fn update(&self, state: ConnectionState, last_created: Option<u64>) {
        let text = match (state, last_created) {
            (ConnectionState::Up, Some(n)) => format!("Sync: {}", n),
            (state, _) => state.as_str().to_string(),
        };
        if let Ok(mut element) = self.element.write() {
            if element.is_some() {
                *element = Some(text);
            }
        }
    }

    pub fn current(&self) -> Option<String> {
        self.element.read().ok().and_then(|element| element.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut element) = self.element.write() {
            *element = None;
        }
    }
}
