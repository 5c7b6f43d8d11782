//! Cross-window message relay.
//!
//! When the mini-app runs inside a hosting frame, the host may answer a
//! `{"type": "requestInitData"}` message with launch data. Replies arrive
//! asynchronously and in no particular order, possibly while discovery is
//! already polling. The first valid credential seen is stashed under
//! [`RELAY_KEY`] where discovery picks it up; later messages are ignored.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::io::store::{KeyValueStore, StoreError};
use crate::model::credential::{LaunchCredential, UserIdentity};
use crate::model::session::RELAY_KEY;

/// `type` of the message asking the parent frame for launch data.
pub const REQUEST_INIT_DATA: &str = "requestInitData";

/// Message to post to the parent frame to ask for launch data.
pub fn request_message() -> Value {
    json!({ "type": REQUEST_INIT_DATA })
}

/// What happened to an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// First credential seen; stored for discovery.
    Accepted(LaunchCredential),
    /// A credential was already relayed; this one was dropped.
    AlreadyRelayed,
    /// The message carried no launch data.
    Ignored,
}

pub struct MessageRelay {
    store: Arc<dyn KeyValueStore>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        MessageRelay { store }
    }

    /// Pull launch data out of a host reply.
    ///
    /// Accepted shapes: `{"initData": "..."}`, an object with `user_id`
    /// (plus optional names), an object with a `user` object, a bare
    /// numeric identifier, or a string mentioning `user_id` / `initData`.
    pub fn extract(message: &Value) -> Option<LaunchCredential> {
        match message {
            Value::Object(map) => {
                if let Some(Value::String(init_data)) = map.get("initData") {
                    return LaunchCredential::new(init_data.clone());
                }
                UserIdentity::from_json(message).map(|id| LaunchCredential::from_identity(&id))
            }
            Value::Number(n) => LaunchCredential::new(format!("user_id={}", n)),
            Value::String(s) if s.contains("user_id") || s.contains("initData") => {
                LaunchCredential::new(s.clone())
            }
            _ => None,
        }
    }

    /// Handle one message from the hosting frame.
    pub fn receive(&self, message: &Value) -> Result<RelayOutcome, StoreError> {
        let Some(credential) = Self::extract(message) else {
            log::debug!("relay: message without launch data ignored");
            return Ok(RelayOutcome::Ignored);
        };

        if self.store.get(RELAY_KEY)?.is_some() {
            log::debug!("relay: launch data already relayed, dropping duplicate");
            return Ok(RelayOutcome::AlreadyRelayed);
        }

        self.store.set(RELAY_KEY, credential.as_str())?;
        log::info!("relay: accepted launch data ({})", credential.preview());
        Ok(RelayOutcome::Accepted(credential))
    }

    /// Forget relayed data so the next message is accepted again.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(RELAY_KEY)
    }
}
