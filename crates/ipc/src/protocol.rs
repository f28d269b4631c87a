//! Protocol registrations: handlers for inbound events.

use crate::error::HandlerError;
use crate::wire::{ActionId, Message, Param, ProtocolId};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handler for one protocol action.
pub trait Action: Send + Sync {
    /// Run the action with the event's parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler fails.
    fn invoke(&self, params: &[Param]) -> Result<(), HandlerError>;
}

impl<F> Action for F
where
    F: Fn(&[Param]) -> Result<(), HandlerError> + Send + Sync,
{
    fn invoke(&self, params: &[Param]) -> Result<(), HandlerError> {
        self(params)
    }
}

/// A protocol: a named table of actions.
pub struct Protocol {
    id: ProtocolId,
    name: String,
    actions: HashMap<ActionId, Box<dyn Action>>,
}

impl Protocol {
    /// Protocol without actions.
    pub fn new(id: ProtocolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            actions: HashMap::new(),
        }
    }

    /// Add or replace the closure handling `action`.
    #[must_use]
    pub fn with_action<F>(self, action: ActionId, handler: F) -> Self
    where
        F: Fn(&[Param]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.with_handler(action, handler)
    }

    /// Add or replace the handler for `action`.
    #[must_use]
    pub fn with_handler<A>(mut self, action: ActionId, handler: A) -> Self
    where
        A: Action + 'static,
    {
        self.actions.insert(action, Box::new(handler));
        self
    }

    /// Protocol id.
    #[must_use]
    pub const fn id(&self) -> ProtocolId {
        self.id
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the handler matching the message's action.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownAction`] if no handler is registered,
    /// otherwise whatever the handler returns.
    pub fn dispatch(&self, message: &Message) -> Result<(), HandlerError> {
        let action = message.header.action;
        let handler = self
            .actions
            .get(&action)
            .ok_or(HandlerError::UnknownAction {
                protocol: self.id,
                action,
            })?;

        handler.invoke(&message.params)
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<_> = self.actions.keys().copied().collect();
        actions.sort_unstable();

        f.debug_struct("Protocol")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("actions", &actions)
            .finish()
    }
}

/// Registered protocols, unique by id.
#[derive(Debug, Default)]
pub(crate) struct ProtocolRegistry {
    protocols: Vec<Arc<Protocol>>,
}

impl ProtocolRegistry {
    /// Add a protocol. Hands it back if the id is taken.
    pub(crate) fn insert(&mut self, protocol: Protocol) -> Result<(), Protocol> {
        if self.get(protocol.id).is_some() {
            return Err(protocol);
        }
        self.protocols.push(Arc::new(protocol));
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ProtocolId) -> Option<Arc<Protocol>> {
        let index = self.protocols.iter().position(|p| p.id == id)?;
        Some(self.protocols.remove(index))
    }

    pub(crate) fn get(&self, id: ProtocolId) -> Option<Arc<Protocol>> {
        self.protocols.iter().find(|p| p.id == id).cloned()
    }
}
