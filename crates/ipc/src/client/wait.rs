use super::Client;
use crate::awaiter::AwaitMode;
use crate::context::MessageContext;
use crate::error::{Error, Result};
use crate::wire::MessageId;

use std::mem;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

impl Client {
    /// Block until the call bound to `context` has completed, using the
    /// configured default timeout.
    ///
    /// A call that was never tracked (asynchronous messages, events) or whose
    /// result was already extracted counts as completed.
    ///
    /// # Errors
    ///
    /// See [`Client::await_multiple_timeout`].
    pub fn await_completion(&self, context: &MessageContext) -> Result<()> {
        self.await_completion_timeout(context, self.config.default_timeout)
    }

    /// Block until the call bound to `context` has completed or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// See [`Client::await_multiple_timeout`].
    pub fn await_completion_timeout(
        &self,
        context: &MessageContext,
        timeout: Duration,
    ) -> Result<()> {
        self.await_multiple_timeout(&[context], AwaitMode::Any, timeout)
    }

    /// Block until any or all of the calls have completed, using the
    /// configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::await_multiple_timeout`].
    pub fn await_multiple(&self, contexts: &[&MessageContext], mode: AwaitMode) -> Result<()> {
        self.await_multiple_timeout(contexts, mode, self.config.default_timeout)
    }

    /// Block until any (`AwaitMode::Any`) or all (`AwaitMode::All`) of the
    /// calls have completed.
    ///
    /// Completion means the call reached a terminal status, or is no longer
    /// tracked at all. Returns immediately if the condition already holds.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `contexts` is empty or holds a context
    ///   that was never invoked.
    /// - [`Error::OutOfMemory`] if the wait set cannot be allocated.
    /// - [`Error::Timeout`] if the condition does not hold within `timeout`.
    /// - [`Error::ShuttingDown`] if the client is or gets shut down.
    #[instrument(skip(self, contexts), fields(count = contexts.len()))]
    pub fn await_multiple_timeout(
        &self,
        contexts: &[&MessageContext],
        mode: AwaitMode,
        timeout: Duration,
    ) -> Result<()> {
        if contexts.is_empty() {
            return Err(Error::InvalidArgument(
                "await needs at least one context".to_string(),
            ));
        }

        let ids = contexts
            .iter()
            .enumerate()
            .map(|(index, context)| {
                context.message_id().ok_or_else(|| {
                    Error::InvalidArgument(format!("context {index} has not been invoked"))
                })
            })
            .collect::<Result<Vec<MessageId>>>()?;

        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.state.lock();
        state.ensure_connected()?;

        let outstanding = ids
            .iter()
            .filter(|id| state.pending.is_outstanding(**id))
            .count();
        if mode.is_satisfied(ids.len() - outstanding, ids.len()) {
            return Ok(());
        }

        let mut remaining = Vec::new();
        remaining
            .try_reserve_exact(outstanding)
            .map_err(|_| Error::OutOfMemory {
                requested: outstanding * mem::size_of::<MessageId>(),
            })?;
        remaining.extend(
            ids.iter()
                .copied()
                .filter(|id| state.pending.is_outstanding(*id)),
        );

        let (token, signal) = state.awaiters.enqueue(remaining, mode);
        debug!("Waiting on {} of {} calls", outstanding, ids.len());

        let result = loop {
            if state.awaiters.is_signaled(token) {
                break Ok(());
            }
            if let Err(e) = state.ensure_connected() {
                break Err(e);
            }

            let timed_out = match deadline {
                Some(deadline) => signal.wait_until(&mut state, deadline).timed_out(),
                None => {
                    signal.wait(&mut state);
                    false
                }
            };

            if timed_out && !state.awaiters.is_signaled(token) && state.connection.is_some() {
                break Err(Error::Timeout(timeout));
            }
        };

        state.awaiters.remove(token);
        drop(state);

        if let Err(e) = &result {
            debug!("Await ended without completion: {}", e);
        }
        result
    }
}
