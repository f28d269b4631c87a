//! Blocked callers and the ids they are waiting on.

use crate::wire::MessageId;

use parking_lot::Condvar;
use std::sync::Arc;

/// Completion policy of a multi-id await.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AwaitMode {
    /// Return once any of the calls has completed.
    #[default]
    Any,
    /// Return once every call has completed.
    All,
}

impl AwaitMode {
    /// Whether `completed` out of `total` calls satisfies this policy.
    #[must_use]
    pub const fn is_satisfied(self, completed: usize, total: usize) -> bool {
        match self {
            Self::Any => completed > 0,
            Self::All => completed == total,
        }
    }
}

/// Identifies one queued awaiter.
pub(crate) type AwaiterToken = u64;

#[derive(Debug)]
struct Awaiter {
    token: AwaiterToken,
    remaining: Vec<MessageId>,
    mode: AwaitMode,
    signaled: bool,
    signal: Arc<Condvar>,
}

impl Awaiter {
    /// Drop `id` from the remaining set. Returns true if the awaiter just
    /// became satisfied.
    fn clear(&mut self, id: MessageId) -> bool {
        if self.signaled {
            return false;
        }

        let before = self.remaining.len();
        self.remaining.retain(|remaining| *remaining != id);
        if self.remaining.len() == before {
            return false;
        }

        self.signaled = match self.mode {
            AwaitMode::Any => true,
            AwaitMode::All => self.remaining.is_empty(),
        };
        self.signaled
    }
}

/// Awaiters currently blocked on this client.
#[derive(Debug, Default)]
pub(crate) struct AwaiterSet {
    awaiters: Vec<Awaiter>,
    next_token: AwaiterToken,
}

impl AwaiterSet {
    /// Queue an awaiter for the ids still outstanding. The caller sleeps on
    /// the returned condvar.
    pub(crate) fn enqueue(
        &mut self,
        remaining: Vec<MessageId>,
        mode: AwaitMode,
    ) -> (AwaiterToken, Arc<Condvar>) {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);

        let signal = Arc::new(Condvar::new());
        self.awaiters.push(Awaiter {
            token,
            remaining,
            mode,
            signaled: false,
            signal: Arc::clone(&signal),
        });

        (token, signal)
    }

    pub(crate) fn remove(&mut self, token: AwaiterToken) {
        self.awaiters.retain(|awaiter| awaiter.token != token);
    }

    pub(crate) fn is_signaled(&self, token: AwaiterToken) -> bool {
        self.awaiters
            .iter()
            .find(|awaiter| awaiter.token == token)
            .is_some_and(|awaiter| awaiter.signaled)
    }

    /// Clear `id` from every awaiter and wake the ones it satisfied.
    /// Returns the number woken.
    pub(crate) fn mark(&mut self, id: MessageId) -> usize {
        let mut woken = 0;
        for awaiter in &mut self.awaiters {
            if awaiter.clear(id) {
                awaiter.signal.notify_one();
                woken += 1;
            }
        }
        woken
    }

    /// Wake every awaiter without satisfying it. Used on shutdown; the
    /// woken callers observe the closed connection.
    pub(crate) fn wake_all(&self) -> usize {
        for awaiter in &self.awaiters {
            awaiter.signal.notify_one();
        }
        self.awaiters.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.awaiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_condition() {
        assert!(AwaitMode::Any.is_satisfied(1, 3));
        assert!(!AwaitMode::Any.is_satisfied(0, 3));
        assert!(!AwaitMode::All.is_satisfied(2, 3));
        assert!(AwaitMode::All.is_satisfied(3, 3));
    }

    #[test]
    fn test_any_wakes_on_first() {
        let mut set = AwaiterSet::default();
        let (token, _signal) = set.enqueue(vec![1, 2], AwaitMode::Any);

        assert_eq!(set.mark(2), 1);
        assert!(set.is_signaled(token));
        assert_eq!(set.mark(1), 0);
    }

    #[test]
    fn test_all_waits_for_every_id() {
        let mut set = AwaiterSet::default();
        let (token, _signal) = set.enqueue(vec![1, 2, 3], AwaitMode::All);

        assert_eq!(set.mark(1), 0);
        assert_eq!(set.mark(7), 0);
        assert_eq!(set.mark(3), 0);
        assert!(!set.is_signaled(token));
        assert_eq!(set.mark(2), 1);
        assert!(set.is_signaled(token));
    }

    #[test]
    fn test_one_id_wakes_many() {
        let mut set = AwaiterSet::default();
        let (first, _a) = set.enqueue(vec![5], AwaitMode::Any);
        let (second, _b) = set.enqueue(vec![5, 6], AwaitMode::Any);

        assert_eq!(set.mark(5), 2);
        assert!(set.is_signaled(first));
        assert!(set.is_signaled(second));
    }

    #[test]
    fn test_remove_and_wake_all() {
        let mut set = AwaiterSet::default();
        let (first, _a) = set.enqueue(vec![1], AwaitMode::All);
        let (second, _b) = set.enqueue(vec![2], AwaitMode::All);

        set.remove(first);
        assert_eq!(set.len(), 1);
        assert!(!set.is_signaled(first));

        assert_eq!(set.wake_all(), 1);
        assert!(!set.is_signaled(second));
    }
}
