//! Per-transaction wait slots for 2PC decisions.
//!
//! A leader opens a session before sending the message whose answer it
//! waits for, then races the session against its timeout. An answer that
//! arrives while no session is open is kept and handed to the next session
//! opened for that transaction.

use byzshard_types::{Outcome, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug, Default)]
struct Sessions {
    waiting: HashMap<TxnId, oneshot::Sender<Outcome>>,
    early: HashMap<TxnId, Outcome>,
}

/// Open 2PC sessions of one replica.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<Sessions>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An answer arrived in time.
    Answered(Outcome),
    /// The window elapsed first.
    TimedOut,
}

impl Resolution {
    /// Outcome to act on; a timeout resolves to Abort.
    pub fn outcome(self) -> Outcome {
        match self {
            Resolution::Answered(outcome) => outcome,
            Resolution::TimedOut => Outcome::Abort,
        }
    }
}

/// Receiving end of an open session.
#[derive(Debug)]
pub struct Session {
    id: TxnId,
    rx: oneshot::Receiver<Outcome>,
}

impl SessionTable {
    /// Open a session for `id`, replacing any previous one.
    pub fn open(&self, id: &TxnId) -> Session {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        match inner.early.remove(id) {
            Some(outcome) => {
                trace!(txn_id = %id, %outcome, "Session answered on open");
                let _ = tx.send(outcome);
            }
            None => {
                inner.waiting.insert(id.clone(), tx);
            }
        }
        Session { id: id.clone(), rx }
    }

    /// Deliver an answer to the open session. Returns false if none is open.
    pub fn resolve(&self, id: &TxnId, outcome: Outcome) -> bool {
        let waiting = self.inner.lock().waiting.remove(id);
        match waiting {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Keep an answer for a session not opened yet.
    pub fn hold(&self, id: &TxnId, outcome: Outcome) {
        self.inner.lock().early.insert(id.clone(), outcome);
    }

    /// Drop the session and any held answer.
    pub fn close(&self, id: &TxnId) {
        let mut inner = self.inner.lock();
        inner.waiting.remove(id);
        inner.early.remove(id);
    }

    /// Number of sessions waiting for an answer.
    pub fn open_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Number of answers held for sessions not opened yet.
    pub fn held_count(&self) -> usize {
        self.inner.lock().early.len()
    }

    /// Wait for the answer of `session` or `window`, whichever is first.
    pub async fn wait(&self, session: Session, window: Duration) -> Resolution {
        let Session { id, rx } = session;
        let resolution = match tokio::time::timeout(window, rx).await {
            Ok(Ok(outcome)) => Resolution::Answered(outcome),
            // Closed by a replacing session or elapsed.
            Ok(Err(_)) | Err(_) => Resolution::TimedOut,
        };
        let mut inner = self.inner.lock();
        // A replacing session may hold the slot by now.
        if inner
            .waiting
            .get(&id)
            .is_some_and(|tx| tx.is_closed())
        {
            inner.waiting.remove(&id);
        }
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answer_before_timeout() {
        let table = SessionTable::default();
        let id = TxnId::new("t1");
        let session = table.open(&id);
        assert!(table.resolve(&id, Outcome::Commit));
        assert_eq!(
            table.wait(session, Duration::from_secs(1)).await,
            Resolution::Answered(Outcome::Commit)
        );
        assert_eq!(table.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_to_abort() {
        let table = SessionTable::default();
        let id = TxnId::new("t1");
        let session = table.open(&id);

        let resolution = table.wait(session, Duration::from_secs(5)).await;

        assert_eq!(resolution, Resolution::TimedOut);
        assert_eq!(resolution.outcome(), Outcome::Abort);
        assert!(!table.resolve(&id, Outcome::Commit));
    }

    #[tokio::test]
    async fn test_held_answer_is_delivered_on_open() {
        let table = SessionTable::default();
        let id = TxnId::new("t1");
        assert!(!table.resolve(&id, Outcome::Abort));
        table.hold(&id, Outcome::Abort);

        let session = table.open(&id);
        assert_eq!(
            table.wait(session, Duration::from_millis(10)).await,
            Resolution::Answered(Outcome::Abort)
        );
    }

    #[tokio::test]
    async fn test_close_discards_held_answer() {
        let table = SessionTable::default();
        let id = TxnId::new("t1");
        table.hold(&id, Outcome::Commit);
        assert_eq!(table.held_count(), 1);
        table.close(&id);
        assert_eq!(table.held_count(), 0);

        let session = table.open(&id);
        assert!(table.resolve(&id, Outcome::Abort));
        assert_eq!(
            table.wait(session, Duration::from_millis(10)).await,
            Resolution::Answered(Outcome::Abort)
        );
    }
}
