//! Parallel fan-out of one call to many replicas.
//!
//! Every target gets its own task bounded by a per-call timeout. Results are
//! delivered in completion order so a caller can stop as soon as it has a
//! quorum; calls still in flight keep running to completion in the
//! background and their results are dropped.

use crate::transport::RpcError;
use byzshard_types::ReplicaId;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Stream of per-target results of a [`fan_out`].
#[derive(Debug)]
pub struct Fanout<T> {
    rx: mpsc::Receiver<(ReplicaId, Result<T, RpcError>)>,
    remaining: usize,
}

impl<T> Fanout<T> {
    /// Next result to arrive, or `None` once every target has answered.
    pub async fn next(&mut self) -> Option<(ReplicaId, Result<T, RpcError>)> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.rx.recv().await?;
        self.remaining -= 1;
        Some(item)
    }

    /// Targets that have not answered yet.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Wait for every target.
    pub async fn collect_all(mut self) -> Vec<(ReplicaId, Result<T, RpcError>)> {
        let mut results = Vec::with_capacity(self.remaining);
        while let Some(item) = self.next().await {
            results.push(item);
        }
        results
    }
}

/// Start `call` against every target concurrently.
///
/// A call that does not finish within `per_call_timeout` yields
/// [`RpcError::Timeout`] for that target.
pub fn fan_out<T, F>(targets: &[ReplicaId], per_call_timeout: Duration, call: F) -> Fanout<T>
where
    T: Send + 'static,
    F: Fn(ReplicaId) -> BoxFuture<'static, Result<T, RpcError>>,
{
    let (tx, rx) = mpsc::channel(targets.len().max(1));
    for &target in targets {
        let fut = call(target);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(per_call_timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout(target)),
            };
            if tx.send((target, result)).await.is_err() {
                trace!(target = %target, "fan-out result dropped, caller finished early");
            }
        });
    }
    Fanout {
        rx,
        remaining: targets.len(),
    }
}
