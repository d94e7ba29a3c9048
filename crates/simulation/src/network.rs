//! In-process transport between replicas.
//!
//! Every request and response is encoded and decoded with the wire codec on
//! its way, so the simulation exercises the same bytes a real RPC transport
//! would carry. Each call runs in its own task: a caller that stops waiting
//! does not cancel the handler, as with a remote server.

use async_trait::async_trait;
use byzshard_core::{ConsensusError, RpcError, Transport};
use byzshard_messages::{
    decode_message, encode_message, Ack, NetworkMessage, PbftReply, PbftRequest,
    ProcessTxnRequest, RoundFailed, SyncRequest, SyncResponse, TwoPcDecision, TwoPcMessage,
    TxnReply,
};
use byzshard_node::Replica;
use byzshard_types::{ReplicaId, TxnId, TxnStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Network configuration.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Delay added to every delivered call.
    pub latency: Duration,
}

/// Routes calls to registered replicas and collects client replies.
#[derive(Default)]
pub struct LocalNetwork {
    config: NetworkConfig,
    replicas: RwLock<HashMap<ReplicaId, Arc<Replica>>>,
    /// Replicas whose traffic is dropped.
    partitioned: RwLock<HashSet<ReplicaId>>,
    /// Transport methods whose calls are dropped.
    dropped: RwLock<HashSet<&'static str>>,
    replies: Mutex<Vec<TxnReply>>,
    reply_signal: Notify,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("replicas", &self.replicas.read().len())
            .field("partitioned", &self.partitioned.read().len())
            .field("dropped", &self.dropped.read().len())
            .field("replies", &self.replies.lock().len())
            .finish()
    }
}

fn wire<M: NetworkMessage>(message: &M) -> Result<M, RpcError> {
    let bytes = encode_message(message).map_err(|e| RpcError::Remote(e.to_string()))?;
    decode_message(&bytes).map_err(|e| RpcError::Remote(e.to_string()))
}

fn remote(err: ConsensusError) -> RpcError {
    RpcError::Remote(err.to_string())
}

impl LocalNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Make a replica reachable.
    pub fn register(&self, replica: Arc<Replica>) {
        self.replicas.write().insert(replica.id(), replica);
    }

    /// Drop every registered replica.
    pub fn clear(&self) {
        self.replicas.write().clear();
    }

    /// Cut a replica off or reconnect it.
    pub fn set_partitioned(&self, replica: ReplicaId, partitioned: bool) {
        if partitioned {
            self.partitioned.write().insert(replica);
        } else {
            self.partitioned.write().remove(&replica);
        }
    }

    /// Drop or restore every call of one transport method, named as on
    /// [`Transport`], such as `"two_pc_commit_request"`.
    pub fn set_dropped(&self, method: &'static str, dropped: bool) {
        if dropped {
            self.dropped.write().insert(method);
        } else {
            self.dropped.write().remove(method);
        }
    }

    fn target(&self, to: ReplicaId, method: &'static str) -> Result<Arc<Replica>, RpcError> {
        if self.partitioned.read().contains(&to) || self.dropped.read().contains(method) {
            return Err(RpcError::Unreachable(to));
        }
        self.replicas
            .read()
            .get(&to)
            .cloned()
            .ok_or(RpcError::Unreachable(to))
    }

    /// Deliver `request` to `to` and run `handler` on its side.
    async fn call<Req, Resp, F, Fut>(
        &self,
        to: ReplicaId,
        method: &'static str,
        request: Req,
        handler: F,
    ) -> Result<Resp, RpcError>
    where
        Req: NetworkMessage,
        Resp: NetworkMessage,
        F: FnOnce(Arc<Replica>, Req) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, ConsensusError>> + Send + 'static,
    {
        let replica = self.target(to, method)?;
        let request = wire(&request)?;
        trace!(to = %to, method, message = Req::message_type_id(), "Delivering");
        let latency = self.config.latency;
        let response = tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            handler(replica, request).await
        })
        .await
        .map_err(|e| RpcError::Remote(e.to_string()))?
        .map_err(remote)?;
        wire(&response)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client side
    // ═══════════════════════════════════════════════════════════════════════

    /// Every reply sent so far.
    pub fn replies(&self) -> Vec<TxnReply> {
        self.replies.lock().clone()
    }

    /// Replies sent for one transaction.
    pub fn replies_for(&self, id: &TxnId) -> Vec<TxnReply> {
        self.replies
            .lock()
            .iter()
            .filter(|r| &r.txn_id == id)
            .cloned()
            .collect()
    }

    /// Wait for a reply to `id` matching `accept`.
    pub async fn wait_for_reply(
        &self,
        id: &TxnId,
        timeout: Duration,
        accept: impl Fn(&TxnReply) -> bool,
    ) -> Option<TxnReply> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.reply_signal.notified();
            if let Some(reply) = self.replies_for(id).into_iter().find(|r| accept(r)) {
                return Some(reply);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait for the first reply to `id` with `status`.
    pub async fn wait_for_status_reply(
        &self,
        id: &TxnId,
        status: TxnStatus,
        timeout: Duration,
    ) -> Option<TxnReply> {
        self.wait_for_reply(id, timeout, |r| r.status == status).await
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn process_txn(&self, to: ReplicaId, request: ProcessTxnRequest) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "process_txn", request, |replica, request| async move {
                replica.process_txn(request).await
            })
            .await?;
        Ok(())
    }

    async fn pre_prepare(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        self.call(to, "pre_prepare", request, |replica, request| async move {
            replica.pre_prepare(request).await
        })
        .await
    }

    async fn prepare(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        self.call(to, "prepare", request, |replica, request| async move {
            replica.prepare(request).await
        })
        .await
    }

    async fn commit(&self, to: ReplicaId, request: PbftRequest) -> Result<PbftReply, RpcError> {
        self.call(to, "commit", request, |replica, request| async move {
            replica.commit(request).await
        })
        .await
    }

    async fn round_failed(&self, to: ReplicaId, notice: RoundFailed) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "round_failed", notice, |replica, notice| async move {
                replica.round_failed(notice)
            })
            .await?;
        Ok(())
    }

    async fn two_pc_prepare_request(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "two_pc_prepare_request", message, |replica, message| async move {
                replica.two_pc_prepare_request(message)
            })
            .await?;
        Ok(())
    }

    async fn two_pc_prepare_response(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "two_pc_prepare_response", message, |replica, message| async move {
                replica.two_pc_prepare_response(message)
            })
            .await?;
        Ok(())
    }

    async fn two_pc_commit_request(
        &self,
        to: ReplicaId,
        message: TwoPcMessage,
    ) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "two_pc_commit_request", message, |replica, message| async move {
                replica.two_pc_commit_request(message)
            })
            .await?;
        Ok(())
    }

    async fn two_pc_decision(&self, to: ReplicaId, decision: TwoPcDecision) -> Result<(), RpcError> {
        let _: Ack = self
            .call(to, "two_pc_decision", decision, |replica, decision| async move {
                replica.two_pc_decision(decision)
            })
            .await?;
        Ok(())
    }

    async fn sync(&self, to: ReplicaId, request: SyncRequest) -> Result<SyncResponse, RpcError> {
        self.call(to, "sync", request, |replica, request| async move {
            replica.sync(request)
        })
        .await
    }

    async fn reply_to_client(&self, reply: TxnReply) {
        match wire(&reply) {
            Ok(reply) => {
                self.replies.lock().push(reply);
                self.reply_signal.notify_waiters();
            }
            Err(err) => tracing::warn!(error = %err, "Client reply lost"),
        }
    }
}
