//! Serialized ownership rewrites.
//!
//! All ownership mutations funnel through one unbounded channel with a
//! single consumer task, which makes the at-most-one-in-flight write
//! invariant structural: no rewrite starts before the previous one has
//! completed, in strict enqueue order. Failed writes are logged and
//! dropped so one bad object never blocks the backlog; the next
//! propagation pass picks them up again.

use crate::store::ObjectStore;
use acp_common::{AccessControl, ManagedObject, UserId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One queued ownership rewrite: the object's full document plus the
/// owner to assign.
#[derive(Debug, Clone)]
pub struct OwnershipTask {
    pub object: ManagedObject,
    pub owner: UserId,
}

/// Append-only FIFO of pending ownership rewrites.
///
/// Cloning shares the same queue. The consumer parks when the queue is
/// empty and exits once every handle has been dropped.
#[derive(Clone)]
pub struct OwnershipQueue {
    sender: mpsc::UnboundedSender<OwnershipTask>,
    pending: Arc<AtomicUsize>,
}

impl OwnershipQueue {
    /// Spawn the consumer task and return the queue handle.
    pub fn start(store: Arc<dyn ObjectStore>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<OwnershipTask>();
        let pending = Arc::new(AtomicUsize::new(0));

        let counter = pending.clone();
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                apply(store.as_ref(), task).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                // Long backlogs must not starve the store or sibling work.
                tokio::task::yield_now().await;
            }
            debug!("Ownership queue consumer stopped");
        });

        Self { sender, pending }
    }

    /// Append a rewrite. Never blocks.
    pub fn enqueue(&self, task: OwnershipTask) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Ownership queue consumer is gone, task dropped");
        }
    }

    /// Number of tasks enqueued but not yet consumed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every task enqueued so far has been consumed.
    pub async fn settled(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

async fn apply(store: &dyn ObjectStore, task: OwnershipTask) {
    let OwnershipTask { mut object, owner } = task;

    // Idempotent no-op: the owner may already match by the time the task
    // reaches the head of the queue.
    if object.owner().is_some_and(|current| *current == owner) {
        return;
    }

    match object.acl.as_mut() {
        Some(acl) => acl.owner = owner,
        None => object.acl = Some(AccessControl::owned_by(owner)),
    }

    let id = object.id.clone();
    if let Err(err) = store.set_object(&id, object).await {
        warn!("Ownership rewrite dropped: {err}");
    }
}
