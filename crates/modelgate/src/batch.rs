//! Request batching / coalescing (spec §4.4).
//!
//! One `tokio::sync::Mutex`-guarded group per open `(capability, bucket_key)`
//! pair — short critical sections, following the concurrency discipline used
//! throughout this workspace for anything touched from multiple tasks at
//! once. Sealed by size, wall-clock deadline, or explicit flush.

use dashmap::DashMap;
use modelgate_kernel::capability::Capability;
use modelgate_kernel::job::JobId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

pub struct BatchMember {
    pub job_id: JobId,
    pub reply: oneshot::Sender<()>,
}

struct BatchGroupState {
    members: Vec<BatchMember>,
    sealed: bool,
}

struct BatchGroup {
    state: Mutex<BatchGroupState>,
}

/// Keys open batch groups by `(capability, bucket_key)`.
pub struct Batcher {
    groups: Arc<DashMap<(Capability, String), Arc<BatchGroup>>>,
    max_size: usize,
    max_delay: Duration,
}

impl Batcher {
    pub fn new(max_size: usize, max_delay: Duration) -> Self {
        Batcher {
            groups: Arc::new(DashMap::new()),
            max_size,
            max_delay,
        }
    }

    /// Join (or open) the batch group for `capability`/`bucket_key`. Returns
    /// a receiver that resolves once the group is sealed, and whether this
    /// call is the one that should flush it (first member and therefore the
    /// deadline owner, or the member that filled it to `max_size`).
    pub async fn join(
        &self,
        capability: Capability,
        bucket_key: String,
        job_id: JobId,
    ) -> (oneshot::Receiver<()>, bool) {
        if !capability.is_batchable() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            return (rx, true);
        }

        let key = (capability, bucket_key);
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(BatchGroup {
                    state: Mutex::new(BatchGroupState {
                        members: Vec::new(),
                        sealed: false,
                    }),
                })
            })
            .clone();

        let (tx, rx) = oneshot::channel();
        let is_deadline_owner;
        let should_flush_now;
        {
            let mut state = group.state.lock().await;
            is_deadline_owner = state.members.is_empty();
            state.members.push(BatchMember { job_id, reply: tx });
            should_flush_now = state.members.len() >= self.max_size;
        }

        if should_flush_now {
            self.seal(&key, &group).await;
        } else if is_deadline_owner {
            let groups_key = key.clone();
            let group = group.clone();
            let max_delay = self.max_delay;
            let this_groups = Arc::clone(&self.groups);
            tokio::spawn(async move {
                tokio::time::sleep(max_delay).await;
                seal_group(&groups_key, &group, &this_groups).await;
            });
        }

        (rx, should_flush_now || is_deadline_owner)
    }

    async fn seal(&self, key: &(Capability, String), group: &Arc<BatchGroup>) {
        seal_group(key, group, &self.groups).await;
    }
}

async fn seal_group(
    key: &(Capability, String),
    group: &Arc<BatchGroup>,
    groups: &DashMap<(Capability, String), Arc<BatchGroup>>,
) {
    let mut state = group.state.lock().await;
    if state.sealed {
        return;
    }
    state.sealed = true;
    let members = std::mem::take(&mut state.members);
    debug!(count = members.len(), "sealing batch group");
    for member in members {
        let _ = member.reply.send(());
    }
    groups.remove(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn non_batchable_capability_flushes_immediately() {
        let batcher = Batcher::new(4, Duration::from_millis(50));
        let (rx, flush) = batcher.join(Capability::VisionAnalyze, "k".into(), Uuid::new_v4()).await;
        assert!(flush);
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn group_seals_at_max_size() {
        let batcher = Batcher::new(2, Duration::from_secs(5));
        let (rx1, _) = batcher.join(Capability::LlmCompletion, "k".into(), Uuid::new_v4()).await;
        let (rx2, flush2) = batcher.join(Capability::LlmCompletion, "k".into(), Uuid::new_v4()).await;
        assert!(flush2);
        rx1.await.unwrap();
        rx2.await.unwrap();
    }

    #[tokio::test]
    async fn group_seals_after_deadline() {
        let batcher = Batcher::new(100, Duration::from_millis(20));
        let (rx, _) = batcher.join(Capability::LlmCompletion, "k".into(), Uuid::new_v4()).await;
        rx.await.unwrap();
    }
}
