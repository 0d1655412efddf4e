//! Per-key serialized work queues.
//!
//! A [`Mailboxes`] keeps one unbounded channel and one tokio task per key.
//! Messages sent to the same key are handled one after another, in send
//! order; messages for different keys are handled concurrently. Workers
//! retire after an idle period and are spawned again on the next send.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long a worker waits for its next message before retiring.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Processes the messages delivered to one key.
#[async_trait]
pub trait MailboxHandler<K, M>: Send + Sync + 'static {
    async fn handle(&self, key: &K, message: M);
}

/// Returned by [`Mailboxes::send`] after [`Mailboxes::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("mailboxes have been shut down")]
pub struct MailboxClosed;

enum Envelope<M> {
    Message(M),
    Flush(oneshot::Sender<()>),
}

struct Slot<M> {
    sender: mpsc::UnboundedSender<Envelope<M>>,
    task: JoinHandle<()>,
}

struct Registry<K, M> {
    slots: HashMap<K, Slot<M>>,
    closed: bool,
}

/// A set of keyed mailboxes sharing one handler.
pub struct Mailboxes<K, M, H> {
    handler: Arc<H>,
    registry: Arc<Mutex<Registry<K, M>>>,
    idle_timeout: Duration,
}

impl<K, M, H> Clone for Mailboxes<K, M, H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            idle_timeout: self.idle_timeout,
        }
    }
}

fn lock<K, M>(registry: &Mutex<Registry<K, M>>) -> MutexGuard<'_, Registry<K, M>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, M, H> Mailboxes<K, M, H>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    M: Send + 'static,
    H: MailboxHandler<K, M>,
{
    pub fn new(handler: H) -> Self {
        Self::with_idle_timeout(handler, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(handler: H, idle_timeout: Duration) -> Self {
        Self {
            handler: Arc::new(handler),
            registry: Arc::new(Mutex::new(Registry {
                slots: HashMap::new(),
                closed: false,
            })),
            idle_timeout,
        }
    }

    /// Returns the shared handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Queues a message for `key`, spawning its worker if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, key: K, message: M) -> Result<(), MailboxClosed> {
        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(MailboxClosed);
        }

        let envelope = Envelope::Message(message);
        let envelope = match registry.slots.get(&key) {
            Some(slot) => match slot.sender.send(envelope) {
                Ok(()) => return Ok(()),
                // Worker died (handler panic); replace it below.
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        let slot = self.spawn_worker(key.clone());
        slot.sender.send(envelope).map_err(|_| MailboxClosed)?;
        registry.slots.insert(key, slot);
        Ok(())
    }

    /// Waits until every message queued before this call has been handled.
    pub async fn flush(&self) {
        let waiters: Vec<oneshot::Receiver<()>> = {
            let registry = lock(&self.registry);
            registry
                .slots
                .values()
                .filter_map(|slot| {
                    let (tx, rx) = oneshot::channel();
                    slot.sender.send(Envelope::Flush(tx)).ok().map(|_| rx)
                })
                .collect()
        };

        for waiter in waiters {
            let _ = waiter.await;
        }
    }

    /// Stops accepting messages, drains every queue and waits for the workers.
    pub async fn shutdown(&self) {
        let slots: Vec<(K, Slot<M>)> = {
            let mut registry = lock(&self.registry);
            registry.closed = true;
            registry.slots.drain().collect()
        };

        for (key, slot) in slots {
            drop(slot.sender);
            if let Err(e) = slot.task.await {
                tracing::warn!(%key, error = %e, "mailbox worker terminated abnormally");
            }
        }
    }

    /// Number of keys that currently have a live worker.
    pub fn active(&self) -> usize {
        lock(&self.registry).slots.len()
    }

    fn spawn_worker(&self, key: K) -> Slot<M> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_worker(
            key,
            receiver,
            Arc::clone(&self.handler),
            Arc::clone(&self.registry),
            self.idle_timeout,
        ));
        Slot { sender, task }
    }
}

async fn run_worker<K, M, H>(
    key: K,
    mut receiver: mpsc::UnboundedReceiver<Envelope<M>>,
    handler: Arc<H>,
    registry: Arc<Mutex<Registry<K, M>>>,
    idle_timeout: Duration,
) where
    K: Eq + Hash + Display + Send + Sync + 'static,
    M: Send + 'static,
    H: MailboxHandler<K, M>,
{
    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(Envelope::Message(message))) => handler.handle(&key, message).await,
            Ok(Some(Envelope::Flush(done))) => {
                let _ = done.send(());
            }
            Ok(None) => break,
            Err(_elapsed) => {
                // Senders only enqueue while holding the registry lock, so an
                // empty queue observed under the lock stays empty once the
                // slot is gone.
                let mut registry = lock(&registry);
                if receiver.is_empty() {
                    registry.slots.remove(&key);
                    tracing::debug!(%key, "mailbox idle, retiring worker");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl MailboxHandler<u32, u32> for Recorder {
        async fn handle(&self, key: &u32, message: u32) {
            // Later messages sleep less, so reordering would show up.
            tokio::time::sleep(Duration::from_millis(u64::from(10 - message.min(10)))).await;
            self.seen.lock().unwrap().push((*key, message));
        }
    }

    fn seen_for(recorder: &Recorder, key: u32) -> Vec<u32> {
        recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, m)| *m)
            .collect()
    }

    #[tokio::test]
    async fn messages_for_one_key_keep_send_order() {
        let mailboxes = Mailboxes::new(Recorder::default());
        for message in 0..10 {
            mailboxes.send(1, message).unwrap();
        }
        mailboxes.flush().await;

        assert_eq!(seen_for(mailboxes.handler(), 1), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn keys_get_independent_workers() {
        let mailboxes = Mailboxes::new(Recorder::default());
        mailboxes.send(1, 0).unwrap();
        mailboxes.send(2, 0).unwrap();
        mailboxes.send(3, 0).unwrap();
        assert_eq!(mailboxes.active(), 3);

        mailboxes.flush().await;
        assert_eq!(mailboxes.handler().seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn idle_workers_retire_and_respawn() {
        let mailboxes =
            Mailboxes::with_idle_timeout(Recorder::default(), Duration::from_millis(20));
        mailboxes.send(7, 1).unwrap();
        mailboxes.flush().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mailboxes.active(), 0);

        mailboxes.send(7, 2).unwrap();
        mailboxes.flush().await;
        assert_eq!(seen_for(mailboxes.handler(), 7), vec![1, 2]);
    }

    #[tokio::test]
    async fn shutdown_drains_then_rejects() {
        let mailboxes = Mailboxes::new(Recorder::default());
        for message in 0..5 {
            mailboxes.send(1, message).unwrap();
        }
        mailboxes.shutdown().await;

        assert_eq!(seen_for(mailboxes.handler(), 1).len(), 5);
        assert_eq!(mailboxes.send(1, 99), Err(MailboxClosed));
        assert_eq!(mailboxes.active(), 0);
    }
}
