//! # Zero-Copy Change Dispatcher
//!
//! Delivers change events from the event bus to locally connected clients.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: each event is wrapped in an `Arc` once. Every
//!     interested client receives a new pointer to the same allocation.
//!
//! 2.  **Interest Filtering**: every client carries the set of keys it asked
//!     for. An event for `Silver` reaches all `Silver` clients and nobody else.
//!
//! 3.  **Lazy Cleanup**: a client whose receiver has been dropped is pruned the
//!     next time a broadcast tries to reach it.
//!
//! 4.  **Bounded Backlog**: each client buffers at most a fixed number of
//!     undelivered events. A client that falls that far behind is evicted; its
//!     receiver drains what is buffered and then ends, which closes the socket.
//!
//! The [`Dispatcher::pump`] task bridges the bus to the dispatcher and
//! re-subscribes after a fixed delay whenever the bus connection ends.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::EventBus;
use crate::model::ChangeEvent;

/// Identifier handed out by [`Dispatcher::add_client`].
pub type ClientId = u64;

/// Undelivered events a client may hold before it is evicted.
pub const DEFAULT_CLIENT_BUFFER: usize = 256;

/// Internal record of a connected client.
struct ClientHandle {
    /// Keys the client wants updates for.
    interests: HashSet<String>,
    sender: mpsc::Sender<Arc<ChangeEvent>>,
}

/// Registry of live clients and their interests.
pub struct Dispatcher {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
    client_buffer: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_client_buffer(DEFAULT_CLIENT_BUFFER)
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher with the default per-client buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty dispatcher whose clients buffer at most
    /// `client_buffer` events (minimum 1).
    pub fn with_client_buffer(client_buffer: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            client_buffer: client_buffer.max(1),
        }
    }

    /// # Add Client
    ///
    /// Registers a client with an initial set of interests and returns its id
    /// together with the receiver its connection task should drain.
    pub fn add_client<I>(&self, interests: I) -> (ClientId, mpsc::Receiver<Arc<ChangeEvent>>)
    where
        I: IntoIterator<Item = String>,
    {
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ClientHandle {
            interests: interests.into_iter().collect(),
            sender: tx,
        };

        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        info!("Client {} registered for {:?}", id, handle.interests);
        clients.insert(id, handle);
        (id, rx)
    }

    /// Adds keys to a client's interests. Returns `false` for unknown clients.
    pub fn subscribe(&self, id: ClientId, keys: &[String]) -> bool {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        match clients.get_mut(&id) {
            Some(client) => {
                client.interests.extend(keys.iter().cloned());
                true
            }
            None => false,
        }
    }

    /// Removes keys from a client's interests. Returns `false` for unknown clients.
    pub fn unsubscribe(&self, id: ClientId, keys: &[String]) -> bool {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        match clients.get_mut(&id) {
            Some(client) => {
                for key in keys {
                    client.interests.remove(key);
                }
                true
            }
            None => false,
        }
    }

    /// The client's current interests, sorted. `None` for unknown clients.
    pub fn interests(&self, id: ClientId) -> Option<Vec<String>> {
        let clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.get(&id).map(|client| {
            let mut keys: Vec<String> = client.interests.iter().cloned().collect();
            keys.sort();
            keys
        })
    }

    /// Removes a client by id.
    pub fn remove_client(&self, id: ClientId) {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        if clients.remove(&id).is_some() {
            info!("Client {} removed", id);
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("Dispatcher lock poisoned").len()
    }

    /// # Broadcast
    ///
    /// Sends the event to every client interested in its key and returns how
    /// many clients received it. Clients that have gone away, or whose buffer
    /// is full, are dropped.
    pub fn broadcast(&self, event: ChangeEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;

        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.retain(|id, client| {
            if !client.interests.contains(&event.key) {
                return true;
            }
            match client.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Client {} has {} undelivered events. Evicting it.",
                        id, self.client_buffer
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    info!("Client {} disconnected. Removing from dispatcher.", id);
                    false
                }
            }
        });

        debug!("Event for '{}' delivered to {} clients", event.key, delivered);
        delivered
    }

    /// Forwards bus events for `keys` to [`Dispatcher::broadcast`] until
    /// `cancel` fires. A failed or ended subscription is retried after
    /// `retry_delay`.
    pub async fn pump(
        self: Arc<Self>,
        bus: Arc<dyn EventBus>,
        keys: Vec<String>,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => return,
                result = bus.subscribe(&keys) => result,
            };

            match subscribed {
                Ok(mut subscription) => {
                    info!("Subscribed to {} channels", keys.len());
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = subscription.recv() => match next {
                                Some(event) => {
                                    self.broadcast(event);
                                }
                                None => {
                                    warn!("Bus subscription ended, re-subscribing in {:?}", retry_delay);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Bus subscribe failed, retrying in {:?}: {}", retry_delay, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBus;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn fan_out_respects_interests() {
        let dispatcher = Dispatcher::new();
        let (_, mut silver_a) = dispatcher.add_client(keys(&["Silver"]));
        let (_, mut silver_b) = dispatcher.add_client(keys(&["Silver", "Gold"]));
        let (_, mut gold) = dispatcher.add_client(keys(&["Gold"]));

        let delivered = dispatcher.broadcast(ChangeEvent::now("Silver", "24"));
        assert_eq!(delivered, 2);

        let a = silver_a.try_recv().unwrap();
        let b = silver_b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(gold.try_recv().is_err());
    }

    #[test]
    fn interests_can_change() {
        let dispatcher = Dispatcher::new();
        let (id, mut rx) = dispatcher.add_client(Vec::new());

        assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", "1")), 0);
        assert!(dispatcher.subscribe(id, &keys(&["Silver", "Gold"])));
        assert_eq!(dispatcher.interests(id), Some(keys(&["Gold", "Silver"])));
        assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", "2")), 1);
        assert_eq!(rx.try_recv().unwrap().value, "2");

        assert!(dispatcher.unsubscribe(id, &keys(&["Gold"])));
        assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", "3")), 0);
        assert!(!dispatcher.subscribe(id + 100, &keys(&["Gold"])));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let dispatcher = Dispatcher::new();
        let (_, rx) = dispatcher.add_client(keys(&["Gold"]));
        drop(rx);

        assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", "1")), 0);
        assert_eq!(dispatcher.client_count(), 0);
    }

    #[test]
    fn stalled_client_is_evicted() {
        let dispatcher = Dispatcher::with_client_buffer(2);
        let (_, mut stalled) = dispatcher.add_client(keys(&["Gold"]));
        let (_, mut reading) = dispatcher.add_client(keys(&["Gold"]));

        for n in 0..2 {
            assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", n.to_string())), 2);
            assert_eq!(reading.try_recv().unwrap().value, n.to_string());
        }

        // The third event finds the stalled client's buffer full.
        assert_eq!(dispatcher.broadcast(ChangeEvent::now("Gold", "2")), 1);
        assert_eq!(dispatcher.client_count(), 1);
        assert_eq!(reading.try_recv().unwrap().value, "2");

        // Buffered events are still handed out, then the channel ends.
        assert_eq!(stalled.try_recv().unwrap().value, "0");
        assert_eq!(stalled.try_recv().unwrap().value, "1");
        assert!(matches!(
            stalled.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn pump_forwards_bus_events() {
        let dispatcher = Arc::new(Dispatcher::new());
        let bus = Arc::new(MemoryBus::new());
        let (_, mut rx) = dispatcher.add_client(keys(&["Gold"]));
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(Arc::clone(&dispatcher).pump(
            bus.clone(),
            keys(&["Gold", "Silver"]),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        // Publish until the pump has subscribed and the event comes through.
        let event = loop {
            bus.publish(&ChangeEvent::now("Gold", "1950")).await.unwrap();
            match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
                Ok(Some(event)) => break event,
                _ => continue,
            }
        };
        assert_eq!(event.value, "1950");

        cancel.cancel();
        pump.await.unwrap();
    }
}
