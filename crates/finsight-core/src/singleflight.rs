//! Request coalescing: concurrent loads of one key share a single call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use crate::SourceError;

type Outcome<V> = Result<V, SourceError>;

/// In-flight registry keyed by request identity.
///
/// The first caller for a key becomes the leader and runs the load; later
/// callers subscribe to its outcome. If the leader is cancelled before it
/// finishes, its entry is removed and one waiting caller takes over. Outcomes
/// are shared once and never retained, so failures are not cached here.
#[derive(Debug)]
pub struct Singleflight<K, V> {
    in_flight: Mutex<HashMap<K, broadcast::Sender<Outcome<V>>>>,
}

impl<K, V> Default for Singleflight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

enum Role<V> {
    Leader(broadcast::Sender<Outcome<V>>),
    Follower(broadcast::Receiver<Outcome<V>>),
}

/// Removes the in-flight entry when the leader finishes or is dropped.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    owner: &'a Singleflight<K, V>,
    key: &'a K,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        self.owner.lock().remove(self.key);
    }
}

impl<K: Eq + Hash, V> Singleflight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, broadcast::Sender<Outcome<V>>>> {
        self.in_flight
            .lock()
            .expect("singleflight lock is not poisoned")
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

impl<K, V> Singleflight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone,
{

    /// Runs `load` unless an identical load is already in flight.
    pub async fn run<F, Fut>(&self, key: &K, load: F) -> Outcome<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Outcome<V>>,
    {
        loop {
            let role = {
                let mut in_flight = self.lock();
                match in_flight.get(key) {
                    Some(sender) => Role::Follower(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        in_flight.insert(key.clone(), sender.clone());
                        Role::Leader(sender)
                    }
                }
            };

            match role {
                Role::Leader(sender) => {
                    let guard = LeaderGuard { owner: self, key };
                    let outcome = load().await;
                    drop(guard);
                    let _ = sender.send(outcome.clone());
                    return outcome;
                }
                Role::Follower(mut receiver) => {
                    debug!(key = %key, "coalescing onto in-flight provider call");
                    match receiver.recv().await {
                        Ok(outcome) => return outcome,
                        Err(_) => {
                            debug!(key = %key, "in-flight leader went away; retrying");
                            continue;
                        }
                    }
                }
            }
        }
    }
}
