use core::fmt;
use parking_lot::Mutex;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Why a connection was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The cap on concurrent connections is reached.
    AtCapacity { capacity: usize },
    /// [`ConnectionRegistry::close_all`] already ran.
    Closed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtCapacity { capacity } => {
                write!(f, "connection limit of {capacity} reached")
            }
            Self::Closed => f.write_str("server is shutting down"),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    /// Close token of each live connection, by id.
    open: HashMap<u64, CancellationToken>,
    closed: bool,
}

/// The set of live connections, bounded by a cap.
///
/// Admission is a single critical section: the cap check and the insert
/// happen under one lock, so concurrent registrations can never exceed the
/// cap. Each admitted connection is represented by a [`ConnectionGuard`];
/// dropping it frees the slot.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    state: Arc<Mutex<RegistryState>>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            capacity,
        }
    }

    /// Admits `peer` if a slot is free and the registry is still open.
    pub fn try_register(&self, peer: SocketAddr) -> Result<ConnectionGuard, Rejection> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Rejection::Closed);
        }
        if state.open.len() >= self.capacity {
            return Err(Rejection::AtCapacity {
                capacity: self.capacity,
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        let close = CancellationToken::new();
        state.open.insert(id, close.clone());
        trace!("Registered connection {id} from {peer}");

        Ok(ConnectionGuard {
            id,
            peer,
            close,
            state: Arc::clone(&self.state),
        })
    }

    /// Refuses further registrations and signals every live connection to
    /// close. Returns how many were signalled. Calling it again is a no-op
    /// that returns `0`.
    pub fn close_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.open.values().cloned().collect()
        };

        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.state.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A registered connection's slot in the [`ConnectionRegistry`].
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    peer: SocketAddr,
    close: CancellationToken,
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionGuard {
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Token cancelled when the supervisor closes every connection.
    pub const fn close_token(&self) -> &CancellationToken {
        &self.close
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.lock().open.remove(&self.id);
        trace!("Released connection {} from {}", self.id, self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn admits_up_to_capacity() {
        let registry = ConnectionRegistry::new(2);
        let a = registry.try_register(peer(1)).unwrap();
        let _b = registry.try_register(peer(2)).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.try_register(peer(3)).unwrap_err(),
            Rejection::AtCapacity { capacity: 2 }
        );

        drop(a);
        assert_eq!(registry.len(), 1);
        let c = registry.try_register(peer(3)).unwrap();
        assert_eq!(c.peer(), peer(3));
        assert_ne!(c.id(), 0);
    }

    #[test]
    fn close_all_cancels_every_connection_once() {
        let registry = ConnectionRegistry::new(5);
        let guards: Vec<_> = (1..=3)
            .map(|p| registry.try_register(peer(p)).unwrap())
            .collect();

        assert_eq!(registry.close_all(), 3);
        assert!(guards.iter().all(|g| g.close_token().is_cancelled()));
        assert_eq!(registry.close_all(), 0);

        assert_eq!(
            registry.try_register(peer(9)).unwrap_err(),
            Rejection::Closed
        );
        drop(guards);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registrations_never_exceed_capacity() {
        let registry = ConnectionRegistry::new(5);
        let admitted: Vec<ConnectionGuard> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = registry.clone();
                    s.spawn(move || registry.try_register(peer(i)).ok())
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(admitted.len(), 5);
        assert_eq!(registry.len(), 5);
    }
}
