//! Fan-out of game events to passive spectators.

use std::collections::BTreeMap;

use crate::game::{SessionView, VersionedEvent};
use crate::protocol::Message;
use crate::session::{ConnectionHandle, ConnectionId, DeliveryError};

/// Spectators are identified by the connection they watch from.
pub type SpectatorId = ConnectionId;

#[derive(Debug)]
struct Spectator {
    connection: ConnectionHandle,
    last_seen_version: u64,
}

/// The set of watching connections.
///
/// Delivery never blocks the caller: a spectator whose queue is closed or
/// full is dropped from the set. Events reach every spectator in the order
/// they were broadcast.
#[derive(Debug, Default)]
pub struct SpectatorHub {
    spectators: BTreeMap<SpectatorId, Spectator>,
}

impl SpectatorHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, connection: ConnectionHandle) -> SpectatorId {
        let id = connection.id();
        self.spectators.insert(
            id,
            Spectator {
                connection,
                last_seen_version: 0,
            },
        );
        log::info!("spectator {} joined ({} watching)", id, self.spectators.len());
        id
    }

    pub fn unsubscribe(&mut self, id: SpectatorId) -> bool {
        self.spectators.remove(&id).is_some()
    }

    /// Remove a spectator and hand back its connection.
    pub fn take(&mut self, id: SpectatorId) -> Option<ConnectionHandle> {
        self.spectators.remove(&id).map(|s| s.connection)
    }

    pub fn contains(&self, id: SpectatorId) -> bool {
        self.spectators.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.spectators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectators.is_empty()
    }

    pub fn last_seen_version(&self, id: SpectatorId) -> Option<u64> {
        self.spectators.get(&id).map(|s| s.last_seen_version)
    }

    /// Send `view` to one spectator so it can catch up, optionally followed
    /// by the current turn.
    pub fn send_snapshot(
        &mut self,
        id: SpectatorId,
        view: SessionView,
        turn: Option<VersionedEvent>,
    ) -> bool {
        let version = view.version;
        let Some(spectator) = self.spectators.get_mut(&id) else {
            return false;
        };
        let mut result = spectator.connection.deliver(Message::Snapshot(view));
        if let (Ok(()), Some(turn)) = (result, turn) {
            result = spectator.connection.deliver(Message::Event(turn));
        }
        match result {
            Ok(()) => {
                spectator.last_seen_version = version;
                true
            }
            Err(e) => {
                self.drop_spectator(id, e);
                false
            }
        }
    }

    /// Deliver `event` to every spectator. Returns the ids that were dropped.
    pub fn broadcast(&mut self, event: &VersionedEvent) -> Vec<SpectatorId> {
        let mut dropped = Vec::new();
        for (id, spectator) in self.spectators.iter_mut() {
            // Already covered by the snapshot this spectator received.
            if event.version <= spectator.last_seen_version {
                continue;
            }
            match spectator.connection.deliver(Message::Event(event.clone())) {
                Ok(()) => spectator.last_seen_version = event.version,
                Err(e) => dropped.push((*id, e)),
            }
        }
        dropped
            .into_iter()
            .map(|(id, e)| {
                self.drop_spectator(id, e);
                id
            })
            .collect()
    }

    /// Send a message that carries no version.
    pub fn notify(&mut self, id: SpectatorId, msg: Message) -> bool {
        let Some(spectator) = self.spectators.get(&id) else {
            return false;
        };
        match spectator.connection.deliver(msg) {
            Ok(()) => true,
            Err(e) => {
                self.drop_spectator(id, e);
                false
            }
        }
    }

    /// Send the same unversioned message to every spectator.
    pub fn notify_all(&mut self, msg: Message) {
        let ids: Vec<SpectatorId> = self.spectators.keys().copied().collect();
        for id in ids {
            self.notify(id, msg.clone());
        }
    }

    fn drop_spectator(&mut self, id: SpectatorId, reason: DeliveryError) {
        if self.spectators.remove(&id).is_some() {
            match reason {
                DeliveryError::Closed => log::debug!("spectator {} went away", id),
                DeliveryError::Lagging => log::warn!("spectator {} fell behind, dropping", id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameEvent;
    use crate::session::UserId;
    use tokio::sync::mpsc;

    fn event(version: u64) -> VersionedEvent {
        VersionedEvent {
            version,
            event: GameEvent::TurnNotice { user: UserId(1) },
        }
    }

    #[test]
    fn full_queue_drops_only_that_spectator() {
        let mut hub = SpectatorHub::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        hub.subscribe(ConnectionHandle::new(ConnectionId(1), slow_tx));
        hub.subscribe(ConnectionHandle::new(ConnectionId(2), fast_tx));

        assert!(hub.broadcast(&event(1)).is_empty());
        assert_eq!(hub.broadcast(&event(2)), vec![ConnectionId(1)]);
        assert_eq!(hub.len(), 1);
        assert!(hub.broadcast(&event(3)).is_empty());

        for v in 1..=3 {
            match fast_rx.try_recv() {
                Ok(Message::Event(e)) => assert_eq!(e.version, v),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn closed_connection_is_removed() {
        let mut hub = SpectatorHub::new();
        let (tx, rx) = mpsc::channel(4);
        hub.subscribe(ConnectionHandle::new(ConnectionId(7), tx));
        drop(rx);
        assert_eq!(hub.broadcast(&event(1)), vec![ConnectionId(7)]);
        assert!(hub.is_empty());
    }
}
