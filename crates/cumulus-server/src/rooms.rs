//! Room membership for broadcast.
//!
//! The directory maintains bidirectional mappings: room → connections (for
//! broadcast) and connection → room (for cleanup on disconnect). A connection
//! joins at most one room, at handshake, and stays there until it leaves.
//! Rooms exist only while they have members.

use std::collections::{HashMap, HashSet};

use cumulus_core::{ConnectionId, RoomId};

/// Tracks which connections are in which room.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    /// Room → member connections
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    /// Connection → the room it joined
    members: HashMap<ConnectionId, RoomId>,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room.
    ///
    /// Returns `false` if the connection is already in a room (including the
    /// same one).
    pub fn join(&mut self, conn: ConnectionId, room: RoomId) -> bool {
        if self.members.contains_key(&conn) {
            return false;
        }

        self.rooms.entry(room.clone()).or_default().insert(conn);
        self.members.insert(conn, room);
        true
    }

    /// Remove a connection from its room, pruning the room if it empties.
    ///
    /// Returns the room it was in, `None` if it never joined.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<RoomId> {
        let room = self.members.remove(&conn)?;

        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }

        Some(room)
    }

    /// Room a connection joined. `None` before handshake.
    pub fn room_of(&self, conn: ConnectionId) -> Option<&RoomId> {
        self.members.get(&conn)
    }

    /// All connections in a room.
    pub fn members(&self, room: &RoomId) -> impl Iterator<Item = ConnectionId> + '_ {
        self.rooms.get(room).into_iter().flat_map(|m| m.iter().copied())
    }

    /// Number of connections in a room.
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_lookup() {
        let mut rooms = RoomDirectory::new();
        let room = RoomId::new("104");

        assert!(rooms.join(ConnectionId(1), room.clone()));
        assert!(rooms.join(ConnectionId(2), room.clone()));

        assert_eq!(rooms.room_of(ConnectionId(1)), Some(&room));
        assert_eq!(rooms.room_of(ConnectionId(3)), None);

        let members: HashSet<_> = rooms.members(&room).collect();
        assert_eq!(members, HashSet::from([ConnectionId(1), ConnectionId(2)]));
    }

    #[test]
    fn second_join_fails() {
        let mut rooms = RoomDirectory::new();

        assert!(rooms.join(ConnectionId(1), RoomId::new("1")));
        assert!(!rooms.join(ConnectionId(1), RoomId::new("1")));
        assert!(!rooms.join(ConnectionId(1), RoomId::new("2")));

        assert_eq!(rooms.room_of(ConnectionId(1)), Some(&RoomId::new("1")));
        assert_eq!(rooms.member_count(&RoomId::new("2")), 0);
    }

    #[test]
    fn leave_prunes_empty_room() {
        let mut rooms = RoomDirectory::new();
        let a = RoomId::new("a");
        let b = RoomId::new("b");

        rooms.join(ConnectionId(1), a.clone());
        rooms.join(ConnectionId(2), a.clone());
        rooms.join(ConnectionId(3), b.clone());

        assert_eq!(rooms.leave(ConnectionId(3)), Some(b.clone()));
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.members(&b).count(), 0);

        assert_eq!(rooms.leave(ConnectionId(1)), Some(a.clone()));
        assert_eq!(rooms.members(&a).collect::<Vec<_>>(), vec![ConnectionId(2)]);
    }

    #[test]
    fn leave_without_join_is_noop() {
        let mut rooms = RoomDirectory::new();

        assert_eq!(rooms.leave(ConnectionId(9)), None);
        assert_eq!(rooms.room_count(), 0);
    }
}
