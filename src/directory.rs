//! User/room directory collaborator.
//!
//! The engine never stores people or rooms itself. It asks the directory
//! whether ids exist, who is a teacher, and what zone a user lives in.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use time::UtcOffset;

use crate::model::{RoomId, UserId};

/// Lookup interface the engine validates external ids against.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Whether the user id exists at all.
    async fn user_exists(&self, user: UserId) -> bool;

    /// Whether the user exists and holds the teacher role.
    async fn is_teacher(&self, user: UserId) -> bool;

    /// Whether the room id exists.
    async fn room_exists(&self, room: RoomId) -> bool;

    /// UTC offset of the user's configured zone. Falls back to UTC when the
    /// user has no zone on file.
    async fn utc_offset(&self, user: UserId) -> UtcOffset;
}

/// Directory backed by in-process maps. The default for tests and for
/// embedders that manage users elsewhere and sync them in.
pub struct InMemoryDirectory {
    users: DashSet<UserId>,
    teachers: DashSet<UserId>,
    rooms: DashSet<RoomId>,
    offsets: DashMap<UserId, UtcOffset>,
}

impl InMemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self {
            users: DashSet::new(),
            teachers: DashSet::new(),
            rooms: DashSet::new(),
            offsets: DashMap::new(),
        }
    }

    /// Register a user; teachers are users too.
    pub fn add_user(&self, user: UserId, teacher: bool) {
        self.users.insert(user);
        if teacher {
            self.teachers.insert(user);
        }
    }

    /// Register a room.
    pub fn add_room(&self, room: RoomId) {
        self.rooms.insert(room);
    }

    /// Set a user's zone offset.
    pub fn set_offset(&self, user: UserId, offset: UtcOffset) {
        self.offsets.insert(user, offset);
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn user_exists(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    async fn is_teacher(&self, user: UserId) -> bool {
        self.teachers.contains(&user)
    }

    async fn room_exists(&self, room: RoomId) -> bool {
        self.rooms.contains(&room)
    }

    async fn utc_offset(&self, user: UserId) -> UtcOffset {
        self.offsets
            .get(&user)
            .map(|o| *o.value())
            .unwrap_or(UtcOffset::UTC)
    }
}
