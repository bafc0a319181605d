//! Entity identity types.
//!
//! An [`EntityId`] is only unique inside a group. The full identity of a live
//! entity is the pair ([`EntityId`], [`GroupId`]), carried around as an
//! [`Egid`]. Moving an entity to another group keeps its [`EntityId`] and
//! changes the group half of its identity.

use serde::{Deserialize, Serialize};

/// Caller-chosen entity identifier, unique within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Create an entity identifier from a raw `u32`.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw `u32` identifier.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// An integer-keyed storage partition.
///
/// Groups model semantic categories ("active", "pooled") and give engines a
/// predictable, contiguous iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl GroupId {
    /// The standard group used by every operation that takes no explicit group.
    pub const DEFAULT: GroupId = GroupId(u32::MAX);

    /// Create a group identifier from a raw `u32`.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw `u32` identifier.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`GroupId::DEFAULT`].
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default() {
            f.write_str("Group(default)")
        } else {
            write!(f, "Group({})", self.0)
        }
    }
}

/// Composite identity of an entity: identifier plus the group it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Egid {
    /// The identifier, preserved across group swaps.
    pub entity: EntityId,
    /// The group currently holding the entity.
    pub group: GroupId,
}

impl Egid {
    /// Pair an identifier with a group.
    #[must_use]
    pub const fn new(entity: EntityId, group: GroupId) -> Self {
        Self { entity, group }
    }

    /// Identity of an entity in [`GroupId::DEFAULT`].
    #[must_use]
    pub const fn in_default_group(entity: EntityId) -> Self {
        Self::new(entity, GroupId::DEFAULT)
    }

    /// The same identifier in another group.
    #[must_use]
    pub const fn with_group(self, group: GroupId) -> Self {
        Self::new(self.entity, group)
    }
}

impl std::fmt::Display for Egid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entity, self.group)
    }
}
