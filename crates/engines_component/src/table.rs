//! Contiguous per-group view storage.
//!
//! Every (group, view kind) pair owns one [`ViewTable`]: a dense vector of
//! views, a parallel vector of entity identifiers and a side index from
//! identifier to slot. Removal swaps the last row into the vacated slot and
//! patches the index, so removal stays O(1) and iteration stays contiguous.
//!
//! Slot numbers are only stable until the next structural change.
//!
//! A group keeps each table in a [`SharedTable`]: its own lock, so queries
//! can hold several view kinds of one group at once.

use std::any::Any;
use std::collections::{HashMap, TryReserveError};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::{EntityView, ViewKind};
use crate::entity::EntityId;

/// Dense storage for one view kind inside one group.
#[derive(Debug, Clone)]
pub struct ViewTable<V> {
    /// `entities[i]` owns `views[i]`.
    entities: Vec<EntityId>,
    /// View data in slot order.
    views: Vec<V>,
    /// Identifier → slot.
    index: HashMap<EntityId, usize>,
}

impl<V: EntityView> ViewTable<V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            views: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the number of entities stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns `true` if the table holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Reserve room for `additional` more entities.
    ///
    /// # Errors
    ///
    /// Returns the allocator's error when the capacity overflows or cannot
    /// be allocated. The table stays usable either way.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.entities.try_reserve(additional)?;
        self.views.try_reserve(additional)?;
        self.index.try_reserve(additional)
    }

    /// Returns `true` if `entity` has a row in this table.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.index.contains_key(&entity)
    }

    /// Current slot of `entity`.
    #[must_use]
    pub fn slot(&self, entity: EntityId) -> Option<usize> {
        self.index.get(&entity).copied()
    }

    /// The view of `entity`.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&V> {
        self.slot(entity).map(|slot| &self.views[slot])
    }

    /// The view of `entity`, mutably.
    #[must_use]
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut V> {
        let slot = self.slot(entity)?;
        Some(&mut self.views[slot])
    }

    /// Identifiers in slot order.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Views in slot order.
    #[must_use]
    pub fn views(&self) -> &[V] {
        &self.views
    }

    /// Views in slot order, mutably.
    #[must_use]
    pub fn views_mut(&mut self) -> &mut [V] {
        &mut self.views
    }

    /// Iterate `(identifier, view)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &V)> {
        self.entities.iter().copied().zip(self.views.iter())
    }

    /// Append a row for `entity`.
    ///
    /// Returns the view back if the identifier is already present.
    pub fn insert(&mut self, entity: EntityId, view: V) -> Result<usize, V> {
        if self.index.contains_key(&entity) {
            return Err(view);
        }
        let slot = self.views.len();
        self.entities.push(entity);
        self.views.push(view);
        self.index.insert(entity, slot);
        Ok(slot)
    }

    /// Remove the row of `entity`, moving the last row into its slot.
    pub fn remove(&mut self, entity: EntityId) -> Option<V> {
        let slot = self.index.remove(&entity)?;
        self.entities.swap_remove(slot);
        let view = self.views.swap_remove(slot);
        if let Some(&moved) = self.entities.get(slot) {
            self.index.insert(moved, slot);
        }
        Some(view)
    }
}

impl<V: EntityView> Default for ViewTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe face of a [`ViewTable`], used where the view type is only
/// known as a [`ViewKind`].
pub trait ErasedTable: Send + Sync {
    /// Kind of the stored views.
    fn view_kind(&self) -> ViewKind;

    /// Number of stored entities.
    fn len(&self) -> usize;

    /// Returns `true` if no entity is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `entity` has a row.
    fn contains(&self, entity: EntityId) -> bool;

    /// Reserve room for `additional` more entities.
    ///
    /// # Errors
    ///
    /// Capacity overflow or allocation failure.
    fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError>;

    /// Drop the row of `entity`. Returns `false` if absent.
    fn remove_entity(&mut self, entity: EntityId) -> bool;

    /// Move the row of `entity` into `destination`, which must store the same
    /// view kind. Returns `false` (and leaves both tables untouched) if the
    /// entity is absent, the kinds differ or the destination already holds it.
    fn move_entity(&mut self, entity: EntityId, destination: &mut dyn ErasedTable) -> bool;

    /// The view of `entity` as `&dyn Any` (downcasts to the view type).
    fn view_any(&self, entity: EntityId) -> Option<&dyn Any>;

    /// The concrete table as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// The concrete table as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V: EntityView> ErasedTable for ViewTable<V> {
    fn view_kind(&self) -> ViewKind {
        ViewKind::of::<V>()
    }

    fn len(&self) -> usize {
        ViewTable::len(self)
    }

    fn contains(&self, entity: EntityId) -> bool {
        ViewTable::contains(self, entity)
    }

    fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        ViewTable::try_reserve(self, additional)
    }

    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.remove(entity).is_some()
    }

    fn move_entity(&mut self, entity: EntityId, destination: &mut dyn ErasedTable) -> bool {
        let Some(destination) = destination.as_any_mut().downcast_mut::<ViewTable<V>>() else {
            return false;
        };
        if !self.contains(entity) || destination.contains(entity) {
            return false;
        }
        match self.remove(entity) {
            Some(view) => destination.insert(entity, view).is_ok(),
            None => false,
        }
    }

    fn view_any(&self, entity: EntityId) -> Option<&dyn Any> {
        self.get(entity).map(|view| view as &dyn Any)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A [`ViewTable`] behind its own lock, reachable typed or type-erased.
///
/// Both handles point at the same table. Clones share it.
#[derive(Clone)]
pub struct SharedTable {
    erased: Arc<RwLock<dyn ErasedTable>>,
    typed: Arc<dyn Any + Send + Sync>,
    view: ViewKind,
}

impl SharedTable {
    /// A new, empty table of `V` views.
    #[must_use]
    pub fn new<V: EntityView>() -> Self {
        let table = Arc::new(RwLock::new(ViewTable::<V>::new()));
        Self {
            erased: Arc::clone(&table) as Arc<RwLock<dyn ErasedTable>>,
            typed: table,
            view: ViewKind::of::<V>(),
        }
    }

    /// Kind of the stored views.
    #[must_use]
    pub fn view_kind(&self) -> ViewKind {
        self.view
    }

    /// Shared access to the erased table. Recursive: a thread already
    /// reading this table never waits on a queued writer.
    pub fn read(&self) -> RwLockReadGuard<'_, dyn ErasedTable> {
        self.erased.read_recursive()
    }

    /// Exclusive access to the erased table.
    pub fn write(&self) -> RwLockWriteGuard<'_, dyn ErasedTable> {
        self.erased.write()
    }

    /// The typed lock, if this table stores `V` views.
    #[must_use]
    pub fn typed<V: EntityView>(&self) -> Option<Arc<RwLock<ViewTable<V>>>> {
        Arc::clone(&self.typed)
            .downcast::<RwLock<ViewTable<V>>>()
            .ok()
    }
}

impl std::fmt::Debug for SharedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTable")
            .field("view", &self.view.name)
            .finish_non_exhaustive()
    }
}
