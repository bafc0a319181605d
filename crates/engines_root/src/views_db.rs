//! The query surface handed to engines.
//!
//! Every query holds the store shared, then locks the one table it touches.
//! A submission needs the store exclusively for its whole pass, so any value
//! returned here holds the next submission back until it is dropped. Slot
//! positions and slices are therefore only meaningful while it lives.
//!
//! Tables lock independently: one thread may write the positions of a group
//! while reading its velocities. Each thread's live borrows are recorded, and
//! a request that could only wait on the calling thread itself fails with
//! [`EcsError::ViewBorrowed`] instead of blocking forever. Threads that lock
//! several tables exclusively should do so in a consistent order.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use engines_component::{Egid, EntityId, EntityView, GroupId, ViewTable};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EcsError, EcsResult};
use crate::store::EntityStore;

type TableReadGuard<V> = ArcRwLockReadGuard<RawRwLock, ViewTable<V>>;
type TableWriteGuard<V> = ArcRwLockWriteGuard<RawRwLock, ViewTable<V>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TableKey {
    group: GroupId,
    view: TypeId,
}

impl TableKey {
    fn of<V: EntityView>(group: GroupId) -> Self {
        Self {
            group,
            view: TypeId::of::<V>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableBorrow {
    Shared(usize),
    Exclusive,
}

/// Live query borrows, per thread.
#[derive(Default)]
struct Borrows {
    /// Query values pinning the store, per thread.
    stores: HashMap<ThreadId, usize>,
    tables: HashMap<(ThreadId, TableKey), TableBorrow>,
}

impl Borrows {
    fn hold_store(&mut self, thread: ThreadId) {
        *self.stores.entry(thread).or_default() += 1;
    }

    fn release_store(&mut self, thread: ThreadId) {
        if let Entry::Occupied(mut holds) = self.stores.entry(thread) {
            *holds.get_mut() -= 1;
            if *holds.get() == 0 {
                holds.remove();
            }
        }
    }

    /// Record a borrow of `key` by `thread`. Refused when the thread already
    /// holds the table in a conflicting way.
    fn acquire(&mut self, thread: ThreadId, key: TableKey, exclusive: bool) -> bool {
        match self.tables.entry((thread, key)) {
            Entry::Vacant(slot) => {
                slot.insert(if exclusive {
                    TableBorrow::Exclusive
                } else {
                    TableBorrow::Shared(1)
                });
                true
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                TableBorrow::Shared(count) if !exclusive => {
                    *count += 1;
                    true
                }
                _ => false,
            },
        }
    }

    fn release(&mut self, thread: ThreadId, key: TableKey) {
        if let Entry::Occupied(mut slot) = self.tables.entry((thread, key)) {
            let last = match slot.get_mut() {
                TableBorrow::Shared(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                _ => true,
            };
            if last {
                slot.remove();
            }
        }
    }
}

/// The store plus the bookkeeping that keeps queries and submission apart.
#[derive(Default)]
pub(crate) struct StoreCell {
    store: RwLock<EntityStore>,
    submitter: Mutex<Option<ThreadId>>,
    borrows: Mutex<Borrows>,
}

impl StoreCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the current thread still holds a query value, which a
    /// submission on this thread would wait on forever.
    pub fn ensure_released(&self) -> EcsResult<()> {
        let thread = thread::current().id();
        if self.borrows.lock().stores.contains_key(&thread) {
            return Err(EcsError::SubmissionWhileBorrowed);
        }
        Ok(())
    }

    /// Take the store exclusively for a submission pass and mark this thread
    /// as the submitter until the returned guard drops.
    pub fn begin_submission(&self) -> SubmissionGuard<'_> {
        let store = self.store.write();
        *self.submitter.lock() = Some(thread::current().id());
        SubmissionGuard { cell: self, store }
    }

    fn check_thread(&self) -> EcsResult<()> {
        if *self.submitter.lock() == Some(thread::current().id()) {
            return Err(EcsError::QueryDuringSubmission);
        }
        Ok(())
    }

    fn read(&self) -> EcsResult<StoreRead<'_>> {
        self.check_thread()?;
        let store = self.store.read_recursive();
        let thread = thread::current().id();
        self.borrows.lock().hold_store(thread);
        Ok(StoreRead {
            cell: self,
            thread,
            store,
        })
    }

    fn borrow<V: EntityView>(&self, group: GroupId, exclusive: bool) -> EcsResult<Borrow<'_>> {
        let thread = thread::current().id();
        let key = TableKey::of::<V>(group);
        if !self.borrows.lock().acquire(thread, key, exclusive) {
            return Err(EcsError::ViewBorrowed {
                group,
                kind: V::type_name(),
            });
        }
        Ok(Borrow {
            cell: self,
            thread,
            key,
        })
    }

    /// Shared lock on the `V` table of `group`, if it exists.
    fn read_table<V: EntityView>(
        &self,
        store: &EntityStore,
        group: GroupId,
    ) -> EcsResult<Option<(TableReadGuard<V>, Borrow<'_>)>> {
        let Some(table) = store.table::<V>(group) else {
            return Ok(None);
        };
        let borrow = self.borrow::<V>(group, false)?;
        Ok(Some((table.read_arc_recursive(), borrow)))
    }

    /// Exclusive lock on the `V` table of `group`, if it exists.
    fn write_table<V: EntityView>(
        &self,
        store: &EntityStore,
        group: GroupId,
    ) -> EcsResult<Option<(TableWriteGuard<V>, Borrow<'_>)>> {
        let Some(table) = store.table::<V>(group) else {
            return Ok(None);
        };
        let borrow = self.borrow::<V>(group, true)?;
        Ok(Some((table.write_arc(), borrow)))
    }
}

/// Exclusive access to the store for the duration of one submission.
pub(crate) struct SubmissionGuard<'a> {
    cell: &'a StoreCell,
    store: RwLockWriteGuard<'a, EntityStore>,
}

impl Deref for SubmissionGuard<'_> {
    type Target = EntityStore;

    fn deref(&self) -> &EntityStore {
        &self.store
    }
}

impl DerefMut for SubmissionGuard<'_> {
    fn deref_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        // Runs before the write lock is released.
        *self.cell.submitter.lock() = None;
    }
}

/// Shared hold on the store, counted against the holding thread.
struct StoreRead<'a> {
    cell: &'a StoreCell,
    thread: ThreadId,
    store: RwLockReadGuard<'a, EntityStore>,
}

impl Deref for StoreRead<'_> {
    type Target = EntityStore;

    fn deref(&self) -> &EntityStore {
        &self.store
    }
}

impl Drop for StoreRead<'_> {
    fn drop(&mut self) {
        self.cell.borrows.lock().release_store(self.thread);
    }
}

/// One recorded table borrow.
struct Borrow<'a> {
    cell: &'a StoreCell,
    thread: ThreadId,
    key: TableKey,
}

impl Drop for Borrow<'_> {
    fn drop(&mut self) {
        self.cell.borrows.lock().release(self.thread, self.key);
    }
}

/// Read access to one entity's view.
pub struct ViewRef<'a, V: EntityView> {
    table: TableReadGuard<V>,
    slot: usize,
    _borrow: Borrow<'a>,
    _store: StoreRead<'a>,
}

impl<V: EntityView> Deref for ViewRef<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.table.views()[self.slot]
    }
}

impl<V: EntityView + std::fmt::Debug> std::fmt::Debug for ViewRef<'_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ViewRef").field(&**self).finish()
    }
}

/// Write access to one entity's view.
pub struct ViewMut<'a, V: EntityView> {
    table: TableWriteGuard<V>,
    slot: usize,
    _borrow: Borrow<'a>,
    _store: StoreRead<'a>,
}

impl<V: EntityView> Deref for ViewMut<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.table.views()[self.slot]
    }
}

impl<V: EntityView> DerefMut for ViewMut<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.table.views_mut()[self.slot]
    }
}

/// Query surface over a root's entities.
///
/// Cheap to clone; every clone reads the same store.
#[derive(Clone)]
pub struct EntityViewsDb {
    cell: Arc<StoreCell>,
}

impl EntityViewsDb {
    pub(crate) fn new(cell: Arc<StoreCell>) -> Self {
        Self { cell }
    }

    /// Point lookup of the `V` view at `egid`.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] if no entity with a `V` view lives at
    /// `egid`, [`EcsError::ViewBorrowed`] if this thread holds the table
    /// exclusively, [`EcsError::QueryDuringSubmission`] when called from
    /// inside a notification callback.
    pub fn query_entity_view<V: EntityView>(&self, egid: Egid) -> EcsResult<ViewRef<'_, V>> {
        let store = self.cell.read()?;
        let not_found = || EcsError::EntityNotFound {
            egid,
            kind: V::type_name(),
        };
        let (table, borrow) = self
            .cell
            .read_table::<V>(&store, egid.group)?
            .ok_or_else(not_found)?;
        let slot = table.slot(egid.entity).ok_or_else(not_found)?;
        Ok(ViewRef {
            table,
            slot,
            _borrow: borrow,
            _store: store,
        })
    }

    /// Point lookup with write access.
    ///
    /// # Errors
    ///
    /// Same as [`Self::query_entity_view`], and [`EcsError::ViewBorrowed`]
    /// if this thread holds the table in any way.
    pub fn query_entity_view_mut<V: EntityView>(&self, egid: Egid) -> EcsResult<ViewMut<'_, V>> {
        let store = self.cell.read()?;
        let not_found = || EcsError::EntityNotFound {
            egid,
            kind: V::type_name(),
        };
        let (table, borrow) = self
            .cell
            .write_table::<V>(&store, egid.group)?
            .ok_or_else(not_found)?;
        let slot = table.slot(egid.entity).ok_or_else(not_found)?;
        Ok(ViewMut {
            table,
            slot,
            _borrow: borrow,
            _store: store,
        })
    }

    /// Shared access to the contiguous `V` table of `group`.
    ///
    /// A group that never held a `V` yields an empty view.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewBorrowed`] if this thread holds the table
    /// exclusively, [`EcsError::QueryDuringSubmission`] when called from
    /// inside a notification callback.
    pub fn query_grouped_views<V: EntityView>(
        &self,
        group: GroupId,
    ) -> EcsResult<GroupedViews<'_, V>> {
        let store = self.cell.read()?;
        let (table, borrow) = self.cell.read_table::<V>(&store, group)?.unzip();
        Ok(GroupedViews {
            group,
            table,
            _borrow: borrow,
            _store: store,
        })
    }

    /// Exclusive access to the contiguous `V` table of `group`, for tight
    /// update loops. Tables of other view kinds stay queryable meanwhile.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewBorrowed`] if this thread holds the table in any way,
    /// [`EcsError::QueryDuringSubmission`] when called from inside a
    /// notification callback.
    pub fn query_grouped_views_as_slice<V: EntityView>(
        &self,
        group: GroupId,
    ) -> EcsResult<GroupedViewsMut<'_, V>> {
        let store = self.cell.read()?;
        let (table, borrow) = self.cell.write_table::<V>(&store, group)?.unzip();
        Ok(GroupedViewsMut {
            group,
            table,
            _borrow: borrow,
            _store: store,
        })
    }

    /// Every `V` view in every group, groups in creation order.
    ///
    /// The sequence is lazy and holds every `V` table shared until it is
    /// dropped.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewBorrowed`] if this thread holds any `V` table
    /// exclusively, [`EcsError::QueryDuringSubmission`] when called from
    /// inside a notification callback.
    pub fn query_views_across_groups<V: EntityView>(&self) -> EcsResult<ViewsAcrossGroups<'_, V>> {
        let store = self.cell.read()?;
        let mut tables = Vec::new();
        let mut borrows = Vec::new();
        for &group in store.groups() {
            if let Some((table, borrow)) = self.cell.read_table::<V>(&store, group)? {
                tables.push((group, table));
                borrows.push(borrow);
            }
        }
        Ok(ViewsAcrossGroups {
            tables,
            table: 0,
            slot: 0,
            _borrows: borrows,
            _store: store,
            _view: PhantomData,
        })
    }

    /// Returns `true` if a `V` view lives at `egid`.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewBorrowed`] if this thread holds the table
    /// exclusively, [`EcsError::QueryDuringSubmission`] when called from
    /// inside a notification callback.
    pub fn has_entity<V: EntityView>(&self, egid: Egid) -> EcsResult<bool> {
        let store = self.cell.read()?;
        Ok(self
            .cell
            .read_table::<V>(&store, egid.group)?
            .is_some_and(|(table, _)| table.contains(egid.entity)))
    }

    /// Number of `V` views in `group`.
    ///
    /// # Errors
    ///
    /// [`EcsError::ViewBorrowed`] if this thread holds the table
    /// exclusively, [`EcsError::QueryDuringSubmission`] when called from
    /// inside a notification callback.
    pub fn count<V: EntityView>(&self, group: GroupId) -> EcsResult<usize> {
        let store = self.cell.read()?;
        Ok(self
            .cell
            .read_table::<V>(&store, group)?
            .map_or(0, |(table, _)| table.len()))
    }
}

impl std::fmt::Debug for EntityViewsDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityViewsDb").finish_non_exhaustive()
    }
}

/// Shared view of one group's `V` table.
pub struct GroupedViews<'a, V: EntityView> {
    group: GroupId,
    table: Option<TableReadGuard<V>>,
    _borrow: Option<Borrow<'a>>,
    _store: StoreRead<'a>,
}

impl<V: EntityView> GroupedViews<'_, V> {
    /// The queried group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Number of views.
    #[must_use]
    pub fn count(&self) -> usize {
        self.as_slice().len()
    }

    /// Entity identifiers, parallel to [`Self::as_slice`].
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        self.table.as_deref().map_or(&[][..], ViewTable::entities)
    }

    /// The views, packed.
    #[must_use]
    pub fn as_slice(&self) -> &[V] {
        self.table.as_deref().map_or(&[][..], ViewTable::views)
    }

    /// `(identifier, view)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &V)> {
        self.entities().iter().copied().zip(self.as_slice())
    }
}

impl<V: EntityView> Deref for GroupedViews<'_, V> {
    type Target = [V];

    fn deref(&self) -> &[V] {
        self.as_slice()
    }
}

/// Exclusive view of one group's `V` table.
pub struct GroupedViewsMut<'a, V: EntityView> {
    group: GroupId,
    table: Option<TableWriteGuard<V>>,
    _borrow: Option<Borrow<'a>>,
    _store: StoreRead<'a>,
}

impl<V: EntityView> GroupedViewsMut<'_, V> {
    /// The queried group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Number of views.
    #[must_use]
    pub fn count(&self) -> usize {
        self.as_slice().len()
    }

    /// Entity identifiers, parallel to the slice.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        self.table.as_deref().map_or(&[][..], ViewTable::entities)
    }

    /// The views, packed.
    #[must_use]
    pub fn as_slice(&self) -> &[V] {
        self.table.as_deref().map_or(&[][..], ViewTable::views)
    }

    /// The views, packed and writable.
    pub fn as_mut_slice(&mut self) -> &mut [V] {
        match self.table.as_deref_mut() {
            Some(table) => table.views_mut(),
            None => &mut [],
        }
    }
}

impl<V: EntityView> Deref for GroupedViewsMut<'_, V> {
    type Target = [V];

    fn deref(&self) -> &[V] {
        self.as_slice()
    }
}

impl<V: EntityView> DerefMut for GroupedViewsMut<'_, V> {
    fn deref_mut(&mut self) -> &mut [V] {
        self.as_mut_slice()
    }
}

/// Lazy walk over every group holding a `V` table.
///
/// Yields cloned views with their full identity. Not restartable.
pub struct ViewsAcrossGroups<'a, V: EntityView> {
    tables: Vec<(GroupId, TableReadGuard<V>)>,
    table: usize,
    slot: usize,
    _borrows: Vec<Borrow<'a>>,
    _store: StoreRead<'a>,
    _view: PhantomData<fn() -> V>,
}

impl<V: EntityView> Iterator for ViewsAcrossGroups<'_, V> {
    type Item = (Egid, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (group, table) = self.tables.get(self.table)?;
            let slot = self.slot;
            if let (Some(&entity), Some(view)) =
                (table.entities().get(slot), table.views().get(slot))
            {
                self.slot += 1;
                return Some((Egid::new(entity, *group), view.clone()));
            }
            self.table += 1;
            self.slot = 0;
        }
    }
}
