//! Entity storage for the engines root.
//!
//! The [`EntityStore`] holds one [`ViewTable`] per (group, view kind), each
//! behind its own lock. A descriptor's entity occupies one row in the table
//! of each of its views inside its group. Groups are remembered in creation
//! order, which is the order cross-group queries walk them in.
//!
//! Only the root changes the store's shape, and only while a submission
//! holds the store exclusively. Queries lock single tables underneath a
//! shared hold on the store.

use std::any::{Any, TypeId};
use std::collections::{HashMap, TryReserveError};
use std::sync::Arc;

use engines_component::{
    DescriptorError, DescriptorInfo, Egid, EntityId, EntityView, GroupId, Implementor,
    SharedTable, ViewTable,
};
use parking_lot::RwLock;

use crate::error::{EcsError, EcsResult};

/// All view tables of one group, keyed by view `TypeId`.
#[derive(Default)]
struct GroupStorage {
    tables: HashMap<TypeId, SharedTable>,
}

impl GroupStorage {
    fn holds(&self, view: TypeId, entity: EntityId) -> bool {
        self.tables
            .get(&view)
            .is_some_and(|table| table.read().contains(entity))
    }
}

/// Per-(group, view kind) contiguous storage.
#[derive(Default)]
pub struct EntityStore {
    groups: HashMap<GroupId, GroupStorage>,
    /// Groups in creation order.
    group_order: Vec<GroupId>,
}

impl EntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups in creation order.
    #[must_use]
    pub fn groups(&self) -> &[GroupId] {
        &self.group_order
    }

    /// Number of groups created so far.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.group_order.len()
    }

    /// The locked table of view `V` in `group`, if one was ever created.
    #[must_use]
    pub fn table<V: EntityView>(&self, group: GroupId) -> Option<Arc<RwLock<ViewTable<V>>>> {
        self.groups
            .get(&group)?
            .tables
            .get(&TypeId::of::<V>())?
            .typed::<V>()
    }

    /// Number of `V` views across every group.
    #[must_use]
    pub fn count<V: EntityView>(&self) -> usize {
        self.group_order
            .iter()
            .filter_map(|&group| self.table::<V>(group))
            .map(|table| table.read_recursive().len())
            .sum()
    }

    /// Returns `true` if every view of `descriptor` has a row for `egid`.
    #[must_use]
    pub fn contains_entity(&self, descriptor: &DescriptorInfo, egid: Egid) -> bool {
        let Some(storage) = self.groups.get(&egid.group) else {
            return false;
        };
        descriptor
            .builders()
            .iter()
            .all(|builder| storage.holds(builder.view_kind().type_id, egid.entity))
    }

    /// Returns `true` if any view of `descriptor` already has a row for `egid`.
    #[must_use]
    pub fn occupies(&self, descriptor: &DescriptorInfo, egid: Egid) -> bool {
        let Some(storage) = self.groups.get(&egid.group) else {
            return false;
        };
        descriptor
            .builders()
            .iter()
            .any(|builder| storage.holds(builder.view_kind().type_id, egid.entity))
    }

    /// Run `f` on the view of kind `view` at `egid`, type-erased, while its
    /// table is read-locked.
    pub fn with_view<R>(
        &self,
        view: TypeId,
        egid: Egid,
        f: impl FnOnce(&dyn Any) -> R,
    ) -> Option<R> {
        let table = self.groups.get(&egid.group)?.tables.get(&view)?.read();
        table.view_any(egid.entity).map(f)
    }

    /// Build every view of `descriptor` for `egid`.
    ///
    /// Either all views are inserted or none are. A builder refusing its
    /// implementor is reported as a descriptor mismatch.
    pub(crate) fn insert_entity(
        &mut self,
        descriptor: &DescriptorInfo,
        egid: Egid,
        implementors: Vec<Implementor>,
    ) -> EcsResult<()> {
        if self.occupies(descriptor, egid) {
            return Err(EcsError::DuplicateEntity {
                egid,
                kind: descriptor.name(),
            });
        }
        let supplied = implementors.len();
        let storage = self.group_mut(egid.group);
        let mut inserted = Vec::with_capacity(descriptor.builders().len());
        for (builder, implementor) in descriptor.pair_implementors(implementors) {
            let kind = builder.view_kind();
            let table = storage
                .tables
                .entry(kind.type_id)
                .or_insert_with(|| builder.new_table());
            if !builder.insert(&mut *table.write(), egid.entity, implementor) {
                for type_id in inserted {
                    if let Some(table) = storage.tables.get(&type_id) {
                        table.write().remove_entity(egid.entity);
                    }
                }
                return Err(EcsError::DescriptorMismatch(DescriptorError::ImplementorCount {
                    kind: descriptor.name(),
                    expected: descriptor.reference_builders(),
                    found: supplied,
                }));
            }
            inserted.push(kind.type_id);
        }
        Ok(())
    }

    /// Drop every view of `descriptor` at `egid`. Returns `false` if the
    /// entity was not fully present.
    pub(crate) fn remove_entity(&mut self, descriptor: &DescriptorInfo, egid: Egid) -> bool {
        if !self.contains_entity(descriptor, egid) {
            return false;
        }
        let Some(storage) = self.groups.get(&egid.group) else {
            return false;
        };
        for builder in descriptor.builders() {
            if let Some(table) = storage.tables.get(&builder.view_kind().type_id) {
                table.write().remove_entity(egid.entity);
            }
        }
        true
    }

    /// Move every view of `descriptor` for `entity` from `from` to `to`.
    ///
    /// Returns `false` and leaves the store untouched if the entity is not
    /// fully present in `from` or already occupies `to`.
    pub(crate) fn move_entity(
        &mut self,
        descriptor: &DescriptorInfo,
        entity: EntityId,
        from: GroupId,
        to: GroupId,
    ) -> bool {
        if from == to
            || !self.contains_entity(descriptor, Egid::new(entity, from))
            || self.occupies(descriptor, Egid::new(entity, to))
        {
            return false;
        }
        for builder in descriptor.builders() {
            let type_id = builder.view_kind().type_id;
            let destination = self
                .group_mut(to)
                .tables
                .entry(type_id)
                .or_insert_with(|| builder.new_table())
                .clone();
            if let Some(source) = self
                .groups
                .get(&from)
                .and_then(|storage| storage.tables.get(&type_id))
            {
                source
                    .write()
                    .move_entity(entity, &mut *destination.write());
            }
        }
        true
    }

    /// Reserve room for `capacity` more entities of `descriptor` in `group`.
    ///
    /// Stops at the first table that cannot grow; rows already stored are
    /// never affected.
    pub(crate) fn reserve(
        &mut self,
        descriptor: &DescriptorInfo,
        group: GroupId,
        capacity: usize,
    ) -> Result<(), TryReserveError> {
        let storage = self.group_mut(group);
        for builder in descriptor.builders() {
            storage
                .tables
                .entry(builder.view_kind().type_id)
                .or_insert_with(|| builder.new_table())
                .write()
                .try_reserve(capacity)?;
        }
        Ok(())
    }

    fn group_mut(&mut self, group: GroupId) -> &mut GroupStorage {
        let order = &mut self.group_order;
        self.groups.entry(group).or_insert_with(|| {
            order.push(group);
            GroupStorage::default()
        })
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("groups", &self.group_order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engines_component::{ComponentBuilder, EntityDescriptor, InlineView, ReferenceView};

    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Counter {
        value: i32,
    }
    impl EntityView for Counter {}
    impl InlineView for Counter {}

    #[derive(Clone)]
    struct Tag {
        label: Arc<str>,
    }
    impl EntityView for Tag {}
    impl ReferenceView for Tag {
        type Implementor = Arc<str>;
        fn from_implementor(label: Arc<str>) -> Self {
            Self { label }
        }
    }

    struct Tagged;
    impl EntityDescriptor for Tagged {
        fn builders() -> Vec<ComponentBuilder> {
            vec![
                ComponentBuilder::inline::<Counter>(),
                ComponentBuilder::reference::<Tag>(),
            ]
        }
    }

    struct Plain;
    impl EntityDescriptor for Plain {
        fn builders() -> Vec<ComponentBuilder> {
            vec![ComponentBuilder::inline::<Counter>()]
        }
    }

    fn tag(label: &str) -> Vec<Implementor> {
        vec![Implementor::new(Arc::<str>::from(label))]
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Tagged>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&info, egid, tag("one")).unwrap();

        assert!(store.contains_entity(&info, egid));
        let tags = store.table::<Tag>(GroupId(0)).unwrap();
        assert_eq!(&*tags.read().get(EntityId(1)).unwrap().label, "one");
        assert_eq!(store.count::<Counter>(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Plain>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&info, egid, Vec::new()).unwrap();
        let err = store.insert_entity(&info, egid, Vec::new()).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateEntity { .. }));
        assert_eq!(store.count::<Counter>(), 1);
    }

    #[test]
    fn test_shared_view_kind_conflicts_across_descriptors() {
        let mut store = EntityStore::new();
        let plain = DescriptorInfo::of::<Plain>().unwrap();
        let tagged = DescriptorInfo::of::<Tagged>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&plain, egid, Vec::new()).unwrap();

        // `Tagged` shares the `Counter` table with `Plain` in group 0.
        let err = store.insert_entity(&tagged, egid, tag("x")).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateEntity { .. }));
        assert!(store
            .table::<Tag>(GroupId(0))
            .is_none_or(|table| table.read().is_empty()));
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Tagged>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));

        // The `Tag` builder gets no implementor; the `Counter` row must go too.
        let err = store.insert_entity(&info, egid, Vec::new()).unwrap_err();
        assert!(matches!(err, EcsError::DescriptorMismatch(_)));
        assert_eq!(store.count::<Counter>(), 0);
        assert!(!store.occupies(&info, egid));
    }

    #[test]
    fn test_same_identifier_in_two_groups() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Plain>().unwrap();
        store
            .insert_entity(&info, Egid::new(EntityId(1), GroupId(0)), Vec::new())
            .unwrap();
        store
            .insert_entity(&info, Egid::new(EntityId(1), GroupId(1)), Vec::new())
            .unwrap();
        assert_eq!(store.count::<Counter>(), 2);
    }

    #[test]
    fn test_remove_entity() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Tagged>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&info, egid, tag("one")).unwrap();

        assert!(store.remove_entity(&info, egid));
        assert!(!store.contains_entity(&info, egid));
        assert!(!store.remove_entity(&info, egid));
    }

    #[test]
    fn test_move_entity_carries_data() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Tagged>().unwrap();
        let from = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&info, from, tag("moving")).unwrap();
        store
            .table::<Counter>(GroupId(0))
            .unwrap()
            .write()
            .get_mut(EntityId(1))
            .unwrap()
            .value = 41;

        assert!(store.move_entity(&info, EntityId(1), GroupId(0), GroupId(1)));

        let to = from.with_group(GroupId(1));
        assert!(!store.contains_entity(&info, from));
        assert!(store.contains_entity(&info, to));
        let counters = store.table::<Counter>(GroupId(1)).unwrap();
        assert_eq!(counters.read().get(EntityId(1)), Some(&Counter { value: 41 }));
        let tags = store.table::<Tag>(GroupId(1)).unwrap();
        assert_eq!(&*tags.read().get(EntityId(1)).unwrap().label, "moving");
    }

    #[test]
    fn test_move_refuses_occupied_destination() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Plain>().unwrap();
        store
            .insert_entity(&info, Egid::new(EntityId(1), GroupId(0)), Vec::new())
            .unwrap();
        store
            .insert_entity(&info, Egid::new(EntityId(1), GroupId(1)), Vec::new())
            .unwrap();
        assert!(!store.move_entity(&info, EntityId(1), GroupId(0), GroupId(1)));
        assert_eq!(store.count::<Counter>(), 2);
    }

    #[test]
    fn test_groups_keep_creation_order() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Plain>().unwrap();
        for group in [5, 2, 9] {
            store
                .insert_entity(&info, Egid::new(EntityId(0), GroupId(group)), Vec::new())
                .unwrap();
        }
        store.reserve(&info, GroupId(2), 16).unwrap();
        assert_eq!(store.groups(), &[GroupId(5), GroupId(2), GroupId(9)]);
    }

    #[test]
    fn test_oversized_reserve_keeps_rows() {
        let mut store = EntityStore::new();
        let info = DescriptorInfo::of::<Plain>().unwrap();
        let egid = Egid::new(EntityId(1), GroupId(0));
        store.insert_entity(&info, egid, Vec::new()).unwrap();

        assert!(store.reserve(&info, GroupId(0), usize::MAX).is_err());
        assert!(store.contains_entity(&info, egid));
        store
            .insert_entity(&info, Egid::new(EntityId(2), GroupId(0)), Vec::new())
            .unwrap();
        assert_eq!(store.count::<Counter>(), 2);
    }
}
