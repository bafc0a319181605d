//! Entity descriptors and the component builders they are made of.
//!
//! A descriptor names an entity kind and lists, in order, the
//! [`ComponentBuilder`]s that assemble its views. The [`DescriptorRegistry`]
//! validates each descriptor once and caches the result so that every
//! factory handle, on any thread, shares the same [`DescriptorInfo`].
//!
//! # Examples
//!
//! ```rust
//! use engines_component::{ComponentBuilder, EntityDescriptor, EntityView, InlineView};
//!
//! #[derive(Debug, Clone, Copy, Default)]
//! struct Counter {
//!     value: i32,
//! }
//! impl EntityView for Counter {}
//! impl InlineView for Counter {}
//!
//! struct CounterDescriptor;
//!
//! impl EntityDescriptor for CounterDescriptor {
//!     fn builders() -> Vec<ComponentBuilder> {
//!         vec![ComponentBuilder::inline::<Counter>()]
//!     }
//! }
//! ```

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::component::{Implementor, InlineView, ReferenceView, ViewKind};
use crate::entity::EntityId;
use crate::error::DescriptorError;
use crate::table::{ErasedTable, SharedTable, ViewTable};

/// A declared entity kind.
pub trait EntityDescriptor: 'static {
    /// The ordered builders composing the kind's views.
    fn builders() -> Vec<ComponentBuilder>;

    /// A human-readable name used in logs and errors.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Whether a builder needs an implementor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderFlavor {
    /// Stored by value, default-initialised, no implementor.
    Inline,
    /// Built from one caller-supplied implementor.
    Reference {
        /// `TypeId` of the expected implementor.
        implementor: TypeId,
        /// Type name of the expected implementor.
        implementor_name: &'static str,
    },
}

type NewTableFn = fn() -> SharedTable;
type InsertFn = fn(&mut dyn ErasedTable, EntityId, Option<Implementor>) -> bool;

/// Builds one view of an entity into its group table.
#[derive(Clone)]
pub struct ComponentBuilder {
    view: ViewKind,
    flavor: BuilderFlavor,
    new_table: NewTableFn,
    insert: InsertFn,
}

impl ComponentBuilder {
    /// A builder for an inline view `V`.
    #[must_use]
    pub fn inline<V: InlineView>() -> Self {
        Self {
            view: ViewKind::of::<V>(),
            flavor: BuilderFlavor::Inline,
            new_table: new_table::<V>,
            insert: insert_inline::<V>,
        }
    }

    /// A builder for a reference-backed view `V`.
    #[must_use]
    pub fn reference<V: ReferenceView>() -> Self {
        Self {
            view: ViewKind::of::<V>(),
            flavor: BuilderFlavor::Reference {
                implementor: TypeId::of::<V::Implementor>(),
                implementor_name: std::any::type_name::<V::Implementor>(),
            },
            new_table: new_table::<V>,
            insert: insert_reference::<V>,
        }
    }

    /// The view kind this builder produces.
    #[must_use]
    pub fn view_kind(&self) -> ViewKind {
        self.view
    }

    /// Inline or reference-backed.
    #[must_use]
    pub fn flavor(&self) -> BuilderFlavor {
        self.flavor
    }

    /// Returns `true` if the builder needs an implementor.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.flavor, BuilderFlavor::Reference { .. })
    }

    /// A new, empty table for this builder's view kind.
    #[must_use]
    pub fn new_table(&self) -> SharedTable {
        (self.new_table)()
    }

    /// Build the view of `entity` into `table`.
    ///
    /// `implementor` must be present exactly for reference-backed builders.
    /// Returns `false` without touching the table when the table stores
    /// another view kind, the entity is already present or the implementor
    /// does not fit.
    pub fn insert(
        &self,
        table: &mut dyn ErasedTable,
        entity: EntityId,
        implementor: Option<Implementor>,
    ) -> bool {
        (self.insert)(table, entity, implementor)
    }
}

impl std::fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("view", &self.view.name)
            .field("flavor", &self.flavor)
            .finish()
    }
}

fn new_table<V: crate::component::EntityView>() -> SharedTable {
    SharedTable::new::<V>()
}

fn insert_inline<V: InlineView>(
    table: &mut dyn ErasedTable,
    entity: EntityId,
    implementor: Option<Implementor>,
) -> bool {
    if implementor.is_some() {
        return false;
    }
    match table.as_any_mut().downcast_mut::<ViewTable<V>>() {
        Some(table) => table.insert(entity, V::default()).is_ok(),
        None => false,
    }
}

fn insert_reference<V: ReferenceView>(
    table: &mut dyn ErasedTable,
    entity: EntityId,
    implementor: Option<Implementor>,
) -> bool {
    let Some(table) = table.as_any_mut().downcast_mut::<ViewTable<V>>() else {
        return false;
    };
    let Some(Ok(implementor)) = implementor.map(Implementor::downcast::<V::Implementor>) else {
        return false;
    };
    table
        .insert(entity, V::from_implementor(implementor))
        .is_ok()
}

/// A validated descriptor.
#[derive(Debug)]
pub struct DescriptorInfo {
    type_id: TypeId,
    name: &'static str,
    builders: Vec<ComponentBuilder>,
    reference_builders: usize,
}

impl DescriptorInfo {
    /// Validate the builders of `D`.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::NoBuilders`] for an empty builder list and
    /// [`DescriptorError::DuplicateView`] when a view kind repeats.
    pub fn of<D: EntityDescriptor>() -> Result<Self, DescriptorError> {
        Self::new(TypeId::of::<D>(), D::name(), D::builders())
    }

    fn new(
        type_id: TypeId,
        name: &'static str,
        builders: Vec<ComponentBuilder>,
    ) -> Result<Self, DescriptorError> {
        if builders.is_empty() {
            return Err(DescriptorError::NoBuilders { kind: name });
        }
        let mut seen = HashSet::new();
        for builder in &builders {
            if !seen.insert(builder.view.type_id) {
                return Err(DescriptorError::DuplicateView {
                    kind: name,
                    view: builder.view.name,
                });
            }
        }
        let reference_builders = builders.iter().filter(|b| b.is_reference()).count();
        Ok(Self {
            type_id,
            name,
            builders,
            reference_builders,
        })
    }

    /// `TypeId` of the descriptor type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Descriptor name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Builders in declaration order.
    #[must_use]
    pub fn builders(&self) -> &[ComponentBuilder] {
        &self.builders
    }

    /// Number of reference-backed builders, i.e. implementors a build needs.
    #[must_use]
    pub fn reference_builders(&self) -> usize {
        self.reference_builders
    }

    /// Check implementors against the reference-backed builders, positionally.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::ImplementorCount`] or
    /// [`DescriptorError::ImplementorType`] on mismatch.
    pub fn validate_implementors(&self, implementors: &[Implementor]) -> Result<(), DescriptorError> {
        if implementors.len() != self.reference_builders {
            return Err(DescriptorError::ImplementorCount {
                kind: self.name,
                expected: self.reference_builders,
                found: implementors.len(),
            });
        }
        let expected = self.builders.iter().filter_map(|b| match b.flavor {
            BuilderFlavor::Reference {
                implementor,
                implementor_name,
            } => Some((b.view.name, implementor, implementor_name)),
            BuilderFlavor::Inline => None,
        });
        for ((view, type_id, type_name), supplied) in expected.zip(implementors) {
            if supplied.type_id() != type_id {
                return Err(DescriptorError::ImplementorType {
                    kind: self.name,
                    view,
                    expected: type_name,
                    found: supplied.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Pair every builder with the implementor it consumes.
    ///
    /// Implementors must already have passed [`Self::validate_implementors`].
    pub fn pair_implementors(
        &self,
        implementors: Vec<Implementor>,
    ) -> impl Iterator<Item = (&ComponentBuilder, Option<Implementor>)> {
        let mut implementors = implementors.into_iter();
        self.builders.iter().map(move |builder| {
            let implementor = if builder.is_reference() {
                implementors.next()
            } else {
                None
            };
            (builder, implementor)
        })
    }
}

/// Resolves descriptor types to their validated [`DescriptorInfo`].
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: DashMap<TypeId, Arc<DescriptorInfo>>,
}

impl DescriptorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::new(),
        }
    }

    /// The validated descriptor of `D`, validating and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an ill-formed descriptor. Failures are
    /// not cached.
    pub fn resolve<D: EntityDescriptor>(&self) -> Result<Arc<DescriptorInfo>, DescriptorError> {
        let key = TypeId::of::<D>();
        if let Some(info) = self.descriptors.get(&key) {
            return Ok(Arc::clone(info.value()));
        }
        let info = Arc::new(DescriptorInfo::of::<D>()?);
        debug!(
            kind = info.name(),
            builders = info.builders().len(),
            reference_builders = info.reference_builders(),
            "registered entity descriptor"
        );
        Ok(Arc::clone(
            self.descriptors.entry(key).or_insert(info).value(),
        ))
    }

    /// Returns `true` if `D` has been resolved before.
    #[must_use]
    pub fn contains<D: EntityDescriptor>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<D>())
    }

    /// Number of resolved descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
