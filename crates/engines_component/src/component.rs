//! View traits and implementors.
//!
//! A view is the bundle of component data an engine sees for one entity. It
//! comes in two flavours:
//!
//! - **Inline** ([`InlineView`]): a small plain value stored by value inside
//!   the group's contiguous table and default-initialised at build time.
//! - **Reference-backed** ([`ReferenceView`]): the data lives behind an
//!   [`Implementor`] object the caller constructs explicitly for every entity.
//!   The view only holds the handle (typically an `Arc<dyn Trait>`).
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use engines_component::{EntityView, InlineView, ReferenceView};
//!
//! #[derive(Debug, Clone, Copy, Default)]
//! struct Counter {
//!     value: i32,
//! }
//! impl EntityView for Counter {}
//! impl InlineView for Counter {}
//!
//! trait Named: Send + Sync {
//!     fn name(&self) -> &str;
//! }
//!
//! #[derive(Clone)]
//! struct NamedView {
//!     named: Arc<dyn Named>,
//! }
//! impl EntityView for NamedView {}
//! impl ReferenceView for NamedView {
//!     type Implementor = Arc<dyn Named>;
//!     fn from_implementor(named: Arc<dyn Named>) -> Self {
//!         Self { named }
//!     }
//! }
//! ```

use std::any::{Any, TypeId};

/// The contract every view kind satisfies.
///
/// Views are cloned out by the cross-group query, so the bound includes
/// `Clone`; reference views clone their handle, inline views copy their data.
pub trait EntityView: Clone + Send + Sync + 'static {
    /// A human-readable name used in logs and errors.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A view stored by value and default-initialised when its entity is built.
pub trait InlineView: EntityView + Default {}

/// A view whose data lives behind a caller-supplied implementor.
///
/// The view can only be produced from an implementor; it is never
/// default-constructed.
pub trait ReferenceView: EntityView {
    /// The object the caller passes at build time, usually `Arc<dyn Trait>`.
    type Implementor: Send + Sync + 'static;

    /// Wrap the implementor of one entity.
    fn from_implementor(implementor: Self::Implementor) -> Self;
}

/// Identity of a view kind: its `TypeId` plus a name for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKind {
    /// The Rust type identity of the view.
    pub type_id: TypeId,
    /// The view's [`EntityView::type_name`].
    pub name: &'static str,
}

impl ViewKind {
    /// The kind of view type `V`.
    #[must_use]
    pub fn of<V: EntityView>() -> Self {
        Self {
            type_id: TypeId::of::<V>(),
            name: V::type_name(),
        }
    }
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// A type-erased implementor handed to the factory for one reference view.
///
/// The wrapped type is checked against the descriptor when the build is
/// enqueued, so a mismatch is reported to the caller before anything is
/// queued.
pub struct Implementor {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl Implementor {
    /// Wrap an implementor value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        }
    }

    /// `TypeId` of the wrapped value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the wrapped value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Unwrap the value, handing `self` back when it is not a `T`.
    pub fn downcast<T: Send + Sync + 'static>(self) -> Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Self {
            type_id,
            type_name,
            value,
        } = self;
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| Self {
            type_id,
            type_name,
            value,
        })
    }
}

impl std::fmt::Debug for Implementor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Implementor")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
