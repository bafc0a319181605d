//! # engines_component
//!
//! The "C" in ECS — defines how entities are identified, what a view is, and
//! how a descriptor assembles the views of an entity kind.
//!
//! This crate provides:
//!
//! - [`EntityId`], [`GroupId`] and [`Egid`] — identity of an entity inside a group.
//! - [`EntityView`], [`InlineView`], [`ReferenceView`] — the two view flavours.
//! - [`Implementor`] — caller-supplied backing object for reference views.
//! - [`ViewTable`] — contiguous per-group storage with an id → slot index,
//!   kept behind its own lock in a [`SharedTable`].
//! - [`ComponentBuilder`], [`EntityDescriptor`], [`DescriptorRegistry`] — the
//!   declared composition of an entity kind.

pub mod component;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod table;

pub use component::{EntityView, Implementor, InlineView, ReferenceView, ViewKind};
pub use descriptor::{
    BuilderFlavor, ComponentBuilder, DescriptorInfo, DescriptorRegistry, EntityDescriptor,
};
pub use entity::{Egid, EntityId, GroupId};
pub use error::DescriptorError;
pub use table::{ErasedTable, SharedTable, ViewTable};
