//! # engines_root
//!
//! The runtime core: an [`EnginesRoot`] owns the entity store, the command
//! queues and the engines, and applies queued commands only when its
//! submission scheduler says so.
//!
//! ## Flow
//!
//! 1. Callers (and engines) enqueue commands through the narrow
//!    [`EntityFactory`] and [`EntityFunctions`] handles.
//! 2. An [`EntitySubmissionScheduler`] decides when to invoke the root's
//!    [`SubmitEntities`] callback.
//! 3. Submission drains removes, then swaps, then builds, mutates the store
//!    and notifies subscribed engines.
//! 4. Engines read the store through the [`EntityViewsDb`] query surface
//!    during their own update phase.
//!
//! ## Usage
//!
//! ```rust
//! use engines_component::{
//!     ComponentBuilder, EntityDescriptor, EntityId, EntityView, GroupId, InlineView,
//! };
//! use engines_root::{EnginesRoot, ManualScheduler};
//!
//! #[derive(Debug, Clone, Copy, Default)]
//! struct Counter {
//!     value: i32,
//! }
//! impl EntityView for Counter {}
//! impl InlineView for Counter {}
//!
//! struct CounterDescriptor;
//! impl EntityDescriptor for CounterDescriptor {
//!     fn builders() -> Vec<ComponentBuilder> {
//!         vec![ComponentBuilder::inline::<Counter>()]
//!     }
//! }
//!
//! let scheduler = ManualScheduler::new();
//! let root = EnginesRoot::new(&scheduler);
//! let factory = root.generate_entity_factory();
//!
//! factory
//!     .build_entity_in_group::<CounterDescriptor>(EntityId(0), GroupId(0), Vec::new())
//!     .unwrap();
//! let report = scheduler.submit_entities().unwrap();
//! assert_eq!(report.built, 1);
//!
//! let views = root.entity_views_db();
//! let counters = views.query_grouped_views::<Counter>(GroupId(0)).unwrap();
//! assert_eq!(counters.count(), 1);
//! ```

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
mod registry;
pub mod root;
pub mod scheduler;
pub mod store;
pub mod views_db;

pub use commands::{CommandKind, SubmissionFault, SubmissionReport};
pub use config::TickConfig;
pub use engine::{Engine, Notification, Subscriptions, ViewEngine};
pub use error::{EcsError, EcsResult};
pub use factory::{EntityFactory, EntityFunctions};
pub use root::{EnginesRoot, SubmitEntities};
pub use scheduler::{EntitySubmissionScheduler, ManualScheduler, TickScheduler};
pub use store::EntityStore;
pub use views_db::{
    EntityViewsDb, GroupedViews, GroupedViewsMut, ViewMut, ViewRef, ViewsAcrossGroups,
};
