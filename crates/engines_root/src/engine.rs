//! Engine traits and subscription declarations.
//!
//! An engine is a consumer of entities. It can:
//!
//! - receive `add`/`remove` notifications for one or more view kinds by
//!   implementing [`ViewEngine<V>`] for each kind and listing them in
//!   [`Engine::subscribe`];
//! - pull data through the [`EntityViewsDb`] it is handed in
//!   [`Engine::ready`], for kinds better served by batch iteration.
//!
//! The capability set is declared explicitly; the root never probes an
//! engine for methods it might implement.

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use engines_component::{Egid, EntityView, ViewKind};

use crate::views_db::EntityViewsDb;

/// A consumer registered with the engines root.
pub trait Engine: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Declare the view kinds this engine wants notifications for.
    fn subscribe(subscriptions: &mut Subscriptions<Self>)
    where
        Self: Sized,
    {
        let _ = subscriptions;
    }

    /// Called once, when the engine is added to the root and before it can
    /// receive any notification.
    fn ready(&mut self, views: EntityViewsDb) {
        let _ = views;
    }
}

/// Notifications for one view kind.
///
/// Both callbacks run inside a submission. The view reference is only valid
/// for the duration of the call, and the store cannot be queried from here;
/// new commands may be enqueued and land in the next submission.
pub trait ViewEngine<V: EntityView>: Engine {
    /// An entity with a `V` view became visible at `egid`.
    fn add(&mut self, egid: Egid, view: &V);

    /// The entity at `egid` is about to disappear from its group.
    fn remove(&mut self, egid: Egid, view: &V);
}

/// Which callback a dispatch delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// [`ViewEngine::add`].
    Add,
    /// [`ViewEngine::remove`].
    Remove,
}

/// Monomorphized trampoline from a type-erased engine and view to
/// [`ViewEngine`]. Returns `false` if either type does not match.
pub(crate) type DispatchFn = fn(&mut dyn Any, Notification, Egid, &dyn Any) -> bool;

/// One declared view subscription.
#[derive(Clone, Copy)]
pub(crate) struct Subscription {
    pub view: ViewKind,
    pub dispatch: DispatchFn,
}

/// The view kinds an engine of type `E` subscribes to, in declaration order.
pub struct Subscriptions<E> {
    entries: Vec<Subscription>,
    _engine: PhantomData<fn(&mut E)>,
}

impl<E: Engine> Subscriptions<E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            _engine: PhantomData,
        }
    }

    /// Subscribe to `V`. Declaring the same kind twice has no extra effect.
    pub fn view<V: EntityView>(&mut self) -> &mut Self
    where
        E: ViewEngine<V>,
    {
        if !self.contains(TypeId::of::<V>()) {
            self.entries.push(Subscription {
                view: ViewKind::of::<V>(),
                dispatch: dispatch::<E, V>,
            });
        }
        self
    }

    /// Number of declared view kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn contains(&self, view: TypeId) -> bool {
        self.entries.iter().any(|entry| entry.view.type_id == view)
    }

    pub(crate) fn into_entries(self) -> Vec<Subscription> {
        self.entries
    }
}

fn dispatch<E: ViewEngine<V>, V: EntityView>(
    engine: &mut dyn Any,
    notification: Notification,
    egid: Egid,
    view: &dyn Any,
) -> bool {
    let (Some(engine), Some(view)) = (engine.downcast_mut::<E>(), view.downcast_ref::<V>()) else {
        return false;
    };
    match notification {
        Notification::Add => ViewEngine::<V>::add(engine, egid, view),
        Notification::Remove => ViewEngine::<V>::remove(engine, egid, view),
    }
    true
}
