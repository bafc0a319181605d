//! Engine registry — owns the engines and the view-kind dispatch table.
//!
//! Every engine added to the root lands here together with the view kinds it
//! subscribed to. Subscribers of one view kind are kept in registration
//! order, which is the order they are notified in.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use engines_component::Egid;

use crate::engine::{DispatchFn, Notification, Subscription};

/// A registered engine instance.
struct RegisteredEngine {
    /// The engine's name, for logs.
    name: String,
    engine: Box<dyn Any + Send>,
}

/// One dispatch-table entry: which engine, and how to call it.
#[derive(Clone, Copy)]
struct Subscriber {
    engine: usize,
    dispatch: DispatchFn,
}

/// Registry of all engines known to a root.
#[derive(Default)]
pub(crate) struct EngineRegistry {
    engines: Vec<RegisteredEngine>,
    /// Subscribers keyed by view `TypeId`.
    dispatch: HashMap<TypeId, Vec<Subscriber>>,
}

impl EngineRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine and its subscriptions. Returns the engine's index.
    pub fn register(
        &mut self,
        name: String,
        engine: Box<dyn Any + Send>,
        subscriptions: Vec<Subscription>,
    ) -> usize {
        let index = self.engines.len();
        self.engines.push(RegisteredEngine { name, engine });
        for subscription in subscriptions {
            self.dispatch
                .entry(subscription.view.type_id)
                .or_default()
                .push(Subscriber {
                    engine: index,
                    dispatch: subscription.dispatch,
                });
        }
        index
    }

    /// Deliver `notification` for the `view` at `egid` to every subscriber
    /// of its kind. Returns the number of engines called.
    pub fn notify(
        &mut self,
        notification: Notification,
        view_kind: TypeId,
        egid: Egid,
        view: &dyn Any,
    ) -> usize {
        let Some(subscribers) = self.dispatch.get(&view_kind) else {
            return 0;
        };
        let mut delivered = 0;
        for subscriber in subscribers {
            if let Some(registered) = self.engines.get_mut(subscriber.engine)
                && (subscriber.dispatch)(&mut *registered.engine, notification, egid, view)
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Returns `true` if any engine subscribed to `view_kind`.
    pub fn has_subscribers(&self, view_kind: TypeId) -> bool {
        self.dispatch.contains_key(&view_kind)
    }

    /// Returns the number of registered engines.
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Returns the number of engines subscribed to `view_kind`.
    pub fn subscriber_count(&self, view_kind: TypeId) -> usize {
        self.dispatch.get(&view_kind).map_or(0, Vec::len)
    }

    /// Names of the registered engines, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(|engine| engine.name.as_str())
    }
}
