//! The engines root — owner of the store, the command queue and the engines.
//!
//! ## Submission pass
//!
//! 1. Take the whole pending batch. Commands enqueued from here on belong to
//!    the next pass.
//! 2. Lock the store for writing and mark the current thread as submitter.
//!    A thread still holding queried views cannot submit.
//! 3. Apply preallocations, then removes, then swaps, then builds. Removes
//!    and swaps run first so a remove and a build of the same identity in
//!    one batch never collide.
//! 4. Notify subscribed engines as each command lands. A faulty command is
//!    skipped and recorded; the rest of the batch proceeds.
//! 5. Release the store. Queries see either none or all of the pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use engines_component::{DescriptorInfo, DescriptorRegistry, Egid};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use crate::commands::{
    BuildCommand, CommandKind, CommandQueue, PreallocateCommand, RemoveCommand, SubmissionReport,
    SwapCommand,
};
use crate::engine::{Engine, Notification, Subscriptions};
use crate::error::{EcsError, EcsResult};
use crate::factory::{EntityFactory, EntityFunctions};
use crate::registry::EngineRegistry;
use crate::scheduler::EntitySubmissionScheduler;
use crate::views_db::{EntityViewsDb, StoreCell, SubmissionGuard};

/// State shared between the root and its submission callback.
struct RootShared {
    queue: Arc<CommandQueue>,
    store: Arc<StoreCell>,
    engines: Mutex<EngineRegistry>,
    descriptors: Arc<DescriptorRegistry>,
    submitting: AtomicBool,
}

/// Central orchestrator of entities and engines.
///
/// The root is the only owner of its state. Engines get narrow handles
/// ([`EntityFactory`], [`EntityFunctions`], [`EntityViewsDb`]) and never the
/// root itself.
pub struct EnginesRoot {
    shared: Arc<RootShared>,
}

impl EnginesRoot {
    /// Create a root and hand its submission callback to `scheduler`.
    pub fn new<S>(scheduler: &S) -> Self
    where
        S: EntitySubmissionScheduler + ?Sized,
    {
        let shared = Arc::new(RootShared {
            queue: Arc::new(CommandQueue::new()),
            store: Arc::new(StoreCell::new()),
            engines: Mutex::new(EngineRegistry::new()),
            descriptors: Arc::new(DescriptorRegistry::new()),
            submitting: AtomicBool::new(false),
        });
        scheduler.schedule(SubmitEntities {
            root: Arc::downgrade(&shared),
        });
        info!("engines root created");
        Self { shared }
    }

    /// Register an engine.
    ///
    /// The engine's [`Engine::ready`] hook runs first, then its view
    /// subscriptions enter the dispatch table behind any earlier subscriber
    /// of the same kinds. Entities that already exist are not replayed; query
    /// them explicitly if the engine needs current state.
    pub fn add_engine<E: Engine>(&self, mut engine: E) {
        let mut subscriptions = Subscriptions::<E>::new();
        E::subscribe(&mut subscriptions);
        let subscriptions = subscriptions.into_entries();

        engine.ready(self.entity_views_db());
        let name = engine.name().to_owned();

        let mut engines = self.shared.engines.lock();
        let index = engines.register(name.clone(), Box::new(engine), subscriptions.clone());
        for subscription in &subscriptions {
            debug!(
                engine = %name,
                view = subscription.view.name,
                subscribers = engines.subscriber_count(subscription.view.type_id),
                "view subscription added"
            );
        }
        info!(
            engine = %name,
            index,
            views = subscriptions.len(),
            "engine added"
        );
    }

    /// A handle that enqueues builds and preallocations.
    #[must_use]
    pub fn generate_entity_factory(&self) -> EntityFactory {
        EntityFactory::new(&self.shared.queue, Arc::clone(&self.shared.descriptors))
    }

    /// A handle that enqueues removes and group swaps.
    #[must_use]
    pub fn generate_entity_functions(&self) -> EntityFunctions {
        EntityFunctions::new(&self.shared.queue, Arc::clone(&self.shared.descriptors))
    }

    /// The query surface over this root's entities.
    #[must_use]
    pub fn entity_views_db(&self) -> EntityViewsDb {
        EntityViewsDb::new(Arc::clone(&self.shared.store))
    }

    /// Returns the number of registered engines.
    #[must_use]
    pub fn engine_count(&self) -> usize {
        self.shared.engines.lock().engine_count()
    }

    /// Returns the number of commands waiting for the next submission.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.shared.queue.len()
    }
}

impl std::fmt::Debug for EnginesRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engines = self.shared.engines.lock();
        f.debug_struct("EnginesRoot")
            .field("engines", &engines.names().collect::<Vec<_>>())
            .field("pending_commands", &self.shared.queue.len())
            .field("descriptors", &self.shared.descriptors.len())
            .finish()
    }
}

/// The "apply all queued commands now" callback a scheduler receives.
///
/// Holds the root weakly: once the root is dropped, invoking it fails with
/// [`EcsError::RootDropped`].
#[derive(Clone)]
pub struct SubmitEntities {
    root: Weak<RootShared>,
}

impl SubmitEntities {
    /// Run one submission pass.
    ///
    /// # Errors
    ///
    /// [`EcsError::RootDropped`] if the root no longer exists,
    /// [`EcsError::SubmissionWhileBorrowed`] if this thread still holds
    /// queried views; the queue is kept for the next attempt. Per-command
    /// failures do not error; they are listed in the returned report.
    ///
    /// # Panics
    ///
    /// If a submission of the same root is already running. That is a broken
    /// scheduling contract, not a recoverable condition.
    pub fn invoke(&self) -> EcsResult<SubmissionReport> {
        let root = self.root.upgrade().ok_or(EcsError::RootDropped)?;
        root.submit()
    }
}

impl std::fmt::Debug for SubmitEntities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitEntities")
            .field("root_alive", &(self.root.strong_count() > 0))
            .finish()
    }
}

/// Clears the in-progress flag when a pass ends, including by unwinding.
struct SubmittingFlag<'a>(&'a AtomicBool);

impl Drop for SubmittingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RootShared {
    fn submit(&self) -> EcsResult<SubmissionReport> {
        if self.submitting.swap(true, Ordering::AcqRel) {
            error!("{}", EcsError::ReentrantSubmission);
            panic!("{}", EcsError::ReentrantSubmission);
        }
        let _flag = SubmittingFlag(&self.submitting);
        self.store.ensure_released()?;

        let batch = self.queue.take();
        if batch.is_empty() {
            trace!("nothing to submit");
            return Ok(SubmissionReport::default());
        }
        let queued = batch.len();

        let mut pass = Submission {
            store: self.store.begin_submission(),
            engines: self.engines.lock(),
            report: SubmissionReport::default(),
        };
        for command in batch.preallocations {
            pass.preallocate(command);
        }
        for command in batch.removes {
            pass.remove(command);
        }
        for command in batch.swaps {
            pass.swap(command);
        }
        for command in batch.builds {
            pass.build(command);
        }
        let report = pass.finish();

        debug!(
            queued,
            built = report.built,
            removed = report.removed,
            swapped = report.swapped,
            preallocated = report.preallocated,
            added_notifications = report.added_notifications,
            removed_notifications = report.removed_notifications,
            faults = report.faults.len(),
            "entities submitted"
        );
        Ok(report)
    }
}

/// One in-flight submission pass.
struct Submission<'a> {
    store: SubmissionGuard<'a>,
    engines: MutexGuard<'a, EngineRegistry>,
    report: SubmissionReport,
}

impl Submission<'_> {
    fn preallocate(&mut self, command: PreallocateCommand) {
        let PreallocateCommand {
            descriptor,
            group,
            capacity,
        } = command;
        if let Err(err) = self.store.reserve(&descriptor, group, capacity) {
            warn!(
                kind = descriptor.name(),
                %group,
                capacity,
                error = %err,
                "preallocation skipped"
            );
            return;
        }
        self.report.preallocated += 1;
    }

    fn remove(&mut self, command: RemoveCommand) {
        let RemoveCommand { descriptor, egid } = command;
        if !self.store.contains_entity(&descriptor, egid) {
            self.fault(
                CommandKind::Remove,
                EcsError::EntityNotFound {
                    egid,
                    kind: descriptor.name(),
                },
            );
            return;
        }
        let delivered = self.notify(&descriptor, egid, Notification::Remove);
        self.report.removed_notifications += delivered;
        self.store.remove_entity(&descriptor, egid);
        self.report.removed += 1;
    }

    fn swap(&mut self, command: SwapCommand) {
        let SwapCommand {
            descriptor,
            entity,
            from,
            to,
        } = command;
        let source = Egid::new(entity, from);
        let destination = Egid::new(entity, to);
        if from == to {
            trace!(egid = %source, "swap into the same group skipped");
            return;
        }
        if !self.store.contains_entity(&descriptor, source) {
            self.fault(
                CommandKind::Swap,
                EcsError::EntityNotFound {
                    egid: source,
                    kind: descriptor.name(),
                },
            );
            return;
        }
        if self.store.occupies(&descriptor, destination) {
            self.fault(
                CommandKind::Swap,
                EcsError::DuplicateEntity {
                    egid: destination,
                    kind: descriptor.name(),
                },
            );
            return;
        }
        let removed = self.notify(&descriptor, source, Notification::Remove);
        self.store.move_entity(&descriptor, entity, from, to);
        let added = self.notify(&descriptor, destination, Notification::Add);
        self.report.removed_notifications += removed;
        self.report.added_notifications += added;
        self.report.swapped += 1;
    }

    fn build(&mut self, command: BuildCommand) {
        let BuildCommand {
            descriptor,
            egid,
            implementors,
        } = command;
        if let Err(err) = self.store.insert_entity(&descriptor, egid, implementors) {
            self.fault(CommandKind::Build, err);
            return;
        }
        let delivered = self.notify(&descriptor, egid, Notification::Add);
        self.report.added_notifications += delivered;
        self.report.built += 1;
    }

    /// Notify subscribers of every view of `descriptor` at `egid`, in
    /// builder order. Returns the number of callbacks made.
    fn notify(
        &mut self,
        descriptor: &DescriptorInfo,
        egid: Egid,
        notification: Notification,
    ) -> usize {
        let mut delivered = 0;
        for builder in descriptor.builders() {
            let kind = builder.view_kind();
            if !self.engines.has_subscribers(kind.type_id) {
                continue;
            }
            let engines = &mut self.engines;
            if let Some(count) = self.store.with_view(kind.type_id, egid, |view| {
                engines.notify(notification, kind.type_id, egid, view)
            }) {
                trace!(%egid, view = kind.name, ?notification, engines = count, "notified");
                delivered += count;
            }
        }
        delivered
    }

    fn fault(&mut self, command: CommandKind, err: EcsError) {
        warn!(?command, error = %err, "command skipped");
        self.report.fault(command, err);
    }

    fn finish(self) -> SubmissionReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    use engines_component::{
        ComponentBuilder, EntityDescriptor, EntityId, EntityView, GroupId, Implementor,
        InlineView, ReferenceView,
    };
    use parking_lot::Mutex;

    use super::*;
    use crate::engine::ViewEngine;
    use crate::scheduler::ManualScheduler;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Counter {
        value: i32,
    }
    impl EntityView for Counter {}
    impl InlineView for Counter {}

    #[derive(Clone)]
    struct Name {
        label: Arc<str>,
    }
    impl EntityView for Name {}
    impl ReferenceView for Name {
        type Implementor = Arc<str>;
        fn from_implementor(label: Arc<str>) -> Self {
            Self { label }
        }
    }

    struct CounterEntity;
    impl EntityDescriptor for CounterEntity {
        fn builders() -> Vec<ComponentBuilder> {
            vec![ComponentBuilder::inline::<Counter>()]
        }
    }

    struct NamedEntity;
    impl EntityDescriptor for NamedEntity {
        fn builders() -> Vec<ComponentBuilder> {
            vec![
                ComponentBuilder::inline::<Counter>(),
                ComponentBuilder::reference::<Name>(),
            ]
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Add(&'static str, Egid),
        Remove(&'static str, Egid),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    /// Records every counter notification it receives.
    struct Recorder {
        label: &'static str,
        log: Log,
    }

    impl Recorder {
        fn new(label: &'static str, log: &Log) -> Self {
            Self {
                label,
                log: Arc::clone(log),
            }
        }
    }

    impl Engine for Recorder {
        fn subscribe(subscriptions: &mut Subscriptions<Self>) {
            subscriptions.view::<Counter>();
        }
    }

    impl ViewEngine<Counter> for Recorder {
        fn add(&mut self, egid: Egid, _view: &Counter) {
            self.log.lock().push(Event::Add(self.label, egid));
        }
        fn remove(&mut self, egid: Egid, _view: &Counter) {
            self.log.lock().push(Event::Remove(self.label, egid));
        }
    }

    fn setup() -> (ManualScheduler, EnginesRoot) {
        let scheduler = ManualScheduler::new();
        let root = EnginesRoot::new(&scheduler);
        (scheduler, root)
    }

    fn named(label: &str) -> Vec<Implementor> {
        vec![Implementor::new(Arc::<str>::from(label))]
    }

    fn egid(entity: u32, group: u32) -> Egid {
        Egid::new(EntityId(entity), GroupId(group))
    }

    #[test]
    fn test_build_visible_only_after_submission() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let db = root.entity_views_db();

        factory
            .build_entity_in_group::<CounterEntity>(EntityId(5), GroupId(2), Vec::new())
            .unwrap();
        {
            let views = db.query_grouped_views_as_slice::<Counter>(GroupId(2)).unwrap();
            assert!(!views.entities().contains(&EntityId(5)));
            assert_eq!(views.count(), 0);
        }
        assert_eq!(root.pending_commands(), 1);

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.built, 1);
        assert!(report.is_clean());
        assert_eq!(root.pending_commands(), 0);

        let views = db.query_grouped_views_as_slice::<Counter>(GroupId(2)).unwrap();
        assert_eq!(views.entities(), &[EntityId(5)]);
        assert_eq!(views.count(), 1);
    }

    #[test]
    fn test_duplicate_build_in_one_batch() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        for _ in 0..2 {
            factory
                .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
                .unwrap();
        }

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.built, 1);
        let faults: Vec<_> = report.faults_of(CommandKind::Build).collect();
        assert_eq!(faults.len(), 1);
        assert!(matches!(faults[0].error, EcsError::DuplicateEntity { .. }));
        assert_eq!(root.entity_views_db().count::<Counter>(GroupId(0)).unwrap(), 1);
    }

    #[test]
    fn test_swap_moves_entity_between_groups() {
        let (scheduler, root) = setup();
        let log = Log::default();
        root.add_engine(Recorder::new("recorder", &log));
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        let db = root.entity_views_db();

        factory
            .build_entity_in_group::<NamedEntity>(EntityId(3), GroupId(0), named("mover"))
            .unwrap();
        scheduler.submit_entities().unwrap();
        db.query_entity_view_mut::<Counter>(egid(3, 0)).unwrap().value = 9;

        functions
            .swap_entity_group::<NamedEntity>(EntityId(3), GroupId(0), GroupId(1))
            .unwrap();
        assert!(db.has_entity::<Counter>(egid(3, 0)).unwrap());
        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.swapped, 1);

        assert!(!db.has_entity::<Counter>(egid(3, 0)).unwrap());
        assert!(!db.has_entity::<Name>(egid(3, 0)).unwrap());
        assert_eq!(db.query_entity_view::<Counter>(egid(3, 1)).unwrap().value, 9);
        assert_eq!(&*db.query_entity_view::<Name>(egid(3, 1)).unwrap().label, "mover");
        assert_eq!(
            *log.lock(),
            vec![
                Event::Add("recorder", egid(3, 0)),
                Event::Remove("recorder", egid(3, 0)),
                Event::Add("recorder", egid(3, 1)),
            ]
        );
    }

    #[test]
    fn test_swap_of_missing_entity_faults() {
        let (scheduler, root) = setup();
        let functions = root.generate_entity_functions();
        functions
            .swap_entity_group::<CounterEntity>(EntityId(1), GroupId(0), GroupId(1))
            .unwrap();

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.swapped, 0);
        assert_eq!(
            report.faults[0].error,
            EcsError::EntityNotFound {
                egid: egid(1, 0),
                kind: CounterEntity::name(),
            }
        );
    }

    #[test]
    fn test_swap_into_occupied_group_faults() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        for group in [0, 1] {
            factory
                .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(group), Vec::new())
                .unwrap();
        }
        scheduler.submit_entities().unwrap();

        functions
            .swap_entity_group::<CounterEntity>(EntityId(1), GroupId(0), GroupId(1))
            .unwrap();
        let report = scheduler.submit_entities().unwrap();
        assert!(matches!(
            report.faults[0].error,
            EcsError::DuplicateEntity { egid: occupied, .. } if occupied == egid(1, 1)
        ));
        let db = root.entity_views_db();
        assert!(db.has_entity::<Counter>(egid(1, 0)).unwrap());
        assert!(db.has_entity::<Counter>(egid(1, 1)).unwrap());
    }

    #[test]
    fn test_swap_within_same_group_is_noop() {
        let (scheduler, root) = setup();
        let log = Log::default();
        root.add_engine(Recorder::new("recorder", &log));
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();
        log.lock().clear();

        functions
            .swap_entity_group::<CounterEntity>(EntityId(1), GroupId(0), GroupId(0))
            .unwrap();
        let report = scheduler.submit_entities().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.swapped, 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_remove_then_query_not_found() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        factory.build_entity::<CounterEntity>(EntityId(8), Vec::new()).unwrap();
        scheduler.submit_entities().unwrap();

        functions.remove_entity::<CounterEntity>(EntityId(8)).unwrap();
        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.removed, 1);

        let err = root
            .entity_views_db()
            .query_entity_view::<Counter>(Egid::in_default_group(EntityId(8)))
            .unwrap_err();
        assert!(matches!(err, EcsError::EntityNotFound { .. }));
    }

    #[test]
    fn test_missing_remove_does_not_stop_batch() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        functions
            .remove_entity_from_group::<CounterEntity>(EntityId(1), GroupId(0))
            .unwrap();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(2), GroupId(0), Vec::new())
            .unwrap();

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.built, 1);
        assert_eq!(report.faults_of(CommandKind::Remove).count(), 1);
        assert_eq!(report.commands(), 2);
    }

    #[test]
    fn test_remove_and_rebuild_in_one_batch() {
        let (scheduler, root) = setup();
        let log = Log::default();
        root.add_engine(Recorder::new("recorder", &log));
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();
        log.lock().clear();

        // Queued build first; removes still apply before builds.
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        functions
            .remove_entity_from_group::<CounterEntity>(EntityId(1), GroupId(0))
            .unwrap();
        let report = scheduler.submit_entities().unwrap();
        assert!(report.is_clean());
        assert_eq!(
            *log.lock(),
            vec![
                Event::Remove("recorder", egid(1, 0)),
                Event::Add("recorder", egid(1, 0)),
            ]
        );
    }

    #[test]
    fn test_empty_submission_notifies_nobody() {
        let (scheduler, root) = setup();
        let log = Log::default();
        root.add_engine(Recorder::new("recorder", &log));

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report, SubmissionReport::default());
        assert_eq!(report.added_notifications + report.removed_notifications, 0);
        assert!(log.lock().is_empty());
    }

    /// Query-only engine: grabs the query surface in `ready`.
    struct Incrementer {
        views: Arc<Mutex<Option<EntityViewsDb>>>,
    }

    impl Engine for Incrementer {
        fn ready(&mut self, views: EntityViewsDb) {
            *self.views.lock() = Some(views);
        }
    }

    #[test]
    fn test_query_only_engine_increments_counter() {
        let (scheduler, root) = setup();
        let slot = Arc::new(Mutex::new(None));
        root.add_engine(Incrementer {
            views: Arc::clone(&slot),
        });
        let factory = root.generate_entity_factory();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(0), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();

        let db = slot.lock().clone().unwrap();
        for counter in db
            .query_grouped_views_as_slice::<Counter>(GroupId(0))
            .unwrap()
            .iter_mut()
        {
            counter.value += 1;
        }

        let views = db.query_grouped_views_as_slice::<Counter>(GroupId(0)).unwrap();
        assert_eq!(views.count(), 1);
        assert_eq!(views[0], Counter { value: 1 });
    }

    #[test]
    fn test_late_registration_gets_no_replay() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(4), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();

        let log = Log::default();
        root.add_engine(Recorder::new("late", &log));
        scheduler.submit_entities().unwrap();

        assert!(log.lock().is_empty());
        assert!(root.entity_views_db().has_entity::<Counter>(egid(4, 0)).unwrap());
    }

    #[test]
    fn test_subscribers_notified_in_registration_order() {
        let (scheduler, root) = setup();
        let log = Log::default();
        root.add_engine(Recorder::new("first", &log));
        root.add_engine(Recorder::new("second", &log));
        assert_eq!(root.engine_count(), 2);

        let factory = root.generate_entity_factory();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        let report = scheduler.submit_entities().unwrap();

        assert_eq!(report.added_notifications, 2);
        assert_eq!(
            *log.lock(),
            vec![
                Event::Add("first", egid(1, 0)),
                Event::Add("second", egid(1, 0)),
            ]
        );
    }

    /// Calls back into the scheduler from inside a notification.
    struct Reentrant {
        scheduler: ManualScheduler,
    }

    impl Engine for Reentrant {
        fn subscribe(subscriptions: &mut Subscriptions<Self>) {
            subscriptions.view::<Counter>();
        }
    }

    impl ViewEngine<Counter> for Reentrant {
        fn add(&mut self, _egid: Egid, _view: &Counter) {
            let _ = self.scheduler.submit_entities();
        }
        fn remove(&mut self, _egid: Egid, _view: &Counter) {}
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn test_reentrant_submission_panics() {
        let (scheduler, root) = setup();
        root.add_engine(Reentrant {
            scheduler: scheduler.clone(),
        });
        root.generate_entity_factory()
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        let _ = scheduler.submit_entities();
    }

    #[test]
    fn test_descriptor_mismatch_at_enqueue() {
        let (_scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let err = factory
            .build_entity_in_group::<NamedEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap_err();
        assert!(matches!(err, EcsError::DescriptorMismatch(_)));
        assert_eq!(root.pending_commands(), 0);
    }

    #[test]
    fn test_handles_outlive_root() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        drop(root);

        assert_eq!(
            factory
                .build_entity::<CounterEntity>(EntityId(1), Vec::new())
                .unwrap_err(),
            EcsError::RootDropped
        );
        assert_eq!(
            functions
                .remove_entity::<CounterEntity>(EntityId(1))
                .unwrap_err(),
            EcsError::RootDropped
        );
        assert_eq!(scheduler.submit_entities().unwrap_err(), EcsError::RootDropped);
    }

    /// Tries to query from inside its own callback.
    struct Peeker {
        views: Option<EntityViewsDb>,
        seen: Arc<Mutex<Vec<EcsResult<usize>>>>,
    }

    impl Engine for Peeker {
        fn subscribe(subscriptions: &mut Subscriptions<Self>) {
            subscriptions.view::<Counter>();
        }
        fn ready(&mut self, views: EntityViewsDb) {
            self.views = Some(views);
        }
    }

    impl ViewEngine<Counter> for Peeker {
        fn add(&mut self, egid: Egid, _view: &Counter) {
            if let Some(views) = &self.views {
                self.seen.lock().push(views.count::<Counter>(egid.group));
            }
        }
        fn remove(&mut self, _egid: Egid, _view: &Counter) {}
    }

    #[test]
    fn test_query_inside_callback_is_refused() {
        let (scheduler, root) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        root.add_engine(Peeker {
            views: None,
            seen: Arc::clone(&seen),
        });
        root.generate_entity_factory()
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();

        assert_eq!(*seen.lock(), vec![Err(EcsError::QueryDuringSubmission)]);
        assert_eq!(root.entity_views_db().count::<Counter>(GroupId(0)).unwrap(), 1);
    }

    /// Moves every counter entity that appears in group 0 to group 1.
    struct Promoter {
        functions: EntityFunctions,
    }

    impl Engine for Promoter {
        fn subscribe(subscriptions: &mut Subscriptions<Self>) {
            subscriptions.view::<Counter>();
        }
    }

    impl ViewEngine<Counter> for Promoter {
        fn add(&mut self, egid: Egid, _view: &Counter) {
            if egid.group == GroupId(0) {
                self.functions
                    .swap_entity_group::<CounterEntity>(egid.entity, GroupId(0), GroupId(1))
                    .unwrap();
            }
        }
        fn remove(&mut self, _egid: Egid, _view: &Counter) {}
    }

    #[test]
    fn test_commands_from_callbacks_apply_next_pass() {
        let (scheduler, root) = setup();
        root.add_engine(Promoter {
            functions: root.generate_entity_functions(),
        });
        root.generate_entity_factory()
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();

        let first = scheduler.submit_entities().unwrap();
        assert_eq!((first.built, first.swapped), (1, 0));
        assert_eq!(root.pending_commands(), 1);
        let db = root.entity_views_db();
        assert!(db.has_entity::<Counter>(egid(1, 0)).unwrap());

        let second = scheduler.submit_entities().unwrap();
        assert_eq!(second.swapped, 1);
        assert!(db.has_entity::<Counter>(egid(1, 1)).unwrap());
        assert_eq!(root.pending_commands(), 0);
    }

    #[test]
    fn test_preallocate_builds_nothing() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        factory.preallocate::<NamedEntity>(64).unwrap();
        factory
            .preallocate_in_group::<CounterEntity>(GroupId(2), 16)
            .unwrap();

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.preallocated, 2);
        assert_eq!(report.built, 0);
        let db = root.entity_views_db();
        assert_eq!(db.count::<Counter>(GroupId::DEFAULT).unwrap(), 0);
        assert_eq!(db.count::<Counter>(GroupId(2)).unwrap(), 0);
    }

    #[test]
    fn test_views_across_groups_after_submission() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        factory
            .build_entity_in_group::<NamedEntity>(EntityId(1), GroupId(3), named("a"))
            .unwrap();
        factory
            .build_entity_in_group::<NamedEntity>(EntityId(2), GroupId(1), named("b"))
            .unwrap();
        scheduler.submit_entities().unwrap();

        let labels: Vec<(Egid, String)> = root
            .entity_views_db()
            .query_views_across_groups::<Name>()
            .unwrap()
            .map(|(egid, name)| (egid, name.label.to_string()))
            .collect();
        assert_eq!(
            labels,
            vec![(egid(1, 3), "a".to_string()), (egid(2, 1), "b".to_string())]
        );
    }

    #[test]
    fn test_oversized_preallocate_is_skipped() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        factory.preallocate::<NamedEntity>(usize::MAX).unwrap();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();

        let report = scheduler.submit_entities().unwrap();
        assert_eq!(report.preallocated, 0);
        assert_eq!(report.built, 1);
        assert!(report.is_clean());
        assert!(root.entity_views_db().has_entity::<Counter>(egid(1, 0)).unwrap());
    }

    #[test]
    fn test_submission_refused_while_views_held() {
        let (scheduler, root) = setup();
        let factory = root.generate_entity_factory();
        let functions = root.generate_entity_functions();
        factory
            .build_entity_in_group::<CounterEntity>(EntityId(1), GroupId(0), Vec::new())
            .unwrap();
        scheduler.submit_entities().unwrap();

        functions
            .remove_entity_from_group::<CounterEntity>(EntityId(1), GroupId(0))
            .unwrap();
        let db = root.entity_views_db();
        let counter = db.query_entity_view::<Counter>(egid(1, 0)).unwrap();
        assert_eq!(
            scheduler.submit_entities().unwrap_err(),
            EcsError::SubmissionWhileBorrowed
        );
        assert_eq!(counter.value, 0);
        drop(counter);

        assert_eq!(root.pending_commands(), 1);
        assert_eq!(scheduler.submit_entities().unwrap().removed, 1);
    }

    /// Parks the submission inside its first add notification until told
    /// to resume.
    struct Gate {
        started: mpsc::Sender<()>,
        resume: mpsc::Receiver<()>,
        parked: bool,
    }

    impl Engine for Gate {
        fn subscribe(subscriptions: &mut Subscriptions<Self>) {
            subscriptions.view::<Counter>();
        }
    }

    impl ViewEngine<Counter> for Gate {
        fn add(&mut self, _egid: Egid, _view: &Counter) {
            if !self.parked {
                self.parked = true;
                let _ = self.started.send(());
                let _ = self.resume.recv();
            }
        }
        fn remove(&mut self, _egid: Egid, _view: &Counter) {}
    }

    #[test]
    fn test_reader_thread_sees_whole_pass() {
        let (scheduler, root) = setup();
        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        root.add_engine(Gate {
            started: started_tx,
            resume: resume_rx,
            parked: false,
        });
        let factory = root.generate_entity_factory();
        for entity in 0..4 {
            factory
                .build_entity_in_group::<CounterEntity>(EntityId(entity), GroupId(0), Vec::new())
                .unwrap();
        }
        let db = root.entity_views_db();
        assert_eq!(db.count::<Counter>(GroupId(0)).unwrap(), 0);

        thread::scope(|scope| {
            let submitter = scope.spawn(|| scheduler.submit_entities().unwrap());
            // One entity is stored and notified, three are still to come.
            started_rx.recv().unwrap();
            let reader = scope.spawn(|| {
                let count = db.count::<Counter>(GroupId(0)).unwrap();
                let listed = db.query_grouped_views::<Counter>(GroupId(0)).unwrap().count();
                (count, listed)
            });
            thread::sleep(Duration::from_millis(50));
            let blocked = !reader.is_finished();
            resume_tx.send(()).unwrap();

            assert_eq!(submitter.join().unwrap().built, 4);
            assert_eq!(reader.join().unwrap(), (4, 4));
            assert!(blocked);
        });
    }
}
