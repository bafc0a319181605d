//! The demo world.
//!
//! Three entity kinds exercise the runtime end to end:
//!
//! - a reference-backed entity that its engine removes as soon as it appears;
//! - a reference-backed grouped entity that hops from group 0 to group 1 and
//!   is then removed;
//! - an inline counter entity that a query-only engine increments from a
//!   background task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use engines_component::{
    ComponentBuilder, Egid, EntityDescriptor, EntityId, EntityView, GroupId, Implementor,
    InlineView, ReferenceView,
};
use engines_root::{
    EcsResult, Engine, EnginesRoot, EntityFactory, EntityFunctions, EntityViewsDb, Subscriptions,
    ViewEngine,
};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Group the grouped entity starts in.
pub const START_GROUP: GroupId = GroupId(0);
/// Group the grouped entity is swapped into.
pub const SWAPPED_GROUP: GroupId = GroupId(1);
/// Group holding the counter entities.
pub const COUNTER_GROUP: GroupId = GroupId(0);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capability exposed by the demo's reference-backed views.
pub trait SimpleComponent: Send + Sync {
    fn name(&self) -> &str;
    fn group_id(&self) -> GroupId;
    fn set_group_id(&self, group: GroupId);
}

/// Per-entity backing object for [`SimpleComponent`].
#[derive(Debug)]
pub struct SimpleImplementor {
    name: String,
    group: AtomicU32,
}

impl SimpleImplementor {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: AtomicU32::new(GroupId::DEFAULT.0),
        }
    }

    #[must_use]
    pub fn in_group(group: GroupId) -> Self {
        Self {
            name: String::new(),
            group: AtomicU32::new(group.0),
        }
    }

    /// Wrap for the entity factory.
    #[must_use]
    pub fn into_implementor(self) -> Implementor {
        let component: Arc<dyn SimpleComponent> = Arc::new(self);
        Implementor::new(component)
    }
}

impl SimpleComponent for SimpleImplementor {
    fn name(&self) -> &str {
        &self.name
    }

    fn group_id(&self) -> GroupId {
        GroupId(self.group.load(Ordering::Acquire))
    }

    fn set_group_id(&self, group: GroupId) {
        self.group.store(group.0, Ordering::Release);
    }
}

/// View of the self-removing entity.
#[derive(Clone)]
pub struct SimpleEntityView {
    pub component: Arc<dyn SimpleComponent>,
}

impl EntityView for SimpleEntityView {}

impl ReferenceView for SimpleEntityView {
    type Implementor = Arc<dyn SimpleComponent>;

    fn from_implementor(component: Arc<dyn SimpleComponent>) -> Self {
        Self { component }
    }
}

/// View of the group-hopping entity.
#[derive(Clone)]
pub struct SimpleGroupedEntityView {
    pub component: Arc<dyn SimpleComponent>,
}

impl EntityView for SimpleGroupedEntityView {}

impl ReferenceView for SimpleGroupedEntityView {
    type Implementor = Arc<dyn SimpleComponent>;

    fn from_implementor(component: Arc<dyn SimpleComponent>) -> Self {
        Self { component }
    }
}

/// Inline counter, stored by value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleStructView {
    pub counter: i32,
}

impl EntityView for SimpleStructView {}
impl InlineView for SimpleStructView {}

pub struct SimpleEntityDescriptor;

impl EntityDescriptor for SimpleEntityDescriptor {
    fn builders() -> Vec<ComponentBuilder> {
        vec![ComponentBuilder::reference::<SimpleEntityView>()]
    }
}

pub struct SimpleGroupedEntityDescriptor;

impl EntityDescriptor for SimpleGroupedEntityDescriptor {
    fn builders() -> Vec<ComponentBuilder> {
        vec![ComponentBuilder::reference::<SimpleGroupedEntityView>()]
    }
}

pub struct SimpleStructEntityDescriptor;

impl EntityDescriptor for SimpleStructEntityDescriptor {
    fn builders() -> Vec<ComponentBuilder> {
        vec![ComponentBuilder::inline::<SimpleStructView>()]
    }
}

/// Multi-view engine reacting to both reference-backed kinds.
pub struct SimpleEngine {
    functions: EntityFunctions,
    /// Off while profiling, so built entities stay put.
    remove_on_add: bool,
}

impl SimpleEngine {
    #[must_use]
    pub fn new(functions: EntityFunctions, remove_on_add: bool) -> Self {
        Self {
            functions,
            remove_on_add,
        }
    }
}

impl Engine for SimpleEngine {
    fn name(&self) -> &str {
        "simple"
    }

    fn subscribe(subscriptions: &mut Subscriptions<Self>) {
        subscriptions
            .view::<SimpleEntityView>()
            .view::<SimpleGroupedEntityView>();
    }
}

impl ViewEngine<SimpleEntityView> for SimpleEngine {
    fn add(&mut self, egid: Egid, _view: &SimpleEntityView) {
        if !self.remove_on_add {
            return;
        }
        info!(%egid, "entity view added");
        if let Err(err) = self
            .functions
            .remove_entity_from_group::<SimpleEntityDescriptor>(egid.entity, egid.group)
        {
            warn!(%egid, error = %err, "could not queue removal");
        }
    }

    fn remove(&mut self, egid: Egid, view: &SimpleEntityView) {
        info!(%egid, name = view.component.name(), "entity view removed");
    }
}

impl ViewEngine<SimpleGroupedEntityView> for SimpleEngine {
    fn add(&mut self, egid: Egid, view: &SimpleGroupedEntityView) {
        info!(%egid, "grouped entity view added");
        let queued = if view.component.group_id() == START_GROUP {
            let queued = self
                .functions
                .swap_entity_group::<SimpleGroupedEntityDescriptor>(
                    egid.entity,
                    egid.group,
                    SWAPPED_GROUP,
                );
            view.component.set_group_id(SWAPPED_GROUP);
            info!(%egid, to = %SWAPPED_GROUP, "grouped entity view swap queued");
            queued
        } else {
            self.functions
                .remove_entity_from_group::<SimpleGroupedEntityDescriptor>(egid.entity, egid.group)
        };
        if let Err(err) = queued {
            warn!(%egid, error = %err, "could not queue grouped entity command");
        }
    }

    fn remove(&mut self, egid: Egid, _view: &SimpleGroupedEntityView) {
        info!(%egid, "grouped entity view removed");
    }
}

/// Query-only engine: bumps every counter in its group once.
pub struct SimpleStructEngine {
    group: GroupId,
}

impl SimpleStructEngine {
    #[must_use]
    pub fn new(group: GroupId) -> Self {
        Self { group }
    }
}

impl Engine for SimpleStructEngine {
    fn name(&self) -> &str {
        "simple_struct"
    }

    fn ready(&mut self, views: EntityViewsDb) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(count_up(views, self.group));
            }
            Err(_) => warn!(group = %self.group, "no async runtime, counter task not started"),
        }
    }
}

/// Wait until `group` holds counters, increment each once, and return how
/// many were incremented.
pub async fn count_up(views: EntityViewsDb, group: GroupId) -> usize {
    info!(%group, "counter task waiting");
    loop {
        let incremented = increment_counters(&views, group).unwrap_or_else(|err| {
            warn!(error = %err, "counter query failed");
            0
        });
        if incremented > 0 {
            info!(%group, count = incremented, "counter task done");
            return incremented;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn increment_counters(views: &EntityViewsDb, group: GroupId) -> EcsResult<usize> {
    let mut counters = views.query_grouped_views_as_slice::<SimpleStructView>(group)?;
    for view in counters.iter_mut() {
        view.counter += 1;
    }
    Ok(counters.count())
}

/// Register the demo engines and queue the demo entities on `root`.
///
/// In profiling mode `config.profile_entities` entities of each kind are
/// queued and the enqueue time is logged.
pub fn populate(root: &EnginesRoot, config: &AppConfig) -> EcsResult<()> {
    let factory = root.generate_entity_factory();
    root.add_engine(SimpleEngine::new(
        root.generate_entity_functions(),
        !config.is_profiling(),
    ));
    root.add_engine(SimpleStructEngine::new(COUNTER_GROUP));

    let count = config.profile_entities.max(1);
    profile_builds::<SimpleEntityDescriptor>(&factory, GroupId::DEFAULT, count, |entity| {
        factory.build_entity::<SimpleEntityDescriptor>(
            entity,
            vec![SimpleImplementor::named("simple_entity").into_implementor()],
        )
    })?;
    profile_builds::<SimpleStructEntityDescriptor>(&factory, COUNTER_GROUP, count, |entity| {
        factory.build_entity_in_group::<SimpleStructEntityDescriptor>(
            entity,
            COUNTER_GROUP,
            Vec::new(),
        )
    })?;

    factory.build_entity_in_group::<SimpleGroupedEntityDescriptor>(
        EntityId(0),
        START_GROUP,
        vec![SimpleImplementor::in_group(START_GROUP).into_implementor()],
    )?;
    Ok(())
}

/// Queue `count` builds of `D`, preallocating first when more than one is
/// requested.
fn profile_builds<D: EntityDescriptor>(
    factory: &EntityFactory,
    group: GroupId,
    count: u32,
    mut build: impl FnMut(EntityId) -> EcsResult<Egid>,
) -> EcsResult<Duration> {
    if count > 1 {
        factory.preallocate_in_group::<D>(group, count as usize)?;
    }
    let start = Instant::now();
    for entity in 0..count {
        build(EntityId(entity))?;
    }
    let elapsed = start.elapsed();
    if count > 1 {
        info!(
            kind = D::name(),
            count,
            elapsed_ms = elapsed.as_millis() as u64,
            "builds queued"
        );
    }
    Ok(elapsed)
}
