//! Command handles: [`EntityFactory`] builds, [`EntityFunctions`] removes and
//! swaps.
//!
//! Both handles are narrow and non-owning. They hold a weak reference to the
//! root's command queue and can do nothing but append to it, so engines may
//! keep them without keeping the root alive. Once the root is dropped every
//! call fails with [`EcsError::RootDropped`].

use std::sync::{Arc, Weak};

use engines_component::{
    DescriptorInfo, DescriptorRegistry, Egid, EntityDescriptor, EntityId, GroupId, Implementor,
};
use tracing::trace;

use crate::commands::{BuildCommand, CommandQueue, PreallocateCommand, RemoveCommand, SwapCommand};
use crate::error::{EcsError, EcsResult};

/// Shared state behind both handles.
#[derive(Clone)]
struct QueueHandle {
    queue: Weak<CommandQueue>,
    descriptors: Arc<DescriptorRegistry>,
}

impl QueueHandle {
    fn new(queue: &Arc<CommandQueue>, descriptors: Arc<DescriptorRegistry>) -> Self {
        Self {
            queue: Arc::downgrade(queue),
            descriptors,
        }
    }

    fn resolve<D: EntityDescriptor>(&self) -> EcsResult<(Arc<CommandQueue>, Arc<DescriptorInfo>)> {
        let queue = self.queue.upgrade().ok_or(EcsError::RootDropped)?;
        let descriptor = self.descriptors.resolve::<D>()?;
        Ok((queue, descriptor))
    }
}

/// Enqueues entity builds.
#[derive(Clone)]
pub struct EntityFactory {
    handle: QueueHandle,
}

impl EntityFactory {
    pub(crate) fn new(queue: &Arc<CommandQueue>, descriptors: Arc<DescriptorRegistry>) -> Self {
        Self {
            handle: QueueHandle::new(queue, descriptors),
        }
    }

    /// Queue a build of a `D` entity in the default group.
    ///
    /// # Errors
    ///
    /// See [`Self::build_entity_in_group`].
    pub fn build_entity<D: EntityDescriptor>(
        &self,
        entity: EntityId,
        implementors: Vec<Implementor>,
    ) -> EcsResult<Egid> {
        self.build_entity_in_group::<D>(entity, GroupId::DEFAULT, implementors)
    }

    /// Queue a build of a `D` entity in `group`.
    ///
    /// `implementors` supplies one value per reference-backed builder of `D`,
    /// in declaration order; pass an empty vector for inline-only
    /// descriptors. Nothing becomes visible before the next submission, and
    /// a build that collides with an existing entity is reported by that
    /// submission, not here.
    ///
    /// # Errors
    ///
    /// [`EcsError::DescriptorMismatch`] if `D` is malformed or the
    /// implementors do not match it, [`EcsError::RootDropped`] if the root is
    /// gone.
    pub fn build_entity_in_group<D: EntityDescriptor>(
        &self,
        entity: EntityId,
        group: GroupId,
        implementors: Vec<Implementor>,
    ) -> EcsResult<Egid> {
        let (queue, descriptor) = self.handle.resolve::<D>()?;
        descriptor.validate_implementors(&implementors)?;
        let egid = Egid::new(entity, group);
        trace!(%egid, kind = descriptor.name(), "build queued");
        queue.push_build(BuildCommand {
            descriptor,
            egid,
            implementors,
        });
        Ok(egid)
    }

    /// Reserve room for `capacity` more `D` entities in the default group.
    ///
    /// # Errors
    ///
    /// See [`Self::preallocate_in_group`].
    pub fn preallocate<D: EntityDescriptor>(&self, capacity: usize) -> EcsResult<()> {
        self.preallocate_in_group::<D>(GroupId::DEFAULT, capacity)
    }

    /// Reserve room for `capacity` more `D` entities in `group`.
    ///
    /// A performance hint only. The pending build queue grows immediately;
    /// the tables grow at the next submission.
    ///
    /// # Errors
    ///
    /// [`EcsError::DescriptorMismatch`] if `D` is malformed,
    /// [`EcsError::RootDropped`] if the root is gone.
    pub fn preallocate_in_group<D: EntityDescriptor>(
        &self,
        group: GroupId,
        capacity: usize,
    ) -> EcsResult<()> {
        let (queue, descriptor) = self.handle.resolve::<D>()?;
        trace!(%group, kind = descriptor.name(), capacity, "preallocation queued");
        queue.push_preallocate(PreallocateCommand {
            descriptor,
            group,
            capacity,
        });
        Ok(())
    }
}

impl std::fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFactory")
            .field("root_alive", &(self.handle.queue.strong_count() > 0))
            .finish()
    }
}

/// Enqueues removes and group swaps.
#[derive(Clone)]
pub struct EntityFunctions {
    handle: QueueHandle,
}

impl EntityFunctions {
    pub(crate) fn new(queue: &Arc<CommandQueue>, descriptors: Arc<DescriptorRegistry>) -> Self {
        Self {
            handle: QueueHandle::new(queue, descriptors),
        }
    }

    /// Queue removal of a `D` entity from the default group.
    ///
    /// # Errors
    ///
    /// See [`Self::remove_entity_from_group`].
    pub fn remove_entity<D: EntityDescriptor>(&self, entity: EntityId) -> EcsResult<()> {
        self.remove_entity_from_group::<D>(entity, GroupId::DEFAULT)
    }

    /// Queue removal of a `D` entity from `group`.
    ///
    /// A missing entity is reported by the submission that applies the
    /// command.
    ///
    /// # Errors
    ///
    /// [`EcsError::DescriptorMismatch`] if `D` is malformed,
    /// [`EcsError::RootDropped`] if the root is gone.
    pub fn remove_entity_from_group<D: EntityDescriptor>(
        &self,
        entity: EntityId,
        group: GroupId,
    ) -> EcsResult<()> {
        let (queue, descriptor) = self.handle.resolve::<D>()?;
        let egid = Egid::new(entity, group);
        trace!(%egid, kind = descriptor.name(), "remove queued");
        queue.push_remove(RemoveCommand { descriptor, egid });
        Ok(())
    }

    /// Queue a move of a `D` entity from group `from` to group `to`.
    ///
    /// The identifier and all view data are carried over unchanged.
    ///
    /// # Errors
    ///
    /// [`EcsError::DescriptorMismatch`] if `D` is malformed,
    /// [`EcsError::RootDropped`] if the root is gone.
    pub fn swap_entity_group<D: EntityDescriptor>(
        &self,
        entity: EntityId,
        from: GroupId,
        to: GroupId,
    ) -> EcsResult<()> {
        let (queue, descriptor) = self.handle.resolve::<D>()?;
        trace!(%entity, %from, %to, kind = descriptor.name(), "swap queued");
        queue.push_swap(SwapCommand {
            descriptor,
            entity,
            from,
            to,
        });
        Ok(())
    }
}

impl std::fmt::Debug for EntityFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFunctions")
            .field("root_alive", &(self.handle.queue.strong_count() > 0))
            .finish()
    }
}
