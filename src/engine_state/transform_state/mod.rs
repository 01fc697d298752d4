//! # Transform Hierarchy
//!
//! This module maintains the hierarchical placement of scene entities with a
//! lazily recomputed, memoized world-matrix cache.
//!
//! ## Core Components
//! - `TransformTree`: Arena owning every `Transform`, addressed by `TransformId`
//! - `Transform`: Local placement plus cached local/world matrices
//! - `TransformChangedEvent` / `Connection`: Scoped change notifications
//! - `TransformUniform`: Packed world transform for GPU upload
//!
//! ## Cache Consistency
//! Mutations never recompute anything. A change marks the node's local cache
//! invalid, marks every descendant's parent cache invalid, and fires change
//! events. `world_matrix()` then recomputes on demand, walking up only as far
//! as the nearest ancestor whose cache is still valid. A node whose ancestors
//! never change never recomputes, however many frames pass.
//!
//! Absolute setters whose new value equals the current one are no-ops and
//! invalidate nothing.
//!
//! ## Threading
//! The tree is not thread-safe (it is neither `Send` nor `Sync`). Transforms
//! are mutated on the main thread, after the frame's game-logic barrier.
//!
//! ## Example Usage
//! ```rust
//! use cgmath::Vector3;
//! use frame_engine::engine_state::transform_state::TransformTree;
//!
//! let mut tree = TransformTree::new();
//! let parent = tree.insert();
//! let child = tree.insert();
//! tree.add_child(parent, child).unwrap();
//!
//! tree.set_position(parent, Vector3::new(1.0, 0.0, 0.0));
//! tree.set_position(child, Vector3::new(0.0, 2.0, 0.0));
//! assert_eq!(tree.world_position(child), Vector3::new(1.0, 2.0, 0.0));
//! ```

pub mod events;
pub mod transform;

use cgmath::{
    ElementWise, InnerSpace, Matrix3, Matrix4, Quaternion, Rad, Rotation3, Vector3,
};
use thiserror::Error;

use events::Connection;
use transform::{decompose, Transform, TransformUniform};

/// A generational handle to a `Transform` in a `TransformTree`.
///
/// Handles to removed transforms are detected rather than aliasing a newer
/// transform that reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformId {
    index: u32,
    generation: u32,
}

impl TransformId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Errors raised by hierarchy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The handle refers to a transform that has been removed.
    #[error("transform {0:?} no longer exists")]
    StaleHandle(TransformId),
    /// A transform cannot be its own parent.
    #[error("transform {0:?} cannot be its own parent")]
    SelfParent(TransformId),
    /// The new parent is a descendant of the child.
    #[error("parenting {child:?} to {parent:?} would create a cycle")]
    Cycle {
        /// The transform being reparented.
        child: TransformId,
        /// The requested parent, a descendant of `child`.
        parent: TransformId,
    },
}

struct Slot {
    generation: u32,
    transform: Option<Transform>,
}

/// Owns every transform of a scene and their parent/child relations.
///
/// All mutation goes through the tree so changes propagate to descendants.
///
/// # Panics
/// Placement setters and getters panic when given a stale handle, the same
/// way indexing a `Vec` out of bounds does. Relation operations return
/// `TransformError::StaleHandle` instead.
#[derive(Default)]
pub struct TransformTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl TransformTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root transform at the origin with unit scale, identity
    /// orientation and full opacity.
    pub fn insert(&mut self) -> TransformId {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.transform = Some(Transform::default());
                TransformId::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .unwrap_or_else(|_| panic!("transform tree exceeded u32::MAX slots"));
                self.slots.push(Slot {
                    generation: 0,
                    transform: Some(Transform::default()),
                });
                TransformId::new(index, 0)
            }
        }
    }

    /// Removes a transform, detaching it from its parent and orphaning its
    /// children (each of which is notified as reparented).
    pub fn remove(&mut self, id: TransformId) -> Result<(), TransformError> {
        self.check(id)?;
        self.set_parent(id, None)?;
        self.remove_all_children(id)?;

        let slot = &mut self.slots[id.index as usize];
        slot.transform = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Ok(())
    }

    /// Whether `id` refers to a live transform.
    pub fn contains(&self, id: TransformId) -> bool {
        self.get(id).is_some()
    }

    /// The transform behind `id`, if it is still alive.
    pub fn get(&self, id: TransformId) -> Option<&Transform> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.transform.as_ref())
    }

    /// Number of live transforms.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree holds no transforms.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, id: TransformId) -> Result<&Transform, TransformError> {
        self.get(id).ok_or(TransformError::StaleHandle(id))
    }

    fn node(&self, id: TransformId) -> &Transform {
        match self.get(id) {
            Some(transform) => transform,
            None => panic!("{}", TransformError::StaleHandle(id)),
        }
    }

    fn node_mut(&mut self, id: TransformId) -> &mut Transform {
        match self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.transform.as_mut())
        {
            Some(transform) => transform,
            None => panic!("{}", TransformError::StaleHandle(id)),
        }
    }

    // ---------------------------------------------------------------------
    // Invalidation

    /// Marks `id`'s local cache invalid, propagates to every descendant and
    /// fires change events, children before the node itself.
    fn on_transform_changed(&self, id: TransformId) {
        let node = self.node(id);
        node.cache.invalidate_local();
        for &child in &node.children {
            self.on_parent_transform_changed(child);
        }
        node.changed_event.notify(id);
    }

    /// A node whose parent moved is itself treated as changed for its own children.
    fn on_parent_transform_changed(&self, id: TransformId) {
        self.node(id).cache.invalidate_parent();
        self.on_transform_changed(id);
    }

    // ---------------------------------------------------------------------
    // Local placement

    /// Sets the local position. No-op if unchanged.
    pub fn set_position(&mut self, id: TransformId, position: Vector3<f32>) {
        let node = self.node_mut(id);
        if node.position == position {
            return;
        }
        node.position = position;
        self.on_transform_changed(id);
    }

    /// Moves the transform by `delta` in its parent's space.
    pub fn move_by(&mut self, id: TransformId, delta: Vector3<f32>) {
        self.node_mut(id).position += delta;
        self.on_transform_changed(id);
    }

    /// Sets the local orientation. No-op if unchanged.
    pub fn set_orientation(&mut self, id: TransformId, orientation: Quaternion<f32>) {
        let node = self.node_mut(id);
        if node.orientation == orientation {
            return;
        }
        node.orientation = orientation;
        self.on_transform_changed(id);
    }

    /// Applies a further rotation of `angle` radians about `axis` in local space.
    pub fn rotate_by(&mut self, id: TransformId, axis: Vector3<f32>, angle: f32) {
        let rotation = Quaternion::from_axis_angle(axis.normalize(), Rad(angle));
        let node = self.node_mut(id);
        node.orientation = node.orientation * rotation;
        self.on_transform_changed(id);
    }

    /// Rotates about the local x axis.
    pub fn rotate_x_by(&mut self, id: TransformId, angle: f32) {
        self.rotate_by(id, Vector3::unit_x(), angle);
    }

    /// Rotates about the local y axis.
    pub fn rotate_y_by(&mut self, id: TransformId, angle: f32) {
        self.rotate_by(id, Vector3::unit_y(), angle);
    }

    /// Rotates about the local z axis.
    pub fn rotate_z_by(&mut self, id: TransformId, angle: f32) {
        self.rotate_by(id, Vector3::unit_z(), angle);
    }

    /// Replaces the orientation with a rotation of `angle` radians about `axis`.
    pub fn rotate_to(&mut self, id: TransformId, axis: Vector3<f32>, angle: f32) {
        self.set_orientation(id, Quaternion::from_axis_angle(axis.normalize(), Rad(angle)));
    }

    /// Sets the per-axis local scale. No-op if unchanged.
    pub fn set_scale(&mut self, id: TransformId, scale: Vector3<f32>) {
        let node = self.node_mut(id);
        if node.scale == scale {
            return;
        }
        node.scale = scale;
        self.on_transform_changed(id);
    }

    /// Sets a uniform local scale. No-op if unchanged.
    pub fn scale_to(&mut self, id: TransformId, scale: f32) {
        self.set_scale(id, Vector3::new(scale, scale, scale));
    }

    /// Multiplies the local scale uniformly.
    pub fn scale_by(&mut self, id: TransformId, factor: f32) {
        self.scale_by_axes(id, Vector3::new(factor, factor, factor));
    }

    /// Multiplies the local scale per axis.
    pub fn scale_by_axes(&mut self, id: TransformId, factors: Vector3<f32>) {
        let node = self.node_mut(id);
        node.scale = node.scale.mul_element_wise(factors);
        self.on_transform_changed(id);
    }

    /// Sets the whole local placement at once. Always notifies.
    pub fn set_position_scale_orientation(
        &mut self,
        id: TransformId,
        position: Vector3<f32>,
        scale: Vector3<f32>,
        orientation: Quaternion<f32>,
    ) {
        self.node_mut(id).set_local(position, scale, orientation);
        self.on_transform_changed(id);
    }

    /// Places the transform at `position`, facing away from `target` along its
    /// local +z axis (the camera convention), with `up` as the approximate up
    /// direction. Scale is kept.
    pub fn set_look_at(
        &mut self,
        id: TransformId,
        position: Vector3<f32>,
        target: Vector3<f32>,
        up: Vector3<f32>,
    ) {
        let forward = (position - target).normalize();
        let right = up.cross(forward).normalize();
        let up = forward.cross(right).normalize();
        let orientation = Quaternion::from(Matrix3::from_cols(right, up, forward)).normalize();

        let scale = self.node(id).scale;
        self.set_position_scale_orientation(id, position, scale, orientation);
    }

    /// Reduces opacity by `amount`, clamped to `[0, 1]`.
    pub fn fade_by(&mut self, id: TransformId, amount: f32) {
        let node = self.node_mut(id);
        node.opacity = (node.opacity - amount).clamp(0.0, 1.0);
        self.on_transform_changed(id);
    }

    /// Sets opacity, clamped to `[0, 1]`. No-op if the clamped value is unchanged.
    pub fn fade_to(&mut self, id: TransformId, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        let node = self.node_mut(id);
        if node.opacity == opacity {
            return;
        }
        node.opacity = opacity;
        self.on_transform_changed(id);
    }

    /// Replaces the local placement with the decomposition of `matrix`.
    pub fn set_local_matrix(&mut self, id: TransformId, matrix: Matrix4<f32>) {
        let (position, scale, orientation) = decompose(&matrix);
        self.set_position_scale_orientation(id, position, scale, orientation);
    }

    /// Overrides the placement with a world-space matrix.
    ///
    /// The matrix is decomposed into the local position/scale/orientation as
    /// if it were world space, descendants are invalidated, and both caches of
    /// this node are marked valid with `matrix` as the world transform,
    /// ignoring any parent until the parent next changes. Used when external
    /// code (physics, for example) computes a world placement directly.
    ///
    /// Opacity is not part of the matrix; `world_opacity` still multiplies up
    /// the parent chain.
    pub fn set_world_matrix(&mut self, id: TransformId, matrix: Matrix4<f32>) {
        let (position, scale, orientation) = decompose(&matrix);
        self.node_mut(id).set_local(position, scale, orientation);
        self.on_transform_changed(id);
        self.node(id).cache.overwrite(matrix, matrix);
    }

    // ---------------------------------------------------------------------
    // Derived placement

    /// The local matrix of `id`.
    pub fn local_matrix(&self, id: TransformId) -> Matrix4<f32> {
        self.node(id).local_matrix()
    }

    /// The world matrix of `id`, recomputed only if a cache on the path to
    /// the root is stale.
    pub fn world_matrix(&self, id: TransformId) -> Matrix4<f32> {
        let node = self.node(id);
        if !node.cache.is_world_valid() {
            let world = match node.parent {
                Some(parent) => self.world_matrix(parent) * node.local_matrix(),
                None => node.local_matrix(),
            };
            node.cache.store_world(world);
        }
        node.cache.world()
    }

    /// Position in world space.
    pub fn world_position(&self, id: TransformId) -> Vector3<f32> {
        let node = self.node(id);
        match node.parent {
            Some(_) => self.world_matrix(id).w.truncate(),
            None => node.position,
        }
    }

    /// Scale in world space, extracted from the world matrix so it agrees
    /// with `world_matrix` after a `set_world_matrix` override.
    pub fn world_scale(&self, id: TransformId) -> Vector3<f32> {
        let node = self.node(id);
        match node.parent {
            Some(_) => decompose(&self.world_matrix(id)).1,
            None => node.scale,
        }
    }

    /// Orientation in world space, extracted from the world matrix.
    pub fn world_orientation(&self, id: TransformId) -> Quaternion<f32> {
        let node = self.node(id);
        match node.parent {
            Some(_) => decompose(&self.world_matrix(id)).2,
            None => node.orientation,
        }
    }

    /// Opacity in world space: the product up the parent chain.
    pub fn world_opacity(&self, id: TransformId) -> f32 {
        let node = self.node(id);
        match node.parent {
            Some(parent) => self.world_opacity(parent) * node.opacity,
            None => node.opacity,
        }
    }

    /// Whether the next `world_matrix(id)` is answered from the cache.
    pub fn is_transform_valid(&self, id: TransformId) -> bool {
        self.node(id).is_transform_valid()
    }

    /// How many times the world matrix of `id` has been recomputed.
    pub fn world_recompute_count(&self, id: TransformId) -> u64 {
        self.node(id).cache.world_recomputations()
    }

    /// Packs the world matrix and opacity of `id` for GPU upload.
    pub fn uniform(&self, id: TransformId) -> TransformUniform {
        TransformUniform::new(self.world_matrix(id), self.world_opacity(id))
    }

    // ---------------------------------------------------------------------
    // Relations

    /// The parent of `id`, if any.
    pub fn parent(&self, id: TransformId) -> Option<TransformId> {
        self.node(id).parent
    }

    /// The children of `id` in attachment order.
    pub fn children(&self, id: TransformId) -> &[TransformId] {
        &self.node(id).children
    }

    /// Makes `parent` the parent of `child`, or makes `child` a root with `None`.
    ///
    /// Both sides of the relation are updated, and `child` with all of its
    /// descendants is invalidated even if the parent did not change.
    pub fn set_parent(
        &mut self,
        child: TransformId,
        parent: Option<TransformId>,
    ) -> Result<(), TransformError> {
        self.check(child)?;
        if let Some(parent) = parent {
            self.check(parent)?;
            if parent == child {
                return Err(TransformError::SelfParent(child));
            }
            if self.is_ancestor_of(child, parent) {
                return Err(TransformError::Cycle { child, parent });
            }
        }

        let previous = self.node(child).parent;
        if previous != parent {
            if let Some(previous) = previous {
                self.node_mut(previous).children.retain(|&c| c != child);
            }
            if let Some(parent) = parent {
                self.node_mut(parent).children.push(child);
            }
            self.node_mut(child).parent = parent;
        }

        self.on_parent_transform_changed(child);
        Ok(())
    }

    /// Attaches `child` under `parent`.
    pub fn add_child(&mut self, parent: TransformId, child: TransformId) -> Result<(), TransformError> {
        self.set_parent(child, Some(parent))
    }

    /// Detaches `child` from `parent`, making it a root.
    ///
    /// # Returns
    /// `false` if `child` was not a child of `parent`.
    pub fn remove_child(&mut self, parent: TransformId, child: TransformId) -> Result<bool, TransformError> {
        if !self.check(parent)?.children.contains(&child) {
            return Ok(false);
        }
        self.set_parent(child, None)?;
        Ok(true)
    }

    /// Detaches every child of `parent`, making each a root.
    pub fn remove_all_children(&mut self, parent: TransformId) -> Result<(), TransformError> {
        self.check(parent)?;
        let children = std::mem::take(&mut self.node_mut(parent).children);
        for child in children {
            self.node_mut(child).parent = None;
            self.on_parent_transform_changed(child);
        }
        Ok(())
    }

    fn is_ancestor_of(&self, ancestor: TransformId, mut id: TransformId) -> bool {
        while let Some(parent) = self.node(id).parent {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    /// Returns `id` to its freshly inserted state for reuse.
    ///
    /// Children are detached and notified, the transform is detached from its
    /// parent, every change-event connection is closed and all caches are
    /// cleared. Listeners are not notified of the reset itself.
    pub fn reset(&mut self, id: TransformId) -> Result<(), TransformError> {
        self.remove_all_children(id)?;
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|&c| c != id);
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.reset_local_state();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Events

    /// Subscribes to change notifications of `id` until the `Connection` is dropped.
    pub fn subscribe<F>(&self, id: TransformId, listener: F) -> Connection
    where
        F: Fn(TransformId) + 'static,
    {
        self.node(id).changed_event.subscribe(listener)
    }
}
