//! # Transform Node
//!
//! This module contains a single node of the transform hierarchy:
//! - Local position, scale, orientation and opacity
//! - The memoized local and world matrices with their validity flags
//! - The change event external listeners subscribe to
//! - `TransformUniform`, the packed GPU representation of a world transform
//!
//! A `Transform` never owns its relatives. Parent and child links are
//! `TransformId` handles into the owning `TransformTree`, which performs all
//! mutation and invalidation propagation.

use std::cell::Cell;

use cgmath::{InnerSpace, Matrix3, Matrix4, One, Quaternion, Vector3, Zero};

use super::{events::TransformChangedEvent, TransformId};

/// Memoized matrices.
///
/// The world matrix has two validity flags: one cleared when this node's
/// local state changes, one cleared when an ancestor's world matrix changes.
/// Reads recompute lazily; nothing is ever recomputed eagerly.
#[derive(Debug)]
pub(super) struct TransformCache {
    local: Cell<Matrix4<f32>>,
    is_local_valid: Cell<bool>,
    world: Cell<Matrix4<f32>>,
    is_world_local_valid: Cell<bool>,
    is_parent_valid: Cell<bool>,
    world_recomputations: Cell<u64>,
}

impl TransformCache {
    fn new() -> Self {
        Self {
            local: Cell::new(Matrix4::one()),
            is_local_valid: Cell::new(false),
            world: Cell::new(Matrix4::one()),
            is_world_local_valid: Cell::new(false),
            is_parent_valid: Cell::new(false),
            world_recomputations: Cell::new(0),
        }
    }

    pub(super) fn invalidate_local(&self) {
        self.is_local_valid.set(false);
        self.is_world_local_valid.set(false);
    }

    pub(super) fn invalidate_parent(&self) {
        self.is_parent_valid.set(false);
    }

    pub(super) fn is_world_valid(&self) -> bool {
        self.is_world_local_valid.get() && self.is_parent_valid.get()
    }

    pub(super) fn world(&self) -> Matrix4<f32> {
        self.world.get()
    }

    pub(super) fn store_world(&self, world: Matrix4<f32>) {
        self.world.set(world);
        self.is_world_local_valid.set(true);
        self.is_parent_valid.set(true);
        self.world_recomputations
            .set(self.world_recomputations.get() + 1);
    }

    /// Installs both matrices as already valid, without counting a recomputation.
    pub(super) fn overwrite(&self, local: Matrix4<f32>, world: Matrix4<f32>) {
        self.local.set(local);
        self.is_local_valid.set(true);
        self.world.set(world);
        self.is_world_local_valid.set(true);
        self.is_parent_valid.set(true);
    }

    pub(super) fn world_recomputations(&self) -> u64 {
        self.world_recomputations.get()
    }
}

/// A node in the transform hierarchy.
///
/// Read access is public; all mutation goes through `TransformTree` so that
/// changes propagate to descendants.
#[derive(Debug)]
pub struct Transform {
    pub(super) position: Vector3<f32>,
    pub(super) scale: Vector3<f32>,
    pub(super) orientation: Quaternion<f32>,
    pub(super) opacity: f32,
    pub(super) parent: Option<TransformId>,
    pub(super) children: Vec<TransformId>,
    pub(super) cache: TransformCache,
    pub(super) changed_event: TransformChangedEvent,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::zero(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            orientation: Quaternion::one(),
            opacity: 1.0,
            parent: None,
            children: Vec::new(),
            cache: TransformCache::new(),
            changed_event: TransformChangedEvent::default(),
        }
    }
}

impl Transform {
    /// Position relative to the parent.
    pub fn local_position(&self) -> Vector3<f32> {
        self.position
    }

    /// Scale relative to the parent.
    pub fn local_scale(&self) -> Vector3<f32> {
        self.scale
    }

    /// Orientation relative to the parent.
    pub fn local_orientation(&self) -> Quaternion<f32> {
        self.orientation
    }

    /// Opacity before the parent chain is applied, in `[0, 1]`.
    pub fn local_opacity(&self) -> f32 {
        self.opacity
    }

    /// The parent handle, if this is not a root.
    pub fn parent(&self) -> Option<TransformId> {
        self.parent
    }

    /// Child handles in attachment order.
    pub fn children(&self) -> &[TransformId] {
        &self.children
    }

    /// The local matrix (translation * rotation * scale), rebuilt if stale.
    pub fn local_matrix(&self) -> Matrix4<f32> {
        let cache = &self.cache;
        if !cache.is_local_valid.get() {
            cache
                .local
                .set(compose(self.position, self.scale, self.orientation));
            cache.is_local_valid.set(true);
        }
        cache.local.get()
    }

    /// Whether the next world-matrix read is answered from the cache.
    pub fn is_transform_valid(&self) -> bool {
        self.cache.is_world_valid()
    }

    /// Stores new local state. Caches are left to the tree to invalidate.
    pub(super) fn set_local(
        &mut self,
        position: Vector3<f32>,
        scale: Vector3<f32>,
        orientation: Quaternion<f32>,
    ) {
        self.position = position;
        self.scale = scale;
        self.orientation = orientation;
    }

    /// Restores defaults, dropping caches and every event connection.
    /// Relations are left untouched; the tree detaches them first.
    pub(super) fn reset_local_state(&mut self) {
        self.position = Vector3::zero();
        self.scale = Vector3::new(1.0, 1.0, 1.0);
        self.orientation = Quaternion::one();
        self.opacity = 1.0;
        self.cache = TransformCache::new();
        self.changed_event.close_all_connections();
    }
}

/// Builds `translation * rotation * scale`.
pub fn compose(
    position: Vector3<f32>,
    scale: Vector3<f32>,
    orientation: Quaternion<f32>,
) -> Matrix4<f32> {
    Matrix4::from_translation(position)
        * Matrix4::from(orientation)
        * Matrix4::from_nonuniform_scale(scale.x, scale.y, scale.z)
}

/// Splits an affine matrix into position, scale and orientation.
///
/// A mirrored matrix (negative determinant) comes back with a negative x
/// scale so the orientation stays a proper rotation. The result is undefined
/// for matrices with a zero scale axis.
pub fn decompose(matrix: &Matrix4<f32>) -> (Vector3<f32>, Vector3<f32>, Quaternion<f32>) {
    let position = matrix.w.truncate();
    let x_axis = matrix.x.truncate();
    let y_axis = matrix.y.truncate();
    let z_axis = matrix.z.truncate();

    let mut scale = Vector3::new(x_axis.magnitude(), y_axis.magnitude(), z_axis.magnitude());
    if x_axis.cross(y_axis).dot(z_axis) < 0.0 {
        scale.x = -scale.x;
    }
    let rotation = Matrix3::from_cols(x_axis / scale.x, y_axis / scale.y, z_axis / scale.z);

    (position, scale, Quaternion::from(rotation).normalize())
}

/// GPU-friendly representation of a world transform.
///
/// Matches the layout the shaders expect for per-object data.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniform {
    // cgmath types aren't Pod, so the matrix is stored as plain arrays
    world: [[f32; 4]; 4],
    // x holds the world opacity, the rest pads to 16 bytes
    opacity: [f32; 4],
}

impl TransformUniform {
    /// Packs a world matrix and world opacity.
    pub fn new(world: Matrix4<f32>, opacity: f32) -> Self {
        Self {
            world: world.into(),
            opacity: [opacity, 0.0, 0.0, 0.0],
        }
    }

    /// The packed world matrix.
    pub fn world(&self) -> Matrix4<f32> {
        self.world.into()
    }

    /// The packed world opacity.
    pub fn opacity(&self) -> f32 {
        self.opacity[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{Rad, Rotation3};

    #[test]
    fn default_is_identity() {
        let transform = Transform::default();
        assert_eq!(transform.local_matrix(), Matrix4::one());
        assert_eq!(transform.local_opacity(), 1.0);
        assert!(!transform.is_transform_valid());
    }

    #[test]
    fn decompose_inverts_compose() {
        let position = Vector3::new(1.0, -2.0, 3.5);
        let scale = Vector3::new(2.0, 0.5, 3.0);
        let orientation = Quaternion::from_axis_angle(Vector3::new(0.0, 1.0, 0.0), Rad(0.75));

        let (p, s, q) = decompose(&compose(position, scale, orientation));
        assert_relative_eq!(p, position, epsilon = 1e-5);
        assert_relative_eq!(s, scale, epsilon = 1e-5);
        // q and -q are the same rotation
        assert_relative_eq!(q.dot(orientation).abs(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn decompose_keeps_a_mirrored_axis() {
        let position = Vector3::new(1.0, 2.0, 3.0);
        let scale = Vector3::new(-1.0, 2.0, 1.0);
        let orientation = Quaternion::from_angle_y(Rad(0.4));
        let matrix = compose(position, scale, orientation);

        let (p, s, q) = decompose(&matrix);
        assert_relative_eq!(p, position, epsilon = 1e-5);
        assert_relative_eq!(s, scale, epsilon = 1e-5);
        assert_relative_eq!(q.dot(orientation).abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(compose(p, s, q), matrix, epsilon = 1e-5);
    }

    #[test]
    fn uniform_is_tightly_packed() {
        let uniform = TransformUniform::new(Matrix4::from_translation(Vector3::new(4.0, 5.0, 6.0)), 0.25);
        assert_eq!(bytemuck::bytes_of(&uniform).len(), 80);
        assert_eq!(uniform.opacity(), 0.25);
        assert_eq!(uniform.world().w.truncate(), Vector3::new(4.0, 5.0, 6.0));
    }
}
