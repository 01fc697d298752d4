use std::{cell::RefCell, rc::Rc};

use approx::assert_relative_eq;
use cgmath::{Matrix4, Quaternion, Rad, Rotation3, SquareMatrix, Vector3};
use frame_engine::engine_state::transform_state::{TransformId, TransformTree};

#[test]
fn chain_world_matrix_is_the_product_of_locals() {
    let mut tree = TransformTree::new();
    let a = tree.insert();
    let b = tree.insert();
    let c = tree.insert();
    tree.add_child(a, b).unwrap();
    tree.add_child(b, c).unwrap();

    tree.set_position(a, Vector3::new(1.0, 0.0, 0.0));
    tree.rotate_z_by(b, std::f32::consts::FRAC_PI_2);
    tree.scale_to(b, 2.0);
    tree.set_position(c, Vector3::new(1.0, 0.0, 0.0));

    let expected = tree.local_matrix(a) * tree.local_matrix(b) * tree.local_matrix(c);
    assert_relative_eq!(tree.world_matrix(c), expected, epsilon = 1e-6);
    assert_relative_eq!(tree.world_position(c), Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-6);
}

#[test]
fn untouched_subtrees_are_not_recomputed_across_frames() {
    let mut tree = TransformTree::new();
    let moving_root = tree.insert();
    let moving_leaf = tree.insert();
    let still_root = tree.insert();
    let still_leaf = tree.insert();
    tree.add_child(moving_root, moving_leaf).unwrap();
    tree.add_child(still_root, still_leaf).unwrap();

    for frame in 0..10 {
        tree.move_by(moving_root, Vector3::new(1.0, 0.0, 0.0));
        tree.world_matrix(moving_leaf);
        tree.world_matrix(still_leaf);
        assert_eq!(tree.world_recompute_count(moving_leaf), frame + 1);
    }
    assert_eq!(tree.world_recompute_count(still_leaf), 1);
    assert_eq!(tree.world_position(moving_leaf), Vector3::new(10.0, 0.0, 0.0));
}

#[test]
fn world_matrix_override_wins_until_the_parent_moves() {
    let mut tree = TransformTree::new();
    let parent = tree.insert();
    let child = tree.insert();
    tree.add_child(parent, child).unwrap();
    tree.set_position(parent, Vector3::new(0.0, 0.0, 3.0));

    let world = Matrix4::from_translation(Vector3::new(5.0, 5.0, 5.0));
    tree.set_world_matrix(child, world);
    assert_eq!(tree.world_matrix(child), world);

    tree.move_by(parent, Vector3::new(0.0, 0.0, 1.0));
    assert!(!tree.is_transform_valid(child));
    assert_relative_eq!(
        tree.world_position(child),
        Vector3::new(5.0, 5.0, 9.0),
        epsilon = 1e-6
    );
}

#[test]
fn listeners_see_every_invalidated_descendant_once() {
    let mut tree = TransformTree::new();
    let root = tree.insert();
    let children: Vec<TransformId> = (0..3).map(|_| tree.insert()).collect();
    for &child in &children {
        tree.add_child(root, child).unwrap();
    }

    let seen = Rc::new(RefCell::new(Vec::new()));
    let _connections: Vec<_> = children
        .iter()
        .map(|&child| {
            let seen = seen.clone();
            tree.subscribe(child, move |id| seen.borrow_mut().push(id))
        })
        .collect();

    tree.set_orientation(root, Quaternion::from_angle_y(Rad(0.3)));
    assert_eq!(*seen.borrow(), children);
}

#[test]
fn removing_a_transform_frees_its_slot_for_reuse() {
    let mut tree = TransformTree::new();
    let parent = tree.insert();
    let child = tree.insert();
    tree.add_child(parent, child).unwrap();
    tree.set_position(child, Vector3::new(2.0, 0.0, 0.0));

    tree.remove(parent).unwrap();
    assert_eq!(tree.parent(child), None);
    assert_eq!(tree.world_position(child), Vector3::new(2.0, 0.0, 0.0));

    let replacement = tree.insert();
    assert!(tree.contains(replacement));
    assert!(!tree.contains(parent));
    assert_eq!(tree.world_matrix(replacement), Matrix4::identity());
}
