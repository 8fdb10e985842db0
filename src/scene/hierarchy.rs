//! Parent-child transform arena
//!
//! Nodes refer to their parent by key, never by pointer. World matrices are
//! cached per node and recomputed lazily; invalidation marks a node and all
//! of its descendants dirty, so a dirty node never has a clean descendant.

use glam::Mat4;
use slotmap::SlotMap;
use thiserror::Error;

use super::Transform;

slotmap::new_key_type! {
    /// Key of a node in a [`TransformHierarchy`]
    pub struct NodeId;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("A node cannot be its own parent")]
    SelfParent,
    #[error("Parenting would create a cycle")]
    Cycle,
    #[error("Unknown node")]
    UnknownNode,
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Transform,
    world: Mat4,
    dirty: bool,
}

/// Arena of transforms with parent links and cached world matrices
#[derive(Debug, Default)]
pub struct TransformHierarchy {
    nodes: SlotMap<NodeId, Node>,
}

impl TransformHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn insert(&mut self, local: Transform, parent: Option<NodeId>) -> Result<NodeId, HierarchyError> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(HierarchyError::UnknownNode);
            }
        }
        let id = self.nodes.insert(Node {
            parent,
            children: Vec::new(),
            local,
            world: Mat4::IDENTITY,
            dirty: true,
        });
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.push(id);
        }
        Ok(id)
    }

    /// Remove a node. Its children become roots, keeping their local transforms.
    pub fn remove(&mut self, id: NodeId) -> Result<Transform, HierarchyError> {
        let node = self.nodes.remove(id).ok_or(HierarchyError::UnknownNode)?;
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in node.children {
            if let Some(child_node) = self.nodes.get_mut(child) {
                child_node.parent = None;
            }
            self.mark_dirty(child);
        }
        Ok(node.local)
    }

    pub fn local(&self, id: NodeId) -> Option<&Transform> {
        self.nodes.get(id).map(|n| &n.local)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn set_local(&mut self, id: NodeId, local: Transform) -> Result<(), HierarchyError> {
        let node = self.nodes.get_mut(id).ok_or(HierarchyError::UnknownNode)?;
        node.local = local;
        self.mark_dirty(id);
        Ok(())
    }

    /// Re-parent `id`. `None` makes it a root.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), HierarchyError> {
        if !self.nodes.contains_key(id) {
            return Err(HierarchyError::UnknownNode);
        }
        if let Some(new_parent) = parent {
            if new_parent == id {
                return Err(HierarchyError::SelfParent);
            }
            if !self.nodes.contains_key(new_parent) {
                return Err(HierarchyError::UnknownNode);
            }
            let mut cursor = Some(new_parent);
            while let Some(ancestor) = cursor {
                if ancestor == id {
                    return Err(HierarchyError::Cycle);
                }
                cursor = self.nodes.get(ancestor).and_then(|n| n.parent);
            }
        }

        let old_parent = self.nodes.get(id).and_then(|n| n.parent);
        if old_parent == parent {
            return Ok(());
        }
        if let Some(old) = old_parent.and_then(|p| self.nodes.get_mut(p)) {
            old.children.retain(|c| *c != id);
        }
        if let Some(new) = parent.and_then(|p| self.nodes.get_mut(p)) {
            new.children.push(id);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = parent;
        }
        self.mark_dirty(id);
        Ok(())
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.dirty)
    }

    /// World matrix of `id`, recomputing only the dirty part of its parent chain.
    pub fn world_matrix(&mut self, id: NodeId) -> Result<Mat4, HierarchyError> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        let mut base = Mat4::IDENTITY;
        while let Some(current) = cursor {
            let node = self.nodes.get(current).ok_or(HierarchyError::UnknownNode)?;
            if !node.dirty {
                base = node.world;
                break;
            }
            chain.push(current);
            cursor = node.parent;
        }

        for current in chain.into_iter().rev() {
            if let Some(node) = self.nodes.get_mut(current) {
                base *= node.local.matrix();
                node.world = base;
                node.dirty = false;
            }
        }
        Ok(base)
    }

    fn mark_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current) {
                node.dirty = true;
                stack.extend(node.children.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn test_world_composes_parent_chain() {
        let mut h = TransformHierarchy::new();
        let root = h.insert(Transform::from_position(Vec3::X), None).unwrap();
        let child = h
            .insert(
                Transform::from_position_rotation(Vec3::Y, Quat::from_rotation_z(0.5)),
                Some(root),
            )
            .unwrap();
        let grandchild = h.insert(Transform::from_position(Vec3::Z), Some(child)).unwrap();

        let world = h.world_matrix(grandchild).unwrap();
        assert!((world.w_axis.truncate() - Vec3::new(1.0, 1.0, 1.0)).length() < 1e-6);
        assert!(!h.is_dirty(root));
        assert!(!h.is_dirty(child));
    }

    #[test]
    fn test_set_local_invalidates_descendants() {
        let mut h = TransformHierarchy::new();
        let root = h.insert(Transform::default(), None).unwrap();
        let child = h.insert(Transform::from_position(Vec3::X), Some(root)).unwrap();
        h.world_matrix(child).unwrap();

        h.set_local(root, Transform::from_position(Vec3::Y * 2.0)).unwrap();
        assert!(h.is_dirty(child));
        let world = h.world_matrix(child).unwrap();
        assert!((world.w_axis.truncate() - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_rejects_self_parent_and_cycles() {
        let mut h = TransformHierarchy::new();
        let a = h.insert(Transform::default(), None).unwrap();
        let b = h.insert(Transform::default(), Some(a)).unwrap();
        let c = h.insert(Transform::default(), Some(b)).unwrap();

        assert_eq!(h.set_parent(a, Some(a)), Err(HierarchyError::SelfParent));
        assert_eq!(h.set_parent(a, Some(c)), Err(HierarchyError::Cycle));
        assert_eq!(h.parent(a), None);
        assert_eq!(h.set_parent(c, Some(a)), Ok(()));
        assert_eq!(h.children(b), &[] as &[NodeId]);
    }

    #[test]
    fn test_remove_reparents_children_to_root() {
        let mut h = TransformHierarchy::new();
        let a = h.insert(Transform::from_position(Vec3::X), None).unwrap();
        let b = h.insert(Transform::from_position(Vec3::Y), Some(a)).unwrap();
        assert!((h.world_matrix(b).unwrap().w_axis.truncate() - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);

        h.remove(a).unwrap();
        assert_eq!(h.parent(b), None);
        assert!((h.world_matrix(b).unwrap().w_axis.truncate() - Vec3::Y).length() < 1e-6);
        assert_eq!(h.world_matrix(a), Err(HierarchyError::UnknownNode));
    }
}
