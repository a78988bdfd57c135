//! Arena-backed scene node hierarchy

use thiserror::Error;

use crate::foundation::math::Mat4;

use super::draw_context::{DrawContext, RenderObject};
use super::mesh::MeshAsset;

/// Index of a node in its [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a mesh in the owning scene's mesh list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

/// What a node contributes when drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Transform only
    Group,
    /// Draws every surface of a mesh
    Mesh(MeshId),
}

/// Hierarchy edits that would break the tree
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// The id does not belong to this graph
    #[error("Unknown scene node {0:?}")]
    UnknownNode(NodeId),

    /// The parent is the child itself or one of its descendants
    #[error("Parenting {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// Node being moved
        child: NodeId,
        /// Requested parent
        parent: NodeId,
    },
}

/// A node in the hierarchy
#[derive(Debug, Clone)]
pub struct Node {
    /// Name from the source asset
    pub name: String,
    /// Group or mesh
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local_transform: Mat4,
    world_transform: Mat4,
}

impl Node {
    /// Parent node, `None` for roots
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Transform relative to the parent
    pub fn local_transform(&self) -> &Mat4 {
        &self.local_transform
    }

    /// Parent world transform times local transform
    pub fn world_transform(&self) -> &Mat4 {
        &self.world_transform
    }
}

/// Tree of nodes stored in a flat arena
///
/// Every mutation keeps `world = parent.world * local` true for the touched
/// subtree, so no separate refresh is needed after an edit.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}

impl SceneGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root node
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind, local_transform: Mat4) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            kind,
            parent: None,
            children: Vec::new(),
            local_transform,
            world_transform: local_transform,
        });
        id
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes without a parent, in insertion order
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(i, _)| NodeId(i))
    }

    /// World transform of `id`
    pub fn world_transform(&self, id: NodeId) -> Option<&Mat4> {
        self.node(id).map(Node::world_transform)
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    fn parent_world(&self, id: NodeId) -> Mat4 {
        self.nodes[id.0]
            .parent
            .map_or_else(Mat4::identity, |parent| self.nodes[parent.0].world_transform)
    }

    /// Move `child` under `parent`, detaching it from any previous parent
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), GraphError> {
        self.check(child)?;
        self.check(parent)?;

        let mut ancestor = Some(parent);
        while let Some(id) = ancestor {
            if id == child {
                return Err(GraphError::Cycle { child, parent });
            }
            ancestor = self.nodes[id.0].parent;
        }

        if let Some(old) = self.nodes[child.0].parent {
            self.nodes[old.0].children.retain(|&c| c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);

        let parent_world = self.nodes[parent.0].world_transform;
        self.refresh_from(child, &parent_world);
        Ok(())
    }

    /// Replace the local transform of `id` and update its subtree
    pub fn set_local_transform(&mut self, id: NodeId, local_transform: Mat4) -> Result<(), GraphError> {
        self.check(id)?;
        self.nodes[id.0].local_transform = local_transform;
        let parent_world = self.parent_world(id);
        self.refresh_from(id, &parent_world);
        Ok(())
    }

    /// Recompute every world transform top-down from the roots
    pub fn refresh_transforms(&mut self) {
        let roots: Vec<NodeId> = self.roots().collect();
        for root in roots {
            self.refresh_from(root, &Mat4::identity());
        }
    }

    fn refresh_from(&mut self, id: NodeId, parent_world: &Mat4) {
        let mut stack = vec![(id, *parent_world)];
        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.world_transform = parent_world * node.local_transform;
            let world = node.world_transform;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
    }

    /// Depth-first walk emitting one draw per surface of every mesh node.
    ///
    /// `top_matrix` is applied on top of each node's world transform.
    pub fn collect_draws(&self, top_matrix: &Mat4, meshes: &[MeshAsset], ctx: &mut DrawContext) {
        let mut stack: Vec<NodeId> = self.roots().collect();
        stack.reverse();

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];

            match node.kind {
                NodeKind::Group => {}
                NodeKind::Mesh(mesh_id) => {
                    let Some(mesh) = meshes.get(mesh_id.0) else {
                        log::warn!("Node '{}' references missing mesh {}", node.name, mesh_id.0);
                        continue;
                    };
                    let transform = top_matrix * node.world_transform;
                    for surface in &mesh.surfaces {
                        ctx.push(RenderObject {
                            index_count: surface.count,
                            first_index: surface.start_index,
                            index_buffer: mesh.buffers.index_buffer.buffer,
                            material: surface.material,
                            bounds: surface.bounds,
                            transform,
                            vertex_buffer_address: mesh.buffers.vertex_buffer_address,
                        });
                    }
                }
            }

            stack.extend(node.children.iter().rev());
        }
    }
}
