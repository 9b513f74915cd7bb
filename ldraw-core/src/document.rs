/// In-memory directive tree: File, Models, Steps, elements
///
/// Nodes live in a slotmap arena. Every edit checks the tree first and
/// returns a `Change` that can be inverted and replayed. Removed nodes stay
/// detached in the arena until discarded.
use std::collections::HashSet;

use nalgebra::Matrix4;
use slotmap::{new_key_type, SlotMap};

use crate::color::ColorCode;
use crate::config::FormatConfig;
use crate::directive::{
    normalize_name, Directive, DirectiveKind, LDrawFile, Model, Part, Step, StepRotation,
};
use crate::error::Rejection;
use crate::geometry::{Box3, Face, Mesh, Segment};
use crate::library::{PartLibrary, Resolution, ResolveStack};
use crate::transform::{Transform, TransformComponents};
use crate::writer;

new_key_type! {
    /// Handle to a node of a [`Document`].
    pub struct NodeId;
}

#[derive(Debug, Clone)]
pub struct Node {
    directive: Directive,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(directive: Directive) -> Self {
        Self {
            directive,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn directive(&self) -> &Directive {
        &self.directive
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A reversible description of one edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Inserted {
        parent: NodeId,
        index: usize,
        node: NodeId,
    },
    Removed {
        parent: NodeId,
        index: usize,
        node: NodeId,
    },
    TransformChanged {
        node: NodeId,
        old: Matrix4<f64>,
        new: Matrix4<f64>,
    },
    ColorChanged {
        node: NodeId,
        old: ColorCode,
        new: ColorCode,
    },
    PartRenamed {
        node: NodeId,
        old: String,
        new: String,
    },
    ModelRenamed {
        node: NodeId,
        old: Option<String>,
        new: Option<String>,
    },
    DescriptionChanged {
        node: NodeId,
        old: String,
        new: String,
    },
    StepRotationChanged {
        node: NodeId,
        old: StepRotation,
        new: StepRotation,
    },
    StepDisplayLimitChanged {
        node: NodeId,
        old: Option<usize>,
        new: Option<usize>,
    },
    ActiveModelChanged {
        old: Option<NodeId>,
        new: Option<NodeId>,
    },
}

impl Change {
    /// The change that undoes this one.
    pub fn inverse(&self) -> Change {
        match self.clone() {
            Self::Inserted {
                parent,
                index,
                node,
            } => Self::Removed {
                parent,
                index,
                node,
            },
            Self::Removed {
                parent,
                index,
                node,
            } => Self::Inserted {
                parent,
                index,
                node,
            },
            Self::TransformChanged { node, old, new } => Self::TransformChanged {
                node,
                old: new,
                new: old,
            },
            Self::ColorChanged { node, old, new } => Self::ColorChanged {
                node,
                old: new,
                new: old,
            },
            Self::PartRenamed { node, old, new } => Self::PartRenamed {
                node,
                old: new,
                new: old,
            },
            Self::ModelRenamed { node, old, new } => Self::ModelRenamed {
                node,
                old: new,
                new: old,
            },
            Self::DescriptionChanged { node, old, new } => Self::DescriptionChanged {
                node,
                old: new,
                new: old,
            },
            Self::StepRotationChanged { node, old, new } => Self::StepRotationChanged {
                node,
                old: new,
                new: old,
            },
            Self::StepDisplayLimitChanged { node, old, new } => Self::StepDisplayLimitChanged {
                node,
                old: new,
                new: old,
            },
            Self::ActiveModelChanged { old, new } => Self::ActiveModelChanged { old: new, new: old },
        }
    }

    /// The node the change is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Inserted { node, .. }
            | Self::Removed { node, .. }
            | Self::TransformChanged { node, .. }
            | Self::ColorChanged { node, .. }
            | Self::PartRenamed { node, .. }
            | Self::ModelRenamed { node, .. }
            | Self::DescriptionChanged { node, .. }
            | Self::StepRotationChanged { node, .. }
            | Self::StepDisplayLimitChanged { node, .. } => Some(*node),
            Self::ActiveModelChanged { new, .. } => *new,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
}

impl Document {
    /// An empty file with one model holding one empty step.
    pub fn new() -> Self {
        let mut document = Self::with_root(LDrawFile::default());
        let model = document.push_child(document.root, Directive::Model(Model::default()));
        document.push_child(model, Directive::Step(Step::new()));
        document
    }

    /// Parse LDraw text, logging and dropping malformed lines.
    pub fn parse(text: &str) -> Self {
        crate::parser::parse_document(text).document
    }

    pub(crate) fn with_root(file: LDrawFile) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(Directive::File(file)));
        Self { nodes, root }
    }

    /// Append without any checks; used while building a tree.
    pub(crate) fn push_child(&mut self, parent: NodeId, directive: Directive) -> NodeId {
        let mut node = Node::new(directive);
        node.parent = Some(parent);
        let id = self.nodes.insert(node);
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(id);
        }
        id
    }

    /// Remove and free a child without any checks.
    pub(crate) fn prune_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.retain(|c| *c != child);
        }
        self.free_subtree(child);
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Directive> {
        self.nodes.get_mut(id).map(|node| &mut node.directive)
    }

    pub(crate) fn model_mut(&mut self, id: NodeId) -> Option<&mut Model> {
        match self.get_mut(id) {
            Some(Directive::Model(model)) => Some(model),
            _ => None,
        }
    }

    pub(crate) fn set_path(&mut self, path: std::path::PathBuf) {
        if let Some(Directive::File(file)) = self.get_mut(self.root) {
            file.path = Some(path);
        }
    }

    /// Replace the children of `parent` wholesale; used by the optimizer.
    pub(crate) fn replace_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for child in &children {
            if let Some(node) = self.nodes.get_mut(*child) {
                node.parent = Some(parent);
            }
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children = children;
        }
    }

    /// Create a detached node; used by the optimizer.
    pub(crate) fn create_detached(&mut self, directive: Directive) -> NodeId {
        self.nodes.insert(Node::new(directive))
    }

    pub(crate) fn set_cached_bounds(&mut self, model: NodeId, bounds: Box3) {
        if let Some(model) = self.model_mut(model) {
            model.cached_bounds = Some(bounds);
        }
    }

    // ---------------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------------

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Directive> {
        self.nodes.get(id).map(|node| &node.directive)
    }

    pub fn kind(&self, id: NodeId) -> Option<DirectiveKind> {
        self.get(id).map(Directive::kind)
    }

    /// Children of `id`; empty for leaves and stale handles.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |node| &node.children)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn file(&self) -> Option<&LDrawFile> {
        self.get(self.root).and_then(Directive::as_file)
    }

    pub fn models(&self) -> &[NodeId] {
        self.children(self.root)
    }

    /// The active model, falling back to the first one.
    pub fn active_model(&self) -> NodeId {
        self.file()
            .and_then(|file| file.active_model)
            .filter(|id| self.parent(*id) == Some(self.root))
            .or_else(|| self.models().first().copied())
            .unwrap_or(self.root)
    }

    pub fn model(&self, id: NodeId) -> Option<&Model> {
        self.get(id).and_then(Directive::as_model)
    }

    pub fn step(&self, id: NodeId) -> Option<&Step> {
        self.get(id).and_then(Directive::as_step)
    }

    pub fn part(&self, id: NodeId) -> Option<&Part> {
        self.get(id).and_then(Directive::as_part)
    }

    /// Nearest ancestor of the given kind, not counting `id` itself.
    pub fn enclosing(&self, id: NodeId, kind: DirectiveKind) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            if self.kind(ancestor) == Some(kind) {
                return Some(ancestor);
            }
            current = self.parent(ancestor);
        }
        None
    }

    pub fn enclosing_model(&self, id: NodeId) -> Option<NodeId> {
        self.enclosing(id, DirectiveKind::Model)
    }

    pub fn enclosing_step(&self, id: NodeId) -> Option<NodeId> {
        self.enclosing(id, DirectiveKind::Step)
    }

    /// Model of this file that parts named `name` refer to.
    pub fn find_model(&self, name: &str) -> Option<NodeId> {
        let wanted = normalize_name(name);
        self.models().iter().copied().find(|id| {
            self.model(*id)
                .and_then(Model::reference_name)
                .is_some_and(|reference| reference == wanted)
        })
    }

    /// Position of `id` among its parent's children.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Whether `id` is live and reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// `id` and everything below it, depth first.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let stack = if self.nodes.contains_key(id) {
            vec![id]
        } else {
            Vec::new()
        };
        Descendants {
            document: self,
            stack,
        }
    }

    /// Every part directive at or below `id`.
    pub fn parts(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(id)
            .filter(|node| self.kind(*node) == Some(DirectiveKind::Part))
    }

    /// Whether `from` places `to`, directly or through other submodels.
    pub fn model_reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![from];
        while let Some(model) = pending.pop() {
            if !visited.insert(model) {
                continue;
            }
            for part in self.parts(model) {
                let Some(name) = self.part(part).map(Part::reference_name) else {
                    continue;
                };
                if let Some(target) = self.find_model(name) {
                    if target == to {
                        return true;
                    }
                    pending.push(target);
                }
            }
        }
        false
    }

    /// Whether a part named `name` inside `model` would close a cycle.
    pub fn would_reference_cycle(&self, model: NodeId, name: &str) -> bool {
        match self.find_model(name) {
            Some(target) => target == model || self.model_reaches(target, model),
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Editing
    // ---------------------------------------------------------------------

    fn live(&self, id: NodeId) -> Result<&Node, Rejection> {
        self.nodes.get(id).ok_or(Rejection::StaleNode)
    }

    fn check_containment(&self, parent: NodeId, child: DirectiveKind) -> Result<(), Rejection> {
        let parent_kind = self.live(parent)?.directive.kind();
        if parent_kind.accepts(child) {
            Ok(())
        } else {
            Err(Rejection::KindMismatch {
                parent: parent_kind.name(),
                child: child.name(),
            })
        }
    }

    fn check_index(&self, parent: NodeId, index: usize) -> Result<(), Rejection> {
        let len = self.children(parent).len();
        if index > len {
            return Err(Rejection::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    /// Model a new element under `container` would belong to.
    fn model_for_container(&self, container: NodeId) -> Option<NodeId> {
        if self.kind(container) == Some(DirectiveKind::Model) {
            Some(container)
        } else {
            self.enclosing_model(container)
        }
    }

    fn check_part_name(&self, container: NodeId, name: &str) -> Result<(), Rejection> {
        if let Some(model) = self.model_for_container(container) {
            if self.would_reference_cycle(model, name) {
                return Err(Rejection::SelfReference(name.to_string()));
            }
        }
        Ok(())
    }

    /// Cached bounds may depend on any model of the file.
    pub(crate) fn invalidate_bounds(&mut self) {
        let models = self.models().to_vec();
        for model in models {
            if let Some(model) = self.model_mut(model) {
                model.cached_bounds = None;
            }
        }
    }

    /// Insert a new directive as child `index` of `parent`.
    ///
    /// A new model gets an empty step so it is never stepless.
    pub fn insert(
        &mut self,
        parent: NodeId,
        index: usize,
        directive: Directive,
    ) -> Result<Change, Rejection> {
        self.check_containment(parent, directive.kind())?;
        self.check_index(parent, index)?;
        if let Directive::Part(part) = &directive {
            self.check_part_name(parent, part.display_name())?;
        }

        let is_model = directive.kind() == DirectiveKind::Model;
        let node = self.nodes.insert(Node::new(directive));
        if is_model {
            let step = self.nodes.insert(Node::new(Directive::Step(Step::new())));
            self.attach(step, node, 0);
        }
        self.attach(node, parent, index);
        self.invalidate_bounds();
        Ok(Change::Inserted {
            parent,
            index,
            node,
        })
    }

    fn attach(&mut self, node: NodeId, parent: NodeId, index: usize) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.insert(index, node);
        }
        if let Some(child) = self.nodes.get_mut(node) {
            child.parent = Some(parent);
        }
    }

    fn detach(&mut self, node: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(node)?;
        let index = self.index_of(node)?;
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.remove(index);
        }
        if let Some(child) = self.nodes.get_mut(node) {
            child.parent = None;
        }
        Some((parent, index))
    }

    /// Detach `id` from its parent. The subtree stays in the arena so the
    /// change can be undone with [`Document::apply`].
    pub fn remove(&mut self, id: NodeId) -> Result<Change, Rejection> {
        let kind = self.live(id)?.directive.kind();
        if id == self.root {
            return Err(Rejection::RootNode);
        }
        let parent = self.parent(id).ok_or(Rejection::StaleNode)?;
        match kind {
            DirectiveKind::Step if self.children(parent).len() <= 1 => {
                return Err(Rejection::LastStep)
            }
            DirectiveKind::Model if self.children(parent).len() <= 1 => {
                return Err(Rejection::LastModel)
            }
            _ => {}
        }

        let (parent, index) = self.detach(id).ok_or(Rejection::StaleNode)?;
        if self.file().and_then(|file| file.active_model) == Some(id) {
            if let Some(Directive::File(file)) = self.get_mut(self.root) {
                file.active_model = None;
            }
        }
        self.invalidate_bounds();
        Ok(Change::Removed {
            parent,
            index,
            node: id,
        })
    }

    /// Attach a previously removed node again.
    ///
    /// If reattaching would let a model place itself, the node is left
    /// detached and the document is unchanged.
    pub fn reinsert(
        &mut self,
        node: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<Change, Rejection> {
        let kind = self.live(node)?.directive.kind();
        if node == self.root || self.parent(node).is_some() {
            return Err(Rejection::StillAttached);
        }
        self.check_containment(parent, kind)?;
        self.check_index(parent, index)?;

        self.attach(node, parent, index);
        let model = if kind == DirectiveKind::Model {
            Some(node)
        } else {
            self.model_for_container(parent)
        };
        let cycle = self
            .models()
            .iter()
            .chain(model.iter())
            .any(|m| self.model_reaches(*m, *m));
        if cycle {
            self.detach(node);
            let name = self
                .part(node)
                .map(|part| part.display_name().to_string())
                .or_else(|| self.model(node).and_then(Model::name).map(str::to_string))
                .unwrap_or_default();
            return Err(Rejection::SelfReference(name));
        }

        self.invalidate_bounds();
        Ok(Change::Inserted {
            parent,
            index,
            node,
        })
    }

    /// Free a removed subtree. Its handles become stale.
    pub fn discard(&mut self, node: NodeId) -> Result<(), Rejection> {
        self.live(node)?;
        if node == self.root || self.parent(node).is_some() {
            return Err(Rejection::StillAttached);
        }
        self.free_subtree(node);
        Ok(())
    }

    fn free_subtree(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            if let Some(removed) = self.nodes.remove(id) {
                pending.extend(removed.children);
            }
        }
    }

    pub fn set_transform(&mut self, id: NodeId, matrix: Matrix4<f64>) -> Result<Change, Rejection> {
        let mut matrix = matrix;
        Transform::force_affine(&mut matrix);
        let kind = self.live(id)?.directive.kind();
        let Some(Directive::Part(part)) = self.get_mut(id) else {
            return Err(Rejection::NotApplicable {
                kind: kind.name(),
                property: "transform",
            });
        };
        let old = std::mem::replace(&mut part.transform, matrix);
        self.invalidate_bounds();
        Ok(Change::TransformChanged {
            node: id,
            old,
            new: matrix,
        })
    }

    pub fn set_components(
        &mut self,
        id: NodeId,
        components: &TransformComponents,
    ) -> Result<Change, Rejection> {
        self.set_transform(id, Transform::compose(components))
    }

    pub fn set_color(&mut self, id: NodeId, color: ColorCode) -> Result<Change, Rejection> {
        let kind = self.live(id)?.directive.kind();
        let old = self
            .get_mut(id)
            .and_then(|directive| directive.replace_color(color))
            .ok_or(Rejection::NotApplicable {
                kind: kind.name(),
                property: "color",
            })?;
        Ok(Change::ColorChanged {
            node: id,
            old,
            new: color,
        })
    }

    /// Point a part at another model; the reference name follows.
    pub fn set_display_name(&mut self, id: NodeId, name: &str) -> Result<Change, Rejection> {
        let kind = self.live(id)?.directive.kind();
        if kind != DirectiveKind::Part {
            return Err(Rejection::NotApplicable {
                kind: kind.name(),
                property: "part name",
            });
        }
        if let Some(parent) = self.parent(id) {
            self.check_part_name(parent, name)?;
        }
        let Some(Directive::Part(part)) = self.get_mut(id) else {
            return Err(Rejection::StaleNode);
        };
        let old = part.set_display_name(name);
        self.invalidate_bounds();
        Ok(Change::PartRenamed {
            node: id,
            old,
            new: name.to_string(),
        })
    }

    /// Rename a submodel. Parts elsewhere that use the new name will place it.
    pub fn rename_model(&mut self, id: NodeId, name: Option<String>) -> Result<Change, Rejection> {
        let Some(model) = self.model(id) else {
            return Err(self.not_applicable(id, "model name"));
        };
        let old = model.mpd_name.clone();
        let effective = name.clone().or_else(|| model.file_name.clone());

        if let Some(new_name) = &effective {
            let wanted = normalize_name(new_name);
            for other in self.models() {
                let uses_name = self
                    .parts(*other)
                    .filter_map(|part| self.part(part))
                    .any(|part| part.reference_name() == wanted);
                if uses_name && (*other == id || self.model_reaches(id, *other)) {
                    return Err(Rejection::SelfReference(new_name.clone()));
                }
            }
        }

        if let Some(model) = self.model_mut(id) {
            model.mpd_name = name.clone();
        }
        self.invalidate_bounds();
        Ok(Change::ModelRenamed {
            node: id,
            old,
            new: name,
        })
    }

    pub fn set_description(&mut self, id: NodeId, description: &str) -> Result<Change, Rejection> {
        let not_applicable = self.not_applicable(id, "description");
        let model = self.model_mut(id).ok_or(not_applicable)?;
        let old = std::mem::replace(&mut model.description, description.to_string());
        Ok(Change::DescriptionChanged {
            node: id,
            old,
            new: description.to_string(),
        })
    }

    pub fn set_step_rotation(
        &mut self,
        id: NodeId,
        rotation: StepRotation,
    ) -> Result<Change, Rejection> {
        let not_applicable = self.not_applicable(id, "rotation");
        let Some(Directive::Step(step)) = self.get_mut(id) else {
            return Err(not_applicable);
        };
        let old = std::mem::replace(&mut step.rotation, rotation);
        Ok(Change::StepRotationChanged {
            node: id,
            old,
            new: rotation,
        })
    }

    pub fn set_step_display_limit(
        &mut self,
        id: NodeId,
        limit: Option<usize>,
    ) -> Result<Change, Rejection> {
        let not_applicable = self.not_applicable(id, "step display limit");
        let model = self.model_mut(id).ok_or(not_applicable)?;
        let old = std::mem::replace(&mut model.step_display_limit, limit);
        Ok(Change::StepDisplayLimitChanged {
            node: id,
            old,
            new: limit,
        })
    }

    pub fn set_active_model(&mut self, model: Option<NodeId>) -> Result<Change, Rejection> {
        if let Some(id) = model {
            self.live(id)?;
            if self.parent(id) != Some(self.root) {
                return Err(self.not_applicable(id, "place in this file"));
            }
        }
        let root = self.root;
        let Some(Directive::File(file)) = self.get_mut(root) else {
            return Err(Rejection::StaleNode);
        };
        let old = std::mem::replace(&mut file.active_model, model);
        Ok(Change::ActiveModelChanged { old, new: model })
    }

    fn not_applicable(&self, id: NodeId, property: &'static str) -> Rejection {
        match self.kind(id) {
            Some(kind) => Rejection::NotApplicable {
                kind: kind.name(),
                property,
            },
            None => Rejection::StaleNode,
        }
    }

    /// Perform a change, typically the inverse of an earlier one.
    pub fn apply(&mut self, change: &Change) -> Result<Change, Rejection> {
        match change {
            Change::Inserted {
                parent,
                index,
                node,
            } => self.reinsert(*node, *parent, *index),
            Change::Removed { node, .. } => self.remove(*node),
            Change::TransformChanged { node, new, .. } => self.set_transform(*node, *new),
            Change::ColorChanged { node, new, .. } => self.set_color(*node, *new),
            Change::PartRenamed { node, new, .. } => self.set_display_name(*node, new),
            Change::ModelRenamed { node, new, .. } => self.rename_model(*node, new.clone()),
            Change::DescriptionChanged { node, new, .. } => self.set_description(*node, new),
            Change::StepRotationChanged { node, new, .. } => self.set_step_rotation(*node, *new),
            Change::StepDisplayLimitChanged { node, new, .. } => {
                self.set_step_display_limit(*node, *new)
            }
            Change::ActiveModelChanged { new, .. } => self.set_active_model(*new),
        }
    }

    // ---------------------------------------------------------------------
    // Geometry and text
    // ---------------------------------------------------------------------

    /// Axis-aligned bounds of a subtree, with part references resolved.
    ///
    /// A file reports the bounds of its active model. Unresolved parts
    /// contribute nothing.
    pub fn bounds(&self, id: NodeId, library: &PartLibrary) -> Box3 {
        self.bounds_with(id, library, &mut ResolveStack::default())
    }

    pub(crate) fn bounds_with(
        &self,
        id: NodeId,
        library: &PartLibrary,
        stack: &mut ResolveStack,
    ) -> Box3 {
        let Some(directive) = self.get(id) else {
            return Box3::empty();
        };
        match directive {
            Directive::File(_) => self.bounds_with(self.active_model(), library, stack),
            Directive::Model(model) => {
                if let Some(bounds) = model.cached_bounds {
                    return bounds;
                }
                if !stack.enter_model(id) {
                    return Box3::empty();
                }
                let bounds = self.union_children(id, library, stack);
                stack.leave_model();
                bounds
            }
            Directive::Step(_) => self.union_children(id, library, stack),
            Directive::Part(part) => match library.resolve_part_with(self, id, stack) {
                Resolution::Library(resolved) => resolved.bounds.transformed(&part.transform),
                Resolution::Submodel(model) => self
                    .bounds_with(model, library, stack)
                    .transformed(&part.transform),
                Resolution::Unresolved => Box3::empty(),
            },
            other => other.vertex_bounds().unwrap_or_default(),
        }
    }

    fn union_children(&self, id: NodeId, library: &PartLibrary, stack: &mut ResolveStack) -> Box3 {
        self.children(id).iter().fold(Box3::empty(), |bounds, child| {
            bounds.union(&self.bounds_with(*child, library, stack))
        })
    }

    /// World-space faces and edges of a subtree, every reference expanded.
    ///
    /// Quadrilaterals are split into two faces; conditional lines are not
    /// drawn. A model's step display limit hides its later steps.
    pub fn mesh(&self, id: NodeId, library: &PartLibrary) -> Mesh {
        let mut mesh = Mesh::new();
        self.collect_mesh(
            id,
            library,
            &Matrix4::identity(),
            ColorCode::Current,
            &mut ResolveStack::default(),
            &mut mesh,
        );
        mesh
    }

    pub(crate) fn collect_mesh(
        &self,
        id: NodeId,
        library: &PartLibrary,
        transform: &Matrix4<f64>,
        color: ColorCode,
        stack: &mut ResolveStack,
        mesh: &mut Mesh,
    ) {
        let Some(directive) = self.get(id) else {
            return;
        };
        let place = |point: &nalgebra::Point3<f64>| transform.transform_point(point);
        match directive {
            Directive::File(_) => {
                self.collect_mesh(self.active_model(), library, transform, color, stack, mesh)
            }
            Directive::Model(model) => {
                if !stack.enter_model(id) {
                    return;
                }
                let visible = model.step_display_limit.map_or(usize::MAX, |limit| limit + 1);
                for step in self.children(id).iter().take(visible) {
                    self.collect_mesh(*step, library, transform, color, stack, mesh);
                }
                stack.leave_model();
            }
            Directive::Step(_) => {
                for child in self.children(id) {
                    self.collect_mesh(*child, library, transform, color, stack, mesh);
                }
            }
            Directive::Part(part) => {
                let placed = transform * part.transform;
                let part_color = part.color.resolve(color);
                match library.resolve_part_with(self, id, stack) {
                    Resolution::Library(resolved) => {
                        if stack.enter_part(&resolved.name) {
                            let outer_models = stack.take_models();
                            resolved.document.collect_mesh(
                                resolved.model,
                                library,
                                &placed,
                                part_color,
                                stack,
                                mesh,
                            );
                            stack.restore_models(outer_models);
                            stack.leave_part();
                        }
                    }
                    Resolution::Submodel(model) => {
                        self.collect_mesh(model, library, &placed, part_color, stack, mesh)
                    }
                    Resolution::Unresolved => {}
                }
            }
            Directive::Line(line) => mesh.add_segment(Segment {
                points: line.vertices.map(|p| place(&p)),
                color: line.color.resolve(color),
            }),
            Directive::Triangle(triangle) => mesh.add_face(Face::flat(
                triangle.vertices.map(|p| place(&p)),
                triangle.color.resolve(color),
            )),
            Directive::Quadrilateral(quad) => {
                let [a, b, c, d] = quad.vertices.map(|p| place(&p));
                let quad_color = quad.color.resolve(color);
                mesh.add_face(Face::flat([a, b, c], quad_color));
                mesh.add_face(Face::flat([a, c, d], quad_color));
            }
            Directive::ConditionalLine(_)
            | Directive::Comment(_)
            | Directive::ColorDefinition(_)
            | Directive::UnknownMetaCommand(_) => {}
        }
    }

    /// Canonical LDraw text of a subtree with default formatting.
    pub fn write(&self, id: NodeId) -> String {
        writer::write_node(self, id, &FormatConfig::default())
    }

    pub fn write_with(&self, id: NodeId, config: &FormatConfig) -> String {
        writer::write_node(self, id, config)
    }

    /// The whole file as LDraw text.
    pub fn to_ldraw(&self) -> String {
        self.write(self.root)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first walk returned by [`Document::descendants`].
pub struct Descendants<'a> {
    document: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.document.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Comment, Triangle};
    use crate::transform::RotationState;
    use nalgebra::{Point3, Vector3};

    const HOUSE: &str = "0 FILE house.ldr\n0 House\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 wall.ldr\n0 STEP\n\
                         1 4 0 -24 0 1 0 0 0 1 0 0 0 1 roof.ldr\n0 NOFILE\n\
                         0 FILE wall.ldr\n3 16 0 0 0 20 0 0 0 20 0\n0 NOFILE\n\
                         0 FILE roof.ldr\n3 16 0 0 0 -20 0 0 0 -20 0\n0 NOFILE\n";

    fn triangle() -> Directive {
        Directive::Triangle(Triangle {
            color: ColorCode::Current,
            vertices: [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
        })
    }

    fn part(name: &str) -> Directive {
        Directive::Part(Part::new(name, ColorCode::Palette(4), Matrix4::identity()))
    }

    #[test]
    fn test_new_document_invariants() {
        let document = Document::new();
        assert_eq!(document.models().len(), 1);
        assert_eq!(document.children(document.models()[0]).len(), 1);
        assert_eq!(document.active_model(), document.models()[0]);
    }

    #[test]
    fn test_insert_and_undo() {
        let mut document = Document::new();
        let step = document.children(document.models()[0])[0];

        let change = document.insert(step, 0, triangle()).unwrap();
        let node = change.node().unwrap();
        assert_eq!(document.children(step), &[node]);
        assert_eq!(document.enclosing_step(node), Some(step));

        document.apply(&change.inverse()).unwrap();
        assert!(document.children(step).is_empty());
        assert!(!document.is_attached(node));

        document.apply(&change).unwrap();
        assert_eq!(document.children(step), &[node]);
    }

    #[test]
    fn test_insert_checks_kind_and_index() {
        let mut document = Document::new();
        let model = document.models()[0];
        let step = document.children(model)[0];

        assert!(matches!(
            document.insert(model, 0, triangle()),
            Err(Rejection::KindMismatch { .. })
        ));
        assert_eq!(
            document.insert(step, 3, triangle()),
            Err(Rejection::IndexOutOfRange { index: 3, len: 0 })
        );
    }

    #[test]
    fn test_inserted_model_has_a_step() {
        let mut document = Document::new();
        let change = document
            .insert(document.root(), 1, Directive::Model(Model::submodel("door.ldr")))
            .unwrap();
        let model = change.node().unwrap();
        assert_eq!(document.children(model).len(), 1);
        assert_eq!(document.find_model("Door.ldr"), Some(model));
    }

    #[test]
    fn test_cannot_remove_last_step_or_model() {
        let mut document = Document::new();
        let model = document.models()[0];
        let step = document.children(model)[0];
        assert_eq!(document.remove(step), Err(Rejection::LastStep));
        assert_eq!(document.remove(model), Err(Rejection::LastModel));
        assert_eq!(document.remove(document.root()), Err(Rejection::RootNode));
        assert_eq!(document.children(model).len(), 1);
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut document = Document::parse(HOUSE);
        let wall = document.find_model("wall.ldr").unwrap();
        let wall_step = document.children(wall)[0];

        // wall.ldr placing itself
        assert_eq!(
            document.insert(wall_step, 0, part("wall.ldr")),
            Err(Rejection::SelfReference("wall.ldr".to_string()))
        );
        // wall.ldr placing house.ldr, which already places wall.ldr
        assert!(document.insert(wall_step, 0, part("House.ldr")).is_err());
        // A library part is fine
        assert!(document.insert(wall_step, 0, part("3001.dat")).is_ok());
    }

    #[test]
    fn test_rename_part_into_cycle_rejected() {
        let mut document = Document::parse(HOUSE);
        let roof = document.find_model("roof.ldr").unwrap();
        let roof_step = document.children(roof)[0];
        let change = document.insert(roof_step, 0, part("3001.dat")).unwrap();
        let node = change.node().unwrap();

        assert!(document.set_display_name(node, "roof.ldr").is_err());
        assert_eq!(document.part(node).unwrap().display_name(), "3001.dat");

        let renamed = document.set_display_name(node, "3002.DAT").unwrap();
        assert_eq!(document.part(node).unwrap().reference_name(), "3002.dat");
        document.apply(&renamed.inverse()).unwrap();
        assert_eq!(document.part(node).unwrap().display_name(), "3001.dat");
    }

    #[test]
    fn test_rename_model_into_cycle_rejected() {
        let mut document = Document::parse(HOUSE);
        let house = document.find_model("house.ldr").unwrap();
        let wall = document.find_model("wall.ldr").unwrap();
        // house places wall.ldr; naming house "wall.ldr" would make it place itself
        assert!(document.rename_model(house, Some("wall.ldr".to_string())).is_err());
        assert!(document.rename_model(wall, Some("panel.ldr".to_string())).is_ok());
    }

    #[test]
    fn test_clearing_model_name_falls_back_to_header_name() {
        let mut document = Document::parse(
            "0 FILE a.ldr\n0 Name: x.ldr\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 x.ldr\n0 NOFILE\n",
        );
        let model = document.models()[0];
        // without its MPD name the model answers to x.ldr, which it places
        assert_eq!(
            document.rename_model(model, None),
            Err(Rejection::SelfReference("x.ldr".to_string()))
        );
        assert_eq!(document.model(model).unwrap().name(), Some("a.ldr"));
        assert!(!document.model_reaches(model, model));

        let mut document = Document::parse(HOUSE);
        let wall = document.find_model("wall.ldr").unwrap();
        let change = document.rename_model(wall, None).unwrap();
        assert_eq!(document.model(wall).unwrap().name(), None);
        document.apply(&change.inverse()).unwrap();
        assert_eq!(document.find_model("wall.ldr"), Some(wall));
    }

    #[test]
    fn test_set_components_composes_transform() {
        let mut document = Document::parse(HOUSE);
        let house = document.find_model("house.ldr").unwrap();
        let wall_part = document.parts(house).next().unwrap();

        let mut components = TransformComponents::identity();
        components.translation = Vector3::new(10.0, -24.0, 30.0);
        components.rotation = RotationState::from_degrees(0.0, 90.0, 0.0);
        let change = document.set_components(wall_part, &components).unwrap();

        let transform = document.part(wall_part).unwrap().transform;
        assert_eq!(transform, Transform::compose(&components));
        assert_eq!(transform[(3, 3)], 1.0);
        assert_eq!(
            Vector3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]),
            Vector3::new(10.0, -24.0, 30.0)
        );
        document.apply(&change.inverse()).unwrap();
        assert_eq!(document.part(wall_part).unwrap().transform, Matrix4::identity());
        assert!(document.set_components(house, &components).is_err());
    }

    #[test]
    fn test_mesh_honors_step_display_limit() {
        let mut document =
            Document::parse("0 Steps\n3 16 0 0 0 1 0 0 0 1 0\n0 STEP\n2 24 0 0 0 1 0 0\n");
        let model = document.models()[0];
        let library = PartLibrary::empty();
        let mesh = document.mesh(model, &library);
        assert_eq!((mesh.faces.len(), mesh.segments.len()), (1, 1));

        document.set_step_display_limit(model, Some(0)).unwrap();
        let mesh = document.mesh(model, &library);
        assert_eq!((mesh.faces.len(), mesh.segments.len()), (1, 0));
    }

    #[test]
    fn test_set_transform_and_color() {
        let mut document = Document::parse(HOUSE);
        let house = document.find_model("house.ldr").unwrap();
        let wall_part = document.parts(house).next().unwrap();

        let moved = Transform::translation_matrix(20.0, 0.0, 0.0);
        let change = document.set_transform(wall_part, moved).unwrap();
        assert_eq!(document.part(wall_part).unwrap().transform, moved);
        document.apply(&change.inverse()).unwrap();
        assert_eq!(document.part(wall_part).unwrap().transform, Matrix4::identity());

        let change = document.set_color(wall_part, ColorCode::Palette(1)).unwrap();
        assert_eq!(
            change,
            Change::ColorChanged {
                node: wall_part,
                old: ColorCode::Current,
                new: ColorCode::Palette(1)
            }
        );
        assert!(document.set_color(house, ColorCode::Palette(1)).is_err());
    }

    #[test]
    fn test_remove_active_model_falls_back() {
        let mut document = Document::parse(HOUSE);
        let roof = document.find_model("roof.ldr").unwrap();
        document.set_active_model(Some(roof)).unwrap();
        assert_eq!(document.active_model(), roof);
        document.remove(roof).unwrap();
        assert_eq!(document.active_model(), document.models()[0]);
    }

    #[test]
    fn test_discard_frees_subtree() {
        let mut document = Document::new();
        let step = document.children(document.models()[0])[0];
        let node = document
            .insert(step, 0, Directive::Comment(Comment::new("note")))
            .unwrap()
            .node()
            .unwrap();
        assert_eq!(document.discard(node), Err(Rejection::StillAttached));
        document.remove(node).unwrap();
        document.discard(node).unwrap();
        assert!(document.get(node).is_none());
    }

    #[test]
    fn test_descendants_preorder() {
        let document = Document::parse(HOUSE);
        let house = document.find_model("house.ldr").unwrap();
        let kinds: Vec<_> = document
            .descendants(house)
            .map(|id| document.kind(id).unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                DirectiveKind::Model,
                DirectiveKind::Step,
                DirectiveKind::Part,
                DirectiveKind::Step,
                DirectiveKind::Part,
            ]
        );
    }

    #[test]
    fn test_model_reaches() {
        let document = Document::parse(HOUSE);
        let house = document.find_model("house.ldr").unwrap();
        let wall = document.find_model("wall.ldr").unwrap();
        assert!(document.model_reaches(house, wall));
        assert!(!document.model_reaches(wall, house));
    }
}
