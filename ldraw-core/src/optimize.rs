/// Step optimizer for library parts
///
/// A part file is one model with one step holding a mix of lines,
/// triangles, quads and subpart references. Regrouping it into homogeneous
/// steps lets a renderer draw each step as one batch. Conditional lines
/// are dropped since nothing downstream draws them.
use crate::directive::{Directive, DirectiveKind, StepFlavor};
use crate::document::{Document, NodeId};
use crate::library::{PartLibrary, ResolveStack};

/// Why a model was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAModel,
    /// Only single-step models are regrouped.
    MultipleSteps(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeOutcome {
    Optimized { steps: usize },
    Skipped(SkipReason),
}

/// Group order of the regrouped steps.
const FLAVORS: [StepFlavor; 4] = [
    StepFlavor::Lines,
    StepFlavor::Triangles,
    StepFlavor::Quadrilaterals,
    StepFlavor::Mixed,
];

/// Regroup a single-step model and record its bounds.
pub fn optimize_model(
    document: &mut Document,
    model: NodeId,
    library: &PartLibrary,
) -> OptimizeOutcome {
    optimize_with(document, model, library, &mut ResolveStack::default())
}

pub(crate) fn optimize_with(
    document: &mut Document,
    model: NodeId,
    library: &PartLibrary,
    stack: &mut ResolveStack,
) -> OptimizeOutcome {
    if document.model(model).is_none() {
        return OptimizeOutcome::Skipped(SkipReason::NotAModel);
    }
    let steps = document.children(model).to_vec();
    let [step] = steps.as_slice() else {
        log::debug!("optimizer skipped a model with {} steps", steps.len());
        return OptimizeOutcome::Skipped(SkipReason::MultipleSteps(steps.len()));
    };
    let step = *step;
    let rotation = document.step(step).map(|step| step.rotation).unwrap_or_default();

    let mut groups: [Vec<NodeId>; 4] = Default::default();
    for child in document.children(step).to_vec() {
        let slot = match document.kind(child) {
            Some(DirectiveKind::Line) => 0,
            Some(DirectiveKind::Triangle) => 1,
            Some(DirectiveKind::Quadrilateral) => 2,
            Some(DirectiveKind::ConditionalLine) => {
                document.prune_child(step, child);
                continue;
            }
            _ => 3,
        };
        groups[slot].push(child);
    }

    let filled: Vec<(StepFlavor, Vec<NodeId>)> = FLAVORS
        .into_iter()
        .zip(groups)
        .filter(|(_, children)| !children.is_empty())
        .collect();

    let mut new_steps = Vec::with_capacity(filled.len());
    let count = filled.len();
    for (index, (flavor, children)) in filled.into_iter().enumerate() {
        // The original step node ends the model and keeps its rotation.
        let node = if index + 1 == count {
            step
        } else {
            document.create_detached(Directive::Step(Default::default()))
        };
        if let Some(Directive::Step(data)) = document.get_mut(node) {
            data.flavor = flavor;
            data.rotation = if node == step {
                rotation
            } else {
                Default::default()
            };
        }
        document.replace_children(node, children);
        new_steps.push(node);
    }
    if !new_steps.is_empty() {
        document.replace_children(model, new_steps);
    }

    document.invalidate_bounds();
    let bounds = document.bounds_with(model, library, stack);
    document.set_cached_bounds(model, bounds);

    let steps = document.children(model).len();
    log::debug!("optimizer regrouped a model into {steps} step(s)");
    OptimizeOutcome::Optimized { steps }
}
