/// Piece counts and statistics for a model
use std::collections::{BTreeMap, HashSet};

use nalgebra::Vector3;

use crate::color::ColorCode;
use crate::directive::{Directive, DirectiveKind};
use crate::document::{Document, NodeId};
use crate::library::{PartLibrary, Resolution};

pub const LDU_PER_STUD: f64 = 20.0;
pub const CENTIMETERS_PER_LDU: f64 = 0.04;
pub const CENTIMETERS_PER_INCH: f64 = 2.54;

#[derive(Debug, Clone, PartialEq)]
pub struct PieceCount {
    pub reference_name: String,
    /// Name as written at the first placement seen.
    pub display_name: String,
    pub color: ColorCode,
    pub color_name: String,
    /// Catalog description; empty for parts the library does not know.
    pub description: String,
    pub count: usize,
}

/// Size of a model's bounding box, in LDraw units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub size: Vector3<f64>,
}

impl Dimensions {
    pub fn width(&self) -> f64 {
        self.size.x
    }

    pub fn height(&self) -> f64 {
        self.size.y
    }

    pub fn depth(&self) -> f64 {
        self.size.z
    }

    pub fn in_studs(&self) -> Vector3<f64> {
        self.size / LDU_PER_STUD
    }

    pub fn in_centimeters(&self) -> Vector3<f64> {
        self.size * CENTIMETERS_PER_LDU
    }

    pub fn in_inches(&self) -> Vector3<f64> {
        self.in_centimeters() / CENTIMETERS_PER_INCH
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartReport {
    /// Sorted by reference name, then color.
    pub pieces: Vec<PieceCount>,
    pub total_pieces: usize,
    /// Distinct models visited, including the starting one.
    pub models: usize,
    pub steps: usize,
    /// Lines, triangles, quads and conditional lines in the visited models.
    pub primitives: usize,
    /// Placements that resolve to nothing.
    pub unresolved: usize,
    pub dimensions: Dimensions,
}

impl PartReport {
    /// Count the pieces of `model`. A file reports on its active model.
    pub fn collect(document: &Document, model: NodeId, library: &PartLibrary) -> Self {
        let model = match document.get(model) {
            Some(Directive::File(_)) => document.active_model(),
            _ => model,
        };
        let mut walk = Walk {
            document,
            library,
            pieces: BTreeMap::new(),
            visited: HashSet::new(),
            stack: Vec::new(),
            unresolved: 0,
        };
        walk.visit(model, ColorCode::Current);

        let mut steps = 0;
        let mut primitives = 0;
        for visited in &walk.visited {
            steps += document.children(*visited).len();
            primitives += document
                .descendants(*visited)
                .filter(|id| is_primitive(document.kind(*id)))
                .count();
        }

        let pieces: Vec<PieceCount> = walk.pieces.into_values().collect();
        Self {
            total_pieces: pieces.iter().map(|piece| piece.count).sum(),
            models: walk.visited.len(),
            steps,
            primitives,
            unresolved: walk.unresolved,
            dimensions: Dimensions {
                size: document.bounds(model, library).size(),
            },
            pieces,
        }
    }
}

fn is_primitive(kind: Option<DirectiveKind>) -> bool {
    matches!(
        kind,
        Some(
            DirectiveKind::Line
                | DirectiveKind::Triangle
                | DirectiveKind::Quadrilateral
                | DirectiveKind::ConditionalLine
        )
    )
}

struct Walk<'a> {
    document: &'a Document,
    library: &'a PartLibrary,
    pieces: BTreeMap<(String, ColorCode), PieceCount>,
    visited: HashSet<NodeId>,
    stack: Vec<NodeId>,
    unresolved: usize,
}

impl Walk<'_> {
    fn visit(&mut self, model: NodeId, inherited: ColorCode) {
        self.visited.insert(model);
        self.stack.push(model);
        let parts: Vec<NodeId> = self.document.parts(model).collect();
        for id in parts {
            let Some(part) = self.document.part(id) else {
                continue;
            };
            let color = part.color.resolve(inherited);
            match self.library.resolve_part(self.document, id) {
                Resolution::Submodel(target) => {
                    if self.stack.contains(&target) {
                        log::warn!("{} is placed inside itself, skipped", part.display_name());
                        continue;
                    }
                    self.visit(target, color);
                }
                resolution => {
                    if !resolution.is_resolved() {
                        self.unresolved += 1;
                    }
                    self.count(id, color);
                }
            }
        }
        self.stack.pop();
    }

    fn count(&mut self, id: NodeId, color: ColorCode) {
        let Some(part) = self.document.part(id) else {
            return;
        };
        let key = (part.reference_name().to_string(), color);
        if let Some(piece) = self.pieces.get_mut(&key) {
            piece.count += 1;
            return;
        }
        let piece = PieceCount {
            reference_name: key.0.clone(),
            display_name: part.display_name().to_string(),
            color,
            color_name: self.library.colors().name_for(color),
            description: self.library.description(&key.0).unwrap_or_default(),
            count: 1,
        };
        self.pieces.insert(key, piece);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CAR: &str = "0 FILE car.ldr\n0 Car\n\
                       1 16 0 0 0 1 0 0 0 1 0 0 0 1 wheel.ldr\n\
                       1 16 40 0 0 1 0 0 0 1 0 0 0 1 wheel.ldr\n\
                       0 STEP\n\
                       1 4 0 -8 0 1 0 0 0 1 0 0 0 1 3020.dat\n\
                       0 NOFILE\n\
                       0 FILE wheel.ldr\n0 Wheel\n\
                       1 0 0 0 0 1 0 0 0 1 0 0 0 1 3641.dat\n\
                       1 16 0 0 0 1 0 0 0 1 0 0 0 1 4624.dat\n\
                       2 24 0 0 0 1 0 0\n\
                       0 NOFILE\n";

    #[test]
    fn test_counts_expand_submodels() {
        let document = Document::parse(CAR);
        let car = document.find_model("car.ldr").unwrap();
        let report = PartReport::collect(&document, car, &PartLibrary::empty());

        assert_eq!(report.total_pieces, 5);
        assert_eq!(report.models, 2);
        assert_eq!(report.steps, 3);
        assert_eq!(report.primitives, 1);
        assert_eq!(report.unresolved, 5);

        let summary: Vec<_> = report
            .pieces
            .iter()
            .map(|piece| (piece.reference_name.as_str(), piece.color, piece.count))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("3020.dat", ColorCode::Palette(4), 1),
                ("3641.dat", ColorCode::Palette(0), 2),
                ("4624.dat", ColorCode::Current, 2),
            ]
        );
        assert_eq!(report.pieces[1].color_name, "Black");
    }

    #[test]
    fn test_inherited_color_reaches_submodel_pieces() {
        let document = Document::parse(&CAR.replace(
            "1 16 40 0 0 1 0 0 0 1 0 0 0 1 wheel.ldr",
            "1 15 40 0 0 1 0 0 0 1 0 0 0 1 wheel.ldr",
        ));
        let report = PartReport::collect(&document, document.root(), &PartLibrary::empty());
        let hubs: Vec<_> = report
            .pieces
            .iter()
            .filter(|piece| piece.reference_name == "4624.dat")
            .map(|piece| piece.color)
            .collect();
        assert_eq!(hubs, vec![ColorCode::Current, ColorCode::Palette(15)]);
    }

    #[test]
    fn test_dimensions() {
        let dimensions = Dimensions {
            size: Vector3::new(40.0, 24.0, 80.0),
        };
        assert_abs_diff_eq!(dimensions.in_studs(), Vector3::new(2.0, 1.2, 4.0), epsilon = 1e-12);
        assert_abs_diff_eq!(dimensions.in_centimeters().x, 1.6, epsilon = 1e-12);
        assert_abs_diff_eq!(dimensions.in_inches().z, 3.2 / 2.54, epsilon = 1e-12);
    }
}
