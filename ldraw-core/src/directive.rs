/// The closed set of LDraw directives
use std::fmt;
use std::path::PathBuf;

use nalgebra::{Matrix4, Point3};

use crate::catalog::{category_for_description, moved_target};
use crate::color::{ColorCode, ColorDefinition};
use crate::document::NodeId;
use crate::geometry::Box3;
use crate::transform::{RotationAngles, Transform, TransformComponents};

/// Case-fold a part or model name and use `/` as the path separator.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace('\\', "/")
}

/// Discriminant of [`Directive`], used in rejections and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirectiveKind {
    File,
    Model,
    Step,
    Part,
    Line,
    Triangle,
    Quadrilateral,
    ConditionalLine,
    Comment,
    ColorDefinition,
    UnknownMetaCommand,
}

impl DirectiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Model => "model",
            Self::Step => "step",
            Self::Part => "part",
            Self::Line => "line",
            Self::Triangle => "triangle",
            Self::Quadrilateral => "quadrilateral",
            Self::ConditionalLine => "conditional line",
            Self::Comment => "comment",
            Self::ColorDefinition => "color definition",
            Self::UnknownMetaCommand => "meta-command",
        }
    }

    /// Kinds that may sit directly inside a step.
    pub fn is_element(&self) -> bool {
        !matches!(self, Self::File | Self::Model | Self::Step)
    }

    /// Whether a node of this kind may own a child of `child` kind.
    pub fn accepts(&self, child: DirectiveKind) -> bool {
        match self {
            Self::File => child == Self::Model,
            Self::Model => child == Self::Step,
            Self::Step => child.is_element(),
            _ => false,
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    File(LDrawFile),
    Model(Model),
    Step(Step),
    Part(Part),
    Line(Line),
    Triangle(Triangle),
    Quadrilateral(Quadrilateral),
    ConditionalLine(ConditionalLine),
    Comment(Comment),
    ColorDefinition(ColorDefinition),
    UnknownMetaCommand(MetaCommand),
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::File(_) => DirectiveKind::File,
            Self::Model(_) => DirectiveKind::Model,
            Self::Step(_) => DirectiveKind::Step,
            Self::Part(_) => DirectiveKind::Part,
            Self::Line(_) => DirectiveKind::Line,
            Self::Triangle(_) => DirectiveKind::Triangle,
            Self::Quadrilateral(_) => DirectiveKind::Quadrilateral,
            Self::ConditionalLine(_) => DirectiveKind::ConditionalLine,
            Self::Comment(_) => DirectiveKind::Comment,
            Self::ColorDefinition(_) => DirectiveKind::ColorDefinition,
            Self::UnknownMetaCommand(_) => DirectiveKind::UnknownMetaCommand,
        }
    }

    pub fn color(&self) -> Option<ColorCode> {
        match self {
            Self::Part(part) => Some(part.color),
            Self::Line(line) => Some(line.color),
            Self::Triangle(triangle) => Some(triangle.color),
            Self::Quadrilateral(quad) => Some(quad.color),
            Self::ConditionalLine(line) => Some(line.color),
            _ => None,
        }
    }

    /// Returns the previous color, or `None` if this kind has no color.
    pub(crate) fn replace_color(&mut self, color: ColorCode) -> Option<ColorCode> {
        let slot = match self {
            Self::Part(part) => &mut part.color,
            Self::Line(line) => &mut line.color,
            Self::Triangle(triangle) => &mut triangle.color,
            Self::Quadrilateral(quad) => &mut quad.color,
            Self::ConditionalLine(line) => &mut line.color,
            _ => return None,
        };
        Some(std::mem::replace(slot, color))
    }

    /// Bounds of the directive's own vertices.
    ///
    /// Parts and containers have no vertices of their own; their bounds come
    /// from [`Document::bounds`](crate::Document::bounds). Conditional line
    /// control points are never drawn and do not count.
    pub fn vertex_bounds(&self) -> Option<Box3> {
        let points: &[Point3<f64>] = match self {
            Self::Line(line) => &line.vertices,
            Self::Triangle(triangle) => &triangle.vertices,
            Self::Quadrilateral(quad) => &quad.vertices,
            Self::ConditionalLine(line) => &line.vertices,
            _ => return None,
        };
        Some(Box3::from_points(points))
    }

    pub fn as_part(&self) -> Option<&Part> {
        match self {
            Self::Part(part) => Some(part),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Self::Model(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Self::Step(step) => Some(step),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&LDrawFile> {
        match self {
            Self::File(file) => Some(file),
            _ => None,
        }
    }
}

/// Root of a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LDrawFile {
    pub path: Option<PathBuf>,
    /// Model shown and edited by default; the first model when unset.
    pub active_model: Option<NodeId>,
    /// Written with `0 FILE` / `0 NOFILE` framing.
    pub is_mpd: bool,
}

/// `!LDRAW_ORG`, `LDRAW_ORG` or `Unofficial Model` header, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgHeader {
    /// Text after the leading `0 `.
    pub raw: String,
}

impl OrgHeader {
    pub fn is_official(&self) -> bool {
        let upper = self.raw.to_uppercase();
        upper.contains("LDRAW_ORG") && !upper.contains("UNOFFICIAL")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    /// First line of the model.
    pub description: String,
    /// Name from the `0 FILE` line of a multi-part document.
    pub mpd_name: Option<String>,
    /// `0 Name:` header.
    pub file_name: Option<String>,
    /// `0 Author:` header.
    pub author: Option<String>,
    pub org: Option<OrgHeader>,
    /// `0 !CATEGORY` header.
    pub category: Option<String>,
    /// Highest step index drawn; all steps when unset.
    pub step_display_limit: Option<usize>,
    pub(crate) cached_bounds: Option<Box3>,
}

impl Model {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Submodel named `name` in a multi-part document.
    pub fn submodel(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            mpd_name: Some(name),
            ..Self::default()
        }
    }

    /// Name parts use to reference this model.
    pub fn name(&self) -> Option<&str> {
        self.mpd_name.as_deref().or(self.file_name.as_deref())
    }

    pub fn reference_name(&self) -> Option<String> {
        self.name().map(normalize_name)
    }

    pub fn category(&self) -> String {
        self.category
            .clone()
            .unwrap_or_else(|| category_for_description(&self.description))
    }

    pub fn is_official(&self) -> bool {
        self.org.as_ref().is_some_and(OrgHeader::is_official)
    }

    /// Replacement part name for a `~Moved to` stub.
    pub fn moved_to(&self) -> Option<String> {
        moved_target(&self.description)
    }

    /// Bounds recorded by the step optimizer, cleared by any edit.
    pub fn cached_bounds(&self) -> Option<Box3> {
        self.cached_bounds
    }
}

/// Presentation rotation of a step, from `0 ROTSTEP`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum StepRotation {
    #[default]
    None,
    Relative(RotationAngles),
    Absolute(RotationAngles),
    Additive(RotationAngles),
    /// `0 ROTSTEP END`: return to the default view.
    End,
}

impl StepRotation {
    pub fn angles(&self) -> Option<RotationAngles> {
        match self {
            Self::Relative(angles) | Self::Absolute(angles) | Self::Additive(angles) => Some(*angles),
            Self::None | Self::End => None,
        }
    }
}

/// What an optimized step holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepFlavor {
    #[default]
    Mixed,
    Lines,
    Triangles,
    Quadrilaterals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Step {
    pub rotation: StepRotation,
    pub flavor: StepFlavor,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rotation(rotation: StepRotation) -> Self {
        Self {
            rotation,
            flavor: StepFlavor::Mixed,
        }
    }
}

/// Type 1 line: another model placed with a transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    display_name: String,
    reference_name: String,
    pub color: ColorCode,
    /// Always affine; see [`Transform::force_affine`].
    pub transform: Matrix4<f64>,
}

impl Part {
    pub fn new(display_name: impl Into<String>, color: ColorCode, transform: Matrix4<f64>) -> Self {
        let display_name = display_name.into();
        let mut transform = transform;
        Transform::force_affine(&mut transform);
        Self {
            reference_name: normalize_name(&display_name),
            display_name,
            color,
            transform,
        }
    }

    /// Name as written in the file.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Lookup key: case-folded with `/` separators.
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub(crate) fn set_display_name(&mut self, name: impl Into<String>) -> String {
        let name = name.into();
        self.reference_name = normalize_name(&name);
        std::mem::replace(&mut self.display_name, name)
    }

    pub fn components(&self) -> TransformComponents {
        Transform::decompose(&self.transform)
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::new(self.transform[(0, 3)], self.transform[(1, 3)], self.transform[(2, 3)])
    }
}

/// Type 2 line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub color: ColorCode,
    pub vertices: [Point3<f64>; 2],
}

/// Type 3 line.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub color: ColorCode,
    pub vertices: [Point3<f64>; 3],
}

/// Type 4 line.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrilateral {
    pub color: ColorCode,
    pub vertices: [Point3<f64>; 4],
}

/// Type 5 line: drawn only when both control points fall on the same side.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalLine {
    pub color: ColorCode,
    pub vertices: [Point3<f64>; 2],
    pub controls: [Point3<f64>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentMarker {
    /// `0 // text`
    Slashes,
    /// `0 WRITE text`
    Write,
    /// `0 PRINT text`
    Print,
}

impl CommentMarker {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Slashes => "//",
            Self::Write => "WRITE",
            Self::Print => "PRINT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub marker: CommentMarker,
    pub text: String,
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            marker: CommentMarker::Slashes,
            text: text.into(),
        }
    }
}

/// Any `0` line the parser does not understand, preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaCommand {
    /// Everything after `0 `.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("S\\3001S01.DAT"), "s/3001s01.dat");
        assert_eq!(normalize_name(" Main Model.ldr "), "main model.ldr");
    }

    #[test]
    fn test_part_names() {
        let mut part = Part::new("3001.DAT", ColorCode::Current, Matrix4::identity());
        assert_eq!(part.display_name(), "3001.DAT");
        assert_eq!(part.reference_name(), "3001.dat");

        let old = part.set_display_name("s\\3001s01.dat");
        assert_eq!(old, "3001.DAT");
        assert_eq!(part.reference_name(), "s/3001s01.dat");
    }

    #[test]
    fn test_part_transform_forced_affine() {
        let mut matrix = Matrix4::identity();
        matrix[(3, 0)] = 5.0;
        matrix[(3, 3)] = 2.0;
        let part = Part::new("3001.dat", ColorCode::Current, matrix);
        assert_eq!(part.transform, Matrix4::identity());
    }

    #[test]
    fn test_containment_rules() {
        assert!(DirectiveKind::File.accepts(DirectiveKind::Model));
        assert!(DirectiveKind::Step.accepts(DirectiveKind::Part));
        assert!(!DirectiveKind::Step.accepts(DirectiveKind::Step));
        assert!(!DirectiveKind::Part.accepts(DirectiveKind::Line));
    }

    #[test]
    fn test_model_category_and_official() {
        let mut model = Model::new("Brick  2 x  4");
        assert_eq!(model.category(), "Brick");
        assert!(!model.is_official());

        model.org = Some(OrgHeader {
            raw: "!LDRAW_ORG Part UPDATE 2004-01".to_string(),
        });
        assert!(model.is_official());

        model.category = Some("Technic".to_string());
        assert_eq!(model.category(), "Technic");
    }
}
