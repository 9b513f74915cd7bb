/// LDraw line parser and document assembly
///
/// [`parse_line`] turns one line into a directive. [`parse_document`] splits
/// a file into models (one per `0 FILE` section in a multi-part document),
/// reads each model's header and groups the remaining directives into steps.
/// A bad line is skipped with a diagnostic and never stops the parse.
use std::fmt;
use std::path::Path;

use nalgebra::Point3;
use nom::{
    bytes::complete::take_till1,
    character::complete::space0,
    combinator::{map_res, verify},
    sequence::preceded,
    IResult,
};

use crate::color::{ColorCode, ColorDefinition, EdgeColor, Rgb};
use crate::directive::{
    Comment, CommentMarker, ConditionalLine, Directive, LDrawFile, Line, MetaCommand, Model,
    OrgHeader, Part, Quadrilateral, Step, StepRotation, Triangle,
};
use crate::document::{Document, NodeId};
use crate::error::ParseError;
use crate::transform::{RotationAngles, Transform};

/// What became of one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Directive(Directive),
    /// Empty or whitespace-only line.
    Blank,
    /// Malformed line; the parse continues without it.
    Skipped(ParseError),
}

/// A skipped line and why.
#[derive(Debug, Clone, PartialEq)]
pub struct LineDiagnostic {
    /// 1-based line number in the input.
    pub line: usize,
    pub text: String,
    pub error: ParseError,
}

impl fmt::Display for LineDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.error, self.text)
    }
}

/// A parsed document and the lines that were skipped.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub document: Document,
    pub diagnostics: Vec<LineDiagnostic>,
}

/// Parse one logical line.
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Blank;
    }
    match parse_directive(line) {
        Ok(directive) => LineOutcome::Directive(directive),
        Err(error) => LineOutcome::Skipped(error),
    }
}

fn parse_directive(line: &str) -> Result<Directive, ParseError> {
    let (rest, code) = token(line).map_err(|_| ParseError::MissingLineType)?;
    match code {
        "0" => parse_meta(rest.trim_start()),
        "1" => parse_part(rest),
        "2" => parse_line_primitive(rest),
        "3" => parse_triangle(rest),
        "4" => parse_quadrilateral(rest),
        "5" => parse_conditional_line(rest),
        other => Err(ParseError::UnknownLineType(other.to_string())),
    }
}

/// Next whitespace-delimited word.
fn token(input: &str) -> IResult<&str, &str> {
    preceded(space0, take_till1(char::is_whitespace))(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    verify(map_res(token, str::parse::<f64>), |value: &f64| value.is_finite())(input)
}

fn numbers<'a, const N: usize>(
    kind: &'static str,
    mut input: &'a str,
) -> Result<(&'a str, [f64; N]), ParseError> {
    let mut values = [0.0; N];
    for (index, slot) in values.iter_mut().enumerate() {
        let (rest, value) = number(input).map_err(|_| {
            ParseError::malformed(kind, format!("expected {N} numbers, field {} is invalid", index + 1))
        })?;
        *slot = value;
        input = rest;
    }
    Ok((input, values))
}

fn color_field<'a>(kind: &'static str, input: &'a str) -> Result<(&'a str, ColorCode), ParseError> {
    let (rest, text) = token(input).map_err(|_| ParseError::malformed(kind, "missing color"))?;
    Ok((rest, text.parse()?))
}

fn points<const N: usize>(values: &[f64]) -> [Point3<f64>; N] {
    std::array::from_fn(|i| Point3::new(values[i * 3], values[i * 3 + 1], values[i * 3 + 2]))
}

fn parse_part(input: &str) -> Result<Directive, ParseError> {
    let (input, color) = color_field("part", input)?;
    let (input, fields) = numbers::<12>("part", input)?;
    let name = input.trim();
    if name.is_empty() {
        return Err(ParseError::malformed("part", "missing part name"));
    }
    Ok(Directive::Part(Part::new(
        name,
        color,
        Transform::from_ldraw_fields(&fields),
    )))
}

fn parse_line_primitive(input: &str) -> Result<Directive, ParseError> {
    let (input, color) = color_field("line", input)?;
    let (_, values) = numbers::<6>("line", input)?;
    Ok(Directive::Line(Line {
        color,
        vertices: points(&values),
    }))
}

fn parse_triangle(input: &str) -> Result<Directive, ParseError> {
    let (input, color) = color_field("triangle", input)?;
    let (_, values) = numbers::<9>("triangle", input)?;
    Ok(Directive::Triangle(Triangle {
        color,
        vertices: points(&values),
    }))
}

fn parse_quadrilateral(input: &str) -> Result<Directive, ParseError> {
    let (input, color) = color_field("quadrilateral", input)?;
    let (_, values) = numbers::<12>("quadrilateral", input)?;
    Ok(Directive::Quadrilateral(Quadrilateral {
        color,
        vertices: points(&values),
    }))
}

fn parse_conditional_line(input: &str) -> Result<Directive, ParseError> {
    let (input, color) = color_field("conditional line", input)?;
    let (_, values) = numbers::<12>("conditional line", input)?;
    Ok(Directive::ConditionalLine(ConditionalLine {
        color,
        vertices: points(&values[..6]),
        controls: points(&values[6..]),
    }))
}

/// Type 0 lines, keywords matched in priority order.
fn parse_meta(text: &str) -> Result<Directive, ParseError> {
    let text = text.trim_end();

    if let Some(comment) = text.strip_prefix("//") {
        return Ok(Directive::Comment(Comment {
            marker: CommentMarker::Slashes,
            text: comment.trim_start().to_string(),
        }));
    }

    let Ok((rest, keyword)) = token(text) else {
        return Ok(Directive::UnknownMetaCommand(MetaCommand {
            text: String::new(),
        }));
    };

    match keyword.to_ascii_uppercase().as_str() {
        "WRITE" | "PRINT" => {
            let marker = if keyword.eq_ignore_ascii_case("WRITE") {
                CommentMarker::Write
            } else {
                CommentMarker::Print
            };
            Ok(Directive::Comment(Comment {
                marker,
                text: rest.trim_start().to_string(),
            }))
        }
        "!COLOUR" => parse_color_definition(rest).map(Directive::ColorDefinition),
        "STEP" => Ok(Directive::Step(Step::new())),
        "ROTSTEP" => parse_rotstep(rest).map(|rotation| Directive::Step(Step::with_rotation(rotation))),
        _ => Ok(Directive::UnknownMetaCommand(MetaCommand {
            text: text.to_string(),
        })),
    }
}

/// `ROTSTEP x y z [REL|ABS|ADD]` or `ROTSTEP END`.
fn parse_rotstep(input: &str) -> Result<StepRotation, ParseError> {
    if input.trim().eq_ignore_ascii_case("END") {
        return Ok(StepRotation::End);
    }
    let (rest, [x, y, z]) = numbers::<3>("ROTSTEP", input)?;
    let angles = RotationAngles::new(x, y, z);
    match token(rest).map(|(_, kind)| kind.to_ascii_uppercase()) {
        Err(_) => Ok(StepRotation::Relative(angles)),
        Ok(kind) => match kind.as_str() {
            "REL" => Ok(StepRotation::Relative(angles)),
            "ABS" => Ok(StepRotation::Absolute(angles)),
            "ADD" => Ok(StepRotation::Additive(angles)),
            other => Err(ParseError::malformed(
                "ROTSTEP",
                format!("unknown rotation type '{other}'"),
            )),
        },
    }
}

/// `!COLOUR name CODE n VALUE v EDGE e [ALPHA a] [LUMINANCE l] [finish...]`
fn parse_color_definition(input: &str) -> Result<ColorDefinition, ParseError> {
    const KIND: &str = "!COLOUR";
    let missing = |what: &str| ParseError::malformed(KIND, format!("missing {what}"));

    let (mut input, name) = token(input).map_err(|_| missing("name"))?;
    let mut code = None;
    let mut value = None;
    let mut edge = None;
    let mut alpha = None;
    let mut luminance = None;
    let mut finish = None;

    while let Ok((rest, keyword)) = token(input) {
        let upper = keyword.to_ascii_uppercase();
        if !matches!(upper.as_str(), "CODE" | "VALUE" | "EDGE" | "ALPHA" | "LUMINANCE") {
            finish = Some(input.trim().to_string());
            break;
        }
        let (rest, argument) = token(rest).map_err(|_| missing(keyword))?;
        let invalid = || ParseError::malformed(KIND, format!("invalid {keyword} '{argument}'"));
        match upper.as_str() {
            "CODE" => code = Some(argument.parse::<u32>().map_err(|_| invalid())?),
            "VALUE" => value = Some(argument.parse::<Rgb>()?),
            "EDGE" => {
                edge = Some(match argument.parse::<u32>() {
                    Ok(edge_code) => EdgeColor::Code(edge_code),
                    Err(_) => EdgeColor::Rgb(argument.parse::<Rgb>()?),
                })
            }
            "ALPHA" => alpha = Some(argument.parse::<u8>().map_err(|_| invalid())?),
            _ => luminance = Some(argument.parse::<u8>().map_err(|_| invalid())?),
        }
        input = rest;
    }

    Ok(ColorDefinition {
        name: name.to_string(),
        code: code.ok_or_else(|| missing("CODE"))?,
        value: value.ok_or_else(|| missing("VALUE"))?,
        edge: edge.ok_or_else(|| missing("EDGE"))?,
        alpha,
        luminance,
        finish,
    })
}

/// Header fields recognized at the top of a model.
enum HeaderField {
    Name(String),
    Author(String),
    Org(OrgHeader),
    Category(String),
}

fn header_field(text: &str) -> Option<HeaderField> {
    let value = |prefix_len: usize| text[prefix_len..].trim().to_string();
    let upper = text.to_ascii_uppercase();
    if upper.starts_with("NAME:") {
        Some(HeaderField::Name(value(5)))
    } else if upper.starts_with("AUTHOR:") {
        Some(HeaderField::Author(value(7)))
    } else if upper.starts_with("!CATEGORY ") {
        Some(HeaderField::Category(value(10)))
    } else if upper.starts_with("!LDRAW_ORG")
        || upper.starts_with("LDRAW_ORG")
        || upper.starts_with("UNOFFICIAL MODEL")
        || upper.starts_with("UN-OFFICIAL MODEL")
    {
        Some(HeaderField::Org(OrgHeader {
            raw: text.to_string(),
        }))
    } else {
        None
    }
}

/// `0 FILE name` returns the name.
fn mpd_file_name(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix('0')?;
    let rest = rest.trim_start();
    let (keyword, name) = rest.split_at(rest.find(char::is_whitespace)?);
    keyword.eq_ignore_ascii_case("FILE").then(|| name.trim())
}

fn is_nofile(line: &str) -> bool {
    let mut words = line.split_whitespace();
    words.next() == Some("0")
        && words.next().is_some_and(|w| w.eq_ignore_ascii_case("NOFILE"))
        && words.next().is_none()
}

struct Section<'a> {
    mpd_name: Option<String>,
    lines: Vec<(usize, &'a str)>,
}

/// Split the file into model sections.
fn split_sections<'a>(
    lines: &[(usize, &'a str)],
    diagnostics: &mut Vec<LineDiagnostic>,
) -> (bool, Vec<Section<'a>>) {
    let first = lines.iter().find(|(_, line)| !line.trim().is_empty());
    let is_mpd = first.is_some_and(|(_, line)| mpd_file_name(line).is_some());
    if !is_mpd {
        return (
            false,
            vec![Section {
                mpd_name: None,
                lines: lines.to_vec(),
            }],
        );
    }

    let mut sections: Vec<Section<'a>> = Vec::new();
    let mut open = false;
    for &(number, line) in lines {
        if let Some(name) = mpd_file_name(line) {
            sections.push(Section {
                mpd_name: Some(name.to_string()),
                lines: Vec::new(),
            });
            open = true;
        } else if is_nofile(line) {
            open = false;
        } else if open {
            if let Some(section) = sections.last_mut() {
                section.lines.push((number, line));
            }
        } else if !line.trim().is_empty() {
            log::warn!("line {number}: outside any model, ignored: {line}");
            diagnostics.push(LineDiagnostic {
                line: number,
                text: line.to_string(),
                error: ParseError::malformed("model", "line outside any 0 FILE section"),
            });
        }
    }
    (true, sections)
}

/// Fill one model node from its section.
fn build_model(
    document: &mut Document,
    model_id: NodeId,
    section: &Section<'_>,
    diagnostics: &mut Vec<LineDiagnostic>,
) {
    let mut step_id = document.push_child(model_id, Directive::Step(Step::new()));
    let mut in_header = true;
    let mut first_line = true;

    for &(number, line) in &section.lines {
        let directive = match parse_line(line) {
            LineOutcome::Blank => continue,
            LineOutcome::Skipped(error) => {
                log::warn!("line {number}: skipped, {error}");
                diagnostics.push(LineDiagnostic {
                    line: number,
                    text: line.trim().to_string(),
                    error,
                });
                first_line = false;
                continue;
            }
            LineOutcome::Directive(directive) => directive,
        };

        if in_header {
            if let Directive::UnknownMetaCommand(meta) = &directive {
                if let Some(model) = document.model_mut(model_id) {
                    match header_field(&meta.text) {
                        Some(HeaderField::Name(name)) => {
                            model.file_name = Some(name);
                            first_line = false;
                            continue;
                        }
                        Some(HeaderField::Author(author)) => {
                            model.author = Some(author);
                            first_line = false;
                            continue;
                        }
                        Some(HeaderField::Org(org)) => {
                            model.org = Some(org);
                            first_line = false;
                            continue;
                        }
                        Some(HeaderField::Category(category)) => {
                            model.category = Some(category);
                            first_line = false;
                            continue;
                        }
                        None if first_line => {
                            model.description = meta.text.clone();
                            first_line = false;
                            continue;
                        }
                        None => {}
                    }
                }
            }
        }
        first_line = false;

        match directive {
            Directive::Step(step) => {
                in_header = false;
                if let Some(Directive::Step(current)) = document.get_mut(step_id) {
                    current.rotation = step.rotation;
                }
                step_id = document.push_child(model_id, Directive::Step(Step::new()));
            }
            Directive::Comment(_) | Directive::UnknownMetaCommand(_) => {
                document.push_child(step_id, directive);
            }
            other => {
                in_header = false;
                document.push_child(step_id, other);
            }
        }
    }

    // A terminating STEP leaves an empty step behind.
    let steps = document.children(model_id).len();
    if steps > 1 && document.children(step_id).is_empty() {
        document.prune_child(model_id, step_id);
    }

    if let Some(model) = document.model_mut(model_id) {
        if model.description.is_empty() {
            if let Some(name) = &model.mpd_name {
                model.description = name.clone();
            }
        }
    }
}

/// Parse a whole LDraw or MPD file.
pub fn parse_document(text: &str) -> ParseOutput {
    let lines: Vec<(usize, &str)> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .collect();

    let mut diagnostics = Vec::new();
    let (is_mpd, mut sections) = split_sections(&lines, &mut diagnostics);
    if sections.is_empty() {
        sections.push(Section {
            mpd_name: None,
            lines: Vec::new(),
        });
    }

    let mut document = Document::with_root(LDrawFile {
        path: None,
        active_model: None,
        is_mpd,
    });
    let root = document.root();
    for section in &sections {
        let model = Model {
            mpd_name: section.mpd_name.clone(),
            ..Model::default()
        };
        let model_id = document.push_child(root, Directive::Model(model));
        build_model(&mut document, model_id, section, &mut diagnostics);
    }

    ParseOutput {
        document,
        diagnostics,
    }
}

/// Read and parse a file from disk. Invalid UTF-8 is replaced, not rejected.
pub fn parse_file(path: impl AsRef<Path>) -> std::io::Result<ParseOutput> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let mut output = parse_document(&String::from_utf8_lossy(&bytes));
    output.document.set_path(path.to_path_buf());
    if !output.diagnostics.is_empty() {
        log::warn!(
            "{}: {} line(s) skipped",
            path.display(),
            output.diagnostics.len()
        );
    }
    Ok(output)
}
