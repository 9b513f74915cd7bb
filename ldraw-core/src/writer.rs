/// LDraw text output
///
/// Each directive writes as one line (containers write their children
/// first, then any terminator). Reading the output back gives an equivalent
/// tree.
use crate::color::ColorDefinition;
use crate::config::FormatConfig;
use crate::directive::{Directive, Model, StepRotation};
use crate::document::{Document, NodeId};
use crate::transform::{RotationAngles, Transform};

/// Format one number the way the config asks.
///
/// With zero trimming on, `1.500000` becomes `1.5`, `20.000000` becomes
/// `20` and negative zero becomes `0`.
pub fn format_number(value: f64, config: &FormatConfig) -> String {
    let mut text = format!("{:.*}", config.precision, value);
    if config.trim_zeros && text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.');
        text = trimmed.to_string();
    }
    if let Some(unsigned) = text.strip_prefix('-') {
        if unsigned.chars().all(|c| c == '0' || c == '.') {
            text = unsigned.to_string();
        }
    }
    if text.len() < config.float_width {
        text = format!("{:>width$}", text, width = config.float_width);
    }
    text
}

fn numbers(values: &[f64], config: &FormatConfig) -> String {
    values
        .iter()
        .map(|value| format_number(*value, config))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of a subtree, one line per directive.
pub fn write_node(document: &Document, id: NodeId, config: &FormatConfig) -> String {
    let mut lines = Vec::new();
    collect_lines(document, id, config, &mut lines);
    let mut out = String::new();
    for line in lines {
        out.push_str(&line);
        out.push_str(&config.line_ending);
    }
    out
}

fn collect_lines(document: &Document, id: NodeId, config: &FormatConfig, lines: &mut Vec<String>) {
    let Some(directive) = document.get(id) else {
        return;
    };
    match directive {
        Directive::File(file) => {
            let models = document.models();
            let framed = file.is_mpd || models.len() > 1;
            for model_id in models {
                if framed {
                    let name = document.model(*model_id).map(frame_name).unwrap_or_default();
                    lines.push(format!("0 FILE {name}"));
                }
                collect_lines(document, *model_id, config, lines);
                if framed {
                    lines.push("0 NOFILE".to_string());
                }
            }
        }
        Directive::Model(model) => {
            let header = header_lines(model);
            if header.is_empty() && opens_with_meta(document, id) {
                // a blank description keeps the first meta line out of the header
                lines.push("0".to_string());
            }
            lines.extend(header);
            let steps = document.children(id);
            for (index, step_id) in steps.iter().enumerate() {
                let children = document.children(*step_id);
                for child in children {
                    collect_lines(document, *child, config, lines);
                }
                let Some(step) = document.step(*step_id) else {
                    continue;
                };
                let last = index + 1 == steps.len();
                let empty_tail = last && steps.len() > 1 && children.is_empty();
                if !last || empty_tail || step.rotation != StepRotation::None {
                    lines.push(step_terminator(&step.rotation, config));
                }
            }
        }
        Directive::Step(step) => {
            for child in document.children(id) {
                collect_lines(document, *child, config, lines);
            }
            lines.push(step_terminator(&step.rotation, config));
        }
        other => lines.push(write_directive(other, config)),
    }
}

fn frame_name(model: &Model) -> String {
    model
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| model.description.clone())
}

/// Whether the model's first written line would be an unrecognized `0` line.
fn opens_with_meta(document: &Document, model: NodeId) -> bool {
    let first = document
        .children(model)
        .first()
        .and_then(|step| document.children(*step).first());
    matches!(
        first.and_then(|id| document.get(*id)),
        Some(Directive::UnknownMetaCommand(_))
    )
}

fn header_lines(model: &Model) -> Vec<String> {
    let mut lines = Vec::new();
    if !model.description.is_empty() {
        lines.push(format!("0 {}", model.description));
    }
    if let Some(name) = &model.file_name {
        lines.push(format!("0 Name: {name}"));
    }
    if let Some(author) = &model.author {
        lines.push(format!("0 Author: {author}"));
    }
    if let Some(org) = &model.org {
        lines.push(format!("0 {}", org.raw));
    }
    if let Some(category) = &model.category {
        lines.push(format!("0 !CATEGORY {category}"));
    }
    lines
}

fn step_terminator(rotation: &StepRotation, config: &FormatConfig) -> String {
    let rotstep = |angles: &RotationAngles, kind: &str| {
        format!(
            "0 ROTSTEP {} {kind}",
            numbers(&[angles.x, angles.y, angles.z], config)
        )
    };
    match rotation {
        StepRotation::None => "0 STEP".to_string(),
        StepRotation::Relative(angles) => rotstep(angles, "REL"),
        StepRotation::Absolute(angles) => rotstep(angles, "ABS"),
        StepRotation::Additive(angles) => rotstep(angles, "ADD"),
        StepRotation::End => "0 ROTSTEP END".to_string(),
    }
}

/// The single line of an element directive. Containers write their own
/// terminator only; use [`write_node`] for whole subtrees.
pub fn write_directive(directive: &Directive, config: &FormatConfig) -> String {
    let color = |code: &crate::color::ColorCode| code.write(config.color_field);
    let points = |vertices: &[nalgebra::Point3<f64>]| {
        let flat: Vec<f64> = vertices.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        numbers(&flat, config)
    };
    match directive {
        Directive::Part(part) => format!(
            "1 {} {} {}",
            color(&part.color),
            numbers(&Transform::to_ldraw_fields(&part.transform), config),
            part.display_name()
        ),
        Directive::Line(line) => format!("2 {} {}", color(&line.color), points(&line.vertices)),
        Directive::Triangle(triangle) => {
            format!("3 {} {}", color(&triangle.color), points(&triangle.vertices))
        }
        Directive::Quadrilateral(quad) => {
            format!("4 {} {}", color(&quad.color), points(&quad.vertices))
        }
        Directive::ConditionalLine(line) => format!(
            "5 {} {} {}",
            color(&line.color),
            points(&line.vertices),
            points(&line.controls)
        ),
        Directive::Comment(comment) => {
            format!("0 {} {}", comment.marker.keyword(), comment.text)
                .trim_end()
                .to_string()
        }
        Directive::ColorDefinition(definition) => write_color_definition(definition),
        Directive::UnknownMetaCommand(meta) => format!("0 {}", meta.text),
        Directive::Step(step) => step_terminator(&step.rotation, config),
        Directive::Model(model) => format!("0 {}", model.description),
        Directive::File(_) => String::new(),
    }
}

fn write_color_definition(definition: &ColorDefinition) -> String {
    let mut line = format!(
        "0 !COLOUR {} CODE {} VALUE {} EDGE {}",
        definition.name, definition.code, definition.value, definition.edge
    );
    if let Some(alpha) = definition.alpha {
        line.push_str(&format!(" ALPHA {alpha}"));
    }
    if let Some(luminance) = definition.luminance {
        line.push_str(&format!(" LUMINANCE {luminance}"));
    }
    if let Some(finish) = &definition.finish {
        line.push(' ');
        line.push_str(finish);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorCode;
    use crate::config::ColorField;
    use crate::directive::Part;
    use nalgebra::Matrix4;

    #[test]
    fn test_format_number_trims() {
        let config = FormatConfig::default();
        assert_eq!(format_number(1.5, &config), "1.5");
        assert_eq!(format_number(20.0, &config), "20");
        assert_eq!(format_number(-0.0, &config), "0");
        assert_eq!(format_number(-0.0000001, &config), "0");
        assert_eq!(format_number(-24.0, &config), "-24");
        assert_eq!(format_number(0.1234567, &config), "0.123457");
    }

    #[test]
    fn test_format_number_fixed_width() {
        let config = FormatConfig::fixed_width();
        assert_eq!(format_number(1.5, &config), "    1.500000");
        assert_eq!(format_number(-0.0, &config), "    0.000000");
    }

    #[test]
    fn test_write_part_line() {
        let part = Part::new(
            "3001.dat",
            ColorCode::Palette(4),
            Transform::translation_matrix(10.0, -24.0, 0.0),
        );
        let line = write_directive(&Directive::Part(part.clone()), &FormatConfig::default());
        assert_eq!(line, "1 4 10 -24 0 1 0 0 0 1 0 0 0 1 3001.dat");

        let padded = FormatConfig {
            color_field: ColorField::ZeroPadded,
            ..FormatConfig::default()
        };
        let line = write_directive(&Directive::Part(part), &padded);
        assert!(line.starts_with("1 004 10 "));
    }

    #[test]
    fn test_write_rotstep() {
        let rotation = StepRotation::Absolute(RotationAngles::new(45.0, 90.0, 0.0));
        assert_eq!(
            step_terminator(&rotation, &FormatConfig::default()),
            "0 ROTSTEP 45 90 0 ABS"
        );
        assert_eq!(
            step_terminator(&StepRotation::End, &FormatConfig::default()),
            "0 ROTSTEP END"
        );
    }

    #[test]
    fn test_single_model_has_no_framing() {
        let document = Document::parse("0 Brick  2 x  4\r\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 3001.dat");
        assert_eq!(
            document.to_ldraw(),
            "0 Brick  2 x  4\r\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 3001.dat\r\n"
        );
    }

    #[test]
    fn test_steps_and_framing() {
        let text = "0 FILE main.ldr\r\n0 Main\r\n0 Name: main.ldr\r\n\
                    1 16 0 0 0 1 0 0 0 1 0 0 0 1 sub.ldr\r\n0 STEP\r\n\
                    1 4 0 -8 0 1 0 0 0 1 0 0 0 1 3024.dat\r\n0 ROTSTEP END\r\n0 NOFILE\r\n\
                    0 FILE sub.ldr\r\n0 Sub\r\n2 24 0 0 0 1 0 0\r\n0 NOFILE\r\n";
        let document = Document::parse(text);
        assert_eq!(document.to_ldraw(), text);
    }

    #[test]
    fn test_empty_final_step_survives_rewrite() {
        let mut document = Document::parse("0 M\n2 24 0 0 0 1 0 0\n");
        let model = document.models()[0];
        document
            .insert(model, 1, Directive::Step(crate::directive::Step::new()))
            .unwrap();
        assert_eq!(document.children(model).len(), 2);

        let text = document.to_ldraw();
        assert_eq!(text, "0 M\r\n2 24 0 0 0 1 0 0\r\n0 STEP\r\n0 STEP\r\n");
        let reread = Document::parse(&text);
        assert_eq!(reread.children(reread.models()[0]).len(), 2);
        assert_eq!(reread.to_ldraw(), text);
    }

    #[test]
    fn test_blank_description_written_before_meta() {
        let mut document = Document::new();
        let step = document.children(document.models()[0])[0];
        let meta = crate::directive::MetaCommand {
            text: "BFC CERTIFY CCW".to_string(),
        };
        document
            .insert(step, 0, Directive::UnknownMetaCommand(meta))
            .unwrap();

        let text = document.to_ldraw();
        assert_eq!(text, "0\r\n0 BFC CERTIFY CCW\r\n");
        let reread = Document::parse(&text);
        let model = reread.models()[0];
        assert_eq!(reread.model(model).unwrap().description, "");
        assert_eq!(reread.children(reread.children(model)[0]).len(), 1);
        assert_eq!(reread.to_ldraw(), text);
    }

    #[test]
    fn test_write_color_definition() {
        let definition = ColorDefinition {
            name: "Trans_Clear".to_string(),
            code: 47,
            value: crate::color::Rgb::new(0xFC, 0xFC, 0xFC),
            edge: crate::color::EdgeColor::Rgb(crate::color::Rgb::new(0xC3, 0xC3, 0xC3)),
            alpha: Some(128),
            luminance: None,
            finish: None,
        };
        assert_eq!(
            write_directive(&Directive::ColorDefinition(definition), &FormatConfig::default()),
            "0 !COLOUR Trans_Clear CODE 47 VALUE #FCFCFC EDGE #C3C3C3 ALPHA 128"
        );
    }

    #[test]
    fn test_identity_stays_identity() {
        let part = Part::new("x.dat", ColorCode::Current, Matrix4::identity());
        assert_eq!(
            write_directive(&Directive::Part(part), &FormatConfig::default()),
            "1 16 0 0 0 1 0 0 0 1 0 0 0 1 x.dat"
        );
    }
}
