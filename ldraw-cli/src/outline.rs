/// Tree view of a document for the terminal
use crossterm::style::Color;
use ldraw_core::writer::format_number;
use ldraw_core::{
    Directive, Document, FormatConfig, NodeId, PartLibrary, Resolution, StepRotation,
};
use std::io::{self, Write};

use crate::Console;

/// Prints models, their steps and the parts placed in each step
pub struct OutlinePrinter {
    show_primitives: bool,
    numbers: FormatConfig,
}

impl OutlinePrinter {
    pub fn new(show_primitives: bool) -> Self {
        Self {
            show_primitives,
            numbers: FormatConfig {
                precision: 2,
                ..FormatConfig::default()
            },
        }
    }

    pub fn print<W: Write>(
        &self,
        console: &mut Console<W>,
        document: &Document,
        library: &PartLibrary,
    ) -> io::Result<()> {
        let active = document.active_model();
        for model in document.models() {
            self.print_model(console, document, library, *model, *model == active)?;
        }
        console.flush()
    }

    fn print_model<W: Write>(
        &self,
        console: &mut Console<W>,
        document: &Document,
        library: &PartLibrary,
        id: NodeId,
        active: bool,
    ) -> io::Result<()> {
        let Some(model) = document.model(id) else {
            return Ok(());
        };
        let name = model.name().unwrap_or("(unnamed)");
        let marker = if active { "*" } else { " " };
        console.heading(&format!("{marker} {name}: {}", model.description))?;

        let size = document.bounds(id, library).size();
        console.field(
            "  size",
            &format!(
                "{} x {} x {} LDU",
                self.number(size.x),
                self.number(size.y),
                self.number(size.z)
            ),
        )?;

        for (index, step) in document.children(id).iter().enumerate() {
            let rotation = document
                .step(*step)
                .map(|step| describe_rotation(&step.rotation))
                .unwrap_or_default();
            console.colored(Color::Blue, &format!("  Step {}{rotation}", index + 1))?;
            console.newline()?;
            self.print_step(console, document, library, *step)?;
        }
        Ok(())
    }

    fn print_step<W: Write>(
        &self,
        console: &mut Console<W>,
        document: &Document,
        library: &PartLibrary,
        step: NodeId,
    ) -> io::Result<()> {
        let mut hidden = 0;
        for child in document.children(step) {
            match document.get(*child) {
                Some(Directive::Part(part)) => {
                    let color = match library.resolve_part(document, *child) {
                        Resolution::Library(_) => Color::Green,
                        Resolution::Submodel(_) => Color::Cyan,
                        Resolution::Unresolved => Color::Red,
                    };
                    let position = part.position();
                    console.plain("    ")?;
                    console.colored(color, part.display_name())?;
                    console.plain(&format!(
                        " {} at ({}, {}, {})",
                        library.colors().name_for(part.color),
                        self.number(position.x),
                        self.number(position.y),
                        self.number(position.z)
                    ))?;
                    console.newline()?;
                }
                Some(directive) if self.show_primitives => {
                    console.colored(Color::DarkGrey, &format!("    {}", directive.kind()))?;
                    console.newline()?;
                }
                Some(Directive::Comment(comment)) => {
                    console.colored(Color::DarkGrey, &format!("    // {}", comment.text))?;
                    console.newline()?;
                }
                Some(_) => hidden += 1,
                None => {}
            }
        }
        if hidden > 0 {
            console.colored(Color::DarkGrey, &format!("    + {hidden} more"))?;
            console.newline()?;
        }
        Ok(())
    }

    fn number(&self, value: f64) -> String {
        format_number(value, &self.numbers)
    }
}

fn describe_rotation(rotation: &StepRotation) -> String {
    let angles = |kind: &str, x: f64, y: f64, z: f64| format!(" (rotate {kind} {x} {y} {z})");
    match rotation {
        StepRotation::None => String::new(),
        StepRotation::Relative(a) => angles("by", a.x, a.y, a.z),
        StepRotation::Absolute(a) => angles("to", a.x, a.y, a.z),
        StepRotation::Additive(a) => angles("adding", a.x, a.y, a.z),
        StepRotation::End => " (reset view)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outline_lists_parts_and_steps() {
        let document = Document::parse(
            "0 FILE car.ldr\n0 Car\n1 4 0 -8 0 1 0 0 0 1 0 0 0 1 3020.dat\n\
             2 24 0 0 0 1 0 0\n0 // chassis\n0 ROTSTEP 0 90 0 ABS\n\
             1 16 0 0 0 1 0 0 0 1 0 0 0 1 wheel.ldr\n0 NOFILE\n\
             0 FILE wheel.ldr\n0 Wheel\n3 16 0 0 0 1 0 0 0 1 0\n0 NOFILE\n",
        );
        let mut console = Console::new(Vec::new(), false);
        OutlinePrinter::new(false)
            .print(&mut console, &document, &PartLibrary::empty())
            .unwrap();
        let text = String::from_utf8(console.into_inner()).unwrap();

        assert!(text.contains("* car.ldr: Car\n"));
        assert!(text.contains("  wheel.ldr: Wheel\n"));
        assert!(text.contains("  Step 1 (rotate to 0 90 0)\n"));
        assert!(text.contains("    3020.dat Red at (0, -8, 0)\n"));
        assert!(text.contains("    // chassis\n"));
        assert!(text.contains("    + 1 more\n"));
        assert!(text.contains("  size: 1 x 1 x 0 LDU\n"));
    }
}
