/// ldraw - inspect and tidy LDraw models from the terminal
///
/// Commands:
///   outline   models, steps and placed parts
///   format    canonical LDraw text
///   report    piece counts and dimensions
///   audit     missing and moved parts
///   snap      round every placement onto the editing grid
///   catalog   build, search and browse the part catalog
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use crossterm::style::Color;
use ldraw_core::{
    parse_file, Document, FormatConfig, GridConfig, PartLibrary, PartReport, Transform,
};
use ldraw_cli::{logger, Console, OutlinePrinter, Settings};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ldraw", version, about = "Inspect and tidy LDraw models")]
struct Cli {
    /// More log output; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML settings with [library], [format] and [grid] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// LDraw folder holding parts/ and p/
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Plain output without terminal colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print models, steps and placed parts
    Outline {
        file: PathBuf,
        /// Also list lines, triangles and quads
        #[arg(long)]
        primitives: bool,
    },
    /// Write the file back in canonical form
    Format {
        file: PathBuf,
        /// Fixed-width columns and zero-padded colors
        #[arg(long)]
        fixed_width: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Count pieces by part and color
    Report {
        file: PathBuf,
        /// Submodel to report on instead of the main model
        #[arg(long)]
        model: Option<String>,
    },
    /// List parts that are missing from the library or have moved
    Audit { file: PathBuf },
    /// Snap every placement to the grid
    Snap {
        file: PathBuf,
        #[arg(long, value_enum)]
        grid: Option<GridPreset>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Part catalog tools
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
    },
}

#[derive(Subcommand)]
enum CatalogCommand {
    /// Rescan the library and rewrite the catalog file
    Build,
    /// Parts whose name or description contains the text
    Search { query: String },
    /// All categories
    Categories,
    /// Parts in one category
    List { category: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum GridPreset {
    Fine,
    Medium,
    Coarse,
}

impl GridPreset {
    fn config(self) -> GridConfig {
        match self {
            Self::Fine => GridConfig::fine(),
            Self::Medium => GridConfig::medium(),
            Self::Coarse => GridConfig::coarse(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = logger::init(cli.verbose) {
        eprintln!("logging unavailable: {error}");
    }
    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            log::error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(root) = &cli.library {
        settings.library.root = root.clone();
    }
    let mut console = Console::stdout(!cli.no_color);

    match cli.command {
        Command::Outline { file, primitives } => {
            let document = read_document(&file)?;
            let library = open_library(&settings);
            OutlinePrinter::new(primitives).print(&mut console, &document, &library)?;
        }
        Command::Format {
            file,
            fixed_width,
            output,
        } => {
            let document = read_document(&file)?;
            let format = if fixed_width {
                FormatConfig::fixed_width()
            } else {
                settings.format.clone()
            };
            emit(&document.write_with(document.root(), &format), output.as_deref())?;
        }
        Command::Report { file, model } => {
            let document = read_document(&file)?;
            let library = open_library(&settings);
            let target = match &model {
                Some(name) => document
                    .find_model(name)
                    .with_context(|| format!("no model named {name}"))?,
                None => document.root(),
            };
            print_report(&mut console, &PartReport::collect(&document, target, &library))?;
        }
        Command::Audit { file } => {
            let document = read_document(&file)?;
            let library = open_library(&settings);
            let audit = library.audit(&document, document.root());
            for part in &audit.missing {
                if let Some(part) = document.part(*part) {
                    console.colored(Color::Red, "missing ")?;
                    console.plain(part.display_name())?;
                    console.newline()?;
                }
            }
            for (part, target) in &audit.moved {
                if let Some(part) = document.part(*part) {
                    console.colored(Color::Yellow, "moved   ")?;
                    console.plain(&format!("{} -> {target}", part.display_name()))?;
                    console.newline()?;
                }
            }
            console.flush()?;
            if !audit.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Snap { file, grid, output } => {
            let mut document = read_document(&file)?;
            let grid = grid.map_or(settings.grid.clone(), GridPreset::config);
            let parts: Vec<_> = document.parts(document.root()).collect();
            for id in &parts {
                let Some(part) = document.part(*id) else {
                    continue;
                };
                let snapped = Transform::snap_to_grid(&part.transform, &grid);
                document.set_transform(*id, snapped)?;
            }
            log::info!("snapped {} placements", parts.len());
            emit(&document.write_with(document.root(), &settings.format), output.as_deref())?;
        }
        Command::Catalog { action } => {
            let library = PartLibrary::open(settings.library.clone())
                .with_context(|| format!("opening {}", settings.library.root.display()))?;
            run_catalog(&mut console, &library, action)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_catalog<W: Write>(
    console: &mut Console<W>,
    library: &PartLibrary,
    action: CatalogCommand,
) -> Result<()> {
    match action {
        CatalogCommand::Build => {
            let summary = library.rebuild_catalog()?;
            console.field("parts", &summary.parts.to_string())?;
            console.field("categories", &summary.categories.to_string())?;
        }
        CatalogCommand::Search { query } => {
            for entry in library.catalog().search(&query) {
                console.colored(Color::Green, &format!("{:<24}", entry.name))?;
                console.plain(&entry.description)?;
                console.newline()?;
            }
        }
        CatalogCommand::Categories => {
            let catalog = library.catalog();
            for category in catalog.categories() {
                let count = catalog.parts_in_category(category).len();
                console.plain(&format!("{category} ({count})"))?;
                console.newline()?;
            }
        }
        CatalogCommand::List { category } => {
            let catalog = library.catalog();
            let entries = catalog.parts_in_category(&category);
            if entries.is_empty() {
                bail!("no category named {category}");
            }
            for entry in entries {
                console.colored(Color::Green, &format!("{:<24}", entry.name))?;
                console.plain(&entry.description)?;
                console.newline()?;
            }
        }
    }
    console.flush()?;
    Ok(())
}

fn print_report<W: Write>(console: &mut Console<W>, report: &PartReport) -> io::Result<()> {
    console.heading("Pieces")?;
    for piece in &report.pieces {
        let color = if piece.description.is_empty() {
            Color::Red
        } else {
            Color::Green
        };
        console.plain(&format!("{:>5} x ", piece.count))?;
        console.colored(color, &format!("{:<20}", piece.display_name))?;
        console.plain(&format!("{:<22}{}", piece.color_name, piece.description))?;
        console.newline()?;
    }
    console.newline()?;
    console.field("total pieces", &report.total_pieces.to_string())?;
    console.field("unresolved", &report.unresolved.to_string())?;
    console.field("models", &report.models.to_string())?;
    console.field("steps", &report.steps.to_string())?;
    console.field("primitives", &report.primitives.to_string())?;

    let dimensions = &report.dimensions;
    let studs = dimensions.in_studs();
    let centimeters = dimensions.in_centimeters();
    let inches = dimensions.in_inches();
    console.field(
        "size (LDU)",
        &format!(
            "{:.0} x {:.0} x {:.0}",
            dimensions.width(),
            dimensions.height(),
            dimensions.depth()
        ),
    )?;
    console.field(
        "size (studs)",
        &format!("{:.1} x {:.1} x {:.1}", studs.x, studs.y, studs.z),
    )?;
    console.field(
        "size (cm)",
        &format!("{:.1} x {:.1} x {:.1}", centimeters.x, centimeters.y, centimeters.z),
    )?;
    console.field(
        "size (in)",
        &format!("{:.2} x {:.2} x {:.2}", inches.x, inches.y, inches.z),
    )?;
    console.flush()
}

fn read_document(path: &Path) -> Result<Document> {
    let output = parse_file(path).with_context(|| format!("reading {}", path.display()))?;
    for diagnostic in &output.diagnostics {
        log::debug!("{}: {diagnostic}", path.display());
    }
    Ok(output.document)
}

/// The configured library, or an empty one when it cannot be opened.
fn open_library(settings: &Settings) -> PartLibrary {
    match PartLibrary::open(settings.library.clone()) {
        Ok(library) => library,
        Err(error) => {
            log::warn!("part library unavailable: {error}");
            PartLibrary::empty()
        }
    }
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}
