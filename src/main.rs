use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use slidemark::{Config, StyledText};

#[derive(Parser)]
#[command(name = "slidemark")]
#[command(about = "Convert between Markdown and run-based styled slide text")]
struct Cli {
    /// TOML config file (defaults are used if absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Markdown file to styled text JSON
    Encode {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Styled text JSON to Markdown
    Decode {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Markdown file to a JSON list of text runs
    Runs {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::compiled_default(),
    };

    let (rendered, output) = match cli.command {
        Command::Encode { input, output } => {
            let styled = slidemark::markdown_to_styled_with_config(&read(&input), &config);
            (to_json(&styled), output)
        }
        Command::Decode { input, output } => {
            let source = read(&input);
            let styled: StyledText = serde_json::from_str(&source).unwrap_or_else(|e| {
                fail(&format!("Error parsing {}: {}", input.display(), e))
            });
            let markdown = slidemark::styled_to_markdown_with_config(&styled, &config)
                .unwrap_or_else(|e| fail(&format!("Error: {}", e)));
            (markdown, output)
        }
        Command::Runs { input, output } => {
            let styled = slidemark::markdown_to_styled_with_config(&read(&input), &config);
            let runs = styled
                .runs(config.runs.start_index, &config.runs.code_font)
                .unwrap_or_else(|e| fail(&format!("Error: {}", e)));
            (to_json(&runs), output)
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = fs::write(&path, rendered) {
                fail(&format!("Error writing {}: {}", path.display(), e));
            }
            log::info!("wrote {}", path.display());
        }
        None => println!("{}", rendered),
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|e| fail(&format!("Error reading {}: {}", path.display(), e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(&format!("Error: {}", e)))
}

fn fail(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}
