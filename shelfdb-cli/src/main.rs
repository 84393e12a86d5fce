use clap::{Parser, Subcommand, ValueEnum};
use flate2::read::GzDecoder;
use shelfdb::{Schema, COMPRESSED_EXTENSION, SCHEMA_FILENAME};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

/// shelfdb CLI: inspect a shelfdb database from the command line.
/// Works on the filesystem layout alone, so no record types are
/// needed.
#[derive(Parser)]
#[command(name = "shelfdb", version, about)]
struct Cli {
    /// Path to the database root (default: current directory)
    #[arg(long, default_value = ".")]
    root: String,

    /// Output format
    #[arg(long, default_value = "pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List registered types (one directory per type)
    Types,

    /// Print a type's schema document
    Schema {
        /// Type name (directory name under the root)
        type_name: String,
    },

    /// List the UUIDs of a type's objects
    List {
        /// Type name
        type_name: String,
    },

    /// Count a type's objects on disk
    Count {
        /// Type name
        type_name: String,
    },

    /// Print one object document, decompressing when needed
    Cat {
        /// Type name
        type_name: String,
        /// Object UUID
        uuid: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let root = PathBuf::from(&cli.root);

    match cli.command {
        Command::Types => {
            let mut types = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if entry.path().is_dir() && entry.path().join(SCHEMA_FILENAME).is_file() {
                    types.push(entry.file_name().to_string_lossy().to_string());
                }
            }
            types.sort();
            print_output(&serde_json::json!(types), &cli.format);
        }

        Command::Schema { type_name } => {
            let schema = load_schema(&root, &type_name)?;
            print_output(&serde_json::to_value(&schema)?, &cli.format);
        }

        Command::List { type_name } => {
            let uuids = list_uuids(&root, &type_name)?;
            print_output(&serde_json::json!(uuids), &cli.format);
        }

        Command::Count { type_name } => {
            let uuids = list_uuids(&root, &type_name)?;
            print_output(&serde_json::json!({ "count": uuids.len() }), &cli.format);
        }

        Command::Cat { type_name, uuid } => {
            let schema = load_schema(&root, &type_name)?;
            let mut name = format!("{uuid}{}", schema.extension);
            if schema.compress {
                name.push_str(COMPRESSED_EXTENSION);
            }
            let path = root.join(&type_name).join(name);
            let doc: serde_json::Value = read_document(&path)?;
            print_output(&doc, &cli.format);
        }
    }

    Ok(())
}

fn load_schema(root: &Path, type_name: &str) -> Result<Schema, Box<dyn std::error::Error>> {
    let path = root.join(type_name).join(SCHEMA_FILENAME);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

fn list_uuids(root: &Path, type_name: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let schema = load_schema(root, type_name)?;
    let mut suffix = schema.extension.clone();
    if schema.compress {
        suffix.push_str(COMPRESSED_EXTENSION);
    }

    let mut uuids = Vec::new();
    for entry in std::fs::read_dir(root.join(type_name))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == SCHEMA_FILENAME {
            continue;
        }
        if let Some(uuid) = name.strip_suffix(&suffix) {
            uuids.push(uuid.to_string());
        }
    }
    uuids.sort();
    Ok(uuids)
}

fn read_document(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let mut raw = String::new();
    if path.to_string_lossy().ends_with(COMPRESSED_EXTENSION) {
        GzDecoder::new(file).read_to_string(&mut raw)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut raw)?;
    }
    Ok(serde_json::from_str(&raw)?)
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Pretty => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default())
        }
    }
}
