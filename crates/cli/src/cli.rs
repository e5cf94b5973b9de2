use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "shelf", version, about = "Administer a shelf document storage root")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage root; overrides the configuration
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),
    /// Manage libraries
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Upload, read and delete files
    #[command(subcommand)]
    File(FileCommand),
    /// Write and read extractions
    #[command(subcommand)]
    Extraction(ExtractionCommand),
    /// Recompute usage statistics from disk
    Reconcile {
        workspace: String,
        #[arg(long)]
        library: Option<String>,
        #[arg(long, requires = "library")]
        file: Option<String>,
    },
    /// Size and file count below a path relative to the root
    Stats { path: PathBuf },
}

#[derive(Debug, Args)]
pub struct Details {
    /// Display name
    #[arg(long)]
    pub name: Option<String>,
    /// Settings as a JSON object
    #[arg(long, value_name = "JSON")]
    pub settings: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum WorkspaceCommand {
    List,
    Create {
        id: String,
        #[command(flatten)]
        details: Details,
    },
    Show {
        id: String,
    },
    Update {
        id: String,
        #[command(flatten)]
        details: Details,
    },
}

#[derive(Debug, Subcommand)]
pub enum LibraryCommand {
    List {
        workspace: String,
    },
    Create {
        workspace: String,
        id: String,
        #[command(flatten)]
        details: Details,
    },
    Show {
        workspace: String,
        id: String,
    },
    Update {
        workspace: String,
        id: String,
        #[command(flatten)]
        details: Details,
    },
    /// Move a library into another workspace
    Move {
        workspace: String,
        id: String,
        to: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum FileCommand {
    List {
        workspace: String,
        library: String,
    },
    /// Upload a source file; `-` reads stdin
    Put {
        workspace: String,
        library: String,
        id: String,
        input: PathBuf,
        /// Original file name; defaults to the input's file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },
    /// Write the source content to stdout
    Cat {
        workspace: String,
        library: String,
        id: String,
    },
    Show {
        workspace: String,
        library: String,
        id: String,
    },
    Rm {
        workspace: String,
        library: String,
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ExtractionCommand {
    List {
        workspace: String,
        library: String,
        file: String,
    },
    /// Write an extraction; several inputs make a sharded extraction
    Put {
        workspace: String,
        library: String,
        file: String,
        method: String,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Method configuration as JSON
        #[arg(long = "method-config", value_name = "JSON")]
        method_config: Option<String>,
        #[arg(long)]
        rows: Option<u64>,
    },
    /// Write the extraction content to stdout
    Cat {
        workspace: String,
        library: String,
        file: String,
        method: String,
    },
    Show {
        workspace: String,
        library: String,
        file: String,
        method: String,
    },
}
