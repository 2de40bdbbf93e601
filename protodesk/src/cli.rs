//! # CLI
//!
//! This module defines the command-line interface of `protodesk` using `clap`.
//!
//! Every invocation works on one saved project: it is loaded from the state directory,
//! the command runs against it, and the project saves itself before the process exits.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "protodesk", version, about = "Schema-driven gRPC workbench")]
pub struct Cli {
    /// Name of the project to work on
    pub project: String,

    /// Directory holding saved projects (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// JSON file overriding the engine timeouts and default address
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Form to act on (defaults to the current form)
    #[arg(long, global = true)]
    pub form: Option<Uuid>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new project with a single empty form
    New,

    /// Delete the project from the state directory
    Delete,

    #[command(flatten)]
    Edit(EditCommands),
}

/// Commands acting on a loaded project.
#[derive(Subcommand)]
pub enum EditCommands {
    /// Add a .proto file to the project and recompile the schema
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protodesk demo open-file ./protos/helloworld.proto
    /// ```
    OpenFile { path: PathBuf },

    /// Manage the directories imports are resolved against
    ImportPath {
        #[command(subcommand)]
        sub: ImportPathCommands,
    },

    /// Drop every .proto file and every form except the current one
    ClearFiles,

    /// Load the schema from a server exposing gRPC reflection
    ///
    /// The address becomes the address of the form.
    Reflect { address: String },

    /// Print the Namespace -> Service -> Method tree
    Tree,

    /// List the forms of the project
    Forms,

    /// Manage forms
    Form {
        #[command(subcommand)]
        sub: FormCommands,
    },

    /// Set the address the form calls
    Address { address: String },

    /// Select a method and reset the request to its template
    Select {
        /// Method id (e.g. my.package.Service.Method)
        method_id: String,
    },

    /// Manage the metadata sent with every call of the form
    Header {
        #[command(subcommand)]
        sub: HeaderCommands,
    },

    /// Replace the request text of the form
    Request {
        /// JSON body (Object for Unary, Array for client streaming)
        body: String,
    },

    /// Send the request and print the response
    Send,

    /// Print the state of the form
    Show,
}

#[derive(Subcommand)]
pub enum ImportPathCommands {
    Add { path: PathBuf },
    Remove { path: PathBuf },
}

#[derive(Subcommand)]
pub enum FormCommands {
    /// Add a form inheriting the address and headers of the current one
    Add,
    Remove { id: Uuid },
    /// Make a form the current one
    Use { id: Uuid },
}

#[derive(Subcommand)]
pub enum HeaderCommands {
    /// Add a header
    Add {
        #[arg(value_parser = parse_header)]
        header: (String, String),
    },
    Remove { id: Uuid },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}
