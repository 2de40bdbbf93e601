//! # Protodesk CLI Entry Point
//!
//! Drives one command against one saved project:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`], installs logging
//!    and reads the optional engine configuration.
//! 2. **Loading**: Opens the project from its state directory through `protodesk_core`.
//! 3. **Execution**: Applies the command. Every mutation is saved by the project itself.
//! 4. **Presentation**: Prints the result to standard output, errors to standard error.

mod cli;
mod formatter;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands, EditCommands, FormCommands, HeaderCommands, ImportPathCommands};
use formatter::{FormList, FormattedString, Tree};
use protodesk_core::config::EngineConfig;
use protodesk_core::form::Header;
use protodesk_core::project::Project;
use protodesk_core::store::{FileStore, StateStore};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const LOG_ENV: &str = "PROTODESK_LOG";

#[tokio::main]
async fn main() {
    init_tracing();

    let args = Cli::parse();

    if let Err(err) = run(args).await {
        eprintln!("{}", FormattedString::from(err));
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    EngineConfig::from_json(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn open_store(state_dir: Option<&Path>) -> Result<Arc<dyn StateStore>> {
    let store = match state_dir {
        Some(dir) => FileStore::new(dir)?,
        None => FileStore::in_data_dir()?,
    };

    tracing::debug!(dir = %store.dir().display(), "using state directory");

    Ok(Arc::new(store))
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let store = open_store(args.state_dir.as_deref())?;

    match args.command {
        Commands::New => {
            if store.load(&args.project)?.is_some() {
                bail!("Project '{}' already exists", args.project);
            }
            let project = Project::create(args.project, store, config).await?;
            println!("{}", FormattedString::from(FormList(&project.snapshot().await)));
            Ok(())
        }
        Commands::Delete => {
            let project = Project::load(args.project, store, config).await?;
            project.delete().await?;
            Ok(())
        }
        Commands::Edit(command) => {
            let project = Project::load(args.project, store, config).await?;
            let form = match args.form {
                Some(id) => id,
                None => project.current_form_id().await,
            };

            let result = execute(&project, form, command).await;
            project.close().await;
            result
        }
    }
}

async fn execute(project: &Project, form: Uuid, command: EditCommands) -> Result<()> {
    match command {
        EditCommands::OpenFile { path } => {
            let nodes = project.open_proto_file(path).await?;
            println!("{}", FormattedString::from(Tree(&nodes)));
        }
        EditCommands::ImportPath { sub } => match sub {
            ImportPathCommands::Add { path } => project.open_import_path(path).await?,
            ImportPathCommands::Remove { path } => project.remove_import_path(path).await?,
        },
        EditCommands::ClearFiles => project.delete_all_proto_files().await?,
        EditCommands::Reflect { address } => {
            let nodes = project.reflect(form, address).await?;
            println!("{}", FormattedString::from(Tree(&nodes)));
        }
        EditCommands::Tree => {
            println!("{}", FormattedString::from(Tree(&project.nodes().await)));
        }
        EditCommands::Forms => {
            println!("{}", FormattedString::from(FormList(&project.snapshot().await)));
        }
        EditCommands::Form { sub } => match sub {
            FormCommands::Add => {
                let id = project.create_form().await?;
                println!("{id}");
            }
            FormCommands::Remove { id } => project.remove_form(id).await?,
            FormCommands::Use { id } => project.set_current_form(id).await?,
        },
        EditCommands::Address { address } => project.save_address(form, address).await?,
        EditCommands::Select { method_id } => {
            let template = project.select_method(form, &method_id).await?;
            println!("{template}");
        }
        EditCommands::Header { sub } => match sub {
            HeaderCommands::Add { header: (key, value) } => {
                let mut headers = project.form(form).await?.headers;
                let header = Header::new(key, value);
                let id = header.id;
                headers.push(header);
                project.save_headers(form, headers).await?;
                println!("{id}");
            }
            HeaderCommands::Remove { id } => project.delete_header(form, id).await?,
        },
        EditCommands::Request { body } => project.save_request_text(form, body).await?,
        EditCommands::Send => {
            let response = project.send(form).await?;
            println!("{response}");
        }
        EditCommands::Show => {
            println!("{}", FormattedString::from(&project.form(form).await?));
        }
    }

    Ok(())
}
