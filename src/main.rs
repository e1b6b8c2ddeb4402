use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use nsxref::config::load_config;
use nsxref::diagnostics::Diagnostic;
use nsxref::index::NamespaceIndex;
use nsxref::project::Project;
use nsxref::server::{declaration_json, reference_json, run_stdio_server};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "nsxref")]
#[command(version)]
#[command(about = "Cross-reference @namespace extension points and their .plugin registrations")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report registrations that target undeclared namespaces or members
    Check {
        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the declaration and every registration of one namespace
    Lookup {
        #[arg(value_name = "NAMESPACE")]
        namespace: String,
    },
    /// Serve JSON-RPC tool calls over stdio
    Serve,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{}={level}", env!("CARGO_PKG_NAME"))));

    // stdout carries command output and JSON-RPC replies.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_index(repo_root: &Path, spinner: bool) -> Result<NamespaceIndex<Project>> {
    let cfg = load_config(repo_root);

    let pb = spinner.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Parsing sources under {}", repo_root.display()));
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    });

    let project = Project::load(repo_root, &cfg)
        .with_context(|| format!("Failed to load project at {}", repo_root.display()))?;
    let mut index = NamespaceIndex::new(project, &cfg);
    index.ensure_full_scan();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(index)
}

fn display_path(repo_root: &Path, path: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn print_diagnostics(repo_root: &Path, diags: &[Diagnostic], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(diags)?);
        return Ok(());
    }
    for d in diags {
        println!(
            "{}:{}:{}: warning[{}]: {}",
            display_path(repo_root, &d.file),
            d.line,
            d.column,
            d.code,
            d.message
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let repo_root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current dir")?,
    };

    match cli.cmd {
        Command::Serve => run_stdio_server(Some(repo_root)),
        Command::Check { json } => {
            let mut index = load_index(&repo_root, !json)?;
            let diags = index.all_diagnostics();
            print_diagnostics(&repo_root, &diags, json)?;
            tracing::info!(
                "{} plugin files checked, {} warnings",
                index.plugin_files().len(),
                diags.len()
            );
            Ok(())
        }
        Command::Lookup { namespace } => {
            let mut index = load_index(&repo_root, false)?;
            let declaration = index.lookup_declaration(&namespace).map(declaration_json);
            let references: Vec<serde_json::Value> = index
                .lookup_references(&namespace)
                .into_iter()
                .map(reference_json)
                .collect();
            let out = json!({
                "namespace": namespace,
                "declaration": declaration,
                "references": references,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
    }
}
