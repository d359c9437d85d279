//! spiweave command-line tool
//!
//! Offline access to the weaver: inspect class containers, weave a class as
//! the weaving hook would at definition time, resolve common ancestors across
//! a module graph, and show the rules a requirement header produces.

mod commands;
mod manifest;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spiweave")]
#[command(about = "Service-loader weaving toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Log weaving decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a class container's header, methods and frames
    Inspect {
        /// Class file
        class: PathBuf,
        /// Also verify every method body
        #[arg(long)]
        verify: bool,
    },

    /// Weave one class of a module
    Weave {
        /// Module-graph manifest (JSON)
        #[arg(short, long)]
        graph: PathBuf,
        /// Owning module (`name` or `name@version`)
        #[arg(short, long)]
        module: String,
        /// Class file to weave
        class: PathBuf,
        /// Where to write the woven class
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Extra auto-consumer patterns (added to SPIWEAVE_AUTO_CONSUMERS)
        #[arg(long = "auto-consumer")]
        auto_consumers: Vec<String>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find the nearest common superclass of two classes
    Ancestor {
        /// Module-graph manifest (JSON)
        #[arg(short, long)]
        graph: PathBuf,
        /// Module the lookup starts in
        #[arg(short, long)]
        module: String,
        /// First class (dotted or internal name)
        first: String,
        /// Second class (dotted or internal name)
        second: String,
    },

    /// Show the rewrite rules a requirement header produces
    Rules {
        /// Requirement header text
        #[arg(long, conflicts_with = "graph")]
        header: Option<String>,
        /// Module-graph manifest (JSON); rules of `--module` are shown
        #[arg(short, long, requires = "module")]
        graph: Option<PathBuf>,
        /// Module whose rules to show
        #[arg(short, long)]
        module: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Inspect { class, verify } => commands::inspect::execute(&class, verify),

        Commands::Weave {
            graph,
            module,
            class,
            output,
            auto_consumers,
            json,
        } => commands::weave::execute(commands::weave::WeaveOptions {
            graph,
            module,
            class,
            output,
            auto_consumers,
            json,
        }),

        Commands::Ancestor {
            graph,
            module,
            first,
            second,
        } => commands::ancestor::execute(&graph, &module, &first, &second),

        Commands::Rules {
            header,
            graph,
            module,
        } => commands::rules::execute(header.as_deref(), graph.as_deref(), module.as_deref()),
    }
}
