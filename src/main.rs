use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod build;
mod config;
mod console;
mod context;
mod dev;
mod error;
mod frontmatter;
mod minify;
mod render;
mod route;
mod site;
mod styles;

#[derive(Parser, Debug)]
#[command(
    about = "A small static site generator built on templates and Markdown",
    after_help = "Run `frostpage <command> --help` for more info on a specific command.",
    subcommand_help_heading = "Commands",
    disable_help_subcommand = true,
    disable_help_flag = true,
)]
struct Args {
    /// Show this help message
    #[arg(short, long, action = clap::ArgAction::Help, global = true)]
    help: (),

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a development server with live reloading
    Dev {
        /// Path to the site directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Port to run on (if specified, I'll fail when unavailable; otherwise I'll retry)
        #[arg(short, long)]
        port: Option<u16>,

        /// Set a global template variable, overriding config.toml
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = config::parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Render every route into the output directory
    Build {
        /// Path to the site directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output directory (defaults to `paths.output` from config.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Set a global template variable, overriding config.toml
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = config::parse_var)]
        vars: Vec<(String, String)>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .context_lines(3)
                .rgb_colors(miette::RgbColors::Preferred)
                .color(true)
                .with_syntax_highlighting(miette::highlighters::SyntectHighlighter::default())
                .build(),
        )
    }))
    .expect("Failed to set miette hook");

    init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Dev { path, port, vars } => {
            crate::dev::run_dev_server(path, port, vars).await?;
        }
        Command::Build { path, output, vars } => {
            crate::build::run_build(path, output, vars).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_vars() {
        let args = Args::try_parse_from([
            "frostpage",
            "build",
            "site",
            "-o",
            "out",
            "--var",
            "title=Hello",
            "--var",
            "year=2026",
        ])
        .unwrap();

        match args.command {
            Command::Build { path, output, vars } => {
                assert_eq!(path, PathBuf::from("site"));
                assert_eq!(output, Some(PathBuf::from("out")));
                assert_eq!(
                    vars,
                    vec![
                        ("title".to_string(), "Hello".to_string()),
                        ("year".to_string(), "2026".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_malformed_var() {
        assert!(Args::try_parse_from(["frostpage", "dev", "--var", "novalue"]).is_err());
    }
}
