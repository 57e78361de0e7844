#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use nobundle_core::Framework;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "nobundle")]
#[command(
    author,
    version,
    about = "A no-bundle dev server with hot module replacement",
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the dev server (default)
    #[command(visible_alias = "dev")]
    Serve(ServeArgs),

    /// Build for production with an external bundler
    Build {
        /// Project root
        root: Option<PathBuf>,

        /// Output directory, relative to the root
        #[arg(long, default_value = "dist")]
        outdir: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ServeArgs {
    /// Project root
    root: Option<PathBuf>,

    /// HTTP port
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// HMR WebSocket port
    #[arg(long)]
    hmr_port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// UI framework: react or vue
    #[arg(long)]
    framework: Option<Framework>,

    /// Open the browser on start
    #[arg(long)]
    open: bool,
}

fn project_root(cwd: &Path, root: Option<&Path>) -> PathBuf {
    match root {
        Some(root) if root.is_absolute() => root.to_path_buf(),
        Some(root) => cwd.join(root),
        None => cwd.to_path_buf(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;

    match cli.command {
        Some(Commands::Build { root, outdir }) => {
            let action = commands::build::BuildAction {
                root: project_root(&cwd, root.as_deref()),
                outdir,
            };
            rt.block_on(commands::build::run(action))
        }
        Some(Commands::Serve(args)) => rt.block_on(commands::dev::run(dev_action(&cwd, args))),
        None => rt.block_on(commands::dev::run(dev_action(&cwd, cli.serve))),
    }
}

fn dev_action(cwd: &Path, args: ServeArgs) -> commands::dev::DevAction {
    commands::dev::DevAction {
        root: project_root(cwd, args.root.as_deref()),
        port: args.port,
        hmr_port: args.hmr_port,
        host: args.host,
        framework: args.framework,
        open: args.open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_argument_without_subcommand() {
        let cli = Cli::try_parse_from([
            "nobundle", "app", "--port", "4000", "--framework", "vue",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.root, Some(PathBuf::from("app")));
        assert_eq!(cli.serve.port, Some(4000));
        assert_eq!(cli.serve.framework, Some(Framework::Vue));
    }

    #[test]
    fn test_serve_aliases() {
        for name in ["serve", "dev"] {
            let cli = Cli::try_parse_from(["nobundle", name, "--hmr-port", "9000"]).unwrap();
            match cli.command {
                Some(Commands::Serve(args)) => assert_eq!(args.hmr_port, Some(9000)),
                other => panic!("expected serve, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_build_and_global_flags() {
        let cli = Cli::try_parse_from([
            "nobundle", "build", "site", "-vv", "--json", "--cwd", "/work",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.cwd, Some(PathBuf::from("/work")));
        match cli.command {
            Some(Commands::Build { root, outdir }) => {
                assert_eq!(root, Some(PathBuf::from("site")));
                assert_eq!(outdir, PathBuf::from("dist"));
            }
            other => panic!("expected build, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_framework_rejected() {
        assert!(Cli::try_parse_from(["nobundle", "--framework", "svelte"]).is_err());
    }

    #[test]
    fn test_project_root() {
        let cwd = Path::new("/work");
        assert_eq!(project_root(cwd, None), PathBuf::from("/work"));
        assert_eq!(project_root(cwd, Some(Path::new("app"))), PathBuf::from("/work/app"));
        assert_eq!(project_root(cwd, Some(Path::new("/abs"))), PathBuf::from("/abs"));
    }
}
