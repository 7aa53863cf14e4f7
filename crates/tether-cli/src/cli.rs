use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tether",
    about = "tether: offload analysis to a worker process over synchronized snapshots",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve a host over stdin/stdout
    Worker(WorkerArgs),
    /// Load a directory and analyze it in a worker
    Analyze(AnalyzeArgs),
    /// Print the snapshot checksum of a directory
    Checksum(ChecksumArgs),
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Persistent cache directory for the worker's content store
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    /// Number of cached results
    #[arg(long)]
    pub cache_capacity: Option<usize>,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    pub path: PathBuf,
    /// Also search every document for this text
    #[arg(long)]
    pub find: Option<String>,
    /// Worker executable (defaults to this executable)
    #[arg(long)]
    pub worker: Option<PathBuf>,
    /// Run the worker inside this process
    #[arg(long)]
    pub in_process: bool,
}

#[derive(Args)]
pub struct ChecksumArgs {
    pub path: PathBuf,
    /// Show project and document checksums
    #[arg(long)]
    pub tree: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_worker() {
        let cli = Cli::try_parse_from(["tether", "worker", "--cache-dir", "/tmp/c"]).unwrap();
        if let Command::Worker(args) = cli.command {
            assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/c")));
            assert_eq!(args.cache_capacity, None);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_analyze() {
        let cli = Cli::try_parse_from(["tether", "analyze", "src", "--find", "TODO", "--in-process"])
            .unwrap();
        if let Command::Analyze(args) = cli.command {
            assert_eq!(args.path, PathBuf::from("src"));
            assert_eq!(args.find.as_deref(), Some("TODO"));
            assert!(args.in_process);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_checksum_json() {
        let cli = Cli::try_parse_from(["tether", "--format", "json", "checksum", ".", "--tree"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Checksum(ChecksumArgs { tree: true, .. })));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tether", "checksum", ".", "-v", "--config", "t.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(Cli::try_parse_from(["tether", "analyze"]).is_err());
    }
}
