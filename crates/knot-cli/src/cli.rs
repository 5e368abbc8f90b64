use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "knot",
    about = "Knot: content-addressed feeds of typed records",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Database file
    #[arg(long, global = true, default_value = "knot.db")]
    pub db: PathBuf,

    /// Container settings (toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

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
    /// Create a feed and save its first, empty root
    Init(FeedArgs),
    /// Append notes to a feed and save
    Append(AppendArgs),
    /// Remove the last entry of a feed and save
    Pop(FeedArgs),
    /// List the entries of a feed's latest root
    Refs(RefsArgs),
    /// List every saved root of a feed
    Roots(FeedArgs),
    /// List stored schemas
    Schemas,
}

#[derive(Args)]
pub struct FeedArgs {
    pub feed: String,
}

#[derive(Args)]
pub struct AppendArgs {
    pub feed: String,
    #[arg(required = true)]
    pub texts: Vec<String>,
}

#[derive(Args)]
pub struct RefsArgs {
    pub feed: String,
    /// Resolve every entry
    #[arg(long)]
    pub eager: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["knot", "init", "notes"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.feed, "notes");
        } else { panic!("wrong command"); }
        assert_eq!(cli.db, PathBuf::from("knot.db"));
    }

    #[test]
    fn parse_append() {
        let cli = Cli::try_parse_from(["knot", "append", "notes", "a", "b"]).unwrap();
        if let Command::Append(args) = cli.command {
            assert_eq!(args.feed, "notes");
            assert_eq!(args.texts, vec!["a", "b"]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn append_needs_text() {
        assert!(Cli::try_parse_from(["knot", "append", "notes"]).is_err());
    }

    #[test]
    fn parse_refs_eager() {
        let cli = Cli::try_parse_from(["knot", "refs", "notes", "--eager"]).unwrap();
        if let Command::Refs(args) = cli.command {
            assert!(args.eager);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_schemas() {
        let cli = Cli::try_parse_from(["knot", "schemas"]).unwrap();
        assert!(matches!(cli.command, Command::Schemas));
    }

    #[test]
    fn parse_globals() {
        let cli = Cli::try_parse_from([
            "knot", "roots", "notes", "--db", "/tmp/x.db", "--config", "k.toml", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        assert_eq!(cli.config, Some(PathBuf::from("k.toml")));
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["knot", "--format", "json", "schemas"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
