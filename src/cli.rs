use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize a single record and print the response as JSON
    Normalize {
        /// Tenant the record belongs to
        #[arg(short, long)]
        tenant: String,

        /// Record identifier
        #[arg(short, long, default_value = "cli")]
        record_id: String,

        /// Record type (email_subject, email_body, meeting_title, meeting_description,
        /// call_note, crm_note, deal_update, custom)
        #[arg(long = "type", default_value = "custom")]
        record_type: String,

        /// Source language; detected when omitted
        #[arg(short, long)]
        source_lang: Option<String>,

        /// Target language (defaults to the configured pipeline target)
        #[arg(long)]
        target_lang: Option<String>,

        /// Preferred provider for this tenant (google, deepl)
        #[arg(short, long)]
        provider: Option<String>,

        /// Terms to keep untranslated (comma-separated)
        #[arg(short, long)]
        glossary: Option<String>,

        /// Text to normalize
        text: String,
    },

    /// Normalize batch request files (a JSON file or a directory of them)
    Batch {
        /// Batch file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for `<name>.normalized.json` results (defaults to next to each input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Processing mode: sequential or concurrent
        #[arg(short, long, default_value = "sequential")]
        mode: String,

        /// Window size for concurrent mode
        #[arg(long)]
        concurrency: Option<usize>,

        /// Preferred provider for the tenant (google, deepl)
        #[arg(short, long)]
        provider: Option<String>,

        /// Terms to keep untranslated (comma-separated)
        #[arg(short, long)]
        glossary: Option<String>,
    },

    /// Detect the language of a text
    Detect {
        /// Text to inspect
        text: String,
    },

    /// Show provider availability and supported languages
    Providers {
        /// Also fetch each configured provider's language list
        #[arg(long)]
        languages: bool,
    },

    /// Inspect or reset circuit breakers
    Breakers {
        #[command(subcommand)]
        action: BreakerAction,
    },

    /// Manage the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "textgate.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum BreakerAction {
    /// Print breaker snapshots
    Show {
        /// Provider name; all breakers when omitted
        name: Option<String>,
    },

    /// Force a breaker back to closed
    Reset {
        /// Provider name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove cached entries matching a pattern
    Invalidate {
        /// Glob pattern, e.g. "translation:*"
        #[arg(default_value = "translation:*")]
        pattern: String,
    },

    /// Show hit/miss counters for this process
    Stats,
}

/// Split a comma-separated list, dropping empty entries
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_normalize_command() {
        let args = Args::try_parse_from([
            "textgate", "normalize", "--tenant", "t1", "--source-lang", "es", "--glossary", "Acme, Widget",
            "Hola mundo",
        ])
        .unwrap();

        match args.command {
            Commands::Normalize { tenant, source_lang, glossary, text, record_type, .. } => {
                assert_eq!(tenant, "t1");
                assert_eq!(source_lang.as_deref(), Some("es"));
                assert_eq!(split_list(glossary.as_deref()), vec!["Acme", "Widget"]);
                assert_eq!(text, "Hola mundo");
                assert_eq!(record_type, "custom");
            }
            _ => panic!("expected normalize"),
        }
    }

    #[test]
    fn parses_nested_subcommands() {
        let args = Args::try_parse_from(["textgate", "-v", "breakers", "reset", "google"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Breakers { action: BreakerAction::Reset { ref name } } if name == "google"));

        let args = Args::try_parse_from(["textgate", "cache", "invalidate"]).unwrap();
        assert!(matches!(args.command, Commands::Cache { action: CacheAction::Invalidate { ref pattern } } if pattern == "translation:*"));
    }

    #[test]
    fn empty_list_entries_are_dropped() {
        assert!(split_list(None).is_empty());
        assert_eq!(split_list(Some("a,,b ,")), vec!["a", "b"]);
    }
}
