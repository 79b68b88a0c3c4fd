//! qrgate - admin CLI for QR-token gated generation

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use qrgate_core::models::{Theme, TokenSummary};
use qrgate_core::{Gate, GateConfig, GateError, ProvisionRequest, StyleBudget};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "qrgate",
    version,
    about = "Admin tooling for QR-token gated generation",
    long_about = "Provision and inspect access tokens, dry-run admission checks, and\n\
                  manage the caption/story result cache.\n\
                  \n\
                  Examples:\n\
                    qrgate tokens generate --count 20 --theme fire   # Provision a batch\n\
                    qrgate tokens list                               # All tokens\n\
                    qrgate tokens show 'http://host/?token=123'      # Token by id or URL\n\
                    qrgate check 123 --image photo.jpg --style ink   # Would this be admitted?\n\
                    qrgate cache stats                               # Cache entry counts\n\
                    qrgate cache export ./backup                     # Dump cache as JSON\n\
                  \n\
                  Environment Variables:\n\
                    QRGATE_DATA_DIR                  # Token file, cache and config location\n\
                    QRGATE_FORMAT                    # Force output format: json|table\n\
                    QRGATE_NO_COLOR                  # Disable ANSI colors (log-friendly)\n\
                    RUST_LOG                         # Log filter (default: qrgate=info)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data directory (default: platform data dir + /qrgate)
    #[arg(long, env = "QRGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Force output format (json|table)
    #[arg(long, env = "QRGATE_FORMAT", value_parser = ["json", "table"])]
    format: Option<String>,

    /// Disable ANSI colors (log-friendly)
    #[arg(long, env = "QRGATE_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Provision and inspect access tokens
    Tokens {
        #[command(subcommand)]
        action: TokensCommand,
    },
    /// Dry-run the admission checks for a token and image (nothing is recorded)
    Check {
        /// Token id or access URL
        token: String,
        /// Image file to fingerprint
        #[arg(long, short = 'i')]
        image: PathBuf,
        /// Style key (default: the theme's default style)
        #[arg(long, short = 's', default_value = "")]
        style: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and move the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Show or initialize the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum TokensCommand {
    /// Create a batch of fresh tokens
    Generate {
        /// Number of tokens (1-100)
        #[arg(long, short = 'n', default_value = "10")]
        count: usize,
        /// Theme the tokens are bound to (ice|fire)
        #[arg(long, short = 't', default_value = "ice")]
        theme: Theme,
        /// Id prefix ([A-Za-z0-9_-])
        #[arg(long, default_value = "")]
        prefix: String,
        /// Generations allowed per token
        #[arg(long, default_value = "10")]
        max_uses: u32,
        /// Days until generation closes (midnight UTC)
        #[arg(long, default_value = "2")]
        usage_days: i64,
        /// Days until viewing closes (midnight UTC)
        #[arg(long, default_value = "9")]
        access_days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one token in detail
    Show {
        /// Token id or access URL
        token: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all tokens
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Entry counts and recent samples
    Stats {
        /// Samples per namespace
        #[arg(long, short = 'n', default_value = "5")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write both namespaces as JSON files into a directory
    Export {
        /// Target directory
        dir: PathBuf,
    },
    /// Merge JSON files from a directory; existing keys are kept
    Import {
        /// Source directory
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let data_dir = cli
        .data_dir
        .or_else(|| dirs::data_dir().map(|d: PathBuf| d.join("qrgate")))
        .context("Could not determine data directory")?;

    // --format json forces JSON for every command
    let force_json = cli.format.as_deref() == Some("json");
    let no_color = cli.no_color;

    match cli.command {
        Command::Tokens { action } => match action {
            TokensCommand::Generate {
                count,
                theme,
                prefix,
                max_uses,
                usage_days,
                access_days,
                json,
            } => {
                let request = ProvisionRequest {
                    count,
                    theme,
                    prefix,
                    max_usage_count: max_uses,
                    usage_days,
                    access_days,
                };
                run_generate(&data_dir, &request, json || force_json, no_color)?;
            }
            TokensCommand::Show { token, json } => {
                run_show(&data_dir, &token, json || force_json)?;
            }
            TokensCommand::List { json } => {
                run_list(&data_dir, json || force_json, no_color)?;
            }
        },
        Command::Check {
            token,
            image,
            style,
            json,
        } => {
            run_check(&data_dir, &token, &image, &style, json || force_json)?;
        }
        Command::Cache { action } => match action {
            CacheCommand::Stats { limit, json } => {
                run_cache_stats(&data_dir, limit, json || force_json, no_color)?;
            }
            CacheCommand::Export { dir } => run_cache_export(&data_dir, &dir)?,
            CacheCommand::Import { dir } => run_cache_import(&data_dir, &dir)?,
        },
        Command::Config { action } => match action {
            ConfigCommand::Show => run_config_show(&data_dir)?,
            ConfigCommand::Init { force } => run_config_init(&data_dir, force)?,
        },
    }

    Ok(())
}

/// Logs go to stderr so `--json` output stays pipeable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("qrgate=info,qrgate_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_gate(data_dir: &Path) -> Result<Gate> {
    let config = GateConfig::load(data_dir)?;
    Gate::open(data_dir, config)
        .with_context(|| format!("Failed to open gate in {}", data_dir.display()))
}

fn summary_row(gate: &Gate, summary: TokenSummary) -> (TokenSummary, String) {
    let url = gate.config().access_url(&summary.token_id);
    (summary, url)
}

fn run_generate(data_dir: &Path, request: &ProvisionRequest, json: bool, no_color: bool) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let now = Utc::now();
    let budget = gate.config().style_budget;

    let created = gate.provision(request, now)?;
    if created.len() < request.count {
        eprintln!(
            "{} of {} ids already existed and were skipped",
            request.count - created.len(),
            request.count
        );
    }

    let rows: Vec<_> = created
        .iter()
        .map(|token| summary_row(&gate, TokenSummary::from_token(token, now.timestamp(), budget)))
        .collect();
    println!("{}", cli::format_token_table(&rows, json, no_color));

    gate.shutdown()?;
    Ok(())
}

fn run_show(data_dir: &Path, input: &str, json: bool) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let view = token_view(&gate, input, Utc::now().timestamp())?;
    println!("{}", cli::format_token_info(&view, json));
    Ok(())
}

/// Admin view: expired tokens are still shown
fn token_view(gate: &Gate, input: &str, now: i64) -> Result<cli::TokenView> {
    let token_id = cli::resolve_token_arg(input)?;
    let config = gate.config();

    let token = gate
        .store()
        .get(&token_id)
        .ok_or_else(|| GateError::NotFound {
            token_id: token_id.clone(),
        })?;
    let catalog = config.catalog(token.theme)?;
    let availability = StyleBudget::new(config.style_budget).availability(&token, &catalog);

    Ok(cli::TokenView::new(
        TokenSummary::from_token(&token, now, config.style_budget),
        config.access_url(&token_id),
        availability,
    ))
}

fn run_list(data_dir: &Path, json: bool, no_color: bool) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let rows = token_rows(&gate, Utc::now().timestamp());
    println!("{}", cli::format_token_table(&rows, json, no_color));
    Ok(())
}

fn token_rows(gate: &Gate, now: i64) -> Vec<(TokenSummary, String)> {
    let budget = gate.config().style_budget;
    gate.store()
        .snapshot()
        .into_values()
        .map(|token| summary_row(gate, TokenSummary::from_token(&token, now, budget)))
        .collect()
}

fn run_check(data_dir: &Path, input: &str, image: &Path, style: &str, json: bool) -> Result<()> {
    let token_id = cli::resolve_token_arg(input)?;
    let bytes = std::fs::read(image)
        .with_context(|| format!("Failed to read image: {}", image.display()))?;

    let gate = open_gate(data_dir)?;
    let admission = gate.admit(&token_id, style, &bytes, Utc::now().timestamp())?;
    println!("{}", cli::format_admission(&admission, json));
    Ok(())
}

fn run_cache_stats(data_dir: &Path, limit: usize, json: bool, no_color: bool) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let stats = gate.cache().stats(limit)?;
    println!("{}", cli::format_cache_stats(&stats, json, no_color));
    gate.shutdown()?;
    Ok(())
}

fn run_cache_export(data_dir: &Path, dir: &Path) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let report = gate.cache().export_json(dir)?;
    println!(
        "Exported {} captions and {} story prompts to {}",
        report.captions,
        report.stories,
        dir.display()
    );
    gate.shutdown()?;
    Ok(())
}

fn run_cache_import(data_dir: &Path, dir: &Path) -> Result<()> {
    let gate = open_gate(data_dir)?;
    let report = gate.cache().import_json(dir)?;
    println!(
        "Imported {} entries ({} already present) from {}",
        report.inserted,
        report.skipped,
        dir.display()
    );
    gate.shutdown()?;
    Ok(())
}

fn run_config_show(data_dir: &Path) -> Result<()> {
    let config = GateConfig::load(data_dir)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}

fn run_config_init(data_dir: &Path, force: bool) -> Result<()> {
    let path = data_dir.join(qrgate_core::config::CONFIG_FILE_NAME);
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    GateConfig::default().save(data_dir)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "qrgate", "tokens", "generate", "--count", "3", "--theme", "fire", "--prefix", "expo-",
        ])
        .unwrap();
        match cli.command {
            Command::Tokens {
                action:
                    TokensCommand::Generate {
                        count,
                        theme,
                        prefix,
                        max_uses,
                        ..
                    },
            } => {
                assert_eq!(count, 3);
                assert_eq!(theme, Theme::Fire);
                assert_eq!(prefix, "expo-");
                assert_eq!(max_uses, 10);
            }
            _ => panic!("expected tokens generate"),
        }
    }

    #[test]
    fn test_unknown_theme_rejected() {
        assert!(Cli::try_parse_from(["qrgate", "tokens", "generate", "--theme", "water"]).is_err());
    }

    #[test]
    fn test_generate_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let request = ProvisionRequest {
            count: 2,
            prefix: "cli-".to_string(),
            ..Default::default()
        };
        run_generate(dir.path(), &request, true, true).unwrap();

        let gate = open_gate(dir.path()).unwrap();
        assert_eq!(gate.store().len(), 2);
        let id = gate.store().ids().remove(0);
        drop(gate);

        let image = dir.path().join("photo.jpg");
        std::fs::write(&image, b"jpeg bytes").unwrap();
        run_check(dir.path(), &id, &image, "", true).unwrap();

        let err = run_check(dir.path(), &id, &image, "sepia", true).unwrap_err();
        assert!(err.to_string().contains("sepia"));
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        run_config_init(dir.path(), false).unwrap();
        assert!(run_config_init(dir.path(), false).is_err());
        run_config_init(dir.path(), true).unwrap();
        assert_eq!(GateConfig::load(dir.path()).unwrap(), GateConfig::default());
    }

    fn seed(data_dir: &Path, tokens: Vec<qrgate_core::models::Token>) {
        let gate = open_gate(data_dir).unwrap();
        for token in tokens {
            gate.store().insert_new(token);
        }
        gate.shutdown().unwrap();
    }

    #[test]
    fn test_show_expired_token() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            vec![qrgate_core::models::Token::new("old-1", Theme::Ice, 3, 0, 100, 200)],
        );
        run_show(dir.path(), "http://localhost:7860/?token=old-1", true).unwrap();

        let gate = open_gate(dir.path()).unwrap();
        let view = token_view(&gate, "old-1", 10_000).unwrap();
        assert_eq!(view.summary.token_id, "old-1");
        assert!(!view.summary.is_access_valid);
        assert!(!view.summary.is_usage_valid);
        assert_eq!(view.access_url, "http://localhost:7860/?token=old-1");
        assert_eq!(view.styles.len(), 4);

        // The holder-facing summary refuses the same token
        assert_eq!(gate.summary("old-1", 10_000).unwrap_err().kind(), "expired");

        let err = token_view(&gate, "missing", 10_000).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_list_includes_every_token() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            vec![
                qrgate_core::models::Token::new("a-1", Theme::Ice, 3, 0, 100, 200),
                qrgate_core::models::Token::new("b-1", Theme::Fire, 3, 0, 100, i64::MAX),
            ],
        );
        run_list(dir.path(), true, true).unwrap();

        let gate = open_gate(dir.path()).unwrap();
        let rows = token_rows(&gate, 1_000);
        let ids: Vec<&str> = rows.iter().map(|(s, _)| s.token_id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "b-1"]);
        assert!(rows[1].0.is_access_valid);
        assert!(rows[1].1.ends_with("?token=b-1"));
    }

    #[test]
    fn test_cache_export_import_round_trip() {
        use qrgate_core::cache::CacheNamespace;

        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();

        let gate = open_gate(source.path()).unwrap();
        gate.cache()
            .insert_if_absent(CacheNamespace::Caption, "img-hash", "a cat on a sofa")
            .unwrap();
        gate.cache()
            .insert_if_absent(CacheNamespace::Story, "story-key", "a prompt")
            .unwrap();
        gate.shutdown().unwrap();

        run_cache_export(source.path(), backup.path()).unwrap();
        run_cache_stats(source.path(), 5, true, true).unwrap();

        // Existing keys in the target are kept
        let gate = open_gate(target.path()).unwrap();
        gate.cache()
            .insert_if_absent(CacheNamespace::Caption, "img-hash", "kept")
            .unwrap();
        gate.shutdown().unwrap();

        run_cache_import(target.path(), backup.path()).unwrap();

        let gate = open_gate(target.path()).unwrap();
        let cache = gate.cache();
        assert_eq!(
            cache.get(CacheNamespace::Caption, "img-hash").unwrap().as_deref(),
            Some("kept")
        );
        assert_eq!(
            cache.get(CacheNamespace::Story, "story-key").unwrap().as_deref(),
            Some("a prompt")
        );
        let stats = cache.stats(5).unwrap();
        assert_eq!(stats.caption.entries, 1);
        assert_eq!(stats.story.entries, 1);
    }

    #[test]
    fn test_generate_rejects_out_of_range_days() {
        let dir = tempfile::tempdir().unwrap();
        let request = ProvisionRequest {
            usage_days: 100_000_000,
            ..Default::default()
        };
        let err = run_generate(dir.path(), &request, true, true).unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
    }
}
