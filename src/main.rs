//! CLI entry point for `mailvault`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mailvault::config::{self, Config};
use mailvault::decoder::MboxDecoder;
use mailvault::{destroy_list, Archive, ErrorCode, ExportConf, Exporter, Record};

#[derive(Parser)]
#[command(
    name = "mailvault",
    version,
    about = "List and export the contents of mail archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not read or write the sidecar index
    #[arg(long, global = true)]
    no_index: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List every record of an archive
    List {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Export records to files and directories
    Export {
        path: PathBuf,
        /// Output directory (created if missing)
        #[arg(short, long)]
        output: PathBuf,
        /// separate | mbox
        #[arg(long)]
        mode: Option<String>,
        /// native | unix | dos
        #[arg(long)]
        output_mode: Option<String>,
        /// normal | vcard | skip
        #[arg(long)]
        contact_mode: Option<String>,
        /// include | exclude
        #[arg(long)]
        deleted_mode: Option<String>,
        /// Maximum characters in a generated file name
        #[arg(long, allow_negative_numbers = true)]
        name_len: Option<i64>,
        /// Accepted extension (repeatable, default: all)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,
        /// overwrite | rename
        #[arg(long)]
        collision: Option<String>,
        /// Export every leaf record into the output directory instead of
        /// the top-level records
        #[arg(long)]
        flat: bool,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file location
    Path,
    /// Print the effective configuration as TOML
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    if cli.no_index {
        config.archive.persist_index = false;
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::List { path, json } => cmd_list(&path, json, &config),
        Commands::Export {
            path,
            output,
            mode,
            output_mode,
            contact_mode,
            deleted_mode,
            name_len,
            extensions,
            collision,
            flat,
        } => {
            let mut conf = config.export.clone();
            override_with(&mut conf.mode, mode);
            override_with(&mut conf.output_mode, output_mode);
            override_with(&mut conf.contact_mode, contact_mode);
            override_with(&mut conf.deleted_mode, deleted_mode);
            override_with(&mut conf.collision, collision);
            if let Some(len) = name_len {
                conf.file_name_len = len;
            }
            if !extensions.is_empty() {
                conf.acceptable_extensions = extensions;
            }
            conf.output_dir = Some(output);
            cmd_export(&path, conf, flat, &config)
        }
        Commands::Config { action } => cmd_config(action, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

fn override_with(slot: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_dir = log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config::cache_dir(config));
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path.file_name().unwrap_or_default();
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Manage the configuration file.
fn cmd_config(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if let Some(path) = config::config_file_path() {
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to replace it)",
                        path.display()
                    );
                }
            }
            let path = config::save_config(&Config::default())?;
            println!("  Wrote {}", path.display());
        }
        ConfigAction::Path => match config::config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("Could not determine config file path"),
        },
        ConfigAction::Show => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailvault", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Open an archive, turning a failed open into an error.
fn open_archive(path: &Path, config: &Config) -> anyhow::Result<Archive> {
    let decoder = MboxDecoder::from_config(config);
    let archive = Archive::open_with(&decoder, path);
    if archive.error_code() != ErrorCode::NoError {
        anyhow::bail!(
            "{} ({}): {}",
            path.display(),
            archive.error_code(),
            archive.last_error().unwrap_or("unknown error")
        );
    }
    Ok(archive)
}

/// List all records of an archive.
fn cmd_list(path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let mut archive = open_archive(path, config)?;
    let mut records = archive.list()?;

    if json {
        print_records_json(&records)?;
    } else {
        print_records_table(path, &records);
    }

    destroy_list(&mut records)?;
    archive.destroy()?;
    Ok(())
}

/// Export records of an archive into an output directory.
fn cmd_export(path: &Path, conf: ExportConf, flat: bool, config: &Config) -> anyhow::Result<()> {
    let mut exporter = Exporter::new(&conf)?;
    if let Some(dir) = &conf.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut archive = open_archive(path, config)?;
    let mut records = archive.list()?;
    let selected: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| if flat { !r.is_container() } else { r.depth() == 0 })
        .map(|(i, _)| i)
        .collect();

    println!(
        "  Exporting {} record(s) to {}",
        selected.len(),
        conf.output_dir.as_deref().unwrap_or(Path::new(".")).display()
    );

    let pb = ProgressBar::new(selected.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Exporting [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut bytes: u64 = 0;
    for &i in &selected {
        bytes += records[i].export(&exporter)?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let failed: Vec<&Record> = selected
        .iter()
        .map(|&i| &records[i])
        .filter(|r| !r.error_code().is_ok())
        .collect();

    println!();
    println!("  {:<20} {}", "Records exported", selected.len() - failed.len());
    println!("  {:<20} {}", "Records failed", failed.len());
    println!("  {:<20} {}", "Bytes written", format_size(bytes, BINARY));
    println!("  {:<20} {:.2?}", "Elapsed", start.elapsed());
    if !failed.is_empty() {
        println!();
        for record in &failed {
            println!(
                "    #{:<5} {:<32} {}",
                record.index(),
                record.error_code(),
                record.name()
            );
        }
    }
    println!();

    destroy_list(&mut records)?;
    exporter.destroy()?;
    archive.destroy()?;
    Ok(())
}

/// Print records as an indented table.
fn print_records_table(path: &Path, records: &[Record]) {
    println!();
    println!("  {} record(s) in {}", records.len(), path.display());
    println!();
    println!(
        "  {:<5} {:<11} {:>9}  {:<7} {}",
        "#", "Kind", "Size", "Flags", "Name"
    );
    println!("  {}", "-".repeat(72));

    for record in records {
        let mut flags = String::new();
        if record.is_deleted() {
            flags.push('D');
        }
        if !record.error_code().is_ok() {
            flags.push('!');
        }
        let indent = "  ".repeat(record.depth());
        let name: String = record.name().chars().take(60).collect();
        println!(
            "  {:<5} {:<11} {:>9}  {:<7} {indent}{name}",
            record.index(),
            record.kind().as_str(),
            format_size(record.size(), BINARY),
            flags,
        );
    }
    println!();
}

/// Print records as JSON.
fn print_records_json(records: &[Record]) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            let info = r.info();
            serde_json::json!({
                "index": r.index(),
                "id": r.id(),
                "parent": r.parent(),
                "depth": r.depth(),
                "kind": r.kind().as_str(),
                "name": r.name(),
                "container": r.is_container(),
                "deleted": r.is_deleted(),
                "size": r.size(),
                "sender": info.sender,
                "date": info.date.map(|d| d.to_rfc3339()),
                "status": r.error_code().as_str(),
            })
        })
        .collect();

    let output = serde_json::json!({
        "record_count": records.len(),
        "records": items,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
