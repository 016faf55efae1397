use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use lineartv_core::{
    load_lineartv_config, segment_refs, ChannelRecord, LinearTvConfig, Slot, PUBLIC_STREAM,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] lineartv_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "LinearTV channel control interface", long_about = None)]
pub struct Cli {
    /// Path to the main lineartv.toml
    #[arg(long, default_value = "configs/lineartv.toml")]
    pub config: PathBuf,
    /// Alternative path for channels.json
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarized status of every channel
    Status,
    /// Queue contents of one channel
    Queue(ChannelArgs),
    /// Projected schedule of one channel
    Schedule(ChannelArgs),
    /// Integrity checks over config, catalog and output directories
    Health,
}

#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Channel identifier
    pub channel: String,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Status => {
            let report = context.gather_status()?;
            render(&report, cli.format)
        }
        Commands::Queue(args) => {
            let queue = context.queue_show(&args.channel)?;
            render(&queue, cli.format)
        }
        Commands::Schedule(args) => {
            let schedule = context.schedule_show(&args.channel)?;
            render(&schedule, cli.format)
        }
        Commands::Health => {
            let report = context.health_check()?;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
            Ok(())
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: LinearTvConfig,
    config_path: PathBuf,
    catalog_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_lineartv_config(&cli.config)?;
        let catalog_path = cli.catalog.clone().unwrap_or_else(|| config.catalog_path());
        Ok(Self {
            config,
            config_path: cli.config.clone(),
            catalog_path,
        })
    }

    fn read_catalog(&self) -> Result<std::collections::BTreeMap<String, ChannelRecord>> {
        let raw = fs::read_to_string(&self.catalog_path).map_err(|_| {
            AppError::MissingResource(format!("catalog missing: {}", self.catalog_path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let catalog = self.read_catalog()?;
        let rows = catalog
            .into_iter()
            .map(|(id, record)| {
                let dir = self.config.channel_dir(&id);
                let on_air = published_segment_count(&dir).unwrap_or(0) >= 2;
                ChannelStatusRow {
                    id,
                    name: record.name,
                    current_movie: record.current_movie.map(|current| current.title),
                    queue_length: record.queue.len(),
                    on_air,
                }
            })
            .collect();
        Ok(StatusReport { rows })
    }

    fn queue_show(&self, channel: &str) -> Result<QueueList> {
        let record = self.channel_record(channel)?;
        let rows = record
            .queue
            .into_iter()
            .enumerate()
            .map(|(index, movie)| QueueEntry {
                position: index + 1,
                title: movie.title,
                added_by: movie.added_by,
                file_size: movie.file_size,
            })
            .collect();
        Ok(QueueList { rows })
    }

    fn schedule_show(&self, channel: &str) -> Result<ScheduleList> {
        let record = self.channel_record(channel)?;
        Ok(ScheduleList {
            rows: record.schedule,
        })
    }

    fn channel_record(&self, channel: &str) -> Result<ChannelRecord> {
        self.read_catalog()?
            .remove(channel)
            .ok_or_else(|| AppError::MissingResource(format!("unknown channel: {channel}")))
    }

    fn health_check(&self) -> Result<Vec<HealthEntry>> {
        let mut results = Vec::new();
        results.push(check_path("lineartv.toml", &self.config_path));
        results.push(check_path("ad media", &self.config.ad_path()));
        let logs_dir = self.config.resolve_path(&self.config.paths.logs_dir);
        if logs_dir.is_dir() {
            results.push(HealthEntry::ok("logs", format!("{}", logs_dir.display())));
        } else {
            results.push(HealthEntry::warn(
                "logs",
                format!("{} missing", logs_dir.display()),
            ));
        }

        match self.read_catalog() {
            Ok(catalog) => {
                results.push(HealthEntry::ok(
                    "channels.json",
                    format!("{} channels", catalog.len()),
                ));
                for (id, _) in catalog {
                    let dir = self.config.channel_dir(&id);
                    if !dir.is_dir() {
                        results.push(HealthEntry::warn(
                            format!("channel {id}"),
                            format!("{} missing", dir.display()),
                        ));
                        continue;
                    }
                    match published_segment_count(&dir) {
                        Some(count) if count >= 2 => results.push(HealthEntry::ok(
                            format!("channel {id}"),
                            format!("published playlist lists {count} segments"),
                        )),
                        Some(count) => results.push(HealthEntry::warn(
                            format!("channel {id}"),
                            format!("published playlist lists only {count} segments"),
                        )),
                        None => results.push(HealthEntry::warn(
                            format!("channel {id}"),
                            "no published playlist".to_string(),
                        )),
                    }
                }
            }
            Err(err) => results.push(HealthEntry::error("channels.json", err.to_string())),
        }
        Ok(results)
    }
}

/// Segment references in a channel's published playlist, whichever slot it
/// points at.
fn published_segment_count(dir: &Path) -> Option<usize> {
    let text = fs::read_to_string(dir.join(PUBLIC_STREAM)).ok()?;
    Some(segment_refs(&text, Slot::A).len() + segment_refs(&text, Slot::B).len())
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub rows: Vec<ChannelStatusRow>,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatusRow {
    pub id: String,
    pub name: String,
    pub current_movie: Option<String>,
    pub queue_length: usize,
    pub on_air: bool,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no channels registered".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            lines.push(format!(
                "{id} | {name} | now={now} | queued={queued} | {air}",
                id = row.id,
                name = row.name,
                now = row.current_movie.as_deref().unwrap_or("(ad loop)"),
                queued = row.queue_length,
                air = if row.on_air { "on air" } else { "off air" },
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct QueueList {
    pub rows: Vec<QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct QueueEntry {
    pub position: usize,
    pub title: String,
    pub added_by: String,
    pub file_size: u64,
}

impl DisplayFallback for QueueList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "queue empty".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            lines.push(format!(
                "#{position} {title} (by {added_by}, {file_size} bytes)",
                position = entry.position,
                title = entry.title,
                added_by = entry.added_by,
                file_size = entry.file_size,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleList {
    pub rows: Vec<lineartv_core::ScheduleRow>,
}

impl DisplayFallback for ScheduleList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "schedule empty".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            lines.push(format!(
                "{start}-{end} {title}{marker}",
                start = row.start_time,
                end = row.end_time,
                title = row.title,
                marker = if row.current { " (now)" } else { "" },
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name} — {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineartv_core::CatalogStore;
    use tempfile::TempDir;

    fn prepare_context(temp: &TempDir) -> AppContext {
        let root = temp.path();
        fs::create_dir_all(root.join("configs")).unwrap();
        fs::write(root.join("ad.mp4"), b"ad").unwrap();
        let config_path = root.join("configs/lineartv.toml");
        fs::write(
            &config_path,
            format!(
                r#"
                [paths]
                base_dir = "{base}"
                hls_output_dir = "hls_output"
                catalog_file = "channels.json"
                ad_file = "ad.mp4"
                logs_dir = "logs"

                [transcoder]
                ffmpeg = "/usr/bin/ffmpeg"
                ffprobe = "/usr/bin/ffprobe"
                log_level = "error"
                segment_seconds = 2
                window_segments = 6
                watermark = "LinearTV"
                "#,
                base = root.display()
            ),
        )
        .unwrap();

        let store = CatalogStore::open(root.join("channels.json")).unwrap();
        store.upsert_channel("films", "Films").unwrap();
        store
            .append_movie(
                "films",
                lineartv_core::Movie {
                    title: "Queued Movie".to_string(),
                    file_path: root.join("queued.mp4"),
                    added_by: "operator".to_string(),
                    added_at: chrono_now(),
                    file_size: 1024,
                    format: None,
                },
            )
            .unwrap();

        let cli = Cli {
            config: config_path,
            catalog: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        AppContext::new(&cli).unwrap()
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    #[test]
    fn status_lists_registered_channels() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(&temp);
        let report = context.gather_status().unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].id, "films");
        assert_eq!(report.rows[0].queue_length, 1);
        assert!(!report.rows[0].on_air);
    }

    #[test]
    fn queue_show_returns_entries_in_order() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(&temp);
        let queue = context.queue_show("films").unwrap();
        assert_eq!(queue.rows.len(), 1);
        assert_eq!(queue.rows[0].position, 1);
        assert_eq!(queue.rows[0].title, "Queued Movie");
    }

    #[test]
    fn unknown_channel_is_reported() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(&temp);
        assert!(matches!(
            context.queue_show("ghost"),
            Err(AppError::MissingResource(_))
        ));
    }

    #[test]
    fn health_flags_missing_output_directory() {
        let temp = TempDir::new().unwrap();
        let context = prepare_context(&temp);
        let report = context.health_check().unwrap();
        assert!(report
            .iter()
            .any(|entry| matches!(entry.status, CheckStatus::Warn)));
    }
}
