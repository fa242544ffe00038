//! Strata CLI - offline inspection of archives and segments
//!
//! Reads raw header regions and bitmap records dumped from a device, and
//! derives segment status from a file of replica reports.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use strata_archive::{ArchiveHeaderCodec, ArchiveMetadata, ArchiveType, BitmapKind, SegmentUnitBitmap};
use strata_common::{
    ArchiveId, Error, FormatError, HeaderChecksum, SegId, StrataConfig, VolumeId, now_millis,
};
use strata_segment::{SegmentMetadata, SegmentUnitReport, VolumeType};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata-cli")]
#[command(about = "Strata archive and segment inspection")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "strata.toml", env = "STRATA_CONFIG")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a fresh archive header
    Format {
        /// Output file
        file: PathBuf,
        /// Archive ID to record
        #[arg(long)]
        archive_id: u64,
        #[arg(long, value_enum, default_value = "raw")]
        archive_type: TypeArg,
        #[arg(long, value_enum, default_value = "crc32c")]
        checksum: ChecksumArg,
    },
    /// Decode and verify an archive header
    Header {
        /// File holding the header region
        file: PathBuf,
        /// Fail unless the header has this type
        #[arg(long, value_enum)]
        expect: Option<TypeArg>,
        #[arg(long, value_enum, default_value = "crc32c")]
        checksum: ChecksumArg,
        /// Also dump the raw metadata blob as hex
        #[arg(long)]
        raw: bool,
    },
    /// Decode a segment unit bitmap record
    Bitmap {
        /// File holding the bitmap record
        file: PathBuf,
        /// Largest page count accepted; defaults to the configured pages per segment
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Derive segment status from replica reports
    Status {
        /// JSON array of replica reports
        reports: PathBuf,
        #[arg(long, default_value = "regular")]
        volume_type: VolumeType,
        #[arg(long, default_value_t = 0)]
        volume: u64,
        #[arg(long, default_value_t = 0)]
        index: u32,
        /// Evaluate at this time (ms since epoch) instead of now
        #[arg(long)]
        now: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TypeArg {
    Raw,
    Unsettled,
}

impl From<TypeArg> for ArchiveType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Raw => Self::RawDisk,
            TypeArg::Unsettled => Self::UnsettledDisk,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChecksumArg {
    None,
    Crc32c,
    Xxh64,
}

impl From<ChecksumArg> for HeaderChecksum {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::None => Self::None,
            ChecksumArg::Crc32c => Self::Crc32c,
            ChecksumArg::Xxh64 => Self::Xxh64,
        }
    }
}

/// Configuration file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    #[serde(flatten)]
    strata: StrataConfig,
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn format_archive(
    config: &StrataConfig,
    file: &Path,
    archive_id: u64,
    archive_type: ArchiveType,
    checksum: HeaderChecksum,
    out: &mut impl Write,
) -> Result<()> {
    let codec = ArchiveHeaderCodec::from_options(&config.archive);
    let mut metadata = ArchiveMetadata::new(ArchiveId::new(archive_id), archive_type);
    metadata.page_size = config.archive.page_size();
    metadata.created_time = now_millis();
    metadata.updated_time = metadata.created_time;

    let header = metadata.to_header(&codec, checksum)?;
    std::fs::write(file, &header).with_context(|| format!("writing {}", file.display()))?;
    info!("formatted {} as {}", file.display(), archive_type);
    writeln!(
        out,
        "wrote {} header ({} bytes) to {}",
        archive_type,
        header.len(),
        file.display()
    )?;
    Ok(())
}

fn show_header(
    config: &StrataConfig,
    file: &Path,
    expect: Option<ArchiveType>,
    checksum: HeaderChecksum,
    raw: bool,
    out: &mut impl Write,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let codec = ArchiveHeaderCodec::from_options(&config.archive);

    let metadata = match ArchiveMetadata::from_header(&codec, &data, expect, checksum) {
        Ok(metadata) => metadata,
        Err(e) if e.is_unformatted() => {
            writeln!(out, "{}: not formatted", file.display())?;
            return Ok(());
        }
        Err(Error::Format(FormatError::TypeMismatch { expected, found })) => {
            bail!("{} belongs to another format: expected {expected}, found {found}", file.display());
        }
        Err(e) => return Err(e).with_context(|| format!("decoding {}", file.display())),
    };

    writeln!(out, "type: {}", metadata.archive_type())?;
    writeln!(out, "status: {}", metadata.status())?;
    writeln!(out, "{}", serde_json::to_string_pretty(&metadata)?)?;
    if raw {
        let header = codec.decode(&data, expect)?;
        writeln!(out, "checksum: {:016x}", header.checksum)?;
        writeln!(out, "metadata: {}", hex::encode(&header.metadata))?;
    }
    Ok(())
}

fn show_bitmap(
    config: &StrataConfig,
    file: &Path,
    max_pages: Option<u32>,
    out: &mut impl Write,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let max_pages = max_pages.unwrap_or_else(|| config.archive.page_count_per_segment());
    let bitmap = SegmentUnitBitmap::decode(&data, max_pages)
        .with_context(|| format!("decoding bitmap {}", file.display()))?;
    let pages = bitmap.page_count();
    let written = bitmap.cardinality(BitmapKind::Data);
    debug!("decoded bitmap of {} pages from {}", pages, file.display());

    writeln!(out, "pages: {pages}")?;
    writeln!(out, "written: {written}")?;
    writeln!(out, "free: {}", pages - written)?;
    writeln!(
        out,
        "migrating: {}",
        bitmap.cardinality(BitmapKind::Migration)
    )?;
    match bitmap.next_clear(BitmapKind::Data, 0) {
        Some(page) => writeln!(out, "first free page: {page}")?,
        None => writeln!(out, "first free page: none")?,
    }
    Ok(())
}

fn derive_status(
    config: &StrataConfig,
    reports: &Path,
    volume_type: VolumeType,
    seg_id: SegId,
    now: u64,
    out: &mut impl Write,
) -> Result<()> {
    let text =
        std::fs::read_to_string(reports).with_context(|| format!("reading {}", reports.display()))?;
    let reports: Vec<SegmentUnitReport> = serde_json::from_str(&text)
        .with_context(|| format!("parsing reports {}", reports.display()))?;
    if reports.is_empty() {
        warn!("no replica reports for segment {}", seg_id);
    }

    let segment = SegmentMetadata::new(seg_id, seg_id.index);
    let pages = config.archive.page_count_per_segment();
    for report in reports {
        segment.put_unit(std::sync::Arc::new(report.into_unit(seg_id, volume_type, pages)));
    }

    let refresh = segment.refresh_status(
        now,
        config.segment.report_timeout(),
        &volume_type.quorum(),
        &volume_type,
    );
    writeln!(out, "segment: {seg_id}")?;
    if let Some(membership) = segment.latest_membership() {
        writeln!(out, "membership: {membership}")?;
    }
    for id in &refresh.evicted {
        writeln!(out, "evicted: {id}")?;
    }
    writeln!(out, "writable units: {}", refresh.counts.writable_unit_number())?;
    writeln!(out, "status: {}", refresh.status)?;
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(&args.config)?;

    // CLI log level wins over the config file when set
    let log_level = if args.log_level == "warn" {
        config.logging.level.clone()
    } else {
        args.log_level.clone()
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let strata = &config.strata;
    let mut out = std::io::stdout().lock();
    match args.command {
        Commands::Format {
            file,
            archive_id,
            archive_type,
            checksum,
        } => format_archive(
            strata,
            &file,
            archive_id,
            archive_type.into(),
            checksum.into(),
            &mut out,
        ),
        Commands::Header {
            file,
            expect,
            checksum,
            raw,
        } => show_header(
            strata,
            &file,
            expect.map(Into::into),
            checksum.into(),
            raw,
            &mut out,
        ),
        Commands::Bitmap { file, max_pages } => show_bitmap(strata, &file, max_pages, &mut out),
        Commands::Status {
            reports,
            volume_type,
            volume,
            index,
            now,
        } => derive_status(
            strata,
            &reports,
            volume_type,
            SegId::new(VolumeId::new(volume), index),
            now.unwrap_or_else(now_millis),
            &mut out,
        ),
    }
}
