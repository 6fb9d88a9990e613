//! Specstore command line tool
//!
//! Inspect, dump and convert spectrum matrices in any supported format

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use specstore::{
    copy_matrix, AccessMode, Config, FormatHint, Lc2Stats, MatrixHandle, MatrixInfo,
    MatrixStatus, OpenMode,
};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "spectool")]
#[command(about = "Inspect and convert spectrum matrices")]
struct Args {
    /// TOML file overriding backend and probe settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show format, extents and storage statistics
    Info {
        file: PathBuf,

        /// Format hint when the content cannot be detected, e.g. 4k.le4
        #[arg(short = 'F', long)]
        format: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print spectra, one per row
    Dump {
        file: PathBuf,

        #[arg(short = 'F', long)]
        format: Option<String>,

        /// Only this level
        #[arg(long)]
        level: Option<u32>,

        /// Only this line
        #[arg(long)]
        line: Option<u32>,
    },

    /// Copy a matrix into another format
    Convert {
        src: PathBuf,
        dst: PathBuf,

        /// Target format hint; extents default to those of the source
        #[arg(short = 'f', long)]
        format: String,

        /// Format hint for the source
        #[arg(long)]
        src_format: Option<String>,
    },
}

#[derive(Serialize)]
struct Report {
    path: PathBuf,
    info: MatrixInfo,
    status: MatrixStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    lc2: Option<Lc2Stats>,
}

fn open_read(path: &Path, hint: Option<&str>, config: &Config) -> Result<MatrixHandle> {
    let hint = hint
        .map(|h| h.parse::<FormatHint>())
        .transpose()
        .context("bad format hint")?;
    let mode = OpenMode {
        access: AccessMode::Read,
        hint,
    };
    MatrixHandle::open_with(path, mode, config)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn info(path: &Path, hint: Option<&str>, json: bool, config: &Config) -> Result<()> {
    let mut m = open_read(path, hint, config)?;

    // Touch one sample so the codec is live and LC2 statistics exist
    if !m.dimensions().is_empty() {
        m.get_vec::<i32>(0, 0, 0, 1)?;
    }

    let (info, status) = m.get_info();
    let report = Report {
        path: path.to_path_buf(),
        info,
        status,
        lc2: m.lc2_stats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("path:      {}", report.path.display());
    println!("format:    {} (version {})", info.format, info.version);
    println!("extents:   {}", info.dimensions());
    println!("backend:   {}", status.backend);
    println!("writable:  {}", status.writable);
    if let Some(lc2) = report.lc2 {
        println!("payload:   {}..{}", lc2.payload_start, lc2.free_cursor);
        println!("stored:    {} spectra", lc2.lines_stored);
        println!("used:      {} bytes", lc2.used);
        println!("free:      {} bytes", lc2.free);
    }
    m.close()?;
    Ok(())
}

fn dump(
    path: &Path,
    hint: Option<&str>,
    level: Option<u32>,
    line: Option<u32>,
    config: &Config,
) -> Result<()> {
    let mut m = open_read(path, hint, config)?;
    let dims = m.dimensions();

    let levels = match level {
        Some(l) if l >= dims.levels => bail!("level {} out of range (0..{})", l, dims.levels),
        Some(l) => l..l + 1,
        None => 0..dims.levels,
    };
    let lines = match line {
        Some(l) if l >= dims.lines => bail!("line {} out of range (0..{})", l, dims.lines),
        Some(l) => l..l + 1,
        None => 0..dims.lines,
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for level in levels {
        for line in lines.clone() {
            let samples: Vec<f64> = m.get_line(level, line)?;
            write!(out, "{} {}:", level, line)?;
            for s in samples {
                write!(out, " {}", s)?;
            }
            writeln!(out)?;
        }
    }
    out.flush()?;
    m.close()?;
    Ok(())
}

fn convert(
    src_path: &Path,
    dst_path: &Path,
    format: &str,
    src_format: Option<&str>,
    config: &Config,
) -> Result<()> {
    let mut src = open_read(src_path, src_format, config)?;

    let mut hint: FormatHint = format.parse().context("bad target format")?;
    if !hint.has_dimensions() {
        let dims = src.dimensions();
        hint.levels = Some(dims.levels);
        hint.lines = Some(dims.lines);
        hint.columns = Some(dims.columns);
    }

    let mode = OpenMode {
        access: AccessMode::Write,
        hint: Some(hint),
    };
    let mut dst = MatrixHandle::open_with(dst_path, mode, config)
        .with_context(|| format!("failed to create {}", dst_path.display()))?;

    copy_matrix(&mut src, &mut dst).context("copy failed")?;
    dst.close()?;
    src.close()?;

    info!(from = %src_path.display(), to = %dst_path.display(), hint = %hint, "converted matrix");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match args.command {
        Command::Info { file, format, json } => info(&file, format.as_deref(), json, &config),
        Command::Dump {
            file,
            format,
            level,
            line,
        } => dump(&file, format.as_deref(), level, line, &config),
        Command::Convert {
            src,
            dst,
            format,
            src_format,
        } => convert(&src, &dst, &format, src_format.as_deref(), &config),
    }
}
