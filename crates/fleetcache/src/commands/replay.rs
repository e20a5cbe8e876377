//! `fleetcache replay`: feed a JSON-lines change stream through a fresh
//! controller and report what the cache holds afterwards.

use std::path::Path;
use std::sync::Arc;

use prometheus::{Registry, TextEncoder};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info};

use fleetcache_config::Config;
use fleetcache_core::{CacheError, CacheMetrics, Change, Controller, ControllerConfig};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &ReplayArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let metrics = Arc::new(CacheMetrics::new()?);
    let (tx, rx) = mpsc::channel(config.cache.change_buffer);

    let mut controller_config = ControllerConfig::new(rx, Arc::clone(&metrics));
    if args.trace_events {
        controller_config = controller_config.with_notify(|change| {
            eprintln!("{} {}", change.kind(), change.model_uuid());
        });
    }
    let controller = Controller::new(controller_config)?;

    let mark_sweep = args.mark_sweep || config.cache.mark_sweep;
    if mark_sweep {
        controller.mark().await?;
    }

    let mut reader = ChangeReader::open(args.input.as_deref()).await?;
    let sent = match feed(&mut reader, &tx).await {
        Ok(sent) => sent,
        Err(FeedError::Read(e)) => {
            controller.kill();
            return Err(e);
        }
        Err(FeedError::Stopped) => return Err(terminal_error(&controller).await.into()),
    };
    info!(changes = sent, "change stream replayed");
    if controller.flush().await.is_err() {
        return Err(terminal_error(&controller).await.into());
    }

    if mark_sweep {
        controller.sweep().await?;
        debug!("sweep complete");
    }

    let report = match &args.model {
        Some(uuid) => {
            let model = controller.model(uuid)?;
            [(uuid.clone(), model.report())].into_iter().collect()
        }
        None => controller.report(),
    };
    output::print_output(&output::render_report(global.output, &report)?, global.quiet);

    if args.metrics {
        let registry = Registry::new();
        metrics.register(&registry)?;
        let text = TextEncoder::new().encode_to_string(&registry.gather())?;
        output::print_output(text.trim_end(), global.quiet);
    }

    controller.kill();
    controller.wait().await?;
    Ok(())
}

// ── Change stream ──

/// Reads one JSON change per line. Blank lines are skipped; line numbers
/// in errors are 1-based.
struct ChangeReader {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    line: usize,
}

impl ChangeReader {
    /// Open `input`, or stdin when absent or `-`.
    async fn open(input: Option<&Path>) -> Result<Self, CliError> {
        let source: Box<dyn AsyncRead + Send + Unpin> = match input {
            Some(path) if path != Path::new("-") => Box::new(File::open(path).await?),
            _ => Box::new(tokio::io::stdin()),
        };
        Ok(Self::new(source))
    }

    fn new(source: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            lines: BufReader::new(source).lines(),
            line: 0,
        }
    }

    async fn next(&mut self) -> Result<Option<Change>, CliError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let change = serde_json::from_str(&line).map_err(|source| CliError::BadChange {
                line: self.line,
                source,
            })?;
            return Ok(Some(change));
        }
        Ok(None)
    }
}

enum FeedError {
    Read(CliError),
    Stopped,
}

/// Send each change as soon as it is parsed. Returns how many were sent.
async fn feed(reader: &mut ChangeReader, tx: &mpsc::Sender<Change>) -> Result<usize, FeedError> {
    let mut sent = 0;
    while let Some(change) = reader.next().await.map_err(FeedError::Read)? {
        tx.send(change).await.map_err(|_| FeedError::Stopped)?;
        sent += 1;
    }
    Ok(sent)
}

/// The error that stopped the apply loop.
async fn terminal_error(controller: &Controller) -> CacheError {
    controller.wait().await.err().unwrap_or(CacheError::Stopped)
}
