//! Scan command - reconcile an exported channel history against the
//! configured sticker event.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use shrine_db::ShrineDb;
use shrine_engine::{report, ProgressSink, ScanTuning, Scanner};
use std::path::PathBuf;
use tracing::info;

use crate::archive::{ArchiveGateway, ChannelArchive};

#[derive(Debug)]
pub struct ScanArgs {
    /// Channel export to scan.
    pub archive: PathBuf,
    /// Where to write the report; defaults to the home reports dir.
    pub report_dir: Option<PathBuf>,
}

/// Progress printer for interactive runs.
struct StderrProgress;

#[async_trait]
impl ProgressSink for StderrProgress {
    async fn notify(&self, text: &str) {
        eprintln!("{text}");
    }
}

pub async fn run(db: &ShrineDb, guild_id: &str, args: ScanArgs) -> Result<()> {
    let config = db.find_or_create_config(guild_id).await?;
    if !config.is_scan_ready() {
        bail!(
            "Cannot scan: event is not fully configured. \
             Set a channel and a sticker with `shrinekeeper config` first."
        );
    }

    let archive = ChannelArchive::load(&args.archive)?;
    let configured_channel = config.channel_id.as_deref().unwrap_or_default();
    if archive.channel_id != configured_channel {
        bail!(
            "Archive is for channel {} but the event is configured for channel {}",
            archive.channel_id,
            configured_channel
        );
    }
    if archive.guild_id != guild_id {
        bail!(
            "Archive is for guild {} but the scan targets guild {}",
            archive.guild_id,
            guild_id
        );
    }

    let event_id = config.event_id();
    let gateway = ArchiveGateway::new(archive);
    let channel_id = gateway.channel_id().to_string();
    info!(
        archive = %args.archive.display(),
        channel = %channel_id,
        event = %event_id,
        "Scanning channel archive"
    );

    // The archive is local, so the remote pacing delays buy nothing.
    let scanner = Scanner::with_tuning(
        db.clone(),
        gateway,
        StderrProgress,
        ScanTuning::unpaced(),
    );

    let session = scanner
        .run(&channel_id, &config, &event_id)
        .await
        .context("Scan failed to start")?;

    let report_dir = args.report_dir.unwrap_or_else(shrine_logging::reports_dir);
    let report_path = report::write(&session, &report_dir)
        .context("Failed to write scan report")?;

    println!("Message scan complete");
    println!("  messages scanned:  {}", session.messages_scanned);
    println!("  matching stickers: {}", session.matching_stickers);
    println!("  roles assigned:    {}", session.roles_assigned);
    println!("  already processed: {}", session.already_processed);
    println!("  unknown members:   {}", session.unknown_members.len());
    println!("  errors:            {}", session.errors);
    println!("  report:            {}", report_path.display());

    Ok(())
}
