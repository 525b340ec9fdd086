//! Activate, deactivate, and status commands.

use anyhow::{bail, Result};
use shrine_db::{EventConfigPatch, ShrineDb};

use crate::cli::config::print_config;

pub async fn activate(db: &ShrineDb, guild_id: &str) -> Result<()> {
    let config = db.find_or_create_config(guild_id).await?;

    if config.channel_id.is_none() {
        bail!("Configure a channel first: shrinekeeper config channel <id>");
    }
    if config.sticker_id.is_none() {
        bail!("Configure a sticker first: shrinekeeper config sticker <id>");
    }
    if config.active {
        println!("The event is already active.");
        return Ok(());
    }

    let updated = db
        .update_config(
            guild_id,
            EventConfigPatch {
                active: Some(true),
                ..Default::default()
            },
        )
        .await?;

    println!("Event activated.");
    print_config(&updated);
    Ok(())
}

pub async fn deactivate(db: &ShrineDb, guild_id: &str) -> Result<()> {
    let config = db.find_or_create_config(guild_id).await?;

    if !config.active {
        println!("The event is already deactivated.");
        return Ok(());
    }

    db.update_config(
        guild_id,
        EventConfigPatch {
            active: Some(false),
            ..Default::default()
        },
    )
    .await?;

    println!("Event deactivated. Run `shrinekeeper activate` to start it again.");
    Ok(())
}

pub async fn status(db: &ShrineDb, guild_id: &str) -> Result<()> {
    let config = db.find_or_create_config(guild_id).await?;
    print_config(&config);

    let participants = db.count_participants(guild_id, &config.event_id()).await?;
    println!();
    println!("Participants recorded for this event: {participants}");
    Ok(())
}
