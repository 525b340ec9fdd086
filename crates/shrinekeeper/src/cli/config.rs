//! Config command - inspect and update a guild's event configuration.

use anyhow::Result;
use clap::Subcommand;
use shrine_db::{EventConfig, EventConfigPatch, ShrineDb};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the current configuration
    Show,
    /// Set the channel whose history is scanned
    Channel { channel_id: String },
    /// Set the sticker that marks a qualifying message
    Sticker { sticker_id: String },
    /// Set the role granted to qualifying participants
    Role { role_id: String },
}

pub async fn run(db: &ShrineDb, guild_id: &str, command: ConfigCommand) -> Result<()> {
    let config = match command {
        ConfigCommand::Show => db.find_or_create_config(guild_id).await?,
        ConfigCommand::Channel { channel_id } => {
            db.update_config(
                guild_id,
                EventConfigPatch {
                    channel_id: Some(channel_id),
                    ..Default::default()
                },
            )
            .await?
        }
        ConfigCommand::Sticker { sticker_id } => {
            db.update_config(
                guild_id,
                EventConfigPatch {
                    sticker_id: Some(sticker_id),
                    ..Default::default()
                },
            )
            .await?
        }
        ConfigCommand::Role { role_id } => {
            db.update_config(
                guild_id,
                EventConfigPatch {
                    role_id: Some(role_id),
                    ..Default::default()
                },
            )
            .await?
        }
    };

    print_config(&config);
    Ok(())
}

pub fn print_config(config: &EventConfig) {
    let show = |value: &Option<String>| {
        value.clone().unwrap_or_else(|| "(not configured)".to_string())
    };
    println!("Event configuration for guild {}", config.guild_id);
    println!("  event id: {}", config.event_id());
    println!("  status:   {}", if config.active { "active" } else { "inactive" });
    println!("  channel:  {}", show(&config.channel_id));
    println!("  sticker:  {}", show(&config.sticker_id));
    println!("  role:     {}", show(&config.role_id));

    if !config.is_scan_ready() {
        println!();
        println!("Configuration incomplete: set a channel and a sticker before scanning.");
    } else if !config.active {
        println!();
        println!("Event is configured but not active. Run `shrinekeeper activate` to start it.");
    }
}
