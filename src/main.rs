use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use serenity::all::{
    ChunkGuildFilter, ClientBuilder, Context, EventHandler, GatewayIntents, GuildId,
    GuildMembersChunkEvent, Ready,
};
use tracing::{debug, error, info, warn};

mod auth;
mod collector;
mod config;
mod error;
mod presence;
mod sheets;

use collector::Collector;
use config::Config;
use error::TrackerError;
use sheets::SheetsClient;

/// Gateway event handler carrying everything a collection needs.
struct Handler {
    guild_id: GuildId,
    sheets: Arc<SheetsClient>,
    collect_interval: std::time::Duration,
    /// Set once the collector is armed. Member chunks arrive again after
    /// a gateway resume and must not arm a second collector.
    started: AtomicBool,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.tag());
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        if !guilds.contains(&self.guild_id) {
            error!("Guild not found: {}", self.guild_id);
            return;
        }

        // Presences are only cached for members the gateway has sent us,
        // so request the full member list with presences once up front.
        info!("Fetching members");
        ctx.shard
            .chunk_guild(self.guild_id, None, true, ChunkGuildFilter::None, None);
    }

    async fn guild_members_chunk(&self, ctx: Context, chunk: GuildMembersChunkEvent) {
        if chunk.guild_id != self.guild_id {
            return;
        }

        debug!(
            "Member chunk {}/{} received",
            chunk.chunk_index + 1,
            chunk.chunk_count
        );
        if chunk.chunk_index + 1 < chunk.chunk_count {
            return;
        }

        match presence::snapshot_guild(&ctx, self.guild_id) {
            Ok(snapshot) => info!("Fetched {} members", snapshot.member_count()),
            Err(e) => warn!("Could not read guild from cache after member fetch: {}", e),
        }

        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Collector already running, skipping");
            return;
        }

        let collector = Collector::new(
            ctx.clone(),
            self.guild_id,
            self.sheets.clone(),
            self.collect_interval,
        );
        tokio::spawn(collector.run());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    let config = Config::from_env()?;

    if let Some(bot_id) = bot_id_from_token(&config.discord_token) {
        info!(
            "Bot ID: {} (configure intents at https://discord.com/developers/applications/{}/bot)",
            bot_id, bot_id
        );
    }

    let credential = auth::authorize(&config).await?;
    info!("Got client");

    let sheets = Arc::new(SheetsClient::new(
        &config.sheet_id,
        &config.sheet_tab,
        credential,
    ));
    sheets.ensure_sheet(&["time", "count"]).await?;

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_PRESENCES;

    // Log which privileged intents we're requesting
    let privileged_intents: Vec<&str> = vec![
        if intents.contains(GatewayIntents::GUILD_MEMBERS) {
            Some("GUILD_MEMBERS")
        } else {
            None
        },
        if intents.contains(GatewayIntents::GUILD_PRESENCES) {
            Some("GUILD_PRESENCES")
        } else {
            None
        },
    ]
    .into_iter()
    .flatten()
    .collect();

    info!("Requesting privileged intents: {:?}", privileged_intents);

    let handler = Handler {
        guild_id: GuildId::new(config.guild_id),
        sheets,
        collect_interval: config.collect_interval,
        started: AtomicBool::new(false),
    };

    let mut client = ClientBuilder::new(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(TrackerError::from)?;

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        // Check if it's a disallowed intents error
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("The following privileged intents need to be enabled in the Discord Developer Portal:");
            for intent in &privileged_intents {
                error!("  - {}", intent);
            }
            error!("Go to https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable these in Discord Developer Portal: {:?}",
                privileged_intents
            ));
        }
        return Err(TrackerError::from(e).into());
    }
    warn!("Bot ended.");

    Ok(())
}

/// Discord tokens lead with the bot's application id, base64 encoded
/// without padding.
fn bot_id_from_token(token: &str) -> Option<String> {
    use base64::Engine;

    let encoded = token.split('.').next()?;
    let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded))
        .ok()?;
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_id_from_token() {
        // "MTIzNDU2Nzg5" is "123456789" base64 encoded without padding.
        assert_eq!(
            bot_id_from_token("MTIzNDU2Nzg5.GhIjKl.secret"),
            Some("123456789".to_string())
        );
    }

    #[test]
    fn test_bot_id_from_token_garbage() {
        assert_eq!(bot_id_from_token("!!!not-base64!!!.x.y"), None);
    }
}
