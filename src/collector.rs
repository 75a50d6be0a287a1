use std::sync::Arc;
use std::time::Duration;

use serenity::all::{Context, GuildId};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::presence;
use crate::sheets::{MetricRow, SheetsClient};

/// Drives the collection lifecycle: one immediate sample, then a fixed
/// period timer until the process exits. Armed at most once per process;
/// there is no cancellation.
pub struct Collector {
    ctx: Context,
    guild_id: GuildId,
    sheets: Arc<SheetsClient>,
    period: Duration,
}

impl Collector {
    pub fn new(
        ctx: Context,
        guild_id: GuildId,
        sheets: Arc<SheetsClient>,
        period: Duration,
    ) -> Self {
        Self {
            ctx,
            guild_id,
            sheets,
            period,
        }
    }

    /// Run the initial collection and, when it succeeds, the recurring
    /// timer.
    ///
    /// Ticks stay on the wall-clock schedule: each tick's work runs in its
    /// own task, so a slow collection delays nothing and may overlap the
    /// next tick. A failed tick logs and produces no row for that period;
    /// the timer keeps going.
    pub async fn run(self) {
        info!("Running metric collection");
        match collect(&self.ctx, self.guild_id, &self.sheets).await {
            Ok(count) => info!("Appended initial sample ({} online)", count),
            Err(e) => {
                error!("Initial metric collection failed: {}", e);
                return;
            }
        }

        debug!("Starting Timer");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            ticker.tick().await;

            let ctx = self.ctx.clone();
            let guild_id = self.guild_id;
            let sheets = self.sheets.clone();
            tokio::spawn(async move {
                info!("Running metric collection");
                match collect(&ctx, guild_id, &sheets).await {
                    Ok(count) => debug!("Appended sample ({} online)", count),
                    Err(e) => error!("Metric collection failed: {}", e),
                }
            });
        }
    }
}

/// One collection: snapshot the guild, count online members, append the
/// row.
async fn collect(ctx: &Context, guild_id: GuildId, sheets: &SheetsClient) -> Result<usize> {
    let snapshot = presence::snapshot_guild(ctx, guild_id)?;
    debug!(
        "Snapshot of guild {} holds {} members",
        snapshot.guild_id,
        snapshot.member_count()
    );
    let count = snapshot.online_count();
    sheets.append_row(&MetricRow::now(count)).await?;
    Ok(count)
}
