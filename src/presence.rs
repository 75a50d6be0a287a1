use serenity::all::{Context, GuildId, OnlineStatus, UserId};
use std::collections::HashMap;

use crate::error::{Result, TrackerError};

/// Point-in-time view of a guild's members and their presence status.
///
/// Built from the gateway cache after the full member and presence fetch
/// has run. A member the gateway reported no presence for is offline.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub guild_id: GuildId,
    pub statuses: HashMap<UserId, OnlineStatus>,
}

impl GuildSnapshot {
    /// Number of members captured in the snapshot.
    pub fn member_count(&self) -> usize {
        self.statuses.len()
    }

    /// Members whose status is exactly online. Idle, do-not-disturb and
    /// invisible members do not count.
    pub fn online_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|status| **status == OnlineStatus::Online)
            .count()
    }
}

/// Snapshot the guild from the gateway cache.
///
/// Fails if the guild is not cached, which happens when the configured id
/// is wrong or the bot was never invited.
pub fn snapshot_guild(ctx: &Context, guild_id: GuildId) -> Result<GuildSnapshot> {
    let guild = ctx
        .cache
        .guild(guild_id)
        .ok_or(TrackerError::GuildNotFound { id: guild_id.get() })?;

    let statuses = guild
        .members
        .keys()
        .map(|user_id| {
            let status = guild
                .presences
                .get(user_id)
                .map(|presence| presence.status)
                .unwrap_or(OnlineStatus::Offline);
            (*user_id, status)
        })
        .collect();

    Ok(GuildSnapshot {
        guild_id,
        statuses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(statuses: &[(u64, OnlineStatus)]) -> GuildSnapshot {
        GuildSnapshot {
            guild_id: GuildId::new(1),
            statuses: statuses
                .iter()
                .map(|(id, status)| (UserId::new(*id), *status))
                .collect(),
        }
    }

    #[test]
    fn test_online_count_counts_only_online() {
        let snap = snapshot(&[
            (1, OnlineStatus::Online),
            (2, OnlineStatus::Idle),
            (3, OnlineStatus::Online),
        ]);
        assert_eq!(snap.member_count(), 3);
        assert_eq!(snap.online_count(), 2);
    }

    #[test]
    fn test_online_count_empty_guild() {
        let snap = snapshot(&[]);
        assert_eq!(snap.member_count(), 0);
        assert_eq!(snap.online_count(), 0);
    }

    #[test]
    fn test_online_count_ignores_other_statuses() {
        let snap = snapshot(&[
            (1, OnlineStatus::Idle),
            (2, OnlineStatus::DoNotDisturb),
            (3, OnlineStatus::Invisible),
            (4, OnlineStatus::Offline),
        ]);
        assert_eq!(snap.online_count(), 0);
    }

    #[test]
    fn test_online_count_is_stable() {
        let snap = snapshot(&[(1, OnlineStatus::Online), (2, OnlineStatus::Offline)]);
        assert_eq!(snap.online_count(), snap.online_count());
    }
}
