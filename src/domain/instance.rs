//! World Instance Entity
//!
//! The single document type held by the registry, plus the membership
//! transforms that every store backend must apply atomically.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key prefix for instance documents in the store
pub const INSTANCE_KEY_PREFIX: &str = "instances:";

/// Default capacity for instances registered without a world record
pub const DEFAULT_CAPACITY: u32 = 10;

/// Store key for an instance id
pub fn instance_key(id: &str) -> String {
    format!("{}{}", INSTANCE_KEY_PREFIX, id)
}

// =============================================================================
// Instance Type
// =============================================================================

/// Privacy class of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    Public,
    Friends,
    FriendsOfFriends,
    Invite,
    InvitePlus,
    Group,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Public => "public",
            InstanceType::Friends => "friends",
            InstanceType::FriendsOfFriends => "friends-of-friends",
            InstanceType::Invite => "invite",
            InstanceType::InvitePlus => "invite-plus",
            InstanceType::Group => "group",
        }
    }

    /// Whether instances of this type carry an owner id
    pub fn has_owner(&self) -> bool {
        !matches!(self, InstanceType::Public)
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(InstanceType::Public),
            "friends" => Ok(InstanceType::Friends),
            "friends-of-friends" => Ok(InstanceType::FriendsOfFriends),
            "invite" => Ok(InstanceType::Invite),
            "invite-plus" => Ok(InstanceType::InvitePlus),
            "group" => Ok(InstanceType::Group),
            other => Err(Error::Configuration(format!(
                "unknown instance type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Player Count / Moderation
// =============================================================================

/// Aggregate occupancy with a per-platform breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCount {
    pub total: u32,
    #[serde(default)]
    pub platform_windows: u32,
    #[serde(default)]
    pub platform_android: u32,
}

/// Moderation marker; the list is append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedPlayer {
    pub player_id: String,
    pub blocked_at: i64,
}

// =============================================================================
// World Instance
// =============================================================================

/// One running session of a world
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldInstance {
    pub id: String,
    pub instance_id: String,
    pub world_id: String,
    pub instance_type: InstanceType,
    #[serde(default)]
    pub instance_owner_id: String,
    pub capacity: u32,
    pub player_count: PlayerCount,
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub blocked_players: Vec<BlockedPlayer>,
    pub short_name: String,
    pub secure_name: String,
    pub last_ping: i64,
    #[serde(default)]
    pub over_capacity: bool,
}

/// Single-document transform applied atomically by a store backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceUpdate {
    /// Raise `lastPing` only
    Ping,
    /// Add a player to the membership set
    Join(String),
    /// Remove a player from the membership set
    Leave(String),
    /// Record a block marker and remove the player if present
    Block(String),
}

impl InstanceUpdate {
    /// Operation name, shared with the store-side script
    pub fn op(&self) -> &'static str {
        match self {
            InstanceUpdate::Ping => "ping",
            InstanceUpdate::Join(_) => "join",
            InstanceUpdate::Leave(_) => "leave",
            InstanceUpdate::Block(_) => "block",
        }
    }

    pub fn player_id(&self) -> Option<&str> {
        match self {
            InstanceUpdate::Ping => None,
            InstanceUpdate::Join(p) | InstanceUpdate::Leave(p) | InstanceUpdate::Block(p) => {
                Some(p)
            }
        }
    }
}

impl WorldInstance {
    pub fn key(&self) -> String {
        instance_key(&self.id)
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p == player_id)
    }

    pub fn is_blocked(&self, player_id: &str) -> bool {
        self.blocked_players.iter().any(|b| b.player_id == player_id)
    }

    /// Raise `lastPing` to `now`; an older clock never lowers it
    pub fn touch(&mut self, now: i64) {
        if now > self.last_ping {
            self.last_ping = now;
        }
    }

    /// Apply a transform in place.
    ///
    /// Count, membership, `overCapacity` and `lastPing` all change together
    /// or not at all.
    pub fn apply(&mut self, update: &InstanceUpdate, now: i64) -> Result<()> {
        match update {
            InstanceUpdate::Ping => {}
            InstanceUpdate::Join(player_id) => {
                if !self.is_member(player_id) {
                    if self.is_blocked(player_id) {
                        return Err(Error::PlayerBlocked {
                            instance_id: self.id.clone(),
                            player_id: player_id.clone(),
                        });
                    }
                    self.players.push(player_id.clone());
                    self.player_count.total += 1;
                }
            }
            InstanceUpdate::Leave(player_id) => {
                let index = self
                    .players
                    .iter()
                    .position(|p| p == player_id)
                    .ok_or_else(|| Error::NotAMember {
                        instance_id: self.id.clone(),
                        player_id: player_id.clone(),
                    })?;
                self.players.remove(index);
                self.player_count.total = self.player_count.total.saturating_sub(1);
            }
            InstanceUpdate::Block(player_id) => {
                if !self.is_blocked(player_id) {
                    self.blocked_players.push(BlockedPlayer {
                        player_id: player_id.clone(),
                        blocked_at: now,
                    });
                }
                if let Some(index) = self.players.iter().position(|p| p == player_id) {
                    self.players.remove(index);
                    self.player_count.total = self.player_count.total.saturating_sub(1);
                }
            }
        }

        self.over_capacity = self.player_count.total > self.capacity;
        self.touch(now);
        Ok(())
    }
}
