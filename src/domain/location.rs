//! Location Strings
//!
//! Parses the composite instance location
//! `wrld_x:12345~private(usr_y)~canRequestInvite~region(eu)` into a typed
//! struct and derives the canonical registry id from it.

use crate::domain::instance::InstanceType;
use crate::error::{Error, Result};
use std::fmt;

/// Parsed instance location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub world_id: String,
    pub instance_id: String,
    pub instance_type: InstanceType,
    /// Empty for public instances
    pub owner_id: String,
    pub region: Option<String>,
    pub nonce: Option<String>,
    pub can_request_invite: bool,
    pub strict: bool,
}

impl Location {
    /// Parse a location string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocation {
            location: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split('~');
        let head = parts.next().unwrap_or_default();
        let (world_id, instance_id) = head
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' between world and instance id"))?;

        if world_id.is_empty() {
            return Err(invalid("empty world id"));
        }
        if instance_id.is_empty() {
            return Err(invalid("empty instance id"));
        }

        let mut location = Location {
            world_id: world_id.to_string(),
            instance_id: instance_id.to_string(),
            instance_type: InstanceType::Public,
            owner_id: String::new(),
            region: None,
            nonce: None,
            can_request_invite: false,
            strict: false,
        };

        let mut privacy: Option<&str> = None;

        for tag in parts {
            let (name, arg) = split_tag(tag).ok_or_else(|| invalid("malformed tag"))?;
            match (name, arg) {
                ("friends" | "hidden" | "private" | "group", Some(owner)) => {
                    if privacy.is_some() {
                        return Err(invalid("more than one privacy tag"));
                    }
                    if owner.is_empty() {
                        return Err(invalid("empty owner id"));
                    }
                    privacy = Some(name);
                    location.owner_id = owner.to_string();
                }
                ("region", Some(region)) => location.region = Some(region.to_string()),
                ("nonce", Some(nonce)) => location.nonce = Some(nonce.to_string()),
                ("canRequestInvite", None) => location.can_request_invite = true,
                ("strict", None) => location.strict = true,
                _ => return Err(invalid("unknown tag")),
            }
        }

        location.instance_type = match (privacy, location.can_request_invite) {
            (None, _) => InstanceType::Public,
            (Some("friends"), _) => InstanceType::Friends,
            (Some("hidden"), _) => InstanceType::FriendsOfFriends,
            (Some("private"), false) => InstanceType::Invite,
            (Some("private"), true) => InstanceType::InvitePlus,
            (Some(_), _) => InstanceType::Group,
        };

        Ok(location)
    }

    /// Canonical registry id: world, instance suffix, and for non-public
    /// instances the privacy tag with its owner
    pub fn id(&self) -> String {
        match self.privacy_tag() {
            Some(tag) => format!(
                "{}:{}~{}({})",
                self.world_id, self.instance_id, tag, self.owner_id
            ),
            None => format!("{}:{}", self.world_id, self.instance_id),
        }
    }

    fn privacy_tag(&self) -> Option<&'static str> {
        match self.instance_type {
            InstanceType::Public => None,
            InstanceType::Friends => Some("friends"),
            InstanceType::FriendsOfFriends => Some("hidden"),
            InstanceType::Invite | InstanceType::InvitePlus => Some("private"),
            InstanceType::Group => Some("group"),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())?;
        if self.can_request_invite {
            write!(f, "~canRequestInvite")?;
        }
        if let Some(region) = &self.region {
            write!(f, "~region({})", region)?;
        }
        if self.strict {
            write!(f, "~strict")?;
        }
        if let Some(nonce) = &self.nonce {
            write!(f, "~nonce({})", nonce)?;
        }
        Ok(())
    }
}

/// Split `name(arg)` or a bare `name`
fn split_tag(tag: &str) -> Option<(&str, Option<&str>)> {
    match tag.find('(') {
        Some(open) => {
            let arg = tag[open + 1..].strip_suffix(')')?;
            Some((&tag[..open], Some(arg)))
        }
        None if !tag.is_empty() && !tag.contains(')') => Some((tag, None)),
        None => None,
    }
}
