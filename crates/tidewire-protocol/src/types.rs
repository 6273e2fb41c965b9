//! Supporting wire types: kick reasons and discovered hosts.

use serde::{Deserialize, Serialize};

/// Why a server removed a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KickReason {
    Kick,
    ClientOutdated,
    ServerOutdated,
    Banned,
    GameOver,
    RecentKick,
    NameInUse,
    IdInUse,
    NameEmpty,
    CustomClient,
    ServerClose,
    Vote,
    TypeMismatch,
    Whitelist,
    PlayerLimit,
    ServerRestarting,
}

impl KickReason {
    /// Quiet kicks are part of normal flow and are not shown as errors.
    pub fn is_quiet(self) -> bool {
        matches!(self, Self::GameOver | Self::ServerRestarting)
    }

    /// Presentation key for the kick message.
    pub fn message_key(self) -> &'static str {
        match self {
            Self::Kick => "server.kicked.kick",
            Self::ClientOutdated => "server.kicked.clientOutdated",
            Self::ServerOutdated => "server.kicked.serverOutdated",
            Self::Banned => "server.kicked.banned",
            Self::GameOver => "server.kicked.gameover",
            Self::RecentKick => "server.kicked.recentKick",
            Self::NameInUse => "server.kicked.nameInUse",
            Self::IdInUse => "server.kicked.idInUse",
            Self::NameEmpty => "server.kicked.nameEmpty",
            Self::CustomClient => "server.kicked.customClient",
            Self::ServerClose => "server.kicked.serverClose",
            Self::Vote => "server.kicked.vote",
            Self::TypeMismatch => "server.kicked.typeMismatch",
            Self::Whitelist => "server.kicked.whitelist",
            Self::PlayerLimit => "server.kicked.playerLimit",
            Self::ServerRestarting => "server.kicked.serverRestarting",
        }
    }
}

/// A server found by discovery or a direct ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Server display name.
    pub name: String,
    /// Address the server was reached at.
    pub address: String,
    /// Port the server listens on.
    pub port: u16,
    /// Connected players.
    pub players: u32,
    /// Server protocol version.
    pub version: u32,
    /// Measured round trip in milliseconds.
    pub ping: u32,
}
