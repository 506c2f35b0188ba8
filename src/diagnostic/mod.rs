//! Typed view of the ortp diagnostic lines embedded in call reports.

pub mod parse;

use std::fmt;

/// Relay id marking a leg that bypasses every relay node.
pub const NO_RELAY_ID: &str = "-1";

/// Direction of a relay leg relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Returns the metric label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed hop between a client and a relay node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayLeg {
    /// Downlink, relay identity in `dst`.
    Clu,
    /// Downlink, relay identity in `dst`.
    Cru,
    /// Uplink, relay identity in `src`.
    Crd,
    /// Uplink, relay identity in `src`.
    Cld,
}

/// Number of relay leg variants, used for array sizing.
pub const RELAY_LEG_COUNT: usize = 4;

impl RelayLeg {
    /// Returns the `sub_type` value carried on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clu => "CLU",
            Self::Cru => "CRU",
            Self::Crd => "CRD",
            Self::Cld => "CLD",
        }
    }

    /// Convert from a wire `sub_type` value.
    pub fn from_sub_type(sub_type: &str) -> Option<Self> {
        match sub_type {
            "CLU" => Some(Self::Clu),
            "CRU" => Some(Self::Cru),
            "CRD" => Some(Self::Crd),
            "CLD" => Some(Self::Cld),
            _ => None,
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            Self::Clu | Self::Cru => Direction::Down,
            Self::Crd | Self::Cld => Direction::Up,
        }
    }

    /// Field holding the `ip_id` relay identity for this leg.
    pub const fn endpoint_field(self) -> &'static str {
        match self {
            Self::Clu | Self::Cru => "dst",
            Self::Crd | Self::Cld => "src",
        }
    }

    /// Dense index in `0..RELAY_LEG_COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Return all legs in index order.
    pub fn all() -> &'static [Self; RELAY_LEG_COUNT] {
        &[Self::Clu, Self::Cru, Self::Crd, Self::Cld]
    }
}

impl fmt::Display for RelayLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way an end-to-end delay sample was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndToEndDirection {
    LocalToRemote,
    RemoteToLocal,
}

/// Relay identity decoded from an `ip_id` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayEndpoint {
    pub ip: String,
    pub id: String,
}

impl RelayEndpoint {
    /// Decode an `ip_id` field. Returns `None` when the field has no `_`.
    ///
    /// Only the first two `_`-separated segments are significant.
    pub fn parse(field: &str) -> Option<Self> {
        if !field.contains('_') {
            return None;
        }
        let mut parts = field.split('_');
        let ip = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        Some(Self {
            ip: ip.to_string(),
            id: id.to_string(),
        })
    }

    /// True when no relay node sits on this leg.
    pub fn is_direct(&self) -> bool {
        self.id == NO_RELAY_ID
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ip, self.id)
    }
}

/// Measurement carried by one diagnostic line, keyed by its `sub_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// `CLU`, `CRU`, `CRD`, `CLD`.
    RelayLeg {
        leg: RelayLeg,
        /// `None` when the identity field is missing or has no `_`.
        endpoint: Option<RelayEndpoint>,
        log_index: Option<usize>,
        delay: f64,
        /// Cumulative audio loss at this checkpoint.
        audio_loss: f64,
        /// Cumulative video loss at this checkpoint.
        video_loss: f64,
    },
    /// `CE2E_L2R`, `CE2E_R2L`.
    EndToEndDelay {
        direction: EndToEndDirection,
        delay: f64,
    },
    /// `CSR`. Video loss is the figure after FEC recovery.
    EndToEndLoss {
        log_index: Option<usize>,
        audio_loss: f64,
        video_loss: f64,
    },
    /// Any sub type this exporter does not turn into metrics.
    Other { sub_type: String },
}

/// One decoded diagnostic line, attributed to its session and call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub session_id: String,
    /// Value of `cid`; empty when the line carries none.
    pub call_id: String,
    /// Raw `time` value, reported when the entry is skipped.
    pub time: Option<String>,
    pub measurement: Measurement,
}
