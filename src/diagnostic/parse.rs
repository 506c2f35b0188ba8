//! Decoding of raw ortp diagnostic lines.
//!
//! A report's `callBaseLog` carries several embedded sub-protocols. Only
//! lines whose characters 10..14 spell `ortp` are decoded; everything else
//! is rejected with [`LineError::NotOrtp`] and ignored by the pipeline.
//! Eligible lines are whitespace-separated `key=value` tokens.

use std::collections::HashMap;
use std::num::IntErrorKind;

use thiserror::Error;

use super::{EndToEndDirection, Measurement, ParsedEntry, RelayEndpoint, RelayLeg};

/// Sub-protocol tag identifying transport quality lines.
pub const ORTP_TAG: &str = "ortp";

/// Character (not byte) offset of the sub-protocol tag.
const TAG_OFFSET: usize = 10;

/// Lines whose `delay_aver` exceeds this are treated as corrupt samples.
pub const MAX_DELAY_AVER: f64 = 20_000.0;

/// Reasons a diagnostic line produces no entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error("line too short to carry a protocol tag: {chars} chars")]
    TooShort { chars: usize },

    #[error("not an ortp line")]
    NotOrtp,

    #[error("ortp line has no key=value fields")]
    Empty,

    #[error("delay_aver {delay} exceeds 20000")]
    OutlierDelay { delay: f64 },
}

impl LineError {
    /// Short label for metrics.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::NotOrtp => "not_ortp",
            Self::Empty => "empty",
            Self::OutlierDelay { .. } => "outlier_delay",
        }
    }
}

/// Key/value fields of one ortp line, borrowed from the line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields<'a> {
    map: HashMap<&'a str, &'a str>,
}

impl<'a> Fields<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Parse a field as a float. Missing or malformed values are zero;
    /// `NaN` and infinities are kept so later range checks reject them.
    fn float(&self, key: &str) -> f64 {
        self.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// Parse a slot index. Missing or non-numeric values select slot 0;
    /// negative or overflowing values select no slot.
    fn index(&self, key: &str) -> Option<usize> {
        let Some(raw) = self.get(key) else {
            return Some(0);
        };
        match raw.parse::<i64>() {
            Ok(index) => usize::try_from(index).ok(),
            Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
                None
            }
            Err(_) => Some(0),
        }
    }
}

fn check_tag(line: &str) -> Result<(), LineError> {
    let Some((start, _)) = line.char_indices().nth(TAG_OFFSET) else {
        return Err(LineError::TooShort {
            chars: line.chars().count(),
        });
    };
    let rest = line.get(start..).unwrap_or_default();
    if rest.starts_with(ORTP_TAG) {
        return Ok(());
    }
    if rest.chars().count() < ORTP_TAG.len() {
        return Err(LineError::TooShort {
            chars: line.chars().count(),
        });
    }
    Err(LineError::NotOrtp)
}

/// Split an ortp line into its key/value fields.
///
/// Tokens without `=` or with an empty key are skipped. A token is split
/// at its first `=`, so values may themselves contain `=`. Repeated keys
/// keep the last value.
pub fn parse_line(line: &str) -> Result<Fields<'_>, LineError> {
    check_tag(line)?;

    let mut map = HashMap::new();
    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        map.insert(key, value);
    }

    if map.is_empty() {
        return Err(LineError::Empty);
    }

    Ok(Fields { map })
}

/// Decode a raw line into a typed entry owned by `session_id`.
pub fn parse_entry(line: &str, session_id: &str) -> Result<ParsedEntry, LineError> {
    let fields = parse_line(line)?;
    ParsedEntry::from_fields(&fields, session_id)
}

impl ParsedEntry {
    /// Build a typed entry from decoded fields.
    ///
    /// Fails only for outlier delays, infinite ones included. Unparsable
    /// loss and delay values decode as zero, as does a missing or
    /// non-numeric `logIndex`.
    pub fn from_fields(fields: &Fields<'_>, session_id: &str) -> Result<Self, LineError> {
        let delay = fields.float("delay_aver");
        if delay > MAX_DELAY_AVER {
            return Err(LineError::OutlierDelay { delay });
        }

        let sub_type = fields.get("sub_type").unwrap_or_default();

        let measurement = if let Some(leg) = RelayLeg::from_sub_type(sub_type) {
            Measurement::RelayLeg {
                leg,
                endpoint: fields
                    .get(leg.endpoint_field())
                    .and_then(RelayEndpoint::parse),
                log_index: fields.index("logIndex"),
                delay,
                audio_loss: fields.float("a_loss"),
                video_loss: fields.float("v_loss"),
            }
        } else {
            match sub_type {
                "CE2E_L2R" => Measurement::EndToEndDelay {
                    direction: EndToEndDirection::LocalToRemote,
                    delay,
                },
                "CE2E_R2L" => Measurement::EndToEndDelay {
                    direction: EndToEndDirection::RemoteToLocal,
                    delay,
                },
                "CSR" => Measurement::EndToEndLoss {
                    log_index: fields.index("logIndex"),
                    audio_loss: fields.float("a_loss"),
                    video_loss: fields.float("v_after_fec_recover_loss"),
                },
                other => Measurement::Other {
                    sub_type: other.to_string(),
                },
            }
        };

        Ok(Self {
            session_id: session_id.to_string(),
            call_id: fields.get("cid").unwrap_or_default().to_string(),
            time: fields.get("time").map(str::to_string),
            measurement,
        })
    }
}
