// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the daemon.
//!
//! Closed enums for the errors the processor must match exhaustively
//! (protocol framing, collector-response classification, connect
//! outcomes); `anyhow::Result` is used everywhere else.

use std::fmt;

/// A malformed or out-of-contract message on the agent socket.
///
/// Logged at warning and the offending message dropped; the connection
/// stays open — agents are not punished for forward-incompatible frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body exceeded the 2 MiB ceiling.
    OversizeFrame,
    /// Root offset pointed outside the body.
    OffsetOutOfBounds,
    /// Tag byte did not match any known variant.
    UnknownTag(u8),
    /// A length-prefixed field ran past the end of the body.
    TruncatedField,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OversizeFrame => write!(f, "frame body exceeds 2 MiB"),
            Self::OffsetOutOfBounds => write!(f, "root offset out of bounds"),
            Self::UnknownTag(tag) => write!(f, "unknown message tag {tag}"),
            Self::TruncatedField => write!(f, "truncated field in message body"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Outcome of classifying a collector response.
///
/// This is the only way the collector drives daemon state (see the
/// state-transition table in `processor.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedError {
    /// Harvest context is stale; reconnect and obtain a fresh run ID.
    RestartRequired,
    /// The collector told us to stop talking to it for this app.
    Disconnect,
    /// The license key is no longer valid.
    LicenseInvalid,
    /// Payload rejected as too large; drop without retry (poison-pill guard).
    PayloadTooLarge,
    /// Payload rejected for unsupported content encoding; drop without retry.
    UnsupportedMedia,
    /// Anything else transient: merge the payload back and retry next harvest.
    Other,
}

impl ClassifiedError {
    /// Whether a payload classified with this error should be merged back
    /// into the successor harvest, or dropped outright.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::PayloadTooLarge | Self::UnsupportedMedia)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RestartRequired => "restart-required",
            Self::Disconnect => "disconnect",
            Self::LicenseInvalid => "license-invalid",
            Self::PayloadTooLarge => "payload-too-large",
            Self::UnsupportedMedia => "unsupported-media",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ClassifiedError {}

/// Error returned by the two-phase connect protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    LicenseInvalid,
    Disconnect,
    Other,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LicenseInvalid => "license-invalid",
            Self::Disconnect => "disconnect",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ConnectError {}
