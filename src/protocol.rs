// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary wire format (§4.4 framing, §4.5 dispatcher decode contract).
//!
//! Frame header (8 bytes, little-endian): `u32` body length (≤ 2 MiB)
//! followed by `u32` message type (0=raw, 1=json, 2=binary). The body
//! of a binary-typed frame is a tagged record: a `u32` root offset,
//! then at that offset a one-byte tag followed by fixed-order,
//! length-prefixed fields. Every field access is bounds-checked —
//! unknown trailing fields are tolerated, but any offset or length
//! that would read past the body is a `ProtocolError`, not a panic.

use bytes::Bytes;

use crate::app::{AppInfo, AppKey};
use crate::error::ProtocolError;
use crate::harvest::RunId;

pub const MAX_FRAME_BODY: usize = 2 * 1024 * 1024;
pub const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Raw,
    Json,
    Binary,
}

impl MessageType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Raw),
            1 => Some(Self::Json),
            2 => Some(Self::Binary),
            _ => None,
        }
    }

    fn to_u32(self) -> u32 {
        match self {
            Self::Raw => 0,
            Self::Json => 1,
            Self::Binary => 2,
        }
    }
}

/// Parsed 8-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub body_len: u32,
    pub message_type: MessageType,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self, ProtocolError> {
        let body_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if body_len as usize > MAX_FRAME_BODY {
            return Err(ProtocolError::OversizeFrame);
        }
        let type_word = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let message_type = MessageType::from_u32(type_word).unwrap_or(MessageType::Binary);
        Ok(Self { body_len, message_type })
    }

    pub fn encode(self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&self.body_len.to_le_bytes());
        out[4..8].copy_from_slice(&self.message_type.to_u32().to_le_bytes());
        out
    }
}

/// First six bytes of a pre-protocol-14 agent's handshake: `D SP D SP 0
/// LF`. Cannot collide with a well-formed new-protocol header because
/// byte 5 there is never `\n` for an in-range length/type word.
pub fn is_legacy_header(first_six: &[u8; 6]) -> bool {
    first_six[0].is_ascii_digit()
        && first_six[1] == b' '
        && first_six[2].is_ascii_digit()
        && first_six[3] == b' '
        && first_six[4] == b'0'
        && first_six[5] == b'\n'
}

/// Canned 10-byte reply written to a detected legacy client before
/// closing the connection.
pub const LEGACY_MISMATCH_REPLY: [u8; 10] = *b"5 0 0\n\0\0\0\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    None = 0,
    App = 1,
    Transaction = 2,
    AppReply = 3,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::App),
            2 => Ok(Self::Transaction),
            3 => Ok(Self::AppReply),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

pub enum DecodedMessage {
    None,
    App { info: AppInfo, run_id: Option<RunId> },
    Transaction { run_id: Option<RunId>, opaque: Bytes },
    AppReply,
}

/// A bounds-checked cursor over one message body, shared by a `Bytes`
/// clone so field slices are zero-copy.
struct Cursor {
    body: Bytes,
    pos: usize,
}

impl Cursor {
    fn new(body: Bytes, pos: usize) -> Self {
        Self { body, pos }
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let end = self.pos.checked_add(4).ok_or(ProtocolError::TruncatedField)?;
        if end > self.body.len() {
            return Err(ProtocolError::TruncatedField);
        }
        let v = u32::from_le_bytes(self.body[self.pos..end].try_into().unwrap_or([0; 4]));
        self.pos = end;
        Ok(v)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.body.get(self.pos).ok_or(ProtocolError::TruncatedField)?;
        self.pos += 1;
        Ok(b)
    }

    /// Length-prefixed byte slice, sharing the underlying buffer.
    fn read_bytes_field(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_u32()? as usize;
        let end = self.pos.checked_add(len).ok_or(ProtocolError::TruncatedField)?;
        if end > self.body.len() {
            return Err(ProtocolError::TruncatedField);
        }
        let slice = self.body.slice(self.pos..end);
        self.pos = end;
        Ok(slice)
    }

    fn read_string_field(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes_field()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::TruncatedField)
    }

    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Remaining, unread tail of the body — used for the transaction
    /// payload, which the dispatcher passes on by reference without
    /// decoding (§4.5).
    fn remaining(&self) -> Bytes {
        self.body.slice(self.pos..)
    }
}

/// Decode one binary-typed message body. `body` excludes the 8-byte
/// frame header.
pub fn decode(body: Bytes) -> Result<DecodedMessage, ProtocolError> {
    let mut root_cursor = Cursor::new(body.clone(), 0);
    let root_offset = root_cursor.read_u32()? as usize;
    if root_offset >= body.len() {
        return Err(ProtocolError::OffsetOutOfBounds);
    }

    let mut cursor = Cursor::new(body, root_offset);
    let tag = Tag::from_u8(cursor.read_u8()?)?;

    match tag {
        Tag::None => Ok(DecodedMessage::None),
        Tag::AppReply => Ok(DecodedMessage::AppReply),
        Tag::App => {
            let license = cursor.read_string_field()?;
            let app_name = cursor.read_string_field()?;
            let redirect_collector = cursor.read_string_field()?;
            let high_security = cursor.read_bool()?;
            let language = cursor.read_string_field()?;
            let agent_version = cursor.read_string_field()?;
            let host_display_name = cursor.read_string_field()?;
            let settings = cursor.read_bytes_field()?;
            let environment = cursor.read_bytes_field()?;
            let labels = cursor.read_bytes_field()?;
            let run_id = if cursor.read_bool()? { Some(RunId(cursor.read_string_field()?)) } else { None };

            Ok(DecodedMessage::App {
                info: AppInfo {
                    key: AppKey { license, app_name, redirect_collector, high_security, language },
                    agent_version,
                    host_display_name,
                    settings,
                    environment,
                    labels,
                },
                run_id,
            })
        }
        Tag::Transaction => {
            let has_run_id = cursor.read_bool()?;
            let run_id =
                if has_run_id { Some(RunId(cursor.read_string_field()?)) } else { None };
            Ok(DecodedMessage::Transaction { run_id, opaque: cursor.remaining() })
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
