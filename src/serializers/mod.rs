// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Frame serialization for peer transports.

pub mod json;

use crate::frames::Frame;

/// Serialized frame data - either text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Base trait for frame serializers.
///
/// A serializer converts outgoing frames into wire messages for a remote
/// peer, and inbound wire messages back into frames. Frames the wire format
/// does not represent serialize to `None` and are simply not sent.
pub trait FrameSerializer: Send + Sync {
    /// Serialize a frame to wire format.
    fn serialize(&self, frame: &Frame) -> Option<SerializedFrame>;

    /// Deserialize wire data to a frame.
    fn deserialize(&self, data: &SerializedFrame) -> Option<Frame>;
}
