// Copyright (c) esphome-native-api-rs contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Length-prefixed frame codec for the plaintext wire.
//!
//! Wire format per frame: `0x00 || varint(len) || varint(type) || payload`.
//! Encoding is pure and stateless; decoding is stateful and buffer-owning,
//! following the shape of `node/messages/src/helpers/codec.rs`'s
//! `MessageCodec` (a thin wrapper that layers message framing over
//! `tokio_util::codec`), generalized here to two varints instead of one
//! fixed-width header.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::varint::{decode_varint, encode_varint};

/// Hard per-message cap; frames larger than this are rejected outright.
pub const MAX_FRAME_SIZE: u64 = 1024 * 1024;

const PREAMBLE: u8 = 0x00;

/// Encodes a single frame. Pure and stateless.
pub fn encode_frame(message_type: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 10 + 10 + payload.len());
    out.push(PREAMBLE);
    out.extend(encode_varint(payload.len() as u64));
    out.extend(encode_varint(message_type));
    out.extend_from_slice(payload);
    out
}

/// Attempts to pull exactly one complete frame off the front of `buf`,
/// mutating it in place. Shared by [`FrameDecoder`] (which owns its own
/// buffer, for the Noise data-phase plaintext stream) and [`FrameCodec`]
/// (a `tokio_util::codec::Decoder` over the buffer `Framed` already owns,
/// for the unencrypted wire).
fn try_extract_frame(buf: &mut BytesMut) -> Result<Option<(u64, Bytes)>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    if buf[0] != PREAMBLE {
        // Resynchronization: non-frame bytes preceding a valid preamble are
        // slack that should not occur in a well-formed stream, but are
        // recoverable rather than fatal.
        match buf[1..].iter().position(|&b| b == PREAMBLE) {
            Some(rel) => {
                let skip = rel + 1;
                tracing::warn!(target: "protocol", skip, "resynchronizing frame stream, discarding leading bytes");
                buf.advance(skip);
            }
            None => {
                tracing::warn!(target: "protocol", "no frame preamble found in buffered bytes, dropping buffer");
                buf.clear();
                return Ok(None);
            }
        }
        if buf.len() < 2 {
            return Ok(None);
        }
    }

    let (len, len_size) = match decode_varint(buf, 1)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::MessageTooLarge { len, max: MAX_FRAME_SIZE });
    }

    let type_offset = 1 + len_size;
    let (message_type, type_size) = match decode_varint(buf, type_offset)? {
        Some(v) => v,
        None => return Ok(None),
    };

    let data_offset = type_offset + type_size;
    let total_len = data_offset + len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    let mut frame = buf.split_to(total_len);
    frame.advance(data_offset);
    Ok(Some((message_type, frame.freeze())))
}

/// A self-contained, buffer-owning decoder used outside of a `Framed`
/// transport: by the Noise transport's data phase (decrypted plaintext is
/// fed in as it arrives) and directly in tests that feed data incrementally
/// and assert on what gets emitted.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes and drains every complete frame that can now
    /// be extracted. Never leaves a complete frame sitting in the buffer
    /// across a return.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<(u64, Bytes)>, CodecError> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = try_extract_frame(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Discards any partial frame. Used on disconnect.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[cfg(test)]
    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// `tokio_util::codec` adapter over [`try_extract_frame`] for use with
/// `Framed<TcpStream, FrameCodec>` on the unencrypted wire.
#[derive(Default)]
pub struct FrameCodec;

impl Encoder<(u64, Bytes)> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, (message_type, payload): (u64, Bytes), dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode_frame(message_type, &payload));
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Error = CodecError;
    type Item = (u64, Bytes);

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        try_extract_frame(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let encoded = encode_frame(7, &[1, 2, 3, 4]);
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encoded).unwrap();
        assert_eq!(frames, vec![(7, Bytes::from_static(&[1, 2, 3, 4]))]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn empty_payload_frame() {
        // Scenario 1: encode (T=7, []) -> [0x00, 0x00, 0x07].
        let encoded = encode_frame(7, &[]);
        assert_eq!(encoded, vec![0x00, 0x00, 0x07]);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encoded).unwrap();
        assert_eq!(frames, vec![(7, Bytes::new())]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn two_frames_in_one_chunk() {
        // Scenario 2.
        let chunk = [0x00, 0x01, 0x08, 0xAA, 0x00, 0x00, 0x09];
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&chunk).unwrap();
        assert_eq!(frames, vec![(8, Bytes::from_static(&[0xAA])), (9, Bytes::new())]);
    }

    #[test]
    fn split_across_chunks() {
        // Scenario 3.
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&[0x00, 0x02, 0x0A]).unwrap(), vec![]);
        assert_eq!(decoder.feed(&[0xDE]).unwrap(), vec![]);
        assert_eq!(decoder.feed(&[0xAD]).unwrap(), vec![(10, Bytes::from_static(&[0xDE, 0xAD]))]);
    }

    #[test]
    fn streaming_equivalence() {
        let mut whole = Vec::new();
        whole.extend(encode_frame(1, b"alpha"));
        whole.extend(encode_frame(2, b""));
        whole.extend(encode_frame(3, &[0u8; 300]));

        let mut single_shot = FrameDecoder::new();
        let all_at_once = single_shot.feed(&whole).unwrap();

        let mut chunked = FrameDecoder::new();
        let mut streamed = Vec::new();
        for byte in &whole {
            streamed.extend(chunked.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(all_at_once, streamed);
    }

    #[test]
    fn resynchronizes_past_garbage_preamble() {
        let mut chunk = vec![0x11, 0x22, 0x33];
        chunk.extend(encode_frame(5, b"hi"));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&chunk).unwrap();
        assert_eq!(frames, vec![(5, Bytes::from_static(b"hi"))]);
    }

    #[test]
    fn drops_buffer_when_no_preamble_found() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&[0x11, 0x22, 0x33, 0x44]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn oversized_frame_is_rejected_without_buffering() {
        let mut header = vec![0x00];
        header.extend(encode_varint(MAX_FRAME_SIZE + 1));
        header.extend(encode_varint(1));

        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(&header).unwrap_err();
        assert!(matches!(err, CodecError::MessageTooLarge { .. }));
    }

    #[test]
    fn clear_discards_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x00, 0x05, 0x01, 0xAA]).unwrap();
        assert!(decoder.buffered_len() > 0);
        decoder.clear();
        assert_eq!(decoder.buffered_len(), 0);
    }
}
