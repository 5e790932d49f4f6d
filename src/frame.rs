//! Module for the tunnel's wire framing.
//!
//! Every packet read from a TUN device travels over TCP as one frame:
//!
//! ```text
//! +------------------+-------------------+--------------------+
//! | MAGIC (4 bytes)  | LENGTH (2 bytes)  | PAYLOAD (LENGTH)   |
//! | 0x00123456, BE   | big-endian u16    | raw IP packet      |
//! +------------------+-------------------+--------------------+
//! ```
//!
//! TCP gives no message boundaries, so the receiving side accumulates bytes
//! in a [FrameDecoder] and pulls complete packets out of it as they become
//! available.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The constant every frame starts with.
pub const MAGIC: u32 = 0x0012_3456;

const MAGIC_BYTES: [u8; 4] = MAGIC.to_be_bytes();

/// Size of the MAGIC and LENGTH fields together.
pub const HEADER_LEN: usize = 6;

/// The largest payload the 16-bit LENGTH field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// The largest frame that can appear on the wire.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Encodes `packet` into a freshly allocated frame.
///
/// Keeping `packet` within [MAX_PAYLOAD_LEN] bytes is up to the caller. A longer
/// packet is not rejected: its length wraps to 16 bits and the resulting frame
/// is corrupt.
pub fn encode(packet: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + packet.len());
    encode_into(packet, &mut frame);
    frame.freeze()
}

/// Appends the frame for `packet` to `dst`. See [encode] for the size limit.
pub fn encode_into(packet: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_LEN + packet.len());
    dst.put_u32(MAGIC);
    dst.put_u16(packet.len() as u16);
    dst.extend_from_slice(packet);
}

/// Accumulates a received byte stream and splits it into packets.
///
/// Bytes of a frame that is not complete yet stay buffered until the rest
/// arrives. When the buffer does not start with [MAGIC], the decoder skips
/// forward to the next occurrence of it; skipped bytes are counted in
/// [FrameDecoder::discarded].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    discarded: u64,
}

impl FrameDecoder {
    /// Creates a new, empty [FrameDecoder].
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME_LEN + 1)
    }

    /// Creates a new [FrameDecoder] with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            discarded: 0,
        }
    }

    /// Appends received bytes to the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Gives direct access to the buffer, for reading straight into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of bytes buffered and not yet decoded.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total number of bytes skipped while looking for [MAGIC].
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Extracts the next complete packet, with its header stripped.
    ///
    /// Returns `None` when the buffer does not hold a complete frame; the
    /// incomplete bytes are kept for a later call.
    pub fn decode_next(&mut self) -> Option<Bytes> {
        if !self.align() || self.buffer.len() < HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([self.buffer[4], self.buffer[5]]) as usize;
        if self.buffer.len() < HEADER_LEN + length {
            return None;
        }
        self.buffer.advance(HEADER_LEN);
        Some(self.buffer.split_to(length).freeze())
    }

    /// Returns an iterator over all the packets currently decodable.
    ///
    /// The iterator ends as soon as the buffer runs out of complete frames.
    /// Calling [FrameDecoder::frames] again after more bytes arrived resumes
    /// where the previous iteration stopped.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Makes the buffer start with [MAGIC] if possible.
    ///
    /// Returns `false` when there are not enough bytes to tell.
    fn align(&mut self) -> bool {
        if self.buffer.len() < MAGIC_BYTES.len() {
            return false;
        }
        if self.buffer.starts_with(&MAGIC_BYTES) {
            return true;
        }
        match self
            .buffer
            .windows(MAGIC_BYTES.len())
            .position(|window| window == MAGIC_BYTES)
        {
            Some(offset) => {
                self.skip(offset);
                true
            }
            None => {
                // The tail might be the beginning of a split MAGIC.
                let keep = MAGIC_BYTES.len() - 1;
                self.skip(self.buffer.len() - keep);
                false
            }
        }
    }

    fn skip(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }
}

/// Iterator returned by [FrameDecoder::frames].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.decode_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Vec<u8>> {
        decoder.frames().map(|packet| packet.to_vec()).collect()
    }

    #[test]
    fn encodes_the_documented_layout() {
        let frame = encode(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0x12, 0x34, 0x56, 0x00, 0x03, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn encodes_an_empty_packet_as_a_bare_header() {
        assert_eq!(encode(&[]).as_ref(), &[0x00, 0x12, 0x34, 0x56, 0x00, 0x00]);
    }

    #[test]
    fn round_trips_packets_of_various_sizes() {
        for size in [0usize, 1, 5, 6, 1500, 2048, 40_000] {
            let packet: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut decoder = FrameDecoder::new();
            decoder.extend(&encode(&packet));
            assert_eq!(decode_all(&mut decoder), vec![packet]);
            assert!(decoder.is_empty());
        }
    }

    #[test]
    fn round_trips_the_largest_packet() {
        let packet = vec![0x5A; MAX_PAYLOAD_LEN];
        let frame = encode(&packet);
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(frame.len(), 65_541);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        let decoded = decoder.decode_next().unwrap();
        assert_eq!(decoded.len(), MAX_PAYLOAD_LEN);
        assert_eq!(decoded.as_ref(), packet.as_slice());
    }

    #[test]
    fn oversized_packet_gets_a_wrapped_length() {
        let frame = encode(&vec![0; MAX_PAYLOAD_LEN + 2]);
        assert_eq!(&frame[4..6], &[0x00, 0x01]);
    }

    #[test]
    fn decodes_coalesced_frames_in_order() {
        let packets: Vec<Vec<u8>> = vec![vec![1], vec![], vec![2, 3, 4], vec![9; 300]];
        let mut stream = BytesMut::new();
        for packet in &packets {
            encode_into(packet, &mut stream);
        }

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        assert_eq!(decode_all(&mut decoder), packets);
    }

    #[test]
    fn fragmentation_does_not_change_the_result() {
        let packets: Vec<Vec<u8>> = (0..20u8).map(|n| vec![n; n as usize * 7]).collect();
        let mut stream = BytesMut::new();
        for packet in &packets {
            encode_into(packet, &mut stream);
        }

        for chunk_size in [1, 2, 5, 6, 7, 13, 64, 1000] {
            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoder.extend(chunk);
                decoded.extend(decode_all(&mut decoder));
            }
            assert_eq!(decoded, packets, "chunk size {}", chunk_size);
            assert!(decoder.is_empty());
        }
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let frame = encode(&[1, 2, 3, 4, 5]);
        let mut decoder = FrameDecoder::new();

        decoder.extend(&frame[..4]);
        assert!(decoder.decode_next().is_none());
        assert_eq!(decoder.len(), 4);

        decoder.extend(&frame[4..8]);
        assert!(decoder.decode_next().is_none());
        assert_eq!(decoder.len(), 8);

        decoder.extend(&frame[8..]);
        assert_eq!(decoder.decode_next().unwrap().as_ref(), &[1, 2, 3, 4, 5]);
        assert!(decoder.is_empty());
        assert_eq!(decoder.discarded(), 0);
    }

    #[test]
    fn trailing_partial_frame_survives_a_decode_pass() {
        let mut stream = BytesMut::new();
        encode_into(&[7, 7], &mut stream);
        encode_into(&[8, 8, 8], &mut stream);
        let split = stream.len() - 2;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..split]);
        assert_eq!(decode_all(&mut decoder), vec![vec![7, 7]]);

        decoder.extend(&stream[split..]);
        assert_eq!(decode_all(&mut decoder), vec![vec![8, 8, 8]]);
    }

    #[test]
    fn resynchronises_after_garbage() {
        let mut stream = BytesMut::from(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01][..]);
        encode_into(&[0x42, 0x43], &mut stream);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        assert_eq!(decode_all(&mut decoder), vec![vec![0x42, 0x43]]);
        assert_eq!(decoder.discarded(), 5);
    }

    #[test]
    fn resynchronises_across_a_split_magic() {
        let frame = encode(&[0x99]);
        let mut decoder = FrameDecoder::new();

        decoder.extend(&[0xFF; 10]);
        decoder.extend(&frame[..2]);
        assert!(decoder.decode_next().is_none());
        assert_eq!(decoder.len(), 3);

        decoder.extend(&frame[2..]);
        assert_eq!(decode_all(&mut decoder), vec![vec![0x99]]);
        assert_eq!(decoder.discarded(), 10);
    }

    #[test]
    fn short_garbage_waits_for_more_bytes() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x01, 0x02, 0x03]);
        assert!(decoder.decode_next().is_none());
        assert_eq!(decoder.len(), 3);
        assert_eq!(decoder.discarded(), 0);
    }

    #[test]
    fn frames_is_restartable() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(&[1]));
        assert_eq!(decoder.frames().count(), 1);
        assert_eq!(decoder.frames().count(), 0);

        decoder.extend(&encode(&[2]));
        decoder.extend(&encode(&[3]));
        assert_eq!(decode_all(&mut decoder), vec![vec![2], vec![3]]);
    }
}
