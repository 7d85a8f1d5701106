//! ICY (Shoutcast/Icecast) interleaved metadata demultiplexing.
//!
//! An origin that honours `Icy-MetaData: 1` sends `metaint` bytes of audio,
//! then one length byte `n`, then `n * 16` bytes of zero-padded metadata
//! text, repeating. [`IcyDemuxer`] undoes that interleaving: audio goes to
//! the sink untouched and in order, each completed metadata block is handed
//! to the sink as text.
//!
//! The demuxer does no I/O and never blocks. Chunk boundaries are arbitrary;
//! state carries over between [`IcyDemuxer::feed`] calls.

use crate::protocol_constants::{ICY_LENGTH_UNIT, MAX_METADATA_LEN};

/// Receives the two outputs of the demuxer.
pub trait StreamSink {
    /// Audio bytes, in upstream order, with metadata removed.
    fn write_audio(&mut self, audio: &[u8]);

    /// Text of a completed metadata block (length byte was non-zero).
    ///
    /// The text is cut at the first zero byte, so an all-padding block
    /// produces an empty string.
    fn metadata_complete(&mut self, text: String);
}

/// Where the demuxer is within the current metadata cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Forwarding audio until `metaint` bytes have passed.
    Audio,
    /// The next byte is the metadata length in 16-byte units.
    LengthByte,
    /// Accumulating metadata text.
    MetadataBody,
}

/// Stateful extractor for ICY metadata blocks in an audio stream.
///
/// Each instance should be used for a single upstream response.
pub struct IcyDemuxer {
    state: DemuxState,
    /// Metadata interval from the origin; 0 disables demultiplexing.
    metaint: usize,
    bytes_since_meta: usize,
    /// Accumulated metadata bytes. Capacity is fixed at [`MAX_METADATA_LEN`].
    metadata: Vec<u8>,
    expected_len: usize,
}

impl IcyDemuxer {
    /// Creates a pass-through demuxer (interval 0).
    #[must_use]
    pub fn new() -> Self {
        Self::with_metaint(0)
    }

    /// Creates a demuxer for the given metadata interval.
    #[must_use]
    pub fn with_metaint(metaint: usize) -> Self {
        Self {
            state: DemuxState::Audio,
            metaint,
            bytes_since_meta: 0,
            metadata: Vec::with_capacity(MAX_METADATA_LEN),
            expected_len: 0,
        }
    }

    /// Resets all state and installs a new metadata interval.
    pub fn configure(&mut self, metaint: usize) {
        self.state = DemuxState::Audio;
        self.metaint = metaint;
        self.bytes_since_meta = 0;
        self.metadata.clear();
        self.expected_len = 0;
    }

    /// Consumes one chunk of upstream bytes.
    ///
    /// Audio is written to `sink` as soon as it is seen; metadata is held
    /// until its block is complete. An empty chunk is a no-op.
    pub fn feed<S: StreamSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) {
        let mut remaining = chunk;

        while !remaining.is_empty() {
            match self.state {
                DemuxState::Audio => {
                    if self.metaint == 0 {
                        sink.write_audio(remaining);
                        return;
                    }

                    let to_boundary = self.metaint - self.bytes_since_meta;
                    let n = remaining.len().min(to_boundary);
                    sink.write_audio(&remaining[..n]);
                    self.bytes_since_meta += n;
                    remaining = &remaining[n..];

                    if self.bytes_since_meta == self.metaint {
                        self.bytes_since_meta = 0;
                        self.state = DemuxState::LengthByte;
                    }
                }
                DemuxState::LengthByte => {
                    // Exactly one byte, read as unsigned.
                    let units = remaining[0] as usize;
                    remaining = &remaining[1..];

                    self.metadata.clear();
                    self.expected_len = units * ICY_LENGTH_UNIT;
                    self.state = if self.expected_len == 0 {
                        DemuxState::Audio
                    } else {
                        DemuxState::MetadataBody
                    };
                }
                DemuxState::MetadataBody => {
                    let wanted = self.expected_len - self.metadata.len();
                    let n = remaining.len().min(wanted);
                    self.metadata.extend_from_slice(&remaining[..n]);
                    remaining = &remaining[n..];

                    if self.metadata.len() == self.expected_len {
                        self.finish_block(sink);
                    }
                }
            }
        }
    }

    fn finish_block<S: StreamSink + ?Sized>(&mut self, sink: &mut S) {
        debug_assert!(self.metadata.len() <= MAX_METADATA_LEN);

        // Blocks are zero-padded to a 16-byte multiple.
        let end = self
            .metadata
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.metadata.len());
        let text = String::from_utf8_lossy(&self.metadata[..end]).into_owned();

        log::trace!(
            "[Codec] Metadata block complete ({} bytes, {} text)",
            self.expected_len,
            end
        );

        self.state = DemuxState::Audio;
        self.bytes_since_meta = 0;
        self.expected_len = 0;
        self.metadata.clear();

        sink.metadata_complete(text);
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Returns the configured metadata interval.
    #[must_use]
    pub fn metaint(&self) -> usize {
        self.metaint
    }

    /// Returns the audio byte count since the last metadata boundary.
    #[must_use]
    pub fn bytes_since_meta(&self) -> usize {
        self.bytes_since_meta
    }
}

impl Default for IcyDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        audio: Vec<u8>,
        metadata: Vec<String>,
    }

    impl StreamSink for Capture {
        fn write_audio(&mut self, audio: &[u8]) {
            self.audio.extend_from_slice(audio);
        }

        fn metadata_complete(&mut self, text: String) {
            self.metadata.push(text);
        }
    }

    /// Deterministic generator so failures are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next_u64(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next_u64() % n as u64) as usize
        }

        fn fill(&mut self, buf: &mut [u8]) {
            for b in buf {
                *b = self.next_u64() as u8;
            }
        }
    }

    /// Appends a length byte plus zero-padded text.
    fn push_block(stream: &mut Vec<u8>, text: &[u8]) {
        let units = text.len().div_ceil(ICY_LENGTH_UNIT);
        assert!(units <= 255);
        stream.push(units as u8);
        stream.extend_from_slice(text);
        stream.resize(stream.len() + units * ICY_LENGTH_UNIT - text.len(), 0);
    }

    /// Random metadata text; one in ten cycles carries none.
    fn random_meta(rng: &mut XorShift) -> String {
        if rng.below(10) == 0 {
            return String::new();
        }
        let len = rng.below(MAX_METADATA_LEN);
        (0..len).map(|_| (b'A' + rng.below(26) as u8) as char).collect()
    }

    struct Interleaved {
        wire: Vec<u8>,
        audio: Vec<u8>,
        metadata: Vec<String>,
    }

    fn build_stream(rng: &mut XorShift, metaint: usize, cycles: usize) -> Interleaved {
        let mut wire = Vec::new();
        let mut audio = Vec::new();
        let mut metadata = Vec::new();

        for _ in 0..cycles {
            let mut chunk = vec![0u8; metaint];
            rng.fill(&mut chunk);
            wire.extend_from_slice(&chunk);
            audio.extend_from_slice(&chunk);

            let meta = random_meta(rng);
            push_block(&mut wire, meta.as_bytes());
            if !meta.is_empty() {
                metadata.push(meta);
            }
        }

        Interleaved {
            wire,
            audio,
            metadata,
        }
    }

    /// Feeds `wire` in pieces of `read_size` bytes (0 = random sizes).
    fn demux_in_pieces(
        wire: &[u8],
        metaint: usize,
        read_size: usize,
        rng: &mut XorShift,
    ) -> Capture {
        let max_piece = metaint * 2 + 1;
        let mut demuxer = IcyDemuxer::with_metaint(metaint);
        let mut capture = Capture::default();
        let mut pos = 0;

        while pos < wire.len() {
            let piece = if read_size == 0 {
                rng.below(max_piece)
            } else {
                read_size
            };
            let end = (pos + piece).min(wire.len());
            demuxer.feed(&wire[pos..end], &mut capture);
            pos = end;
        }
        capture
    }

    #[test]
    fn zero_interval_passes_everything_through() {
        let mut demuxer = IcyDemuxer::new();
        let mut capture = Capture::default();

        demuxer.feed(&[1, 2, 3, 0, 4], &mut capture);
        demuxer.feed(&[5, 6], &mut capture);

        assert_eq!(capture.audio, vec![1, 2, 3, 0, 4, 5, 6]);
        assert!(capture.metadata.is_empty());
        assert_eq!(demuxer.state(), DemuxState::Audio);
    }

    #[test]
    fn empty_feed_is_noop() {
        let mut demuxer = IcyDemuxer::with_metaint(4);
        let mut capture = Capture::default();

        demuxer.feed(&[1, 2], &mut capture);
        demuxer.feed(&[], &mut capture);

        assert_eq!(capture.audio, vec![1, 2]);
        assert_eq!(demuxer.bytes_since_meta(), 2);
        assert_eq!(demuxer.state(), DemuxState::Audio);
    }

    #[test]
    fn boundary_at_end_of_chunk_waits_for_length_byte() {
        let mut demuxer = IcyDemuxer::with_metaint(4);
        let mut capture = Capture::default();

        demuxer.feed(&[1, 2, 3, 4], &mut capture);
        assert_eq!(demuxer.state(), DemuxState::LengthByte);
        assert_eq!(demuxer.bytes_since_meta(), 0);

        // Length byte 0, then audio continues in the same chunk.
        demuxer.feed(&[0, 5, 6], &mut capture);
        assert_eq!(capture.audio, vec![1, 2, 3, 4, 5, 6]);
        assert!(capture.metadata.is_empty());
    }

    #[test]
    fn length_byte_consumes_exactly_one_byte() {
        let mut demuxer = IcyDemuxer::with_metaint(2);
        let mut capture = Capture::default();

        let mut wire = vec![9, 9];
        push_block(&mut wire, b"A='b';");
        wire.extend_from_slice(&[7, 7]);
        wire.push(0);
        wire.extend_from_slice(&[8]);

        demuxer.feed(&wire, &mut capture);

        assert_eq!(capture.audio, vec![9, 9, 7, 7, 8]);
        assert_eq!(capture.metadata, vec!["A='b';".to_string()]);
    }

    #[test]
    fn length_byte_is_unsigned() {
        let mut demuxer = IcyDemuxer::with_metaint(1);
        let mut capture = Capture::default();

        demuxer.feed(&[42, 0x80], &mut capture);
        assert_eq!(demuxer.state(), DemuxState::MetadataBody);

        let mut body = vec![b'x'; 2048];
        body.push(43);
        demuxer.feed(&body, &mut capture);

        assert_eq!(capture.audio, vec![42, 43]);
        assert_eq!(capture.metadata.len(), 1);
        assert_eq!(capture.metadata[0].len(), 2048);
    }

    #[test]
    fn maximum_block_is_accepted() {
        let mut demuxer = IcyDemuxer::with_metaint(1);
        let mut capture = Capture::default();

        let mut wire = vec![1, 255];
        wire.extend(std::iter::repeat(b'z').take(MAX_METADATA_LEN));
        wire.push(2);
        demuxer.feed(&wire, &mut capture);

        assert_eq!(capture.audio, vec![1, 2]);
        assert_eq!(capture.metadata[0].len(), MAX_METADATA_LEN);
    }

    #[test]
    fn all_padding_block_reports_empty_text() {
        let mut demuxer = IcyDemuxer::with_metaint(2);
        let mut capture = Capture::default();

        let mut wire = vec![1, 2, 1];
        wire.extend_from_slice(&[0u8; 16]);
        wire.extend_from_slice(&[3, 4]);
        demuxer.feed(&wire, &mut capture);

        assert_eq!(capture.audio, vec![1, 2, 3, 4]);
        assert_eq!(capture.metadata, vec![String::new()]);
    }

    #[test]
    fn zero_length_byte_never_reports_metadata() {
        let mut demuxer = IcyDemuxer::with_metaint(2);
        let mut capture = Capture::default();

        demuxer.feed(&[1, 2, 0, 3, 4, 0, 5, 6, 0], &mut capture);

        assert_eq!(capture.audio, vec![1, 2, 3, 4, 5, 6]);
        assert!(capture.metadata.is_empty());
    }

    #[test]
    fn text_filling_whole_block_is_kept_intact() {
        let mut demuxer = IcyDemuxer::with_metaint(1);
        let mut capture = Capture::default();

        let text = b"StreamTitle='ab'"; // exactly 16 bytes, no padding
        let mut wire = vec![0xAA, 1];
        wire.extend_from_slice(text);
        demuxer.feed(&wire, &mut capture);

        assert_eq!(capture.metadata, vec!["StreamTitle='ab'".to_string()]);
    }

    #[test]
    fn text_stops_at_first_zero_byte() {
        let mut demuxer = IcyDemuxer::with_metaint(1);
        let mut capture = Capture::default();

        let mut wire = vec![0xAA, 1];
        wire.extend_from_slice(b"abc\0def\0\0\0\0\0\0\0\0\0");
        demuxer.feed(&wire, &mut capture);

        assert_eq!(capture.metadata, vec!["abc".to_string()]);
    }

    #[test]
    fn configure_resets_mid_block_state() {
        let mut demuxer = IcyDemuxer::with_metaint(1);
        let mut capture = Capture::default();

        demuxer.feed(&[1, 2, b'a'], &mut capture);
        assert_eq!(demuxer.state(), DemuxState::MetadataBody);

        demuxer.configure(0);
        demuxer.feed(&[b'x', b'y'], &mut capture);

        assert_eq!(capture.audio, vec![1, b'x', b'y']);
        assert!(capture.metadata.is_empty());
        assert_eq!(demuxer.metaint(), 0);
    }

    #[test]
    fn elided_byte_count_matches_blocks() {
        let mut rng = XorShift(0x5eed_1234);
        let stream = build_stream(&mut rng, 512, 20);
        let capture = demux_in_pieces(&stream.wire, 512, 333, &mut rng);

        let block_bytes: usize = stream
            .metadata
            .iter()
            .map(|m| 1 + m.len().div_ceil(ICY_LENGTH_UNIT) * ICY_LENGTH_UNIT)
            .sum();
        let empty_cycles = 20 - stream.metadata.len();

        assert_eq!(
            capture.audio.len(),
            stream.wire.len() - block_bytes - empty_cycles
        );
    }

    #[test]
    fn chunking_never_changes_output() {
        const METAINT: usize = 1600;
        const CYCLES: usize = 10;

        let mut rng = XorShift(444);
        for read_size in [1600, 1599, 1601, 799, 800, 801] {
            let stream = build_stream(&mut rng, METAINT, CYCLES);
            let capture = demux_in_pieces(&stream.wire, METAINT, read_size, &mut rng);
            assert_eq!(capture.audio, stream.audio, "read_size={read_size}");
            assert_eq!(capture.metadata, stream.metadata, "read_size={read_size}");
        }

        for round in 0..10 {
            let stream = build_stream(&mut rng, METAINT, CYCLES);
            let capture = demux_in_pieces(&stream.wire, METAINT, 0, &mut rng);
            assert_eq!(capture.audio, stream.audio, "random round {round}");
            assert_eq!(capture.metadata, stream.metadata, "random round {round}");
        }
    }

    #[test]
    fn single_byte_feeds_match_single_call() {
        let mut rng = XorShift(7);
        let stream = build_stream(&mut rng, 64, 30);

        let whole = demux_in_pieces(&stream.wire, 64, stream.wire.len(), &mut rng);
        let bytewise = demux_in_pieces(&stream.wire, 64, 1, &mut rng);

        assert_eq!(whole.audio, bytewise.audio);
        assert_eq!(whole.metadata, bytewise.metadata);
        assert_eq!(whole.audio, stream.audio);
    }
}
