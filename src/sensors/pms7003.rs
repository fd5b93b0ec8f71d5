//! PMS7003 frame synchronizer and decoder.
//!
//! The sensor streams 32-byte frames in active mode (about one per second,
//! faster when concentrations change quickly). [`DecoderState`] consumes that
//! stream one byte at a time, hunts for the `0x42 0x4D` start marker, keeps a
//! running checksum while it collects the frame and resynchronizes after any
//! corruption.

use embedded_io::Error as _;

use super::frame::{
    Checksum, ConcentrationReading, EXPECTED_FRAME_LEN, FRAME_LEN, FRAME_START_1, FRAME_START_2,
    HEADER_LEN, RawFrame,
};
use super::transport::{ByteSource, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncState {
    SeekingStart1,
    SeekingStart2,
    Collecting,
}

/// Why bytes were thrown away while hunting for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError {
    /// A byte that is not the next start-marker byte.
    UnexpectedByte(u8),
    /// The length word does not describe this sensor's data layout.
    MalformedLength(u16),
}

/// Result of feeding one byte to [`DecoderState::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed.
    Pending,
    /// Synchronization was lost or never found; bytes were discarded.
    Resync(SyncError),
    /// A complete frame whose checksum matched.
    Frame(RawFrame),
    /// A complete frame whose checksum did not match.
    ChecksumFailed { declared: u16, computed: u16 },
}

/// Counters for bytes the synchronizer had to throw away.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncStats {
    pub discarded_bytes: u32,
    pub malformed_lengths: u32,
}

/// Frame synchronizer state. Persists across calls; one per transport.
#[derive(Debug, Clone)]
pub struct DecoderState {
    state: SyncState,
    buf: heapless::Vec<u8, FRAME_LEN>,
    checksum: Checksum,
    frame_len: usize,
    stats: SyncStats,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderState {
    pub fn new() -> Self {
        Self {
            state: SyncState::SeekingStart1,
            buf: heapless::Vec::new(),
            checksum: Checksum::default(),
            frame_len: FRAME_LEN,
            stats: SyncStats::default(),
        }
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    /// Bytes of the current candidate frame, start marker included.
    pub fn bytes_collected(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Drops any partial frame and goes back to hunting for a start marker.
    pub fn reset(&mut self) {
        self.state = SyncState::SeekingStart1;
        self.buf.clear();
        self.checksum = Checksum::default();
        self.frame_len = FRAME_LEN;
    }

    pub fn push(&mut self, byte: u8) -> Progress {
        match self.state {
            SyncState::SeekingStart1 => {
                if byte == FRAME_START_1 {
                    self.begin(byte);
                    Progress::Pending
                } else {
                    self.discard(1);
                    Progress::Resync(SyncError::UnexpectedByte(byte))
                }
            }
            SyncState::SeekingStart2 => {
                if byte == FRAME_START_2 {
                    self.collect(byte);
                    self.state = SyncState::Collecting;
                    Progress::Pending
                } else {
                    self.restart_from(byte);
                    Progress::Resync(SyncError::UnexpectedByte(byte))
                }
            }
            SyncState::Collecting => {
                self.collect(byte);

                if self.buf.len() == HEADER_LEN {
                    let declared = u16::from_be_bytes([self.buf[2], self.buf[3]]);
                    if declared != EXPECTED_FRAME_LEN {
                        self.stats.malformed_lengths = self.stats.malformed_lengths.saturating_add(1);
                        self.buf.pop();
                        self.restart_after_length(declared);
                        return Progress::Resync(SyncError::MalformedLength(declared));
                    }
                    self.frame_len = HEADER_LEN + declared as usize;
                }

                if self.buf.len() >= self.frame_len {
                    self.complete()
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn begin(&mut self, byte: u8) {
        self.buf.clear();
        // Cannot fail on an empty buffer.
        let _ = self.buf.push(byte);
        self.checksum = Checksum::start(byte);
        self.state = SyncState::SeekingStart2;
    }

    fn collect(&mut self, byte: u8) {
        // `frame_len` never exceeds the buffer capacity, so this cannot fail.
        let _ = self.buf.push(byte);
        self.checksum.add(byte);
    }

    /// Abandons the candidate frame and rescans `byte`, the rejected byte
    /// (not yet buffered), as a possible start of the next frame.
    fn restart_from(&mut self, byte: u8) {
        let dropped = self.buf.len() as u32 + 1;
        self.reset();
        if byte == FRAME_START_1 {
            self.begin(byte);
            self.discard(dropped - 1);
        } else {
            self.discard(dropped);
        }
    }

    /// Recovers from a bad length word. A word that is itself `42 4D` is the
    /// marker of the next frame; otherwise only its low byte is rescanned.
    fn restart_after_length(&mut self, declared: u16) {
        let [hi, lo] = declared.to_be_bytes();
        if hi == FRAME_START_1 && lo == FRAME_START_2 {
            // Drops the stale marker; `hi` is still buffered.
            let dropped = self.buf.len() as u32 - 1;
            self.reset();
            self.begin(hi);
            self.collect(lo);
            self.state = SyncState::Collecting;
            self.discard(dropped);
        } else {
            self.restart_from(lo);
        }
    }

    fn discard(&mut self, count: u32) {
        self.stats.discarded_bytes = self.stats.discarded_bytes.saturating_add(count);
    }

    fn complete(&mut self) -> Progress {
        let bytes = <[u8; FRAME_LEN]>::try_from(self.buf.as_slice());
        let mut checksum = self.checksum;
        self.reset();

        let Ok(bytes) = bytes else {
            return Progress::Resync(SyncError::MalformedLength(EXPECTED_FRAME_LEN));
        };
        // The checksum word does not cover itself.
        checksum.remove(bytes[FRAME_LEN - 2]);
        checksum.remove(bytes[FRAME_LEN - 1]);
        let computed = checksum.value();

        let frame = RawFrame::new(bytes);
        let declared = frame.declared_checksum();
        if declared == computed {
            Progress::Frame(frame)
        } else {
            Progress::ChecksumFailed { declared, computed }
        }
    }
}

/// Outcome of one decode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeOutcome {
    ValidatedReading(ConcentrationReading),
    ChecksumFailed { declared: u16, computed: u16 },
    TransportFailed(TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmsError {
    Checksum { declared: u16, computed: u16 },
    Transport(TransportError),
}

impl DecodeOutcome {
    pub fn into_result(self) -> Result<ConcentrationReading, PmsError> {
        match self {
            DecodeOutcome::ValidatedReading(reading) => Ok(reading),
            DecodeOutcome::ChecksumFailed { declared, computed } => {
                Err(PmsError::Checksum { declared, computed })
            }
            DecodeOutcome::TransportFailed(e) => Err(PmsError::Transport(e)),
        }
    }
}

/// Feeds one byte and maps a finished frame to an outcome.
fn step(state: &mut DecoderState, byte: u8) -> Option<DecodeOutcome> {
    match state.push(byte) {
        Progress::Pending => None,
        Progress::Resync(SyncError::UnexpectedByte(b)) => {
            trace!("Frame syncing... {}", b);
            None
        }
        Progress::Resync(SyncError::MalformedLength(len)) => {
            debug!("Unexpected frame length {}, resyncing", len);
            None
        }
        Progress::Frame(frame) => {
            let reading = frame.standard();
            debug!("Frame decoded: {:?}", reading);
            Some(DecodeOutcome::ValidatedReading(reading))
        }
        Progress::ChecksumFailed { declared, computed } => {
            warn!(
                "Checksum error, computed {} != declared {}",
                computed, declared
            );
            Some(DecodeOutcome::ChecksumFailed { declared, computed })
        }
    }
}

/// Reads from `source` until one frame completes, the source fails or
/// `max_sync_bytes` bytes pass without a frame.
///
/// Any failure resets `state`, so the next call starts clean.
pub fn decode_once<S: ByteSource>(
    state: &mut DecoderState,
    source: &mut S,
    max_sync_bytes: usize,
) -> DecodeOutcome {
    for _ in 0..max_sync_bytes {
        let byte = match source.read_byte() {
            Ok(byte) => byte,
            Err(e) => {
                state.reset();
                return DecodeOutcome::TransportFailed(e);
            }
        };
        if let Some(outcome) = step(state, byte) {
            return outcome;
        }
    }
    warn!("No frame within {} bytes", max_sync_bytes);
    state.reset();
    DecodeOutcome::TransportFailed(TransportError::NoFrame)
}

/// Async counterpart of [`decode_once`] over an `embedded_io_async` UART.
pub async fn decode_once_async<R: embedded_io_async::Read>(
    state: &mut DecoderState,
    uart: &mut R,
    max_sync_bytes: usize,
) -> DecodeOutcome {
    for _ in 0..max_sync_bytes {
        let byte = match read_byte(uart).await {
            Ok(byte) => byte,
            Err(e) => {
                state.reset();
                return DecodeOutcome::TransportFailed(e);
            }
        };
        if let Some(outcome) = step(state, byte) {
            return outcome;
        }
    }
    warn!("No frame within {} bytes", max_sync_bytes);
    state.reset();
    DecodeOutcome::TransportFailed(TransportError::NoFrame)
}

async fn read_byte<R: embedded_io_async::Read>(uart: &mut R) -> Result<u8, TransportError> {
    let mut buf = [0u8; 1];
    uart.read_exact(&mut buf).await.map_err(|e| match e {
        embedded_io::ReadExactError::UnexpectedEof => TransportError::EndOfStream,
        embedded_io::ReadExactError::Other(e) => TransportError::Io(e.kind()),
    })?;
    Ok(buf[0])
}

/// PMS7003 driver: a byte source plus the decoder state bound to it.
pub struct Pms7003<S> {
    source: S,
    state: DecoderState,
    max_sync_bytes: usize,
}

impl<S> Pms7003<S> {
    pub fn new(source: S, max_sync_bytes: usize) -> Self {
        Self {
            source,
            state: DecoderState::new(),
            max_sync_bytes,
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Drops any partially collected frame.
    pub fn reset(&mut self) {
        self.state.reset();
    }
}

impl<S: ByteSource> Pms7003<S> {
    pub fn decode_once(&mut self) -> DecodeOutcome {
        decode_once(&mut self.state, &mut self.source, self.max_sync_bytes)
    }
}

impl<S: embedded_io_async::Read> Pms7003<S> {
    pub async fn read(&mut self) -> DecodeOutcome {
        decode_once_async(&mut self.state, &mut self.source, self.max_sync_bytes).await
    }
}
