use embedded_hal::delay::DelayNs;
use embassy_time::Instant;

use pm25::config::CONFIG;
use pm25::sensors::{
    ConcentrationReading, DecodeOutcome, DecoderState, IoTransport, Poller, RawFrame, ReadMode,
    ReadingStore, SerialReader, TransportError, decode_once,
};

/// Sample frame: standard PM1.0/2.5/10 = 10/20/30, atmospheric 11/21/31.
const FRAME: [u8; 32] = [
    0x42, 0x4D, 0x00, 0x1C, 0x00, 0x0A, 0x00, 0x14, 0x00, 0x1E, 0x00, 0x0B, 0x00, 0x15, 0x00, 0x1F,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x26,
];

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

type Reader<'a> = SerialReader<IoTransport<&'a [u8]>, NoDelay>;

fn reader(bytes: &[u8]) -> Reader<'_> {
    SerialReader::new(
        IoTransport::new(bytes),
        NoDelay,
        ReadMode::Blocking,
        CONFIG.sensor.retry,
    )
}

/// xorshift32; deterministic garbage without pulling in an RNG crate.
fn garbage(seed: u32, len: usize) -> Vec<u8> {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

/// Decodes until the stream runs dry.
fn decode_all(bytes: &[u8]) -> Vec<DecodeOutcome> {
    let mut state = DecoderState::new();
    let mut source = reader(bytes);
    let mut outcomes = Vec::new();
    loop {
        match decode_once(&mut state, &mut source, CONFIG.sensor.max_sync_bytes) {
            DecodeOutcome::TransportFailed(TransportError::EndOfStream) => return outcomes,
            outcome => outcomes.push(outcome),
        }
    }
}

#[test]
fn literal_frame_decodes_to_standard_values() {
    assert_eq!(
        decode_all(&FRAME),
        [DecodeOutcome::ValidatedReading(ConcentrationReading::new(10, 20, 30))]
    );
}

#[test]
fn corrupted_checksum_is_reported_not_published() {
    let mut corrupted = FRAME;
    corrupted[31] = 0x27;

    let store = ReadingStore::new();
    let mut poller = Poller::new(reader(&corrupted), CONFIG.sensor);
    let outcome = poller.poll_once(&store, Instant::from_secs(1));

    assert_eq!(
        outcome,
        DecodeOutcome::ChecksumFailed {
            declared: 0x0127,
            computed: 0x0126
        }
    );
    assert_eq!(store.snapshot(), ConcentrationReading::default());
    assert_eq!(store.status().updated_at, None);
}

#[test]
fn leading_noise_is_skipped() {
    let mut stream = vec![0xFF, 0xFF, 0xFF];
    stream.extend_from_slice(&FRAME);
    assert_eq!(
        decode_all(&stream),
        [DecodeOutcome::ValidatedReading(ConcentrationReading::new(10, 20, 30))]
    );
}

#[test]
fn stray_marker_does_not_swallow_the_next_frame() {
    let mut stream = vec![0x42, 0x4D];
    stream.extend_from_slice(&FRAME);
    assert_eq!(
        decode_all(&stream),
        [DecodeOutcome::ValidatedReading(ConcentrationReading::new(10, 20, 30))]
    );
}

#[test]
fn random_garbage_never_produces_a_reading() {
    for seed in [1, 0xDEAD_BEEF, 0x1234_5678, 42] {
        let noise = garbage(seed, 8192);
        let store = ReadingStore::new();
        let mut poller = Poller::new(reader(&noise), CONFIG.sensor);
        loop {
            match poller.poll_once(&store, Instant::from_secs(1)) {
                DecodeOutcome::ValidatedReading(r) => panic!("garbage decoded to {:?}", r),
                DecodeOutcome::TransportFailed(TransportError::EndOfStream) => break,
                _ => {}
            }
        }
        assert_eq!(store.snapshot(), ConcentrationReading::default());
        assert_eq!(store.status().health.frames_ok, 0);
    }
}

#[test]
fn resyncs_after_runs_of_non_marker_bytes() {
    let second = RawFrame::encode(
        ConcentrationReading::new(5, 12, 40),
        ConcentrationReading::new(5, 12, 40),
        [0; 7],
    );

    let mut stream = Vec::new();
    for (seed, frame) in [(7, FRAME), (99, *second.as_bytes())] {
        stream.extend(garbage(seed, 300).into_iter().filter(|&b| b != 0x42));
        stream.extend_from_slice(&frame);
    }

    let readings: Vec<_> = decode_all(&stream)
        .into_iter()
        .filter_map(|o| o.into_result().ok())
        .collect();
    assert_eq!(
        readings,
        [
            ConcentrationReading::new(10, 20, 30),
            ConcentrationReading::new(5, 12, 40)
        ]
    );
}

#[test]
fn snapshot_is_stable_between_updates() {
    let store = ReadingStore::new();
    let mut poller = Poller::new(reader(&FRAME), CONFIG.sensor);
    poller.poll_once(&store, Instant::from_secs(3));

    let first = store.snapshot();
    assert_eq!(first, ConcentrationReading::new(10, 20, 30));
    assert!((0..100).all(|_| store.snapshot() == first));
}
