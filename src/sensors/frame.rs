//! PMS7003 active-mode frame layout.
//!
//! A frame is 32 bytes: the start marker `0x42 0x4D`, a big-endian length
//! word (always 28 = 13 data words + checksum), thirteen big-endian data
//! words and a big-endian checksum word holding the 16-bit sum of the 30
//! bytes before it.
//!
//! Words 1-3 are the standard-particle (CF=1) PM1.0/PM2.5/PM10 values,
//! words 4-6 the same triple under atmospheric environment, and words 7-13
//! are reserved.

pub const FRAME_START_1: u8 = 0x42;
pub const FRAME_START_2: u8 = 0x4D;
/// Total frame length, marker and checksum included.
pub const FRAME_LEN: usize = 32;
/// Value of the length word for this sensor's data layout.
pub const EXPECTED_FRAME_LEN: u16 = 28;
/// Bytes before the length word's payload starts counting.
pub const HEADER_LEN: usize = 4;
const MARKER_LEN: usize = 2;
const WORD_LEN: usize = 2;

/// A concentration triple in µg/m³.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConcentrationReading {
    pub pm1_0: u16,
    pub pm2_5: u16,
    pub pm10: u16,
}

impl ConcentrationReading {
    pub const fn new(pm1_0: u16, pm2_5: u16, pm10: u16) -> Self {
        Self { pm1_0, pm2_5, pm10 }
    }
}

/// Every 16-bit word in a frame after the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    FrameLength,
    StandardPm1_0,
    StandardPm2_5,
    StandardPm10,
    AtmosphericPm1_0,
    AtmosphericPm2_5,
    AtmosphericPm10,
    Reserved7,
    Reserved8,
    Reserved9,
    Reserved10,
    Reserved11,
    Reserved12,
    Reserved13,
    Checksum,
}

impl Field {
    pub const COUNT: usize = 15;
}

/// Byte offset of each field within the frame.
pub const FIELD_OFFSETS: [(Field, usize); Field::COUNT] = [
    (Field::FrameLength, 2),
    (Field::StandardPm1_0, 4),
    (Field::StandardPm2_5, 6),
    (Field::StandardPm10, 8),
    (Field::AtmosphericPm1_0, 10),
    (Field::AtmosphericPm2_5, 12),
    (Field::AtmosphericPm10, 14),
    (Field::Reserved7, 16),
    (Field::Reserved8, 18),
    (Field::Reserved9, 20),
    (Field::Reserved10, 22),
    (Field::Reserved11, 24),
    (Field::Reserved12, 26),
    (Field::Reserved13, 28),
    (Field::Checksum, 30),
];

/// Checks that each field appears once, that fields sit inside the frame on
/// word boundaries without overlapping, and that marker plus fields cover
/// every byte.
const fn layout_is_complete(table: &[(Field, usize)]) -> bool {
    let mut seen = [false; Field::COUNT];
    let mut covered = [false; FRAME_LEN];
    let mut b = 0;
    while b < MARKER_LEN {
        covered[b] = true;
        b += 1;
    }

    let mut i = 0;
    while i < table.len() {
        let (field, offset) = table[i];
        let idx = field as usize;
        if seen[idx] {
            return false;
        }
        seen[idx] = true;
        if offset % WORD_LEN != 0 || offset + WORD_LEN > FRAME_LEN {
            return false;
        }
        let mut j = offset;
        while j < offset + WORD_LEN {
            if covered[j] {
                return false;
            }
            covered[j] = true;
            j += 1;
        }
        i += 1;
    }

    let mut k = 0;
    while k < Field::COUNT {
        if !seen[k] {
            return false;
        }
        k += 1;
    }
    let mut c = 0;
    while c < FRAME_LEN {
        if !covered[c] {
            return false;
        }
        c += 1;
    }
    true
}

const _: () = assert!(
    layout_is_complete(&FIELD_OFFSETS),
    "PMS7003 field table must cover the frame exactly once"
);
const _: () = assert!(HEADER_LEN + EXPECTED_FRAME_LEN as usize == FRAME_LEN);

/// `FIELD_OFFSETS` indexed by `Field` discriminant. Every field is present
/// because `layout_is_complete` holds.
const OFFSET_BY_FIELD: [usize; Field::COUNT] = index_by_field(&FIELD_OFFSETS);
const CHECKSUM_AT: usize = OFFSET_BY_FIELD[Field::Checksum as usize];

const fn index_by_field(table: &[(Field, usize); Field::COUNT]) -> [usize; Field::COUNT] {
    let mut out = [0; Field::COUNT];
    let mut i = 0;
    while i < table.len() {
        let (field, offset) = table[i];
        out[field as usize] = offset;
        i += 1;
    }
    out
}

/// Running 16-bit sum over the bytes of a frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Checksum(u16);

impl Checksum {
    /// Restarts the sum at `byte` (the first start-marker byte).
    pub fn start(byte: u8) -> Self {
        Checksum(byte as u16)
    }

    pub fn add(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(byte as u16);
    }

    /// Takes a byte that was added back out of the sum.
    pub fn remove(&mut self, byte: u8) {
        self.0 = self.0.wrapping_sub(byte as u16);
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Sum of a whole slice, for building and checking frames at rest.
    pub fn of(bytes: &[u8]) -> Self {
        Checksum(
            bytes
                .iter()
                .fold(0u16, |acc, &b| acc.wrapping_add(b as u16)),
        )
    }
}

/// A structurally complete frame. Says nothing about the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: [u8; FRAME_LEN],
}

impl RawFrame {
    pub fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn word(&self, field: Field) -> u16 {
        let at = OFFSET_BY_FIELD[field as usize];
        u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    pub fn declared_length(&self) -> u16 {
        self.word(Field::FrameLength)
    }

    pub fn declared_checksum(&self) -> u16 {
        self.word(Field::Checksum)
    }

    /// Sum of every byte before the checksum word.
    pub fn computed_checksum(&self) -> u16 {
        Checksum::of(&self.bytes[..CHECKSUM_AT]).value()
    }

    /// Standard-particle (CF=1) concentrations.
    pub fn standard(&self) -> ConcentrationReading {
        ConcentrationReading {
            pm1_0: self.word(Field::StandardPm1_0),
            pm2_5: self.word(Field::StandardPm2_5),
            pm10: self.word(Field::StandardPm10),
        }
    }

    /// Atmospheric-environment concentrations.
    pub fn atmospheric(&self) -> ConcentrationReading {
        ConcentrationReading {
            pm1_0: self.word(Field::AtmosphericPm1_0),
            pm2_5: self.word(Field::AtmosphericPm2_5),
            pm10: self.word(Field::AtmosphericPm10),
        }
    }

    /// Builds a well-formed frame with a correct checksum. Used by tests and
    /// sensor simulators.
    pub fn encode(
        standard: ConcentrationReading,
        atmospheric: ConcentrationReading,
        reserved: [u16; 7],
    ) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = FRAME_START_1;
        bytes[1] = FRAME_START_2;
        let mut put = |field: Field, value: u16| {
            let at = OFFSET_BY_FIELD[field as usize];
            bytes[at..at + WORD_LEN].copy_from_slice(&value.to_be_bytes());
        };
        put(Field::FrameLength, EXPECTED_FRAME_LEN);
        put(Field::StandardPm1_0, standard.pm1_0);
        put(Field::StandardPm2_5, standard.pm2_5);
        put(Field::StandardPm10, standard.pm10);
        put(Field::AtmosphericPm1_0, atmospheric.pm1_0);
        put(Field::AtmosphericPm2_5, atmospheric.pm2_5);
        put(Field::AtmosphericPm10, atmospheric.pm10);
        let reserved_fields = [
            Field::Reserved7,
            Field::Reserved8,
            Field::Reserved9,
            Field::Reserved10,
            Field::Reserved11,
            Field::Reserved12,
            Field::Reserved13,
        ];
        for (field, value) in reserved_fields.into_iter().zip(reserved) {
            put(field, value);
        }
        let sum = Checksum::of(&bytes[..CHECKSUM_AT]).value();
        bytes[CHECKSUM_AT..].copy_from_slice(&sum.to_be_bytes());
        Self { bytes }
    }
}
