//! Conversions between human-facing values and LED-485 register words.
//!
//! Nothing in here performs I/O. Every register is a big-endian 16-bit word; where a value spans
//! multiple registers the most significant word comes first.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("character {0:?} is not allowed, only space, `_`, 0-9 and A-Z can be shown with custom segments")]
    SegmentCharacter(char),
    #[error("character {0:?} is not allowed, only printable ASCII can be shown")]
    AsciiCharacter(char),
    #[error("the string {0:?} is not between 1 and {1} characters long")]
    TextLength(String, usize),
    #[error("{0} is not a supported baud rate (1200, 2400, 4800, 9600, 19200, 38400, 57600 or 115200)")]
    BaudRate(String),
    #[error("{0} is not a baud rate code (1..=8)")]
    BaudRateCode(u16),
    #[error("{0} is not a supported display size (4, 5 or 6)")]
    DisplaySize(String),
    #[error("{0} is not a unit id (1..=255)")]
    UnitId(String),
}

/// Fold a signed value into a register word, two's complement.
pub const fn encode_signed16(value: i16) -> u16 {
    value as u16
}

pub const fn decode_signed16(word: u16) -> i16 {
    word as i16
}

pub const fn encode_unsigned16(value: u16) -> u16 {
    value
}

pub const fn decode_unsigned16(word: u16) -> u16 {
    word
}

/// Split an IEEE-754 single into `[high, low]` register words.
pub const fn encode_float32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

pub const fn decode_float32([high, low]: [u16; 2]) -> f32 {
    f32::from_bits((high as u32) << 16 | low as u32)
}

const SEGMENT_SPACE: u8 = 0x00;

const SEGMENT_DIGITS: [u8; 10] = [0x3f, 0x06, 0x5b, 0x4f, 0x66, 0x6d, 0x7d, 0x07, 0x7f, 0x6f];

#[rustfmt::skip]
const SEGMENT_LETTERS: [u8; 26] = [
    0x77, 0x7c, 0x39, 0x5e, 0x79, 0x71, 0x3d, 0x76, 0x10, 0x0e, 0x7a, 0x38, 0x55,
    0x54, 0x5c, 0x73, 0x67, 0x50, 0x64, 0x78, 0x3e, 0x62, 0x6a, 0x36, 0x6e, 0x49,
];

/// The 7-segment bit pattern for a character, if the display can show it.
pub fn segment_code(character: char) -> Option<u8> {
    match character {
        ' ' => Some(SEGMENT_SPACE),
        '0'..='9' => Some(SEGMENT_DIGITS[character as usize - '0' as usize]),
        'A'..='Z' => Some(SEGMENT_LETTERS[character as usize - 'A' as usize]),
        _ => None,
    }
}

/// Uppercase the text, turn `_` into spaces and pad it to an even length.
///
/// This is the exact character sequence that [`encode_segment_string`] packs.
pub fn normalize_segment_text(text: &str) -> Result<String, Error> {
    let mut normalized = text
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            '_' => ' ',
            c => c,
        })
        .map(|c| segment_code(c).map(|_| c).ok_or(Error::SegmentCharacter(c)))
        .collect::<Result<String, _>>()?;
    if normalized.len() % 2 == 1 {
        normalized.push(' ');
    }
    Ok(normalized)
}

/// Pack text as pairs of 7-segment codes, the first code of each pair in the high byte.
pub fn encode_segment_string(text: &str) -> Result<Vec<u16>, Error> {
    let normalized = normalize_segment_text(text)?;
    let codes = normalized.chars().filter_map(segment_code).collect::<Vec<u8>>();
    Ok(pack_bytes(&codes))
}

/// Right-justify text to `width` characters and pad it to an even length.
///
/// Every character, padding included, must be printable ASCII (`0x20..=0x7E`).
pub fn justify_ascii_text(text: &str, width: usize) -> Result<String, Error> {
    if text.chars().count() > width {
        return Err(Error::TextLength(text.to_string(), width));
    }
    let mut justified = format!("{text:>width$}");
    if let Some(c) = justified.chars().find(|c| !(' '..='~').contains(c)) {
        return Err(Error::AsciiCharacter(c));
    }
    if justified.len() % 2 == 1 {
        justified.push(' ');
    }
    Ok(justified)
}

/// Pack text as pairs of ASCII characters, the earlier character in the high byte.
pub fn encode_ascii_string(text: &str, width: usize) -> Result<Vec<u16>, Error> {
    let justified = justify_ascii_text(text, width)?;
    Ok(pack_bytes(justified.as_bytes()))
}

fn pack_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect()
}

/// Line speeds the display supports, numbered the way its `set_baudrate` register expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, strum::VariantArray)]
#[repr(u16)]
pub enum BaudRate {
    B1200 = 1,
    B2400 = 2,
    B4800 = 3,
    #[default]
    B9600 = 4,
    B19200 = 5,
    B38400 = 6,
    B57600 = 7,
    B115200 = 8,
}

impl BaudRate {
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Self::B1200 => 1200,
            Self::B2400 => 2400,
            Self::B4800 => 4800,
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
        }
    }

    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self, Error> {
        <Self as strum::VariantArray>::VARIANTS
            .iter()
            .copied()
            .find(|b| b.code() == code)
            .ok_or(Error::BaudRateCode(code))
    }
}

impl std::str::FromStr for BaudRate {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bps = s.trim().parse::<u32>().map_err(|_| Error::BaudRate(s.to_string()))?;
        <Self as strum::VariantArray>::VARIANTS
            .iter()
            .copied()
            .find(|b| b.bits_per_second() == bps)
            .ok_or_else(|| Error::BaudRate(s.to_string()))
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits_per_second())
    }
}

/// Number of 7-segment digits on the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySize(u8);

impl DisplaySize {
    pub const fn digits(self) -> usize {
        self.0 as usize
    }

    /// Texts must have between 1 and [`Self::digits`] characters.
    pub fn check(self, text: &str) -> Result<(), Error> {
        let length = text.chars().count();
        if length == 0 || length > self.digits() {
            return Err(Error::TextLength(text.to_string(), self.digits()));
        }
        Ok(())
    }
}

impl Default for DisplaySize {
    fn default() -> Self {
        Self(6)
    }
}

impl std::str::FromStr for DisplaySize {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u8>() {
            Ok(digits @ 4..=6) => Ok(Self(digits)),
            _ => Err(Error::DisplaySize(s.to_string())),
        }
    }
}

impl std::fmt::Display for DisplaySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a Modbus unit id, which the displays accept in `1..=255`.
pub fn parse_unit_id(s: &str) -> Result<u8, Error> {
    match s.trim().parse::<u8>() {
        Ok(id @ 1..=255) => Ok(id),
        _ => Err(Error::UnitId(s.to_string())),
    }
}
