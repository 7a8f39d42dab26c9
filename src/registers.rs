use crate::codec;

/// Modbus function used to write an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    WriteSingle = 6,
    WriteMultiple = 16,
}

impl FunctionCode {
    /// Resolve a raw function code while building the register tables.
    ///
    /// Anything other than 6 or 16 fails const evaluation of the table. Not for runtime input.
    pub(crate) const fn from_code(code: u8) -> Self {
        match code {
            6 => Self::WriteSingle,
            16 => Self::WriteMultiple,
            _ => panic!("unsupported function code in a register table"),
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl serde::Serialize for FunctionCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PayloadType {
    None,
    U16,
    I16,
    F32,
    /// Words prepared by the caller, e.g. packed display text.
    Raw,
}

/// A value to be written, before it is encoded according to a [`PayloadType`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Integer(i64),
    Float(f32),
    Words(Vec<u16>),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Integer(_) => "an integer",
            Payload::Float(_) => "a float",
            Payload::Words(_) => "register words",
        }
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Integer(n) => write!(f, "{n}"),
            Payload::Float(n) => write!(f, "{n}"),
            Payload::Words(words) => write!(f, "{words:?}"),
        }
    }
}

/// A value decoded from registers returned by the display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    U16(u16),
    F32(f32),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::U16(n) => write!(f, "{n}"),
            Value::F32(n) => write!(f, "{n}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("payload type {0} has no register encoding")]
    UnsupportedPayloadType(PayloadType),
    #[error("expected a payload of type {0}, got {1}")]
    PayloadKind(PayloadType, &'static str),
    #[error("{0} is not within {1}..={2}")]
    OutOfRange(i64, i64, i64),
    #[error("expected {0} registers, but the payload encodes to {1}")]
    RegisterCount(u16, usize),
    #[error("the payload encodes to no registers at all")]
    Empty,
}

#[derive(Debug, serde::Serialize)]
pub struct RegisterEntry {
    pub name: &'static str,
    pub function_code: FunctionCode,
    pub address: u16,
    /// `None` for entries that take however many words the payload encodes to.
    pub register_count: Option<u16>,
    pub payload_type: PayloadType,
    pub description: &'static str,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl RegisterEntry {
    /// Encode a payload into the words to write to this entry.
    pub fn encode(&self, payload: &Payload) -> Result<Vec<u16>, EncodeError> {
        let words = match (self.payload_type, payload) {
            (PayloadType::None, _) => {
                return Err(EncodeError::UnsupportedPayloadType(self.payload_type));
            }
            (PayloadType::U16, &Payload::Integer(v)) => {
                let v = self.check_range(v, 0, u16::MAX.into())?;
                vec![codec::encode_unsigned16(v as u16)]
            }
            (PayloadType::I16, &Payload::Integer(v)) => {
                let v = self.check_range(v, i16::MIN.into(), i16::MAX.into())?;
                vec![codec::encode_signed16(v as i16)]
            }
            (PayloadType::F32, &Payload::Float(v)) => codec::encode_float32(v).to_vec(),
            (PayloadType::F32, &Payload::Integer(v)) => codec::encode_float32(v as f32).to_vec(),
            (PayloadType::Raw, Payload::Words(words)) => words.clone(),
            (expected, payload) => return Err(EncodeError::PayloadKind(expected, payload.kind())),
        };
        match self.register_count {
            Some(count) if usize::from(count) != words.len() => {
                Err(EncodeError::RegisterCount(count, words.len()))
            }
            None if words.is_empty() => Err(EncodeError::Empty),
            _ => Ok(words),
        }
    }

    /// Decode registers echoed back by the display.
    pub fn decode(&self, words: &[u16]) -> Option<Value> {
        match self.payload_type {
            // NB: the signed register is read back through the unsigned path as well, so a
            // negative value comes back folded (e.g. -1 as 65535).
            PayloadType::U16 | PayloadType::I16 => {
                words.first().map(|w| Value::U16(codec::decode_unsigned16(*w)))
            }
            PayloadType::F32 => {
                let words = <[u16; 2]>::try_from(words).ok()?;
                Some(Value::F32(codec::decode_float32(words)))
            }
            PayloadType::Raw | PayloadType::None => None,
        }
    }

    fn check_range(&self, value: i64, type_min: i64, type_max: i64) -> Result<i64, EncodeError> {
        let minimum = self.minimum.unwrap_or(type_min).max(type_min);
        let maximum = self.maximum.unwrap_or(type_max).min(type_max);
        if value < minimum || value > maximum {
            return Err(EncodeError::OutOfRange(value, minimum, maximum));
        }
        Ok(value)
    }

    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        if self.name.contains(&pattern) {
            return true;
        }
        if self.description.to_lowercase().contains(&pattern) {
            return true;
        }
        if format!("{:#04x}", self.address).contains(&pattern) {
            return true;
        }
        return false;
    }
}

/// A display model and the operations its register map supports.
#[derive(Debug)]
pub struct Model {
    pub name: &'static str,
    pub entries: &'static [RegisterEntry],
}

impl Model {
    pub fn by_name(name: &str) -> Option<&'static Model> {
        MODELS.iter().copied().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn entry(&self, operation: &str) -> Option<&'static RegisterEntry> {
        self.entries.iter().find(|e| e.name == operation)
    }
}

// Operation name, function code, address, register count (`n` for variable), payload type,
// description, optional bounds for integer payloads.
macro_rules! for_each_led485_register {
    ($m:ident) => {
        $m! {
            "i16": 6, 0x00, 1, I16, "16-bit signed integer (see also the decimal point setting)", min = -32768, max = 32766;
            "dec_point": 6, 0x04, 1, U16, "Position of decimalpoint", min = 0, max = 3;
            "set_unit_id": 6, 0x02, 1, U16, "Set new unit id (\"modbus address\")", min = 1, max = 255;
            "set_baudrate": 6, 0x03, 1, U16, "Set new baudrate", min = 1, max = 8;
            "float": 16, 0x90, 2, F32, "float";
            "str_custom_segment": 16, 0x80, n, Raw, "custom segment string";
            "str_ascii": 16, 0x70, n, Raw, "ASCII string";
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! register_count {
    (n) => {
        None
    };
    ($count: literal) => {
        Some($count)
    };
}

macro_rules! make_entries {
    ($($name: literal: $fc: literal, $address: literal, $count: tt, $pt: ident, $description: literal $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        &[$(RegisterEntry {
            name: $name,
            function_code: FunctionCode::from_code($fc),
            address: $address,
            register_count: register_count!($count),
            payload_type: PayloadType::$pt,
            description: $description,
            minimum: optional!($($min)?),
            maximum: optional!($($max)?),
        }),+]
    };
}

pub static LED_485: Model = Model { name: "LED-485", entries: for_each_led485_register!(make_entries) };

pub static MODELS: &[&Model] = &[&LED_485];
