use crate::error::IdError;
use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Unix second of 2017-01-01T00:00:00Z, the zero point of the timestamp field.
///
/// A 32-bit offset from here lasts until early 2153.
pub const EPOCH_SECOND: i64 = 1_483_228_800;

/// Text form of an identifier that has no timestamp.
pub const INVALID: &str = "<invalid>";

/// Digit alphabet: `a-zA-Z1-9`. `0` is reserved as the group separator.
const ALPHABET: &[u8; 61] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";
const RADIX: u64 = ALPHABET.len() as u64;
const SEPARATOR: char = '0';

/// 61^6 > u32::MAX
const MAX_GROUP_DIGITS: usize = 6;

const NOT_A_DIGIT: u8 = 0xFF;
static DECODER: [u8; 256] = build_decoder();

const fn build_decoder() -> [u8; 256] {
    let mut table = [NOT_A_DIGIT; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// A compact, URL-safe record identifier.
///
/// Three 32-bit fields:
/// - seconds since [`EPOCH_SECOND`] (0 means "unset")
/// - the origin tag of the process that minted it
/// - the sequence counter handed out by the storage backend
///
/// The text form renders each field as a base61 digit group, without padding,
/// joined by `0`: `{timestamp}0{origin}0{counter}`. A zero-valued field is an
/// empty group, so `b00` is timestamp 1 with origin and counter 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Id {
    timestamp_offset: u32,
    origin: u32,
    counter: u32,
}

impl Id {
    /// Mints an identifier for an instant.
    ///
    /// Fails with [`IdError::OutOfRange`] if `at` is not strictly after the
    /// epoch anchor or is past the end of the 32-bit range.
    pub fn new(origin: u32, at: Timestamp, counter: u32) -> Result<Self, IdError> {
        let second = at.as_second();
        let timestamp_offset = second
            .checked_sub(EPOCH_SECOND)
            .filter(|offset| *offset > 0)
            .and_then(|offset| u32::try_from(offset).ok())
            .ok_or(IdError::OutOfRange { second })?;

        Ok(Self {
            timestamp_offset,
            origin,
            counter,
        })
    }

    pub const fn from_parts(timestamp_offset: u32, origin: u32, counter: u32) -> Self {
        Self {
            timestamp_offset,
            origin,
            counter,
        }
    }

    pub const fn timestamp_offset(&self) -> u32 {
        self.timestamp_offset
    }

    pub const fn origin(&self) -> u32 {
        self.origin
    }

    pub const fn counter(&self) -> u32 {
        self.counter
    }

    /// An identifier is valid once it carries a timestamp.
    pub const fn is_valid(&self) -> bool {
        self.timestamp_offset != 0
    }

    /// Returns the creation instant, or `None` for an invalid identifier.
    pub fn time(&self) -> Option<Timestamp> {
        if !self.is_valid() {
            return None;
        }
        Timestamp::from_second(EPOCH_SECOND + i64::from(self.timestamp_offset)).ok()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.pad(INVALID);
        }

        // filled from the back: counter, origin, timestamp
        let mut buf = [0u8; 3 * MAX_GROUP_DIGITS + 2];
        let mut pos = buf.len();
        let groups = [self.counter, self.origin, self.timestamp_offset];
        for (i, field) in groups.into_iter().enumerate() {
            if i > 0 {
                pos -= 1;
                buf[pos] = SEPARATOR as u8;
            }
            let mut value = u64::from(field);
            while value > 0 {
                pos -= 1;
                buf[pos] = ALPHABET[(value % RADIX) as usize];
                value /= RADIX;
            }
        }

        let text = std::str::from_utf8(&buf[pos..]).map_err(|_| fmt::Error)?;
        f.pad(text)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut groups = s.split(SEPARATOR);
        let (Some(timestamp), Some(origin), Some(counter), None) =
            (groups.next(), groups.next(), groups.next(), groups.next())
        else {
            return Err(IdError::Malformed(format!(
                "{s:?} must have exactly three digit groups"
            )));
        };

        Ok(Self {
            timestamp_offset: decode_group(s, timestamp)?,
            origin: decode_group(s, origin)?,
            counter: decode_group(s, counter)?,
        })
    }
}

/// Decodes one base61 group, most significant digit first, in exact integer
/// arithmetic. An empty group is zero.
fn decode_group(id: &str, group: &str) -> Result<u32, IdError> {
    let mut value: u64 = 0;
    for byte in group.bytes() {
        let digit = DECODER[usize::from(byte)];
        if digit == NOT_A_DIGIT {
            return Err(IdError::Malformed(format!(
                "{id:?} contains a character outside the base61 alphabet"
            )));
        }
        value = value
            .checked_mul(RADIX)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .filter(|v| *v <= u64::from(u32::MAX))
            .ok_or_else(|| IdError::Malformed(format!("{id:?} has a group beyond 32 bits")))?;
    }
    u32::try_from(value).map_err(|_| IdError::Malformed(format!("{id:?} has a group beyond 32 bits")))
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if !self.is_valid() {
            return serializer.serialize_none();
        }
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // null leaves the zero value in place
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => text.parse().map_err(serde::de::Error::custom),
            None => Ok(Self::default()),
        }
    }
}
