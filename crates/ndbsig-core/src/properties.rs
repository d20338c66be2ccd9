//! Simple properties: typed key/value pairs packed into a section.
//!
//! Each entry starts with a key word `type << 16 | key`. A `Uint32` value
//! follows as one word. `String` and `Binary` values follow as a byte
//! length word and then the bytes packed little-endian into words, zero
//! padded. String lengths include the terminating NUL.

use crate::error::PoolError;
use crate::reader::SectionReader;
use crate::writer::SectionWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PropertyType {
    Uint32 = 0,
    String = 1,
    Binary = 2,
}

impl TryFrom<u16> for PropertyType {
    type Error = PropertyError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Uint32),
            1 => Ok(Self::String),
            2 => Ok(Self::Binary),
            other => Err(PropertyError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Uint32(u32),
    String(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property stream truncated")]
    Truncated,

    #[error("unknown property type {0}")]
    UnknownType(u16),

    #[error("string property {key} is not valid UTF-8")]
    InvalidUtf8 { key: u16 },

    #[error("string property {key} is missing its terminator")]
    MissingTerminator { key: u16 },
}

fn key_word(ty: PropertyType, key: u16) -> u32 {
    (ty as u32) << 16 | key as u32
}

fn pack_bytes(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks(4).map(|chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(word)
    })
}

// ── Encoding ──────────────────────────────────────────────────────────────────

impl SectionWriter<'_> {
    pub fn put_u32_property(&mut self, key: u16, value: u32) -> Result<(), PoolError> {
        self.put_words(&[key_word(PropertyType::Uint32, key), value])
    }

    pub fn put_str_property(&mut self, key: u16, value: &str) -> Result<(), PoolError> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.put_bytes(PropertyType::String, key, &bytes)
    }

    pub fn put_binary_property(&mut self, key: u16, value: &[u8]) -> Result<(), PoolError> {
        self.put_bytes(PropertyType::Binary, key, value)
    }

    fn put_bytes(&mut self, ty: PropertyType, key: u16, bytes: &[u8]) -> Result<(), PoolError> {
        let mut words = Vec::with_capacity(2 + bytes.len().div_ceil(4));
        words.push(key_word(ty, key));
        words.push(bytes.len() as u32);
        words.extend(pack_bytes(bytes));
        self.put_words(&words)
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Iterates the properties stored in a section.
pub struct PropertiesReader<'r, 'a> {
    reader: &'r mut SectionReader<'a>,
}

impl<'r, 'a> PropertiesReader<'r, 'a> {
    pub fn new(reader: &'r mut SectionReader<'a>) -> Self {
        Self { reader }
    }

    /// Next `(key, value)` pair, or `None` at a clean end of the section.
    pub fn next_property(&mut self) -> Result<Option<(u16, PropertyValue)>, PropertyError> {
        let Some(key_word) = self.reader.get_word() else {
            return Ok(None);
        };
        let key = key_word as u16;
        let value = match PropertyType::try_from((key_word >> 16) as u16)? {
            PropertyType::Uint32 => {
                PropertyValue::Uint32(self.reader.get_word().ok_or(PropertyError::Truncated)?)
            }
            PropertyType::String => {
                let mut bytes = self.read_bytes()?;
                if bytes.pop() != Some(0) {
                    return Err(PropertyError::MissingTerminator { key });
                }
                let s = String::from_utf8(bytes).map_err(|_| PropertyError::InvalidUtf8 { key })?;
                PropertyValue::String(s)
            }
            PropertyType::Binary => PropertyValue::Binary(self.read_bytes()?),
        };
        Ok(Some((key, value)))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, PropertyError> {
        let len = self.reader.get_word().ok_or(PropertyError::Truncated)? as usize;
        let mut words = vec![0u32; len.div_ceil(4)];
        if !self.reader.get_words(&mut words) {
            return Err(PropertyError::Truncated);
        }
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.truncate(len);
        Ok(bytes)
    }
}

impl Iterator for PropertiesReader<'_, '_> {
    type Item = Result<(u16, PropertyValue), PropertyError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_property().transpose()
    }
}
