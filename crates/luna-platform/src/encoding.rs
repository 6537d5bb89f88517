//! Text encodings supported by file reads and writes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PlatformError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Ascii,
    Latin1,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16",
            Self::Utf16Be => "utf-16be",
            Self::Ascii => "ascii",
            Self::Latin1 => "latin1",
        }
    }

    /// Encode `text`. UTF-16 output starts with a byte-order mark; characters
    /// outside ascii or latin1 are replaced with `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16Le => {
                let mut bytes = UTF16LE_BOM.to_vec();
                bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
                bytes
            }
            Self::Utf16Be => {
                let mut bytes = UTF16BE_BOM.to_vec();
                bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                bytes
            }
            Self::Ascii => text
                .chars()
                .map(|ch| if ch.is_ascii() { ch as u8 } else { b'?' })
                .collect(),
            Self::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Decode `bytes`, dropping a leading byte-order mark that matches the encoding.
    pub fn decode(self, bytes: &[u8]) -> Result<String, PlatformError> {
        match self {
            Self::Utf8 => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                String::from_utf8(body.to_vec())
                    .map_err(|err| PlatformError::InvalidArgument(format!("invalid utf-8: {err}")))
            }
            Self::Utf16Le => decode_utf16(
                bytes.strip_prefix(UTF16LE_BOM).unwrap_or(bytes),
                u16::from_le_bytes,
            ),
            Self::Utf16Be => decode_utf16(
                bytes.strip_prefix(UTF16BE_BOM).unwrap_or(bytes),
                u16::from_be_bytes,
            ),
            Self::Ascii => Ok(bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect()),
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, PlatformError> {
    if bytes.len() % 2 != 0 {
        return Err(PlatformError::InvalidArgument(
            "utf-16 data has an odd byte length".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|err| PlatformError::InvalidArgument(format!("invalid utf-16: {err}")))
}

impl FromStr for TextEncoding {
    type Err = PlatformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16" | "utf16" | "utf-16le" | "unicode" => Ok(Self::Utf16Le),
            "utf-16be" | "bigendianunicode" => Ok(Self::Utf16Be),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            other => Err(PlatformError::InvalidArgument(format!(
                "unsupported encoding '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for TextEncoding {
    type Error = PlatformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TextEncoding> for String {
    fn from(value: TextEncoding) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_aliases() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("Unicode".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16Le);
        assert_eq!(
            "BigEndianUnicode".parse::<TextEncoding>().unwrap(),
            TextEncoding::Utf16Be
        );
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn test_utf16_writes_bom_and_reads_it_back() {
        let bytes = TextEncoding::Utf16Le.encode("hé");
        assert_eq!(&bytes[..2], UTF16LE_BOM);
        assert_eq!(TextEncoding::Utf16Le.decode(&bytes).unwrap(), "hé");

        let bytes = TextEncoding::Utf16Be.encode("hé");
        assert_eq!(&bytes[..2], UTF16BE_BOM);
        assert_eq!(TextEncoding::Utf16Be.decode(&bytes).unwrap(), "hé");
    }

    #[test]
    fn test_ascii_replaces_unrepresentable_chars() {
        assert_eq!(TextEncoding::Ascii.encode("naïve"), b"na?ve".to_vec());
        assert_eq!(TextEncoding::Latin1.encode("naïve€"), b"na\xefve?".to_vec());
    }

    #[test]
    fn test_utf8_decode_rejects_invalid_bytes() {
        assert!(TextEncoding::Utf8.decode(&[0xff, 0xfe, 0xfd]).is_err());
        assert_eq!(TextEncoding::Utf8.decode(b"\xEF\xBB\xBFhi").unwrap(), "hi");
    }
}
