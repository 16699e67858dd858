use serde::{Deserialize, Serialize};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Text encoding used when turning child output into lines
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced with U+FFFD
    #[default]
    Utf8,
    /// UTF-8, invalid sequences are an error
    Utf8Strict,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> std::io::Result<String> {
        match self {
            TextEncoding::Utf8 => Ok(String::from_utf8_lossy(bytes).into_owned()),
            TextEncoding::Utf8Strict => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Splits a byte stream into lines on `\n`, `\r` and `\r\n`.
///
/// A `\r` that ends one chunk followed by `\n` at the start of the next is a
/// single boundary.
#[derive(Debug, Default)]
pub struct LineDecoder {
    encoding: TextEncoding,
    skip_line_feed: bool,
}

impl LineDecoder {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            skip_line_feed: false,
        }
    }
}

impl Decoder for LineDecoder {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skip_line_feed && !src.is_empty() {
            self.skip_line_feed = false;
            if src[0] == b'\n' {
                src.advance(1);
            }
        }

        let Some(end) = src.iter().position(|b| *b == b'\n' || *b == b'\r') else {
            return Ok(None);
        };

        let line = src.split_to(end);
        if src[0] == b'\r' {
            self.skip_line_feed = true;
        }
        src.advance(1);

        self.encoding.decode(&line).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let line = src.split();
        self.encoding.decode(&line).map(Some)
    }
}
