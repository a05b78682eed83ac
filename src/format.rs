//! Input value decoding and text export.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::mem;
use std::path::Path;

use crate::naming::{RunNaming, BINARY_SUFFIX, FUSION_SUFFIX};
use crate::run::{self, RunReader};
use crate::sort::SortError;

/// Size of a single encoded value in bytes.
pub const VALUE_SIZE: usize = mem::size_of::<u32>();
/// Number of values decoded from a single binary read.
pub const DECODE_CHUNK: usize = 4096;
/// Longest accepted text token. Leaves room for a sign and leading zeros.
pub const MAX_TOKEN_LEN: usize = 32;

/// Input decoding error.
#[derive(Debug)]
pub enum DecodeError {
    /// Underlying stream read error.
    IO(io::Error),
    /// Text token that is not an unsigned 32-bit integer.
    InvalidToken(String),
    /// Binary stream ended in the middle of a value.
    TruncatedValue(usize),
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            DecodeError::IO(err) => Some(err),
            DecodeError::InvalidToken(_) => None,
            DecodeError::TruncatedValue(_) => None,
        }
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            DecodeError::IO(err) => write!(f, "read failed: {}", err),
            DecodeError::InvalidToken(token) => write!(f, "'{}' is not an unsigned 32-bit integer", token),
            DecodeError::TruncatedValue(trailing) => {
                write!(f, "stream ends with {} byte(s) of an incomplete value", trailing)
            }
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::IO(err)
    }
}

/// Value decoding strategy. Turns an input stream into a sequence of values.
pub trait ValueDecoder {
    /// Fills `buf` with the next values of the stream.
    /// Returns the number of values written, which is less than `buf.len()` only at the end of the stream.
    fn read_values(&mut self, buf: &mut [u32]) -> Result<usize, DecodeError>;
}

/// Fixed-width native byte order decoder. Reads through a scratch buffer of [`DECODE_CHUNK`] values.
pub struct BinaryDecoder<R> {
    reader: R,
    bytes: Vec<u8>,
}

impl<R: Read> BinaryDecoder<R> {
    pub fn new(reader: R) -> Self {
        BinaryDecoder {
            reader,
            bytes: vec![0; DECODE_CHUNK * VALUE_SIZE],
        }
    }
}

impl<R: Read> ValueDecoder for BinaryDecoder<R> {
    fn read_values(&mut self, buf: &mut [u32]) -> Result<usize, DecodeError> {
        let mut count = 0;

        while count < buf.len() {
            let wanted = (buf.len() - count).min(DECODE_CHUNK) * VALUE_SIZE;
            let filled = read_full(&mut self.reader, &mut self.bytes[..wanted])?;

            let chunks = self.bytes[..filled].chunks_exact(VALUE_SIZE);
            let trailing = chunks.remainder().len();
            for (slot, chunk) in buf[count..].iter_mut().zip(chunks) {
                *slot = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                count += 1;
            }

            if trailing != 0 {
                return Err(DecodeError::TruncatedValue(trailing));
            }
            if filled < wanted {
                break;
            }
        }

        return Ok(count);
    }
}

/// Reads until `buf` is full or the stream ends. Returns the number of read bytes.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    return Ok(filled);
}

/// Whitespace delimited decimal text decoder.
/// Tokens longer than [`MAX_TOKEN_LEN`] bytes are rejected without being buffered.
pub struct TextDecoder<R> {
    reader: R,
    token: Vec<u8>,
}

impl<R: BufRead> TextDecoder<R> {
    pub fn new(reader: R) -> Self {
        TextDecoder {
            reader,
            token: Vec::with_capacity(MAX_TOKEN_LEN),
        }
    }

    fn next_value(&mut self) -> Result<Option<u32>, DecodeError> {
        self.token.clear();

        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                break;
            }

            let mut consumed = 0;
            let mut complete = false;
            let mut overlong = false;
            for &byte in available {
                if byte.is_ascii_whitespace() {
                    consumed += 1;
                    if !self.token.is_empty() {
                        complete = true;
                        break;
                    }
                } else if self.token.len() < MAX_TOKEN_LEN {
                    consumed += 1;
                    self.token.push(byte);
                } else {
                    overlong = true;
                    break;
                }
            }
            self.reader.consume(consumed);

            if overlong {
                let token = String::from_utf8_lossy(&self.token);
                return Err(DecodeError::InvalidToken(format!("{}...", token)));
            }
            if complete {
                break;
            }
        }

        if self.token.is_empty() {
            return Ok(None);
        }

        let token = String::from_utf8_lossy(&self.token);
        match token.parse::<u32>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(DecodeError::InvalidToken(token.into_owned())),
        }
    }
}

impl<R: BufRead> ValueDecoder for TextDecoder<R> {
    fn read_values(&mut self, buf: &mut [u32]) -> Result<usize, DecodeError> {
        let mut count = 0;
        while count < buf.len() {
            match self.next_value()? {
                Some(value) => {
                    buf[count] = value;
                    count += 1;
                }
                None => break,
            }
        }

        return Ok(count);
    }
}

/// Input and output file layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// Fixed-width unsigned 32-bit values in native byte order.
    Binary,
    /// Whitespace separated decimal integers.
    Text,
}

impl Format {
    /// Opens an input file and wraps it into the matching decoder.
    pub fn open(self, path: &Path) -> Result<FileDecoder, SortError> {
        let file = fs::File::open(path).map_err(|err| SortError::io(path, err))?;
        let reader = io::BufReader::new(file);

        return Ok(match self {
            Format::Binary => FileDecoder::Binary(BinaryDecoder::new(reader)),
            Format::Text => FileDecoder::Text(TextDecoder::new(reader)),
        });
    }

    /// Writes values into a new file at `path` using this layout. Returns the number of written values.
    ///
    /// Fails without touching `path` if it is already taken; a partially written file is removed.
    pub fn write<I>(self, values: I, path: &Path) -> Result<u64, SortError>
    where
        I: IntoIterator<Item = Result<u32, SortError>>,
    {
        match self {
            Format::Binary => run::write_run(values, path),
            Format::Text => {
                let mut writer = io::BufWriter::new(run::create_new(path)?);

                let result = write_text(&mut writer, values, path).and_then(|written| {
                    writer.flush().map_err(|err| SortError::io(path, err))?;
                    Ok(written)
                });
                if result.is_err() {
                    run::discard(path);
                }

                result
            }
        }
    }
}

/// Decoder over an input file, selected by [`Format`].
pub enum FileDecoder {
    Binary(BinaryDecoder<io::BufReader<fs::File>>),
    Text(TextDecoder<io::BufReader<fs::File>>),
}

impl ValueDecoder for FileDecoder {
    fn read_values(&mut self, buf: &mut [u32]) -> Result<usize, DecodeError> {
        match self {
            FileDecoder::Binary(decoder) => decoder.read_values(buf),
            FileDecoder::Text(decoder) => decoder.read_values(buf),
        }
    }
}

/// Writes values as a single space separated line terminated by a newline.
/// `path` names the destination in reported errors.
pub fn write_text<W, I>(writer: &mut W, values: I, path: &Path) -> Result<u64, SortError>
where
    W: Write,
    I: IntoIterator<Item = Result<u32, SortError>>,
{
    let mut written = 0;
    for value in values {
        let value = value?;
        let result = if written == 0 {
            write!(writer, "{}", value)
        } else {
            write!(writer, " {}", value)
        };
        result.map_err(|err| SortError::io(path, err))?;
        written += 1;
    }
    writer.write_all(b"\n").map_err(|err| SortError::io(path, err))?;

    return Ok(written);
}

/// Converts a binary run into a new text file. Returns the number of exported values.
pub fn export_text(run: &Path, output: &Path, read_buf_size: usize) -> Result<u64, SortError> {
    let reader = RunReader::open_with_capacity(run, read_buf_size)?;
    let written = Format::Text.write(reader, output)?;

    log::debug!("exported {} values from {} to {}", written, run.display(), output.display());

    return Ok(written);
}

/// Runs `sort` into a binary run staged next to `output`, exports that run as text and promotes the export
/// to `output`. Staged files are removed in every case; `output` is only replaced once the export is complete.
pub fn sort_to_text<T, F>(
    naming: &dyn RunNaming,
    output: &Path,
    read_buf_size: usize,
    sort: F,
) -> Result<T, SortError>
where
    F: FnOnce(&Path) -> Result<T, SortError>,
{
    let staged = naming.derive(output, BINARY_SUFFIX);
    let exported = naming.derive(output, FUSION_SUFFIX);
    run::ensure_free(&staged)?;
    run::ensure_free(&exported)?;

    let result = sort(&staged).and_then(|stats| {
        export_text(&staged, &exported, read_buf_size)?;
        run::promote(&exported, output)?;
        Ok(stats)
    });
    if result.is_err() {
        run::discard(&staged);
        run::discard(&exported);
        return result;
    }
    run::remove(&staged)?;

    return result;
}

#[cfg(test)]
mod test {
    use std::io;
    use std::path::Path;

    use rstest::*;

    use super::{
        write_text, BinaryDecoder, DecodeError, TextDecoder, ValueDecoder, DECODE_CHUNK, MAX_TOKEN_LEN, VALUE_SIZE,
    };

    fn decode_all(decoder: &mut impl ValueDecoder, chunk: usize) -> Result<Vec<u32>, DecodeError> {
        let mut buf = vec![0; chunk];
        let mut values = Vec::new();
        loop {
            let count = decoder.read_values(&mut buf)?;
            values.extend_from_slice(&buf[..count]);
            if count < chunk {
                return Ok(values);
            }
        }
    }

    #[rstest]
    #[case("", vec![])]
    #[case("   \n\t ", vec![])]
    #[case("5 1 4 2", vec![5, 1, 4, 2])]
    #[case("5\n1\n4\n2\n", vec![5, 1, 4, 2])]
    #[case("  3\t\t0 \r\n9  ", vec![3, 0, 9])]
    #[case("4294967295 0", vec![u32::MAX, 0])]
    fn test_text_decoder(#[case] input: &str, #[case] expected: Vec<u32>) {
        for chunk in [1, 2, 3, 64] {
            let mut decoder = TextDecoder::new(io::Cursor::new(input.as_bytes()));
            assert_eq!(decode_all(&mut decoder, chunk).unwrap(), expected);
        }
    }

    #[test]
    fn test_text_decoder_tokens_across_buffer_boundary() {
        let input = "123456 7890 42";
        // a tiny inner buffer splits every token over several fill_buf calls
        let reader = io::BufReader::with_capacity(2, io::Cursor::new(input.as_bytes()));
        let mut decoder = TextDecoder::new(reader);

        assert_eq!(decode_all(&mut decoder, 8).unwrap(), vec![123456, 7890, 42]);
    }

    #[rstest]
    #[case("1 two 3", "two")]
    #[case("1 -3", "-3")]
    #[case("4294967296", "4294967296")]
    #[case("1.5", "1.5")]
    fn test_text_decoder_invalid_token(#[case] input: &str, #[case] token: &str) {
        let mut decoder = TextDecoder::new(io::Cursor::new(input.as_bytes()));

        match decode_all(&mut decoder, 4) {
            Err(DecodeError::InvalidToken(actual)) => assert_eq!(actual, token),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_text_decoder_overlong_token() {
        let mut input = vec![b'1'; 1 << 20];
        input.extend_from_slice(b" 5");
        let mut decoder = TextDecoder::new(io::BufReader::new(io::Cursor::new(input)));

        match decode_all(&mut decoder, 4) {
            Err(DecodeError::InvalidToken(token)) => {
                assert_eq!(token, format!("{}...", "1".repeat(MAX_TOKEN_LEN)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(decoder.token.capacity() < 1024);
    }

    #[test]
    fn test_text_decoder_leading_zeros() {
        let input = format!("{}7 +9", "0".repeat(MAX_TOKEN_LEN - 1));
        let mut decoder = TextDecoder::new(io::Cursor::new(input.into_bytes()));

        assert_eq!(decode_all(&mut decoder, 4).unwrap(), vec![7, 9]);
    }

    #[rstest]
    #[case(0, 7)]
    #[case(DECODE_CHUNK, DECODE_CHUNK)]
    #[case(3 * DECODE_CHUNK + 5, 10_000)]
    #[case(3 * DECODE_CHUNK + 5, 1 << 20)]
    fn test_binary_decoder_chunks(#[case] count: usize, #[case] block: usize) {
        let values = Vec::from_iter((0..count as u32).map(|v| v.wrapping_mul(2654435761)));
        let bytes = Vec::from_iter(values.iter().flat_map(|v| v.to_ne_bytes()));
        let mut decoder = BinaryDecoder::new(io::Cursor::new(bytes));

        assert_eq!(decode_all(&mut decoder, block).unwrap(), values);
        assert_eq!(decoder.bytes.capacity(), DECODE_CHUNK * VALUE_SIZE);
    }

    #[test]
    fn test_binary_decoder_truncated_after_chunks() {
        let mut bytes = vec![0u8; 2 * DECODE_CHUNK * VALUE_SIZE];
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut decoder = BinaryDecoder::new(io::Cursor::new(bytes));

        match decode_all(&mut decoder, 3 * DECODE_CHUNK) {
            Err(DecodeError::TruncatedValue(trailing)) => assert_eq!(trailing, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_binary_and_text_decoders_agree() {
        let values: Vec<u32> = vec![7, 0, u32::MAX, 7, 123, 1];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let text = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("\n");

        let mut binary = BinaryDecoder::new(io::Cursor::new(bytes));
        let mut text = TextDecoder::new(io::Cursor::new(text.into_bytes()));

        assert_eq!(decode_all(&mut binary, 4).unwrap(), values);
        assert_eq!(decode_all(&mut text, 4).unwrap(), values);
    }

    #[test]
    fn test_binary_decoder_truncated_value() {
        let mut bytes: Vec<u8> = 10u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2]);
        let mut decoder = BinaryDecoder::new(io::Cursor::new(bytes));

        match decode_all(&mut decoder, 4) {
            Err(DecodeError::TruncatedValue(trailing)) => assert_eq!(trailing, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case(vec![], "\n")]
    #[case(vec![42], "42\n")]
    #[case(vec![0, 1, 2, 3, 4, 5, 9], "0 1 2 3 4 5 9\n")]
    fn test_write_text(#[case] values: Vec<u32>, #[case] expected: &str) {
        let mut output = Vec::new();

        let written = write_text(&mut output, values.iter().map(|v| Ok(*v)), Path::new("memory")).unwrap();

        assert_eq!(written, values.len() as u64);
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
