//! Fixed-width record codec.
//!
//! Every record is a 64-bit signed integer in native byte order followed by a single
//! [`DELIMITER`] byte, giving a [`STRIDE`] of 9 bytes. Files hold a flat concatenation of
//! records without header, footer or record count.
//!
//! The codec is stateless: a trailing partial record is left undecoded and must be supplied
//! again, whole, by the caller.

use log;

/// Byte written after every record.
pub const DELIMITER: u8 = b'\n';

/// Size of the encoded integer.
pub const VALUE_SIZE: usize = std::mem::size_of::<i64>();

/// On-disk width of a single record.
pub const STRIDE: usize = VALUE_SIZE + 1;

/// Rounds `bytes` down to the largest multiple of [`STRIDE`].
pub fn align_down(bytes: usize) -> usize {
    bytes / STRIDE * STRIDE
}

/// Returns the number of bytes of `buf` that [`decode`] would consume.
pub fn decoded_len(buf: &[u8]) -> usize {
    align_down(buf.len())
}

/// Decodes every complete record of the buffer.
pub fn decode(buf: &[u8]) -> Vec<i64> {
    let mut values = Vec::with_capacity(buf.len() / STRIDE);
    decode_into(buf, &mut values);
    return values;
}

/// Decodes every complete record of the buffer appending values to `values`.
/// Returns the number of bytes consumed.
pub fn decode_into(buf: &[u8], values: &mut Vec<i64>) -> usize {
    let consumed = decoded_len(buf);
    for record in buf[..consumed].chunks_exact(STRIDE) {
        let mut bytes = [0u8; VALUE_SIZE];
        bytes.copy_from_slice(&record[..VALUE_SIZE]);
        values.push(i64::from_ne_bytes(bytes));
    }

    return consumed;
}

/// Encodes values into a new buffer.
pub fn encode(values: &[i64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * STRIDE);
    encode_into(values, &mut buf);
    return buf;
}

/// Appends encoded values to `buf`.
pub fn encode_into(values: &[i64], buf: &mut Vec<u8>) {
    buf.reserve(values.len() * STRIDE);
    for value in values {
        push_record(*value, buf);
    }
}

/// Appends a single encoded record to `buf`.
#[inline]
pub fn push_record(value: i64, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&value.to_ne_bytes());
    buf.push(DELIMITER);
}

/// Parses decimal integers separated by ASCII whitespace (the delimiter included).
/// Tokens that are not valid integers are skipped.
pub fn parse_text(buf: &[u8]) -> Vec<i64> {
    let mut values = Vec::new();
    let mut skipped = 0usize;

    for token in buf.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty()) {
        match std::str::from_utf8(token).ok().and_then(|t| t.parse::<i64>().ok()) {
            Some(value) => values.push(value),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("skipped {} malformed tokens", skipped);
    }

    return values;
}

/// Appends values as decimal text, each one followed by the delimiter.
pub fn format_text(values: &[i64], buf: &mut Vec<u8>) {
    for value in values {
        buf.extend_from_slice(value.to_string().as_bytes());
        buf.push(DELIMITER);
    }
}

/// Input encoding of the files fed to the splitter and the sorter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    /// Decimal integers separated by whitespace.
    Text,
    /// Fixed-width binary records.
    Binary,
}

impl Default for RecordFormat {
    fn default() -> Self {
        RecordFormat::Text
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{align_down, decode, decode_into, encode, format_text, parse_text, DELIMITER, STRIDE};

    #[rstest]
    #[case(0, 0)]
    #[case(8, 0)]
    #[case(9, 9)]
    #[case(1024, 1017)]
    fn test_align_down(#[case] bytes: usize, #[case] expected: usize) {
        assert_eq!(align_down(bytes), expected);
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode(&[1, -1]);

        assert_eq!(buf.len(), 2 * STRIDE);
        assert_eq!(&buf[..8], &1i64.to_ne_bytes());
        assert_eq!(buf[8], DELIMITER);
        assert_eq!(&buf[9..17], &(-1i64).to_ne_bytes());
        assert_eq!(buf[17], DELIMITER);
    }

    #[test]
    fn test_decode_ignores_partial_tail() {
        let values = vec![i64::MIN, 0, 42, i64::MAX];
        let mut buf = encode(&values);
        buf.extend_from_slice(&7i64.to_ne_bytes()[..5]);

        assert_eq!(decode(&buf), values);

        let mut decoded = Vec::new();
        let consumed = decode_into(&buf, &mut decoded);
        assert_eq!(consumed, 4 * STRIDE);
    }

    #[test]
    fn test_decode_tail_supplied_again() {
        let buf = encode(&[5, 6, 7]);
        let (head, _) = buf.split_at(13);

        let mut values = decode(head);
        let consumed = STRIDE * values.len();
        values.extend(decode(&buf[consumed..]));

        assert_eq!(values, vec![5, 6, 7]);
    }

    #[rstest]
    #[case(b"3\n1\n2\n".to_vec(), vec![3, 1, 2])]
    #[case(b"  -5 10\t\n7".to_vec(), vec![-5, 10, 7])]
    #[case(b"1\nfoo\n2\n".to_vec(), vec![1, 2])]
    #[case(b"".to_vec(), vec![])]
    fn test_parse_text(#[case] input: Vec<u8>, #[case] expected: Vec<i64>) {
        assert_eq!(parse_text(&input), expected);
    }

    #[test]
    fn test_format_text() {
        let mut buf = Vec::new();
        format_text(&[-3, 0, 12], &mut buf);
        assert_eq!(buf, b"-3\n0\n12\n".to_vec());
    }
}
