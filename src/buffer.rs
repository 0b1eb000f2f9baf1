//! Bounded record windows.

use std::io::{self, prelude::*};

use log;

use crate::record::{self, STRIDE};

/// Read window over a record stream limited by bytes count.
///
/// The window holds the records decoded from the last refill and a cursor over them. A refill
/// reads at most `limit` new bytes. Bytes of a record straddling two refills are carried over and
/// completed by the next one.
pub struct RecordWindow<R> {
    reader: R,
    limit: usize,
    /// Undecoded bytes carried between refills.
    raw: Vec<u8>,
    values: Vec<i64>,
    cursor: usize,
    eof: bool,
}

impl<R: Read> RecordWindow<R> {
    /// Creates a new window. The limit is rounded down to the record stride, one record at least.
    pub fn new(reader: R, limit: usize) -> Self {
        let limit = record::align_down(limit).max(STRIDE);

        RecordWindow {
            reader,
            limit,
            raw: Vec::with_capacity(limit + STRIDE),
            values: Vec::with_capacity(limit / STRIDE),
            cursor: 0,
            eof: false,
        }
    }

    /// Returns the window limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the current record.
    pub fn head(&self) -> Option<i64> {
        self.values.get(self.cursor).copied()
    }

    /// Moves the cursor to the next record.
    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Returns the records not consumed yet.
    pub fn remaining(&self) -> &[i64] {
        &self.values[self.cursor.min(self.values.len())..]
    }

    /// Marks every buffered record as consumed.
    pub fn consume_all(&mut self) {
        self.cursor = self.values.len();
    }

    /// Checks if every buffered record has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.values.len()
    }

    /// Checks if the underlying stream has been read to the end.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Replaces consumed records with the next ones from the stream.
    /// Returns the number of records now buffered.
    pub fn refill(&mut self) -> io::Result<usize> {
        self.values.clear();
        self.cursor = 0;

        if self.eof {
            return Ok(0);
        }

        let read = (&mut self.reader).take(self.limit as u64).read_to_end(&mut self.raw)?;
        if read < self.limit {
            self.eof = true;
        }

        let consumed = record::decode_into(&self.raw, &mut self.values);
        self.raw.drain(..consumed);

        if self.eof && !self.raw.is_empty() {
            log::warn!("dropping {} trailing bytes of an incomplete record", self.raw.len());
            self.raw.clear();
        }

        return Ok(self.values.len());
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, prelude::*};

    use rstest::*;

    use super::RecordWindow;
    use crate::record::{self, STRIDE};

    /// Reader returning at most `step` bytes per call.
    struct ShortReader<R> {
        inner: R,
        step: usize,
    }

    impl<R: Read> Read for ShortReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.inner.read(&mut buf[..len])
        }
    }

    fn drain<R: Read>(window: &mut RecordWindow<R>) -> Vec<i64> {
        let mut result = Vec::new();
        loop {
            if window.is_exhausted() {
                if window.is_eof() || window.refill().unwrap() == 0 {
                    break;
                }
            }
            result.push(window.head().unwrap());
            window.advance();
        }
        result
    }

    #[rstest]
    #[case(1, 1)]
    #[case(STRIDE * 3, 1)]
    #[case(STRIDE * 3, 4)]
    #[case(20, 7)]
    #[case(1024, 1024)]
    fn test_window_reads_everything(#[case] limit: usize, #[case] step: usize) {
        let values = Vec::from_iter((0..37).map(|v| v * v - 100));
        let reader = ShortReader {
            inner: io::Cursor::new(record::encode(&values)),
            step,
        };

        let mut window = RecordWindow::new(reader, limit);
        assert_eq!(window.limit() % STRIDE, 0);
        assert_eq!(drain(&mut window), values);
    }

    #[test]
    fn test_window_refill_bounds() {
        let values = Vec::from_iter(0..10);
        let mut window = RecordWindow::new(io::Cursor::new(record::encode(&values)), STRIDE * 4);

        assert!(window.is_exhausted());
        assert_eq!(window.refill().unwrap(), 4);
        assert_eq!(window.remaining(), &[0, 1, 2, 3]);
        window.consume_all();
        assert_eq!(window.refill().unwrap(), 4);
        window.consume_all();
        assert_eq!(window.refill().unwrap(), 2);
        assert!(window.is_eof());
        window.consume_all();
        assert_eq!(window.refill().unwrap(), 0);
    }

    #[test]
    fn test_window_drops_incomplete_tail() {
        let mut data = record::encode(&[1, 2]);
        data.extend_from_slice(&[0xff; 4]);
        let mut window = RecordWindow::new(io::Cursor::new(data), 1024);

        assert_eq!(drain(&mut window), vec![1, 2]);
    }
}
