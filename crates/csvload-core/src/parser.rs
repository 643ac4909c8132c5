//! Streaming record parser over delimited text.
//!
//! Pull-based: every call to `next()` decodes exactly one row from the
//! underlying reader, so nothing is read ahead of the consumer beyond the
//! `csv` reader's internal buffer. The first row is the header.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::MultiGzDecoder;

use crate::record::{Header, RawRecord};

/// Default field delimiter
pub const DEFAULT_DELIMITER: u8 = b',';

/// Buffer size for the file reader (256KB)
const READ_BUF_SIZE: usize = 256 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Error decoding the input. Terminates the record sequence.
#[derive(Debug)]
pub enum ParseError {
    /// The source could not be read
    Io(io::Error),
    /// Row has a different number of fields than the header
    ColumnCount {
        row: u64,
        line: u64,
        expected: u64,
        found: u64,
    },
    /// Row is not valid UTF-8
    Encoding { row: u64, line: u64 },
    /// Any other structural problem reported by the decoder
    Malformed { row: u64, message: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "read error: {e}"),
            Self::ColumnCount {
                row,
                line,
                expected,
                found,
            } => write!(
                f,
                "row {row} (line {line}): expected {expected} fields, found {found}"
            ),
            Self::Encoding { row, line } => {
                write!(f, "row {row} (line {line}): invalid UTF-8")
            }
            Self::Malformed { row, message } => write!(f, "row {row}: {message}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl ParseError {
    /// 1-based data row that failed (0 = header row), if known
    pub fn row(&self) -> Option<u64> {
        match self {
            Self::Io(_) => None,
            Self::ColumnCount { row, .. }
            | Self::Encoding { row, .. }
            | Self::Malformed { row, .. } => Some(*row),
        }
    }

    fn from_csv(err: csv::Error, row: u64) -> Self {
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(e) => Self::Io(e),
            csv::ErrorKind::Utf8 { pos, .. } => Self::Encoding {
                row,
                line: pos.map_or(0, |p| p.line()),
            },
            csv::ErrorKind::UnequalLengths {
                pos,
                expected_len,
                len,
            } => Self::ColumnCount {
                row,
                line: pos.map_or(0, |p| p.line()),
                expected: expected_len,
                found: len,
            },
            _ => Self::Malformed { row, message },
        }
    }
}

/// Decoder settings
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    pub delimiter: u8,
    /// Trim surrounding whitespace from headers and fields
    pub trim: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            trim: false,
        }
    }
}

/// Shared byte counter for progress tracking
pub type ByteCounter = Arc<AtomicU64>;

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: ByteCounter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, count: ByteCounter) -> Self {
        Self { inner, count }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// File source, transparently gunzipped when it starts with the gzip magic
pub type SourceReader = Box<dyn Read + Send>;

/// Open `path` for streaming. The counter tracks on-disk (compressed) bytes.
pub fn open_source(path: &Path) -> io::Result<(SourceReader, ByteCounter)> {
    let file = File::open(path)?;
    let counter = ByteCounter::default();
    let counting = CountingReader::new(file, counter.clone());
    let mut buf = BufReader::with_capacity(READ_BUF_SIZE, counting);

    let source: SourceReader = if buf.fill_buf()?.starts_with(&GZIP_MAGIC) {
        log::debug!("{}: gzip input", path.display());
        Box::new(MultiGzDecoder::new(buf))
    } else {
        Box::new(buf)
    };
    Ok((source, counter))
}

/// Lazy, finite, non-restartable sequence of [`RawRecord`]s.
///
/// Yields at most one `Err`, after which it is exhausted. The reader (and so
/// the source handle) is dropped as soon as the sequence ends, or when the
/// parser itself is dropped.
pub struct RecordParser<R: Read> {
    reader: Option<csv::Reader<R>>,
    header: Header,
    record: csv::StringRecord,
    rows: u64,
}

impl RecordParser<SourceReader> {
    /// Open a file and read its header row
    pub fn open(path: &Path, options: ParserOptions) -> Result<(Self, ByteCounter), ParseError> {
        let (source, counter) = open_source(path)?;
        Ok((Self::new(source, options)?, counter))
    }
}

impl<R: Read> RecordParser<R> {
    /// Wrap a reader and consume its header row
    pub fn new(source: R, options: ParserOptions) -> Result<Self, ParseError> {
        let trim = if options.trim {
            csv::Trim::All
        } else {
            csv::Trim::None
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .trim(trim)
            .has_headers(true)
            .flexible(false)
            .from_reader(source);

        let header: Header = reader
            .headers()
            .map_err(|e| ParseError::from_csv(e, 0))?
            .iter()
            .map(str::to_owned)
            .collect();

        Ok(Self {
            reader: Some(reader),
            header,
            record: csv::StringRecord::new(),
            rows: 0,
        })
    }

    /// Column names from the header row (empty for an empty input)
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Data rows decoded so far
    pub fn rows_read(&self) -> u64 {
        self.rows
    }

    /// Whether the underlying source has been released
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

impl<R: Read> Iterator for RecordParser<R> {
    type Item = Result<RawRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let row = self.rows + 1;
        match reader.read_record(&mut self.record) {
            Ok(true) => {
                self.rows = row;
                let values = self.record.iter().map(str::to_owned).collect();
                Some(Ok(RawRecord::new(self.header.clone(), values, row)))
            }
            Ok(false) => {
                self.reader = None;
                None
            }
            Err(e) => {
                self.reader = None;
                Some(Err(ParseError::from_csv(e, row)))
            }
        }
    }
}

impl<R: Read> FusedIterator for RecordParser<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::atomic::AtomicBool;

    fn parse(input: &str) -> RecordParser<Cursor<Vec<u8>>> {
        RecordParser::new(Cursor::new(input.as_bytes().to_vec()), ParserOptions::default())
            .unwrap()
    }

    /// Reader that flags when it is dropped
    struct TrackedReader {
        inner: Cursor<Vec<u8>>,
        dropped: Arc<AtomicBool>,
    }

    impl Read for TrackedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for TrackedReader {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn header_keys_records() {
        let mut p = parse("a,b\n1,2\n3,4\n");
        assert_eq!(p.header().as_ref(), ["a".to_string(), "b".to_string()]);

        let first = p.next().unwrap().unwrap();
        assert_eq!(first.get("a"), Some("1"));
        assert_eq!(first.get("b"), Some("2"));
        assert_eq!(first.row(), 1);

        let second = p.next().unwrap().unwrap();
        assert_eq!(second.get("a"), Some("3"));
        assert_eq!(second.row(), 2);

        assert!(p.next().is_none());
        assert_eq!(p.rows_read(), 2);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(parse("").count(), 0);
    }

    #[test]
    fn header_only_yields_nothing() {
        let mut p = parse("a,b\n");
        assert_eq!(p.header().len(), 2);
        assert!(p.next().is_none());
    }

    #[test]
    fn column_mismatch_names_row_and_stops() {
        let mut input = String::from("a,b\n");
        for i in 1..50 {
            input.push_str(&format!("{i},x\n"));
        }
        input.push_str("50,x,extra\n51,x\n");

        let mut p = parse(&input);
        for _ in 1..50 {
            assert!(p.next().unwrap().is_ok());
        }
        match p.next().unwrap() {
            Err(ParseError::ColumnCount {
                row,
                line,
                expected,
                found,
            }) => {
                assert_eq!(row, 50);
                assert_eq!(line, 51);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected column count error, got {other:?}"),
        }
        // Fused: no skipping past the bad row
        assert!(p.next().is_none());
        assert!(p.is_closed());
    }

    #[test]
    fn invalid_utf8_is_encoding_error() {
        let mut bytes = b"a,b\n1,2\n".to_vec();
        bytes.extend_from_slice(b"\xff\xfe,3\n");
        let mut p = RecordParser::new(Cursor::new(bytes), ParserOptions::default()).unwrap();
        assert!(p.next().unwrap().is_ok());
        let err = p.next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::Encoding { row: 2, .. }), "{err:?}");
        assert_eq!(err.row(), Some(2));
    }

    #[test]
    fn custom_delimiter_and_trim() {
        let opts = ParserOptions {
            delimiter: b';',
            trim: true,
        };
        let mut p = RecordParser::new(Cursor::new(b"a ; b\n 1 ;2\n".to_vec()), opts).unwrap();
        let r = p.next().unwrap().unwrap();
        assert_eq!(r.get("a"), Some("1"));
        assert_eq!(r.get("b"), Some("2"));
    }

    #[test]
    fn blank_lines_skipped() {
        assert_eq!(parse("a\n1\n\n2\n\n").count(), 2);
    }

    #[test]
    fn source_released_on_exhaustion() {
        let dropped = Arc::new(AtomicBool::new(false));
        let reader = TrackedReader {
            inner: Cursor::new(b"a\n1\n".to_vec()),
            dropped: dropped.clone(),
        };
        let mut p = RecordParser::new(reader, ParserOptions::default()).unwrap();
        assert!(p.next().is_some());
        assert!(!dropped.load(Ordering::Relaxed));
        assert!(p.next().is_none());
        assert!(dropped.load(Ordering::Relaxed));
    }

    #[test]
    fn source_released_when_abandoned() {
        let dropped = Arc::new(AtomicBool::new(false));
        let reader = TrackedReader {
            inner: Cursor::new(b"a\n1\n2\n".to_vec()),
            dropped: dropped.clone(),
        };
        let mut p = RecordParser::new(reader, ParserOptions::default()).unwrap();
        assert!(p.next().is_some());
        drop(p);
        assert!(dropped.load(Ordering::Relaxed));
    }

    #[test]
    fn open_plain_and_gzip_files() {
        let dir = tempfile::TempDir::new().unwrap();

        let plain = dir.path().join("rows.csv");
        std::fs::write(&plain, "a,b\n1,2\n").unwrap();
        let (p, counter) = RecordParser::open(&plain, ParserOptions::default()).unwrap();
        assert_eq!(p.count(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 8);

        let gz = dir.path().join("rows.csv.gz");
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"a,b\n1,2\n3,4\n").unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();
        let (p, _) = RecordParser::open(&gz, ParserOptions::default()).unwrap();
        let rows: Vec<_> = p.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("b"), Some("4"));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = RecordParser::open(&dir.path().join("nope.csv"), ParserOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ParseError::Io(_)));
        assert_eq!(err.row(), None);
    }
}
