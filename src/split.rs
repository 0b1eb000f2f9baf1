//! Shard splitter.

use std::ffi::OsString;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::error::ShardError;
use crate::record::{self, RecordFormat, STRIDE};

/// Builds a sibling path of `path` whose stem is extended with `suffix`, keeping the extension:
/// `dir/data.txt` + `_1` gives `dir/data_1.txt`.
pub fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name: OsString = path.file_stem().map(OsString::from).unwrap_or_default();
    file_name.push(suffix);
    if let Some(extension) = path.extension() {
        file_name.push(".");
        file_name.push(extension);
    }

    return path.with_file_name(file_name);
}

/// Returns the file stem as a string, used to label shards in logs and reports.
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Splits a file into shards of at most `max_bytes` bytes each.
/// Returns shard paths in split order.
///
/// `max_bytes` is rounded down to a multiple of the record stride (one record at least). Binary
/// inputs are copied as plain byte ranges so every shard holds whole records. Text inputs are
/// additionally cut right after a whitespace byte so no token is split in two, which lets a shard
/// exceed the limit by the length of one token.
///
/// Shards are written next to the source as `<stem>_<n><extension>`, `n` starting from 1.
/// An empty source produces no shard.
///
/// # Arguments
/// * `path` - File to be split
/// * `max_bytes` - Shard size limit
/// * `format` - Source file encoding
pub fn split_file(path: &Path, max_bytes: usize, format: RecordFormat) -> Result<Vec<PathBuf>, ShardError> {
    let shard_size = record::align_down(max_bytes).max(STRIDE);
    let source = fs::File::open(path).map_err(|err| ShardError::open(path, err))?;

    let mut shards = Vec::new();
    match split_into(io::BufReader::new(source), path, shard_size, format, &mut shards) {
        Ok(()) => {
            log::debug!("{} split into {} shards", path.display(), shards.len());
            Ok(shards)
        }
        Err(err) => {
            for shard in &shards {
                if let Err(err) = fs::remove_file(shard) {
                    log::warn!("partial shard {} not removed: {}", shard.display(), err);
                }
            }
            Err(err)
        }
    }
}

fn split_into<R: BufRead>(
    mut reader: R,
    path: &Path,
    shard_size: usize,
    format: RecordFormat,
    shards: &mut Vec<PathBuf>,
) -> Result<(), ShardError> {
    let mut buf = Vec::with_capacity(shard_size);

    loop {
        buf.clear();
        (&mut reader).take(shard_size as u64).read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(());
        }

        if format == RecordFormat::Text && buf.last().map_or(false, |b| !b.is_ascii_whitespace()) {
            read_token_end(&mut reader, &mut buf)?;
        }

        let shard_path = with_stem_suffix(path, &format!("_{}", shards.len() + 1));
        let mut shard = fs::File::create(&shard_path).map_err(|err| ShardError::open(&shard_path, err))?;
        shards.push(shard_path);
        shard.write_all(&buf)?;
    }
}

/// Appends bytes up to and including the next ASCII whitespace, or up to the end of the stream.
fn read_token_end<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| b.is_ascii_whitespace()) {
                Some(idx) => {
                    buf.extend_from_slice(&available[..=idx]);
                    (true, idx + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);

        if found {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::{split_file, with_stem_suffix};
    use crate::error::ShardError;
    use crate::record::{self, RecordFormat, STRIDE};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    #[case("dir/data.txt", "_1", "dir/data_1.txt")]
    #[case("dir/data", "_", "dir/data_")]
    #[case("dir/data.bin", "t", "dir/datat.bin")]
    fn test_with_stem_suffix(#[case] path: &str, #[case] suffix: &str, #[case] expected: &str) {
        assert_eq!(with_stem_suffix(Path::new(path), suffix), Path::new(expected));
    }

    #[rstest]
    #[case(1, 20)]
    #[case(9 * 7, 3)]
    #[case(100, 2)]
    #[case(1024, 1)]
    fn test_split_preserves_records(tmp_dir: tempfile::TempDir, #[case] max_bytes: usize, #[case] expected: usize) {
        let values = Vec::from_iter((0..20).map(|v| 1000 - v * 7));
        let path = tmp_dir.path().join("input.bin");
        fs::write(&path, record::encode(&values)).unwrap();

        let shards = split_file(&path, max_bytes, RecordFormat::Binary).unwrap();
        let max_shard = record::align_down(max_bytes).max(STRIDE);
        assert_eq!(shards.len(), expected);

        let mut restored = Vec::new();
        for (idx, shard) in shards.iter().enumerate() {
            assert_eq!(shard, &tmp_dir.path().join(format!("input_{}.bin", idx + 1)));
            let data = fs::read(shard).unwrap();
            assert!(data.len() <= max_shard);
            assert_eq!(data.len() % STRIDE, 0);
            restored.extend(record::decode(&data));
        }

        assert_eq!(restored, values);
        // source stays untouched
        assert_eq!(record::decode(&fs::read(&path).unwrap()), values);
    }

    #[rstest]
    fn test_split_ten_kilobytes_by_one(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("big");
        fs::write(&path, vec![0u8; 10_000]).unwrap();

        let shards = split_file(&path, 1024, RecordFormat::Binary).unwrap();

        assert_eq!(shards.len(), 10);
        let sizes: Vec<u64> = shards.iter().map(|s| fs::metadata(s).unwrap().len()).collect();
        assert!(sizes[..9].iter().all(|size| *size == 1017));
        assert_eq!(sizes[9], 10_000 - 9 * 1017);
    }

    #[rstest]
    fn test_split_text_keeps_tokens_whole(tmp_dir: tempfile::TempDir) {
        let values = Vec::from_iter((0..200).map(|v| v * 12345 - 99999));
        let mut text = Vec::new();
        record::format_text(&values, &mut text);
        let path = tmp_dir.path().join("numbers.txt");
        fs::write(&path, &text).unwrap();

        let shards = split_file(&path, 18, RecordFormat::Text).unwrap();
        assert!(shards.len() > 1);

        let mut restored = Vec::new();
        for shard in &shards {
            restored.extend(record::parse_text(&fs::read(shard).unwrap()));
        }

        assert_eq!(restored, values);
    }

    #[rstest]
    fn test_split_single_line_text(tmp_dir: tempfile::TempDir) {
        let values = Vec::from_iter((0..1000).map(|v| v * 37 - 5000));
        let line = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
        let path = tmp_dir.path().join("line.txt");
        fs::write(&path, line.as_bytes()).unwrap();

        let shards = split_file(&path, 18, RecordFormat::Text).unwrap();
        assert!(shards.len() > 100);

        let mut restored = Vec::new();
        for shard in &shards {
            let data = fs::read(shard).unwrap();
            // aligned size plus at most one token and its separator
            assert!(data.len() <= 18 + 6, "shard of {} bytes", data.len());
            restored.extend(record::parse_text(&data));
        }

        assert_eq!(restored, values);
    }

    #[rstest]
    fn test_split_empty_file(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        assert!(split_file(&path, 1024, RecordFormat::Binary).unwrap().is_empty());
    }

    #[rstest]
    fn test_split_missing_file(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("missing.bin");

        match split_file(&path, 1024, RecordFormat::Binary) {
            Err(ShardError::Open(failed, _)) => assert_eq!(failed, path),
            _ => panic!("open failure not reported"),
        }
    }
}
