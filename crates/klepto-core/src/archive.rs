//! Append-only archive of compressed blobs with a trailing directory.
//!
//! Layout (little-endian):
//!
//! ```text
//! i32 magic | u64 directory offset | u8 header length | header
//! blob*
//! u32 entry count | { u64 offset, u32 compressed size, u32 element count, u32 element size }*
//! ```
//!
//! One blob is written per generation, so entry `i` holds generation `i`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::{error::Error, fmt};

/// "HAHI" read as a little-endian `i32`.
pub const MAGIC: u32 = 0x4948_4148;
const ZSTD_LEVEL: i32 = 3;
const DIRECTORY_OFFSET_POS: u64 = 4;

#[derive(Debug)]
pub enum ArchiveError {
    Io(io::Error),
    InvalidHeader,
    WrongEndianness,
    NotAnArchive(u32),
    /// The directory offset was never written back; the writer did not finish.
    Unfinished,
    IndexOutOfRange { index: usize, len: usize },
    Compression(io::Error),
    Decompression(io::Error),
    SizeMismatch { expected: usize, actual: usize },
    /// A directory or blob reaches past the end of the stream.
    Truncated { needed: u64, available: u64 },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Io(e) => write!(f, "archive i/o: {e}"),
            ArchiveError::InvalidHeader => {
                write!(f, "archive header must be 1..=255 bytes of UTF-8")
            }
            ArchiveError::WrongEndianness => write!(f, "archive was written with the wrong endianness"),
            ArchiveError::NotAnArchive(magic) => write!(f, "not an archive (magic {magic:#010x})"),
            ArchiveError::Unfinished => write!(f, "archive directory missing; writer did not finish"),
            ArchiveError::IndexOutOfRange { index, len } => {
                write!(f, "archive entry {index} out of range ({len} entries)")
            }
            ArchiveError::Compression(e) => write!(f, "compression failed: {e}"),
            ArchiveError::Decompression(e) => write!(f, "decompression failed: {e}"),
            ArchiveError::SizeMismatch { expected, actual } => {
                write!(f, "blob holds {actual} bytes, expected {expected}")
            }
            ArchiveError::Truncated { needed, available } => {
                write!(f, "archive truncated: needs {needed} bytes, stream has {available}")
            }
        }
    }
}

impl Error for ArchiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArchiveError::Io(e) | ArchiveError::Compression(e) | ArchiveError::Decompression(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

/// Compressed payload of `element_count` elements of `element_size` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedBlob {
    pub element_count: usize,
    pub element_size: usize,
    pub bytes: Vec<u8>,
}

impl CompressedBlob {
    pub fn uncompressed_len(&self) -> usize {
        self.element_count * self.element_size
    }
}

/// Compress `count` elements of `size` bytes, taken every `stride` bytes from `data`.
pub fn compress(
    data: &[u8],
    count: usize,
    size: usize,
    stride: usize,
) -> Result<CompressedBlob, ArchiveError> {
    debug_assert!(stride >= size);
    let needed = if count == 0 { 0 } else { (count - 1) * stride + size };
    if data.len() < needed {
        return Err(ArchiveError::SizeMismatch {
            expected: needed,
            actual: data.len(),
        });
    }
    let bytes = if stride == size {
        zstd::encode_all(&data[..count * size], ZSTD_LEVEL)
    } else {
        let mut packed = Vec::with_capacity(count * size);
        for chunk in data.chunks(stride).take(count) {
            packed.extend_from_slice(&chunk[..size]);
        }
        zstd::encode_all(packed.as_slice(), ZSTD_LEVEL)
    }
    .map_err(ArchiveError::Compression)?;
    Ok(CompressedBlob {
        element_count: count,
        element_size: size,
        bytes,
    })
}

/// Decompress `blob` into `dst`, placing element `i` at byte `i * stride`.
///
/// Bytes between elements are left untouched.
pub fn uncompress(blob: &CompressedBlob, dst: &mut [u8], stride: usize) -> Result<(), ArchiveError> {
    let packed = zstd::decode_all(blob.bytes.as_slice()).map_err(ArchiveError::Decompression)?;
    if packed.len() != blob.uncompressed_len() {
        return Err(ArchiveError::SizeMismatch {
            expected: blob.uncompressed_len(),
            actual: packed.len(),
        });
    }
    let size = blob.element_size;
    let count = blob.element_count;
    let needed = if count == 0 { 0 } else { (count - 1) * stride + size };
    if stride < size || dst.len() < needed {
        return Err(ArchiveError::SizeMismatch {
            expected: needed,
            actual: dst.len(),
        });
    }
    if stride == size {
        dst[..packed.len()].copy_from_slice(&packed);
    } else {
        for (i, element) in packed.chunks_exact(size.max(1)).enumerate().take(count) {
            dst[i * stride..i * stride + size].copy_from_slice(element);
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub offset: u64,
    pub compressed_size: u32,
    pub element_count: u32,
    pub element_size: u32,
}

impl ArchiveEntry {
    const BYTES: usize = 8 + 4 + 4 + 4;
}

fn to_u32(value: usize) -> Result<u32, ArchiveError> {
    u32::try_from(value).map_err(|_| {
        ArchiveError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{value} does not fit the archive's 32-bit fields"),
        ))
    })
}

/// Archive writer. Dropping an unfinished writer finishes it, ignoring errors.
pub struct OArchive<W: Write + Seek> {
    inner: Option<W>,
    entries: Vec<ArchiveEntry>,
}

impl OArchive<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, header: &str) -> Result<Self, ArchiveError> {
        Self::new(BufWriter::new(File::create(path)?), header)
    }
}

impl<W: Write + Seek> OArchive<W> {
    pub fn new(mut writer: W, header: &str) -> Result<Self, ArchiveError> {
        if header.is_empty() || header.len() > u8::MAX as usize {
            return Err(ArchiveError::InvalidHeader);
        }
        writer.write_all(&MAGIC.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;
        writer.write_all(&[header.len() as u8])?;
        writer.write_all(header.as_bytes())?;
        Ok(Self {
            inner: Some(writer),
            entries: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compress and append one blob; see [`compress`] for the striding.
    pub fn insert(
        &mut self,
        data: &[u8],
        count: usize,
        size: usize,
        stride: usize,
    ) -> Result<(), ArchiveError> {
        let blob = compress(data, count, size, stride)?;
        self.insert_blob(&blob)
    }

    pub fn insert_blob(&mut self, blob: &CompressedBlob) -> Result<(), ArchiveError> {
        let writer = self.inner.as_mut().ok_or(ArchiveError::Unfinished)?;
        let offset = writer.stream_position()?;
        writer.write_all(&blob.bytes)?;
        self.entries.push(ArchiveEntry {
            offset,
            compressed_size: to_u32(blob.bytes.len())?,
            element_count: to_u32(blob.element_count)?,
            element_size: to_u32(blob.element_size)?,
        });
        Ok(())
    }

    /// Append the directory and patch its offset into the preamble. Idempotent.
    pub fn finish(&mut self) -> Result<(), ArchiveError> {
        let Some(mut writer) = self.inner.take() else {
            return Ok(());
        };
        let directory = writer.stream_position()?;
        writer.write_all(&to_u32(self.entries.len())?.to_le_bytes())?;
        for e in &self.entries {
            writer.write_all(&e.offset.to_le_bytes())?;
            writer.write_all(&e.compressed_size.to_le_bytes())?;
            writer.write_all(&e.element_count.to_le_bytes())?;
            writer.write_all(&e.element_size.to_le_bytes())?;
        }
        writer.seek(SeekFrom::Start(DIRECTORY_OFFSET_POS))?;
        writer.write_all(&directory.to_le_bytes())?;
        writer.seek(SeekFrom::End(0))?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for OArchive<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn check_extent(start: u64, len: u64, available: u64) -> Result<(), ArchiveError> {
    let needed = start.saturating_add(len);
    if needed > available {
        return Err(ArchiveError::Truncated { needed, available });
    }
    Ok(())
}

/// Archive reader with random access by entry index.
pub struct IArchive<R: Read + Seek> {
    reader: R,
    /// Stream length; bounds every read sized from the file.
    stream_len: u64,
    header: String,
    entries: Vec<ArchiveEntry>,
}

impl IArchive<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> IArchive<R> {
    pub fn new(mut reader: R) -> Result<Self, ArchiveError> {
        let magic = read_u32(&mut reader)?;
        if magic == MAGIC.swap_bytes() {
            return Err(ArchiveError::WrongEndianness);
        }
        if magic != MAGIC {
            return Err(ArchiveError::NotAnArchive(magic));
        }
        let directory = read_u64(&mut reader)?;
        if directory == 0 {
            return Err(ArchiveError::Unfinished);
        }
        let mut len = [0u8; 1];
        reader.read_exact(&mut len)?;
        let mut header = vec![0u8; len[0] as usize];
        reader.read_exact(&mut header)?;
        let header = String::from_utf8(header).map_err(|_| ArchiveError::InvalidHeader)?;

        let stream_len = reader.seek(SeekFrom::End(0))?;
        check_extent(directory, 4, stream_len)?;
        reader.seek(SeekFrom::Start(directory))?;
        let count = read_u32(&mut reader)? as usize;
        check_extent(directory + 4, count as u64 * ArchiveEntry::BYTES as u64, stream_len)?;
        let mut raw = vec![0u8; count * ArchiveEntry::BYTES];
        reader.read_exact(&mut raw)?;
        let entries = raw
            .chunks_exact(ArchiveEntry::BYTES)
            .map(|e| ArchiveEntry {
                offset: u64::from_le_bytes([e[0], e[1], e[2], e[3], e[4], e[5], e[6], e[7]]),
                compressed_size: u32::from_le_bytes([e[8], e[9], e[10], e[11]]),
                element_count: u32::from_le_bytes([e[12], e[13], e[14], e[15]]),
                element_size: u32::from_le_bytes([e[16], e[17], e[18], e[19]]),
            })
            .collect();
        Ok(Self {
            reader,
            stream_len,
            header,
            entries,
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn extract(&mut self, index: usize) -> Result<CompressedBlob, ArchiveError> {
        let entry = *self
            .entries
            .get(index)
            .ok_or(ArchiveError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        check_extent(entry.offset, entry.compressed_size as u64, self.stream_len)?;
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut bytes = vec![0u8; entry.compressed_size as usize];
        self.reader.read_exact(&mut bytes)?;
        Ok(CompressedBlob {
            element_count: entry.element_count as usize,
            element_size: entry.element_size as usize,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;
    use std::io::Cursor;

    fn roundtrip_archive(cases: &[(usize, usize, usize)], buffers: &[Vec<u8>]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut archive = OArchive::new(&mut cursor, "weights").unwrap();
            for (&(count, size, stride), data) in cases.iter().zip(buffers) {
                archive.insert(data, count, size, stride).unwrap();
            }
            archive.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn strided_roundtrip_is_byte_identical() {
        let mut rng = ChaCha12Rng::seed_from_u64(17);
        let cases = [(0usize, 4usize, 4usize), (1, 1, 1), (10, 12, 16), (257, 40, 64), (3, 0, 8)];
        let buffers: Vec<Vec<u8>> = cases
            .iter()
            .map(|&(count, _, stride)| (0..count * stride).map(|_| rng.random()).collect())
            .collect();
        let bytes = roundtrip_archive(&cases, &buffers);

        let mut archive = IArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.header(), "weights");
        assert_eq!(archive.len(), cases.len());
        for (i, (&(count, size, stride), data)) in cases.iter().zip(&buffers).enumerate() {
            let blob = archive.extract(i).unwrap();
            assert_eq!(blob.element_count, count);
            assert_eq!(blob.element_size, size);
            let mut out = vec![0u8; count * stride];
            uncompress(&blob, &mut out, stride).unwrap();
            for k in 0..count {
                let range = k * stride..k * stride + size;
                assert_eq!(out[range.clone()], data[range]);
            }
        }
    }

    #[test]
    fn out_of_range_extract_is_an_error() {
        let bytes = roundtrip_archive(&[(2, 4, 4)], &[vec![1u8; 8]]);
        let mut archive = IArchive::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            archive.extract(1),
            Err(ArchiveError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn magic_is_checked() {
        let mut bytes = roundtrip_archive(&[], &[]);
        bytes[..4].copy_from_slice(&MAGIC.swap_bytes().to_le_bytes());
        assert!(matches!(
            IArchive::new(Cursor::new(bytes.clone())),
            Err(ArchiveError::WrongEndianness)
        ));
        bytes[..4].copy_from_slice(b"PK\x03\x04");
        assert!(matches!(
            IArchive::new(Cursor::new(bytes)),
            Err(ArchiveError::NotAnArchive(_))
        ));
    }

    #[test]
    fn unfinished_archive_is_detected() {
        let mut cursor = Cursor::new(Vec::new());
        let mut archive = OArchive::new(&mut cursor, "x").unwrap();
        archive.insert(&[1, 2, 3, 4], 1, 4, 4).unwrap();
        std::mem::forget(archive);
        assert!(matches!(
            IArchive::new(Cursor::new(cursor.into_inner())),
            Err(ArchiveError::Unfinished)
        ));
    }

    #[test]
    fn drop_finishes_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitness.arc");
        {
            let mut archive = OArchive::create(&path, "fitness").unwrap();
            archive.insert(&[0u8; 16], 4, 4, 4).unwrap();
        }
        let archive = IArchive::open(&path).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.entries()[0].element_count, 4);
    }

    #[test]
    fn header_must_fit_a_byte() {
        assert!(matches!(
            OArchive::new(Cursor::new(Vec::new()), ""),
            Err(ArchiveError::InvalidHeader)
        ));
        let long = "a".repeat(256);
        assert!(matches!(
            OArchive::new(Cursor::new(Vec::new()), &long),
            Err(ArchiveError::InvalidHeader)
        ));
    }

    #[test]
    fn forged_directory_count_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&14u64.to_le_bytes());
        bytes.extend_from_slice(&[1, b'x']);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            IArchive::new(Cursor::new(bytes)),
            Err(ArchiveError::Truncated { available: 18, .. })
        ));
    }

    #[test]
    fn directory_offset_past_the_end_is_an_error() {
        let mut bytes = roundtrip_archive(&[(2, 4, 4)], &[vec![1u8; 8]]);
        bytes[4..12].copy_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            IArchive::new(Cursor::new(bytes)),
            Err(ArchiveError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_blob_entry_is_an_error() {
        let mut bytes = roundtrip_archive(&[(2, 4, 4)], &[vec![1u8; 8]]);
        // the single directory entry ends the stream; its compressed size sits 12 bytes from the end
        let at = bytes.len() - 12;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut archive = IArchive::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            archive.extract(0),
            Err(ArchiveError::Truncated { .. })
        ));
    }

    #[test]
    fn corrupted_blob_fails_to_decompress() {
        let mut blob = compress(&[7u8; 64], 16, 4, 4).unwrap();
        blob.bytes = vec![0xAB; 12];
        let mut out = vec![0u8; 64];
        assert!(matches!(
            uncompress(&blob, &mut out, 4),
            Err(ArchiveError::Decompression(_))
        ));
    }
}
