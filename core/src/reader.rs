// Backing-store abstraction for volume images and devices
// The parser only ever issues positional reads; nothing here can write.

use crate::error::LodestoneError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Positional byte source backing a volume image, a block device, or an
/// in-memory buffer. Implementations must never modify the underlying store.
pub trait RangeReader: Send + Sync {
    /// Total length of the backing store in bytes.
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read; 0 means end of store. Short reads are allowed.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, LodestoneError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fill `buf` completely from `reader` at `offset`, failing on a short read.
pub fn read_exact_at(
    reader: &dyn RangeReader,
    offset: u64,
    buf: &mut [u8],
) -> Result<(), LodestoneError> {
    let mut done = 0;
    while done < buf.len() {
        let n = reader.read_at(offset + done as u64, &mut buf[done..])?;
        if n == 0 {
            return Err(LodestoneError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read: wanted {} bytes at offset {}, got {}",
                    buf.len(),
                    offset,
                    done
                ),
            )));
        }
        done += n;
    }
    Ok(())
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub fn read_vec_at(
    reader: &dyn RangeReader,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, LodestoneError> {
    let mut buf = vec![0u8; len];
    read_exact_at(reader, offset, &mut buf)?;
    Ok(buf)
}

/// `RangeReader` over an open file or raw device. A file handle carries a
/// single seek cursor, so reads are serialised behind a mutex.
pub struct FileRangeReader {
    file: Mutex<File>,
    len: u64,
}

impl FileRangeReader {
    pub fn new(file: File) -> Result<Self, LodestoneError> {
        let len = file.metadata()?.len();
        Ok(FileRangeReader {
            file: Mutex::new(file),
            len,
        })
    }

    pub fn open(path: &std::path::Path) -> Result<Self, LodestoneError> {
        let file = File::options().read(true).write(false).open(path)?;
        Self::new(file)
    }
}

impl RangeReader for FileRangeReader {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, LodestoneError> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(buf)?;
        Ok(n)
    }
}

/// `RangeReader` over an in-memory buffer. Used for tests and for parsing a
/// standalone `$MFT` file that has already been read into memory.
pub struct SliceReader {
    data: Vec<u8>,
}

impl SliceReader {
    pub fn new(data: Vec<u8>) -> Self {
        SliceReader { data }
    }
}

impl RangeReader for SliceReader {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, LodestoneError> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_slice_reader_bounds() {
        let reader = SliceReader::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.len(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(reader.read_at(0, &mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);

        // Short read at the tail
        assert_eq!(reader.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);

        // Past the end
        assert_eq!(reader.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(reader.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_exact_at_short() {
        let reader = SliceReader::new(vec![0u8; 10]);
        let mut buf = [0u8; 8];
        assert!(read_exact_at(&reader, 0, &mut buf).is_ok());
        assert!(read_exact_at(&reader, 5, &mut buf).is_err());
    }

    #[test]
    fn test_file_range_reader() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello, lodestone").unwrap();
        tmp.flush().unwrap();

        let reader = FileRangeReader::open(tmp.path()).unwrap();
        assert_eq!(reader.len(), 16);

        let mut buf = [0u8; 9];
        read_exact_at(&reader, 7, &mut buf).unwrap();
        assert_eq!(&buf, b"lodestone");
    }
}
