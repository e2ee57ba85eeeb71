//!
//! Binary archive used to load/save clip payloads.
//!

#[cfg(not(feature = "wasm"))]
use std::fs::File;
#[cfg(not(feature = "wasm"))]
use std::path::Path;
use std::io::{Cursor, Read, Write};

use crate::base::AnimError;
use crate::endian::{Endian, SwapEndian};

///
/// Reader for the binary payload format: one endian byte, a nul-terminated
/// tag, a `u32` version, then the body.
///
/// Multi-byte values are swapped when the payload was written on a machine
/// of the other endianness.
///
pub struct Archive<R: Read> {
    read: R,
    endian_swap: bool,
    tag: String,
    version: u32,
}

impl<R: Read> Archive<R> {
    /// Reads the header from `read`.
    pub fn new(mut read: R) -> Result<Archive<R>, AnimError> {
        let mut endian = [0u8; 1];
        read.read_exact(&mut endian)?;
        let mut archive = Archive {
            read,
            endian_swap: Endian::from_tag(endian[0]) != Endian::native(),
            tag: String::new(),
            version: 0,
        };
        archive.tag = archive.read::<String>()?;
        archive.version = archive.read::<u32>()?;
        return Ok(archive);
    }

    #[inline]
    pub fn read<T: ArchiveRead<T>>(&mut self) -> Result<T, AnimError> {
        return T::read(self);
    }

    #[inline]
    pub fn read_vec<T: ArchiveRead<T>>(&mut self, count: usize) -> Result<Vec<T>, AnimError> {
        return T::read_vec(self, count);
    }

    /// True if the payload and this machine disagree on endianness.
    #[inline]
    pub fn endian_swap(&self) -> bool {
        return self.endian_swap;
    }

    #[inline]
    pub fn tag(&self) -> &str {
        return &self.tag;
    }

    #[inline]
    pub fn version(&self) -> u32 {
        return self.version;
    }

    /// True if every byte of the underlying reader has been consumed.
    pub fn is_exhausted(&mut self) -> Result<bool, AnimError> {
        let mut probe = [0u8; 1];
        return Ok(self.read.read(&mut probe)? == 0);
    }
}

#[cfg(not(feature = "wasm"))]
impl Archive<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Archive<File>, AnimError> {
        return Archive::new(File::open(path)?);
    }
}

impl Archive<Cursor<Vec<u8>>> {
    pub fn from_vec(buf: Vec<u8>) -> Result<Archive<Cursor<Vec<u8>>>, AnimError> {
        return Archive::new(Cursor::new(buf));
    }
}

impl Archive<Cursor<&[u8]>> {
    pub fn from_slice(buf: &[u8]) -> Result<Archive<Cursor<&[u8]>>, AnimError> {
        return Archive::new(Cursor::new(buf));
    }
}

/// A value that can be decoded from an `Archive`.
pub trait ArchiveRead<T> {
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<T, AnimError>;

    /// Decodes `count` values in a row. The length prefix comes from the
    /// payload, so the preallocation is capped.
    fn read_vec<R: Read>(archive: &mut Archive<R>, count: usize) -> Result<Vec<T>, AnimError> {
        let mut values = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            values.push(Self::read(archive)?);
        }
        return Ok(values);
    }
}

macro_rules! primitive_reader {
    ($($type:ty),*) => {
        $(
            impl ArchiveRead<$type> for $type {
                #[inline]
                fn read<R: Read>(archive: &mut Archive<R>) -> Result<$type, AnimError> {
                    let mut bytes = [0u8; std::mem::size_of::<$type>()];
                    archive.read.read_exact(&mut bytes)?;
                    let value = <$type>::from_ne_bytes(bytes);
                    return Ok(if archive.endian_swap { value.swap_endian() } else { value });
                }
            }
        )*
    };
}

primitive_reader!(u8, u16, i16, u32, f32);

impl ArchiveRead<bool> for bool {
    #[inline]
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<bool, AnimError> {
        return Ok(u8::read(archive)? != 0);
    }
}

/// Nul-terminated UTF-8.
impl ArchiveRead<String> for String {
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<String, AnimError> {
        let mut bytes = Vec::new();
        loop {
            match u8::read(archive)? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        return Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?);
    }
}

/// Writer for the payload format read by `Archive`. Values are written in
/// native endianness, which the header records.
pub struct ArchiveWriter<W: Write> {
    write: W,
}

impl<W: Write> ArchiveWriter<W> {
    /// Creates an `ArchiveWriter`, emitting the header.
    pub fn new(mut write: W, tag: &str, version: u32) -> Result<ArchiveWriter<W>, AnimError> {
        write.write_all(&[Endian::native().tag()])?;
        let mut archive = ArchiveWriter { write };
        archive.write(tag)?;
        archive.write(&version)?;
        return Ok(archive);
    }

    #[inline]
    pub fn write<T: ArchiveWrite + ?Sized>(&mut self, value: &T) -> Result<(), AnimError> {
        return value.write(self);
    }

    pub fn into_inner(self) -> W {
        return self.write;
    }
}

impl ArchiveWriter<Vec<u8>> {
    pub fn to_vec(tag: &str, version: u32) -> Result<ArchiveWriter<Vec<u8>>, AnimError> {
        return ArchiveWriter::new(Vec::new(), tag, version);
    }
}

/// A value that can be encoded into an `ArchiveWriter`.
pub trait ArchiveWrite {
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError>;
}

macro_rules! primitive_writer {
    ($($type:ty),*) => {
        $(
            impl ArchiveWrite for $type {
                #[inline]
                fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
                    archive.write.write_all(&self.to_ne_bytes())?;
                    return Ok(());
                }
            }
        )*
    };
}

primitive_writer!(u8, u16, i16, u32, f32);

impl ArchiveWrite for bool {
    #[inline]
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
        return (*self as u8).write(archive);
    }
}

impl ArchiveWrite for str {
    #[inline]
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
        archive.write.write_all(self.as_bytes())?;
        archive.write.write_all(&[0])?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;

    #[test]
    #[wasm_bindgen_test]
    fn test_archive_header() {
        let mut writer = ArchiveWriter::to_vec("motive-test", 3).unwrap();
        writer.write(&-7i16).unwrap();
        writer.write("bone").unwrap();
        writer.write(&true).unwrap();
        let buf = writer.into_inner();

        let mut archive = Archive::from_slice(&buf).unwrap();
        assert!(!archive.endian_swap());
        assert_eq!(archive.tag(), "motive-test");
        assert_eq!(archive.version(), 3);
        assert_eq!(archive.read::<i16>().unwrap(), -7);
        assert_eq!(archive.read::<String>().unwrap(), "bone");
        assert!(archive.read::<bool>().unwrap());
        assert!(archive.is_exhausted().unwrap());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_archive_swapped_endian() {
        let other = match Endian::native() {
            Endian::Big => Endian::Little,
            Endian::Little => Endian::Big,
        };
        let mut buf = vec![other.tag()];
        buf.extend_from_slice(b"t\0");
        buf.extend_from_slice(&5u32.swap_endian().to_ne_bytes());
        buf.extend_from_slice(&0x0102u16.swap_endian().to_ne_bytes());

        let mut archive = Archive::from_vec(buf).unwrap();
        assert!(archive.endian_swap());
        assert_eq!(archive.version(), 5);
        assert_eq!(archive.read::<u16>().unwrap(), 0x0102);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_archive_truncated() {
        let err = Archive::from_slice(&[1, b'x']).err().unwrap();
        assert!(err.is_io());
    }
}
