
//! Specialized binary input and output.
//! Uses the error handling for this crate.

#![doc(hidden)]
pub use ::std::io::{Read, Write, Seek, SeekFrom};

use half::slice::{HalfFloatSliceExt};
use lebe::prelude::*;
use ::half::f16;
use crate::error::{Error, Result, UnitResult, IoResult};
use std::io::{BufReader, BufWriter};
use std::convert::TryFrom;
use std::path::Path;
use std::fs::File;


/// Skip reading uninteresting bytes without allocating.
#[inline]
pub fn skip_bytes(read: &mut impl Read, count: u64) -> IoResult<()> {
    let skipped = std::io::copy(
        &mut read.by_ref().take(count),
        &mut std::io::sink()
    )?;

    // the reader may have ended before we skipped the desired number of bytes
    if skipped < count {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "cannot skip more bytes than exist"
        ));
    }

    debug_assert_eq!(skipped, count, "skip bytes bug");
    Ok(())
}

/// Peek a single byte without consuming it.
#[derive(Debug)]
pub struct PeekRead<T> {

    /// Cannot be exposed as it will not contain peeked values anymore.
    inner: T,

    peeked: Option<IoResult<u8>>,
}

impl<T: Read> PeekRead<T> {

    /// Wrap a reader to make it peekable.
    #[inline]
    pub fn new(inner: T) -> Self {
        Self { inner, peeked: None }
    }

    /// Hand back the wrapped byte stream, discarding any peeked byte.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Read a single byte and return that without consuming it.
    /// The next `read` call will include that byte.
    #[inline]
    pub fn peek_u8(&mut self) -> &IoResult<u8> {
        self.peeked = self.peeked.take().or_else(|| Some(u8::read_from_little_endian(&mut self.inner)));
        self.peeked.as_ref().unwrap() // unwrap cannot fail because we just set it
    }

    /// Skip a single byte if it equals the specified value.
    /// Returns whether the value was found.
    /// Consumes the peeked result if an error occurred.
    #[inline]
    pub fn skip_if_eq(&mut self, value: u8) -> IoResult<bool> {
        match self.peek_u8() {
            Ok(peeked) if *peeked == value =>  {
                self.peeked = None; // consume the byte
                Ok(true)
            },

            Ok(_) => Ok(false),

            // return the error that was now consumed
            Err(_) => self.peeked.take().unwrap().map(|_| false)
        }
    }
}


impl<T: Read> Read for PeekRead<T> {
    fn read(&mut self, target_buffer: &mut [u8]) -> IoResult<usize> {
        if target_buffer.is_empty() {
            return Ok(0)
        }

        match self.peeked.take() {
            None => self.inner.read(target_buffer),
            Some(peeked) => {
                target_buffer[0] = peeked?;

                // indexing [1..] is safe because an empty buffer already returned ok
                Ok(1 + self.inner.read(&mut target_buffer[1..])?)
            }
        }
    }
}

impl<T: Read + Seek> PeekRead<Tracking<T>> {

    /// Seek this read to the specified byte position.
    /// Discards any previously peeked value.
    pub fn skip_to(&mut self, target_position: usize) -> IoResult<()> {
        self.inner.seek_read_to(target_position)?;
        self.peeked = None;
        Ok(())
    }
}

impl<T: Read> PeekRead<Tracking<T>> {

    /// Current number of bytes read.
    pub fn byte_position(&self) -> usize {
        self.inner.byte_position()
    }
}


/// Keep track of the byte position of the inner reader or writer,
/// so that byte positions can be inspected without seeking,
/// and seeks can be elided where the stream is already in place.
#[derive(Debug)]
pub struct Tracking<T> {

    /// Do not expose to prevent seeking without updating position.
    inner: T,

    position: usize,
}

impl<T: Read> Read for Tracking<T> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.inner.read(buffer)?;
        self.position += count;
        Ok(count)
    }
}

impl<T: Write> Write for Tracking<T> {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        let count = self.inner.write(buffer)?;
        self.position += count;
        Ok(count)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }
}

impl<T> Tracking<T> {

    /// If `inner` is a reference, if must never be seeked directly,
    /// but only through this `Tracking` instance.
    pub fn new(inner: T) -> Self {
        Tracking { inner, position: 0 }
    }

    /// Current number of bytes written or read.
    pub fn byte_position(&self) -> usize {
        self.position
    }

    /// Hand back the wrapped byte stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Seek> Tracking<T> {

    /// Set the reader to the specified byte position.
    /// If it is only a few bytes, no seek system call is performed.
    pub fn seek_read_to(&mut self, target_position: usize) -> IoResult<()> {
        let delta = target_position as i128 - self.position as i128;
        debug_assert!(delta.abs() < usize::MAX as i128);

        if delta > 0 && delta < 16 { // seeking forwards by a few bytes is faster than all the seek machinery
            skip_bytes(self, delta as u64)?;
        }
        else if delta != 0 {
            self.inner.seek(SeekFrom::Start(u64::try_from(target_position).unwrap()))?;
            self.position = target_position;
        }

        Ok(())
    }
}

impl<T: Write + Seek> Tracking<T> {

    /// Move the writer to the specified byte position.
    /// Successfully completes if the byte position is already reached.
    pub fn seek_write_to(&mut self, target_position: usize) -> IoResult<()> {
        if target_position != self.position {
            self.inner.seek(SeekFrom::Start(u64::try_from(target_position).unwrap()))?;
            self.position = target_position;
        }

        Ok(())
    }
}


/// Open a file for buffered reading.
pub fn open_buffered_file(path: impl AsRef<Path>) -> IoResult<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

/// Create a file for buffered writing, replacing any existing file.
pub fn create_buffered_file(path: impl AsRef<Path>) -> IoResult<BufWriter<File>> {
    File::create(path).map(BufWriter::new)
}


/// Generic trait that defines common binary operations such as reading and writing for this type.
pub trait Data: Sized + Default + Clone + Copy {

    /// Number of bytes this would consume in an exr file.
    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    /// Read a value of type `Self` from the little-endian byte stream.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    /// If the slice cannot be filled completely, returns `Error::Corrupt`.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size`.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, it will never read any more than that.
    /// Returns `Error::OutOfResources` if the size declares more than the hard maximum.
    fn read_vec(read: &mut impl Read, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        let mut vec = Vec::with_capacity(data_size.min(soft_max));
        Self::read_into_vec(read, &mut vec, data_size, soft_max, hard_max, purpose)?;
        Ok(vec)
    }

    /// Write this value to the little-endian byte stream.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the little-endian byte stream.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read a value of type `Self` in the byte order of the current machine.
    /// Only used for in-memory transfers, never for bytes that go into a file.
    fn read_ne(read: &mut impl Read) -> Result<Self>;

    /// Read values in the byte order of the current machine.
    fn read_slice_ne(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Write this value in the byte order of the current machine.
    fn write_ne(self, write: &mut impl Write) -> UnitResult;

    /// Write values in the byte order of the current machine.
    fn write_slice_ne(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size` into the provided vector.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, it will never read any more than that.
    /// Returns `Error::OutOfResources` if the size declares more than the hard maximum.
    fn read_into_vec(read: &mut impl Read, data: &mut Vec<Self>, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> UnitResult {
        if let Some(max) = hard_max {
            if data_size > max {
                return Err(Error::out_of_resources(purpose))
            }
        }

        let soft_max = hard_max.unwrap_or(soft_max).min(soft_max);
        let end = data.len() + data_size;

        // do not allocate more than $chunks memory at once
        // (most of the time, this loop will run only once)
        while data.len() < end {
            let chunk_start = data.len();
            let chunk_end = (chunk_start + soft_max).min(end);

            data.resize(chunk_end, Self::default());
            Self::read_slice(read, &mut data[chunk_start .. chunk_end])?;
        }

        Ok(())
    }

    /// Write the length of the slice and then its contents.
    #[inline]
    fn write_i32_sized_slice<W: Write>(write: &mut W, slice: &[Self]) -> UnitResult {
        i32::try_from(slice.len())
            .map_err(|_| Error::corrupt("byte count exceeds i32 range"))?
            .write(write)?;

        Self::write_slice(write, slice)
    }

    /// Read the desired element count and then read that many items into a vector.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    /// If `hard_max` is specified, it will never read any more than that.
    /// Returns `Error::OutOfResources` if the size declares more than the hard maximum.
    #[inline]
    fn read_i32_sized_vec(read: &mut impl Read, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        let size = crate::error::i32_to_usize(i32::read(read)?, "negative array size")?;
        Self::read_vec(read, size, soft_max, hard_max, purpose)
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            #[inline]
            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            #[inline]
            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }

            #[inline]
            fn read_ne(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_native_endian()?)
            }

            #[inline]
            fn write_ne(self, write: &mut impl Write) -> UnitResult {
                write.write_as_native_endian(&self)?;
                Ok(())
            }

            #[inline]
            fn read_slice_ne(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_native_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice_ne(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_native_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


impl Data for f16 {
    #[inline]
    fn read(read: &mut impl Read) -> Result<Self> {
        u16::read(read).map(f16::from_bits)
    }

    #[inline]
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
        let bits = slice.reinterpret_cast_mut();
        u16::read_slice(read, bits)
    }

    #[inline]
    fn write(self, write: &mut impl Write) -> UnitResult {
        self.to_bits().write(write)
    }

    #[inline]
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
        let bits = slice.reinterpret_cast();
        u16::write_slice(write, bits)
    }

    #[inline]
    fn read_ne(read: &mut impl Read) -> Result<Self> {
        u16::read_ne(read).map(f16::from_bits)
    }

    #[inline]
    fn write_ne(self, write: &mut impl Write) -> UnitResult {
        self.to_bits().write_ne(write)
    }

    #[inline]
    fn read_slice_ne(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
        let bits = slice.reinterpret_cast_mut();
        u16::read_slice_ne(read, bits)
    }

    #[inline]
    fn write_slice_ne(write: &mut impl Write, slice: &[Self]) -> UnitResult {
        let bits = slice.reinterpret_cast();
        u16::write_slice_ne(write, bits)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn peek() {
        let buffer: &[u8] = &[0, 1, 2, 3];
        let mut peek = PeekRead::new(buffer);

        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(u8::read(&mut peek).unwrap(), 0_u8);

        assert_eq!(peek.read(&mut [0, 0]).unwrap(), 2);

        assert_eq!(peek.peek_u8().as_ref().unwrap(), &3);
        assert!(peek.skip_if_eq(3).unwrap());

        assert!(peek.peek_u8().is_err());
        assert!(u8::read(&mut peek).is_err());
    }

    #[test]
    fn tracking_write_position() {
        let mut write = Tracking::new(Cursor::new(Vec::<u8>::new()));

        0xfeed_d0d0_u32.write(&mut write).unwrap();
        assert_eq!(write.byte_position(), 4);

        write.seek_write_to(12).unwrap();
        0_u16.write(&mut write).unwrap();
        assert_eq!(write.byte_position(), 14);
    }

    #[test]
    fn sized_vec_rejects_negative_and_huge_sizes() {
        let mut negative = Cursor::new(vec![ 0xff, 0xff, 0xff, 0xff ]);
        assert!(u8::read_i32_sized_vec(&mut negative, 128, None, "test").is_err());

        let mut huge = Cursor::new(vec![ 0xff, 0xff, 0xff, 0x7f ]);
        assert!(matches!(
            u8::read_i32_sized_vec(&mut huge, 128, Some(1024), "test"),
            Err(crate::error::Error::OutOfResources(_))
        ));
    }
}
