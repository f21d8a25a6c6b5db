
//! Stateful file handles that combine the meta data, the chunk index,
//! the codecs and the frame buffer binding into a linear read/write API.

pub mod input;
pub mod output;

pub use input::InputFile;
pub use output::OutputFile;

use crate::error::{Error, Message, Result, UnitResult};
use crate::meta::limits::SanityLimits;


/// How a file is read. Passed to `InputFile::open`.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {

    /// When on, reject all files that are slightly invalid,
    /// even if they could be read correctly.
    pub pedantic: bool,

    /// When on, a damaged chunk offset table is rebuilt
    /// by scanning the chunks in the file.
    pub reconstruct_missing_table: bool,

    /// Number of threads that decompress chunks. Zero means fully synchronous.
    /// Fixed for the lifetime of the open file.
    pub worker_count: usize,

    /// Caps that protect against pathological files.
    pub limits: SanityLimits,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            pedantic: false,
            reconstruct_missing_table: true,
            worker_count: default_worker_count(),
            limits: SanityLimits::default(),
        }
    }
}

/// How a file is written. Passed to `OutputFile::create`.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {

    /// When on, reject headers that other exr readers might not accept.
    pub pedantic: bool,

    /// Number of threads that compress chunks. Zero means fully synchronous.
    /// Fixed for the lifetime of the open file.
    pub worker_count: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            pedantic: true,
            worker_count: default_worker_count(),
        }
    }
}

#[cfg(feature = "rayon")]
fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, |count| count.get())
}

#[cfg(not(feature = "rayon"))]
fn default_worker_count() -> usize { 0 }


/// The lifecycle of an open file handle.
/// Once poisoned, every subsequent operation returns the original error.
#[derive(Debug)]
pub(crate) enum FileState {

    /// The header section has been transferred, pixel data may be transferred now.
    Open,

    /// The file was closed in an orderly fashion. No further operations are valid.
    Closed,

    /// A file-level error occurred. The original failure is reported
    /// by every subsequent operation. Chunk-level corruption
    /// does not poison the handle.
    Poisoned {

        /// Whether the original failure was an io error, as opposed to invalid contents.
        was_io_error: bool,

        /// The message of the original failure.
        message: Message,
    },
}

impl FileState {

    /// Return an error if the file is closed or poisoned.
    pub(crate) fn ensure_open(&self) -> UnitResult {
        match self {
            FileState::Open => Ok(()),
            FileState::Closed => Err(Error::usage("the file is already closed")),
            FileState::Poisoned { was_io_error, message } => Err({
                if *was_io_error {
                    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
                }
                else {
                    Error::corrupt(message.clone())
                }
            }),
        }
    }

    /// Poison this handle if the error is a file-level error.
    /// Chunk-level errors pass through without changing the state.
    pub(crate) fn filter<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.poisons_file() {
                let (was_io_error, message) = match error {
                    Error::Io(io_error) => (true, io_error.to_string().into()),
                    Error::Usage(message) => (false, message.clone()),
                    other => (false, other.to_string().into()),
                };

                *self = FileState::Poisoned { was_io_error, message };
            }
        }

        result
    }
}
