
//! Read and write OpenEXR images.
//! This crate contains the container format, the codec kernels,
//! and the chunk machinery, without any unsafe code.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::pedantic,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    missing_copy_implementations,
    trivial_numeric_casts,
)]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod io; // public to allow for custom attribute byte parsing

pub mod math;
pub mod compression;
pub mod meta;
pub mod block;
pub mod frame;
pub mod file;
pub mod check;
pub mod error;

#[macro_use]
extern crate smallvec;

/// Re-exports of all the types commonly required
/// for reading and writing exr files.
pub mod prelude {

    // main exports
    pub use crate::meta::MetaData;
    pub use crate::meta::header::{Header, ImageAttributes, LayerAttributes};
    pub use crate::file::{InputFile, OutputFile, ReadOptions, WriteOptions};
    pub use crate::frame::{FrameBuffer, Slice, SampleBuffer};

    // secondary data types
    pub use crate::meta;
    pub use crate::meta::attribute;
    pub use crate::meta::attribute::{
        AttributeValue, Text, Compression, IntegerBounds,
        ChannelDescription, ChannelList, SampleType,
        LineOrder, TileDescription, LevelMode,
    };

    pub use crate::meta::BlockDescription;
    pub use crate::block::samples::Sample;
    pub use crate::error::{Result, Error, UnitResult};
    pub use crate::math::{Vec2, RoundingMode};

    // re-export external stuff
    pub use half::f16;
    pub use smallvec::smallvec;
}
