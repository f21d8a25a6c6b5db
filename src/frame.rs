
//! Binds the caller's pixel memory to the channels of a file.
//!
//! A frame buffer is a named collection of slices. Each slice owns typed
//! sample storage and describes how pixel coordinates map into that storage:
//! a base offset, signed strides, and subsampling rates. Negative strides
//! describe flipped images, a zero row stride broadcasts a single row.
//!
//! All address arithmetic happens in one checked function, and the whole
//! addressable range is verified once when the buffer is bound to a header.

use half::f16;

use crate::block::{BlockIndex, UncompressedBlock};
use crate::block::lines::LineIndex;
use crate::block::samples::Sample;
use crate::error::{Error, Result, UnitResult};
use crate::io::Data;
use crate::math::Vec2;
use crate::meta::attribute::{ChannelList, SampleType, Text};
use crate::meta::header::Header;


/// The typed sample storage of a single slice.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {

    /// 16-bit float samples.
    F16(Vec<f16>),

    /// 32-bit float samples.
    F32(Vec<f32>),

    /// 32-bit unsigned integer samples.
    U32(Vec<u32>),
}

impl SampleBuffer {

    /// The sample type of this storage.
    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleBuffer::F16(_) => SampleType::F16,
            SampleBuffer::F32(_) => SampleType::F32,
            SampleBuffer::U32(_) => SampleType::U32,
        }
    }

    /// Number of samples in this storage.
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::F16(values) => values.len(),
            SampleBuffer::F32(values) => values.len(),
            SampleBuffer::U32(values) => values.len(),
        }
    }

    /// Whether this storage contains no samples.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Describes one channel of caller memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {

    /// The typed sample storage. The sample type must
    /// exactly match the channel it is bound to.
    pub samples: SampleBuffer,

    /// Index of the sample at the data window origin.
    /// For flipped images with negative strides, this points
    /// into the middle or the end of the storage.
    pub base_sample_index: usize,

    /// Distance between horizontally adjacent samples, in samples. May be negative.
    pub x_stride: isize,

    /// Distance between vertically adjacent samples, in samples.
    /// May be negative, or zero to broadcast a single row.
    pub y_stride: isize,

    /// Subsampling rates of this slice. Must match the bound channel.
    pub sampling: Vec2<usize>,

    /// Used on read where the file has no matching channel.
    pub fill: Sample,

    /// If true, addressing restarts at every block origin instead of the
    /// data window origin. Useful for reading single tiles into small buffers.
    pub relative_to_block: bool,
}

impl Slice {

    /// A simple row-major slice with no subsampling,
    /// sized for the specified resolution.
    pub fn new_flat(sample_type: SampleType, resolution: Vec2<usize>) -> Self {
        let count = resolution.area();

        Slice {
            samples: match sample_type {
                SampleType::F16 => SampleBuffer::F16(vec![ f16::ZERO; count ]),
                SampleType::F32 => SampleBuffer::F32(vec![ 0.0; count ]),
                SampleType::U32 => SampleBuffer::U32(vec![ 0; count ]),
            },
            base_sample_index: 0,
            x_stride: 1,
            y_stride: resolution.width() as isize,
            sampling: Vec2(1, 1),
            fill: Sample::default(),
            relative_to_block: false,
        }
    }

    /// A row-major slice with the rows flipped upside down.
    pub fn new_flipped(sample_type: SampleType, resolution: Vec2<usize>) -> Self {
        let width = resolution.width() as isize;
        let height = resolution.height() as isize;

        Slice {
            base_sample_index: (width * (height - 1)) as usize,
            y_stride: -width,
            .. Self::new_flat(sample_type, resolution)
        }
    }

    /// The storage index of the sample at the specified subsampled pixel position.
    /// This is the single place where slice addresses are computed.
    /// Returns an error if the position is outside of the storage.
    #[inline]
    fn sample_index(&self, position: Vec2<usize>) -> Result<usize> {
        let index = self.base_sample_index as isize
            + position.x() as isize * self.x_stride
            + position.y() as isize * self.y_stride;

        if index < 0 || index as usize >= self.samples.len() {
            return Err(Error::usage("slice addressing outside of its storage"));
        }

        Ok(index as usize)
    }

    /// Verify that the whole rectangle can be addressed in this slice.
    /// Checking the four corners is sufficient, as the strides are linear.
    fn validate_addressable(&self, subsampled_size: Vec2<usize>) -> UnitResult {
        if subsampled_size.area() == 0 { return Ok(()); }

        let max = subsampled_size - Vec2(1, 1);

        for &corner in &[ Vec2(0, 0), Vec2(max.x(), 0), Vec2(0, max.y()), max ] {
            self.sample_index(corner)?;
        }

        Ok(())
    }
}


/// A named collection of slices, bound to the channels of a header by name.
///
/// Channels named in the header but absent from the frame buffer are
/// skipped on read and written as zeroes on write. Slices named in the
/// frame buffer but absent from the header have their fill value
/// broadcast on read and are ignored on write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameBuffer {
    slices: Vec<(Text, Slice)>,
}

/// A frame buffer that was successfully bound to a header.
/// Slice lookup by channel index is precomputed.
#[derive(Debug)]
pub(crate) struct BoundFrameBuffer {

    /// The caller's frame buffer.
    pub frame_buffer: FrameBuffer,

    /// For each channel of the header, the index of the matching slice.
    pub slice_per_channel: Vec<Option<usize>>,
}

impl FrameBuffer {

    /// A frame buffer without any slices.
    pub fn new() -> Self { Self::default() }

    /// Add a slice for the channel with the specified name.
    /// Replaces the slice if one with that name exists already.
    pub fn insert(&mut self, name: impl Into<Text>, slice: Slice) {
        let name = name.into();

        if let Some(existing) = self.slices.iter_mut().find(|(existing, _)| *existing == name) {
            existing.1 = slice;
        }
        else {
            self.slices.push((name, slice));
        }
    }

    /// The slice with the specified name, if any.
    pub fn get(&self, name: &Text) -> Option<&Slice> {
        self.slices.iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, slice)| slice)
    }

    /// The slice with the specified name, if any.
    pub fn get_mut(&mut self, name: &Text) -> Option<&mut Slice> {
        self.slices.iter_mut()
            .find(|(existing, _)| existing == name)
            .map(|(_, slice)| slice)
    }

    /// Iterate over all named slices.
    pub fn iter(&self) -> impl Iterator<Item = (&Text, &Slice)> {
        self.slices.iter().map(|(name, slice)| (name, slice))
    }

    /// Remove all slices, returning them.
    pub fn take_slices(&mut self) -> Vec<(Text, Slice)> {
        std::mem::take(&mut self.slices)
    }

    /// Verify this frame buffer against the channels of the specified header.
    /// The sample type and the sampling rates of each slice must exactly match
    /// its channel. There is no implicit conversion between sample types.
    pub(crate) fn bind(self, header: &Header) -> Result<BoundFrameBuffer> {
        let channels = &header.channels;

        let slice_per_channel = channels.list.iter()
            .map(|channel| {
                let slice_index = self.slices.iter()
                    .position(|(name, _)| name == &channel.name);

                if let Some(slice_index) = slice_index {
                    let slice = &self.slices[slice_index].1;

                    if slice.samples.sample_type() != channel.sample_type {
                        return Err(Error::type_mismatch(format!(
                            "slice for channel `{}` has the wrong sample type", channel.name
                        )));
                    }

                    if slice.sampling != channel.sampling {
                        return Err(Error::type_mismatch(format!(
                            "slice for channel `{}` has the wrong sampling rate", channel.name
                        )));
                    }

                    let addressable_size = {
                        if slice.relative_to_block { header.default_block_size() / slice.sampling }
                        else { channel.subsampled_resolution(header.data_size) }
                    };

                    slice.validate_addressable(addressable_size)?;
                }

                Ok(slice_index)
            })
            .collect::<Result<Vec<Option<usize>>>>()?;

        Ok(BoundFrameBuffer { frame_buffer: self, slice_per_channel })
    }
}

impl BoundFrameBuffer {

    /// Hand back the caller's frame buffer.
    pub fn into_frame_buffer(self) -> FrameBuffer {
        self.frame_buffer
    }

    /// Fill each slice that has no matching channel in the header
    /// with its fill value, as if such a channel had been read.
    pub fn broadcast_fill_values(&mut self) {
        let bound_slices: Vec<usize> = self.slice_per_channel.iter().flatten().copied().collect();

        for (slice_index, (_, slice)) in self.frame_buffer.slices.iter_mut().enumerate() {
            if bound_slices.contains(&slice_index) { continue; }

            let fill = slice.fill;
            match &mut slice.samples {
                SampleBuffer::F16(values) => values.iter_mut().for_each(|value| *value = fill.to_f16()),
                SampleBuffer::F32(values) => values.iter_mut().for_each(|value| *value = fill.to_f32()),
                SampleBuffer::U32(values) => values.iter_mut().for_each(|value| *value = fill.to_u32()),
            }
        }
    }

    /// Copy the decompressed block into the slices of this frame buffer.
    /// Channels without a slice are skipped.
    pub fn insert_block(&mut self, block: &UncompressedBlock, channels: &ChannelList) -> UnitResult {
        let block_origin = block.index.pixel_position;

        for (byte_range, line) in LineIndex::lines_in_block(block.index, channels) {
            let slice_index = match self.slice_per_channel[line.channel] {
                Some(index) => index,
                None => continue, // channel was not requested by the caller
            };

            let slice = &mut self.frame_buffer.slices[slice_index].1;
            let line_bytes = &block.data[byte_range];

            copy_line_into_slice(slice, line, block_origin, line_bytes)?;
        }

        Ok(())
    }

    /// Gather a block from the slices of this frame buffer.
    /// Channels without a slice are written as zeroes.
    pub fn extract_block(&self, block_index: BlockIndex, channels: &ChannelList) -> Result<UncompressedBlock> {
        let block_origin = block_index.pixel_position;
        let mut failure = None;

        let block = UncompressedBlock::from_lines(channels, block_index, |line| {
            let slice_index = match self.slice_per_channel[line.location.channel] {
                Some(index) => index,
                None => return, // line stays zeroed
            };

            let slice = &self.frame_buffer.slices[slice_index].1;

            if let Err(error) = copy_slice_into_line(slice, line.location, block_origin, line.value) {
                failure.get_or_insert(error);
            }
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(block)
        }
    }
}


/// The subsampled slice position of the first sample of the line.
fn line_start_in_slice(slice: &Slice, line: LineIndex, block_origin: Vec2<usize>) -> Vec2<usize> {
    let absolute = line.position;

    let relative = {
        if slice.relative_to_block { absolute - block_origin }
        else { absolute }
    };

    relative / slice.sampling
}

fn copy_line_into_slice(slice: &mut Slice, line: LineIndex, block_origin: Vec2<usize>, mut line_bytes: &[u8]) -> UnitResult {
    let start = line_start_in_slice(slice, line, block_origin);

    for sample_x in 0 .. line.sample_count {
        let index = slice.sample_index(Vec2(start.x() + sample_x, start.y()))?;

        match &mut slice.samples {
            SampleBuffer::F16(values) => values[index] = f16::read(&mut line_bytes)?,
            SampleBuffer::F32(values) => values[index] = f32::read(&mut line_bytes)?,
            SampleBuffer::U32(values) => values[index] = u32::read(&mut line_bytes)?,
        }
    }

    Ok(())
}

fn copy_slice_into_line(slice: &Slice, line: LineIndex, block_origin: Vec2<usize>, mut line_bytes: &mut [u8]) -> UnitResult {
    let start = line_start_in_slice(slice, line, block_origin);

    for sample_x in 0 .. line.sample_count {
        let index = slice.sample_index(Vec2(start.x() + sample_x, start.y()))?;

        match &slice.samples {
            SampleBuffer::F16(values) => values[index].write(&mut line_bytes)?,
            SampleBuffer::F32(values) => values[index].write(&mut line_bytes)?,
            SampleBuffer::U32(values) => values[index].write(&mut line_bytes)?,
        }
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn header_with(channels: Vec<ChannelDescription>, size: Vec2<usize>) -> Header {
        Header::new("test".into(), size, channels.into_iter().collect())
    }

    #[test]
    fn wrong_sample_type_is_rejected_at_bind_time() {
        let header = header_with(
            vec![ ChannelDescription::new("R", SampleType::F32, false) ],
            Vec2(4, 4)
        );

        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("R", Slice::new_flat(SampleType::F16, Vec2(4, 4)));

        assert!(matches!(frame_buffer.bind(&header), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn misaligned_strides_are_rejected_at_bind_time() {
        let header = header_with(
            vec![ ChannelDescription::new("R", SampleType::F32, false) ],
            Vec2(4, 4)
        );

        let mut slice = Slice::new_flat(SampleType::F32, Vec2(4, 4));
        slice.y_stride = 100; // points far outside the storage

        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("R", slice);

        assert!(matches!(frame_buffer.bind(&header), Err(Error::Usage(_))));
    }

    #[test]
    fn unbound_slices_are_filled() {
        let header = header_with(
            vec![ ChannelDescription::new("R", SampleType::F32, false) ],
            Vec2(2, 2)
        );

        let mut unbound = Slice::new_flat(SampleType::F32, Vec2(2, 2));
        unbound.fill = Sample::F32(0.75);

        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("R", Slice::new_flat(SampleType::F32, Vec2(2, 2)));
        frame_buffer.insert("weird", unbound);

        let mut bound = frame_buffer.bind(&header).unwrap();
        bound.broadcast_fill_values();

        let frame_buffer = bound.into_frame_buffer();
        match &frame_buffer.get(&Text::new_or_panic("weird")).unwrap().samples {
            SampleBuffer::F32(values) => assert!(values.iter().all(|&value| value == 0.75)),
            _ => panic!("sample buffer type changed"),
        }
    }

    #[test]
    fn roundtrip_through_block_with_flipped_slice() {
        let header = header_with(
            vec![ ChannelDescription::new("G", SampleType::U32, false) ],
            Vec2(3, 2)
        );

        let values = vec![
            1, 2, 3,
            4, 5, 6,
        ];

        let mut upright = Slice::new_flat(SampleType::U32, Vec2(3, 2));
        upright.samples = SampleBuffer::U32(values.clone());

        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("G", upright);
        let bound = frame_buffer.bind(&header).unwrap();

        let block_index = BlockIndex {
            layer: 0,
            pixel_position: Vec2(0, 0),
            pixel_size: Vec2(3, 2),
            level: Vec2(0, 0),
        };

        let block = bound.extract_block(block_index, &header.channels).unwrap();

        // read the block back through a flipped view
        let mut flipped_buffer = FrameBuffer::new();
        flipped_buffer.insert("G", Slice::new_flipped(SampleType::U32, Vec2(3, 2)));

        let mut flipped_bound = flipped_buffer.bind(&header).unwrap();
        flipped_bound.insert_block(&block, &header.channels).unwrap();

        match &flipped_bound.into_frame_buffer().get(&Text::new_or_panic("G")).unwrap().samples {
            SampleBuffer::U32(flipped) => assert_eq!(flipped, &[ 4, 5, 6, 1, 2, 3 ]),
            _ => panic!("sample buffer type changed"),
        }
    }

    #[test]
    fn zero_row_stride_broadcasts_one_row() {
        let header = header_with(
            vec![ ChannelDescription::new("L", SampleType::F32, false) ],
            Vec2(4, 3)
        );

        let mut broadcast = Slice::new_flat(SampleType::F32, Vec2(4, 1));
        broadcast.y_stride = 0;
        broadcast.samples = SampleBuffer::F32(vec![ 0.1, 0.2, 0.3, 0.4 ]);

        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("L", broadcast);
        let bound = frame_buffer.bind(&header).unwrap();

        let block_index = BlockIndex {
            layer: 0,
            pixel_position: Vec2(0, 0),
            pixel_size: Vec2(4, 3),
            level: Vec2(0, 0),
        };

        let block = bound.extract_block(block_index, &header.channels).unwrap();

        // every row of the block contains the same four values
        let mut floats = vec![ 0.0_f32; 12 ];
        f32::read_slice(&mut block.data.as_slice(), &mut floats).unwrap();
        assert_eq!(&floats[0..4], &floats[4..8]);
        assert_eq!(&floats[0..4], &floats[8..12]);
    }
}
