
//! Extract lines from a block of pixel bytes.

use crate::block::BlockIndex;
use crate::math::*;
use crate::meta::attribute::ChannelList;
use smallvec::SmallVec;
use std::ops::Range;


/// A single line of pixels.
/// Use [`LineRef`] or [`LineRefMut`] for easier type names.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct LineSlice<T> {

    /// Where this line is located inside the image.
    pub location: LineIndex,

    /// The raw bytes of the pixel line, either `&[u8]` or `&mut [u8]`.
    /// Must be re-interpreted as slice of f16, f32, or u32,
    /// according to the channel data type.
    pub value: T,
}

/// A reference to a single line of pixels.
/// May go across the whole image or just a tile section of it.
///
/// This line contains an immutable slice that all samples will be read from.
pub type LineRef<'s> = LineSlice<&'s [u8]>;

/// A reference to a single mutable line of pixels.
/// May go across the whole image or just a tile section of it.
///
/// This line contains a mutable slice that all samples will be written to.
pub type LineRefMut<'s> = LineSlice<&'s mut [u8]>;

/// Specifies where a row of pixels lies inside an image.
/// This is a globally unique identifier which includes
/// the layer, channel index, and pixel location.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub struct LineIndex {

    /// Index of the layer.
    pub layer: usize,

    /// The channel index of the layer.
    pub channel: usize,

    /// Index of the mip or rip level in the image.
    pub level: Vec2<usize>,

    /// Position of the leftmost sample of the row,
    /// relative to the data window origin.
    pub position: Vec2<usize>,

    /// The number of samples in this row,
    /// that is, the number of f16, f32, or u32 values.
    pub sample_count: usize,
}

impl LineIndex {

    /// Iterates the lines of this block index in interleaved fashion:
    /// For each line in this block, this iterator steps once through each channel that has samples on that line.
    /// This is how lines are stored in a pixel data block.
    ///
    /// Respects channel subsampling: channels with y sampling other than one do not
    /// have samples on every line, and channels with x sampling have fewer samples per line.
    ///
    /// Returns the byte range of the line inside the block, and the line location.
    #[inline]
    #[must_use]
    pub fn lines_in_block(block: BlockIndex, channels: &ChannelList) -> impl Iterator<Item = (Range<usize>, LineIndex)> {

        #[derive(Clone, Copy)]
        struct ChannelStepper {
            x_sampling: usize,
            y_sampling: usize,
            bytes_per_sample: usize,
        }

        struct LineIter {
            channels: SmallVec<[ChannelStepper; 8]>,
            layer: usize,
            level: Vec2<usize>,
            x_min: i32,
            x_max: i32,
            y: i32,
            end_y: i32,
            byte: usize,
            channel: usize,
        }

        impl Iterator for LineIter {
            type Item = (Range<usize>, LineIndex);

            fn next(&mut self) -> Option<Self::Item> {
                loop {
                    if self.y >= self.end_y {
                        return None;
                    }

                    // find the next channel that has samples on the current row
                    while self.channel < self.channels.len() {
                        let channel = self.channels[self.channel];

                        if mod_p(self.y, crate::error::usize_to_i32(channel.y_sampling)) == 0 {
                            let sample_count = subsampled_count(channel.x_sampling, self.x_min, self.x_max);
                            let byte_len = sample_count * channel.bytes_per_sample;

                            let result = (
                                self.byte .. self.byte + byte_len,
                                LineIndex {
                                    channel: self.channel,
                                    layer: self.layer,
                                    level: self.level,
                                    position: Vec2(self.x_min as usize, self.y as usize),
                                    sample_count,
                                },
                            );

                            self.byte += byte_len;
                            self.channel += 1;

                            return Some(result);
                        }

                        self.channel += 1;
                    }

                    // all channels of this row are done, advance to the next row
                    self.channel = 0;
                    self.y += 1;
                }
            }
        }

        let channel_steppers: SmallVec<[ChannelStepper; 8]> = channels.list.iter()
            .map(|channel| ChannelStepper {
                x_sampling: channel.sampling.x(),
                y_sampling: channel.sampling.y(),
                bytes_per_sample: channel.sample_type.bytes_per_sample(),
            })
            .collect();

        let x_min = block.pixel_position.x() as i32;
        let x_max = x_min + block.pixel_size.width() as i32 - 1;

        LineIter {
            channels: channel_steppers,
            layer: block.layer,
            level: block.level,
            x_min,
            x_max,
            y: block.pixel_position.y() as i32,
            end_y: (block.pixel_position.y() + block.pixel_size.height()) as i32,
            byte: 0,
            channel: 0,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::block::BlockIndex;
    use crate::meta::attribute::{ChannelDescription, SampleType};

    #[test]
    fn lines_of_interleaved_block() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("B", SampleType::F16, false),
            ChannelDescription::new("G", SampleType::F32, false),
        ]);

        let block = BlockIndex {
            layer: 0,
            pixel_position: Vec2(0, 4),
            pixel_size: Vec2(3, 2),
            level: Vec2(0, 0),
        };

        let lines: Vec<(Range<usize>, LineIndex)> = LineIndex::lines_in_block(block, &channels).collect();

        assert_eq!(lines.len(), 4); // two channels for each of the two rows

        assert_eq!(lines[0].0, 0..6); // B is 3 f16 samples
        assert_eq!(lines[1].0, 6..18); // G is 3 f32 samples
        assert_eq!(lines[1].1.channel, 1);
        assert_eq!(lines[2].1.position, Vec2(0, 5));

        assert_eq!(lines.last().unwrap().0.end, (3 * 2 + 3 * 4) * 2);
    }

    #[test]
    fn subsampled_channels_skip_rows() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription {
                sampling: Vec2(2, 2),
                .. ChannelDescription::new("Y", SampleType::F16, false)
            },
        ]);

        let block = BlockIndex {
            layer: 0,
            pixel_position: Vec2(0, 0),
            pixel_size: Vec2(4, 4),
            level: Vec2(0, 0),
        };

        let lines: Vec<(Range<usize>, LineIndex)> = LineIndex::lines_in_block(block, &channels).collect();

        // only rows 0 and 2 have samples, two samples each
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1.sample_count, 2);
        assert_eq!(lines[1].1.position.y(), 2);
    }
}
