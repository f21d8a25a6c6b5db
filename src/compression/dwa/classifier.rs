
//! Maps channel names to the sub-compressor that processes them.
//! The rules are embedded into every compressed block,
//! so that files with vendor-specific rules still decode.

use crate::compression::{ByteVec, Bytes};
use crate::error::{Error, Result, UnitResult, i32_to_usize};
use crate::io::Data;
use crate::meta::attribute::{ChannelDescription, SampleType, Text};


/// How a single channel is encoded inside a dwa block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScheme {

    /// The channel bytes are stored in the deflated catch-all stream.
    /// Used for all integer and full-precision float channels.
    Deflate,

    /// The channel is quantized with the discrete cosine transform.
    /// Only valid for f16 channels.
    LossyDct,

    /// The channel is run-length encoded and then deflated.
    /// Used for alpha-like f16 channels, which are mostly flat.
    RunLength,
}

impl ChannelScheme {
    fn to_id(self) -> u8 {
        match self {
            ChannelScheme::Deflate => 0,
            ChannelScheme::LossyDct => 1,
            ChannelScheme::RunLength => 2,
        }
    }

    fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            0 => ChannelScheme::Deflate,
            1 => ChannelScheme::LossyDct,
            2 => ChannelScheme::RunLength,

            // unknown vendor schemes fall back to the lossless catch-all stream,
            // which is how the encoder stores channels it cannot classify
            _ => ChannelScheme::Deflate,
        })
    }
}

/// One classifier entry: all channels with this name suffix use the given scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {

    /// The channel name after the last period, compared without capitalization.
    pub suffix: Text,

    /// How matching channels are encoded.
    pub scheme: ChannelScheme,
}

/// The per-file table deciding the encoding of each channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {

    /// Checked in order, first match wins.
    pub rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        let dct = |suffix: &'static [u8]| Rule {
            suffix: Text::from_slice_unchecked(suffix),
            scheme: ChannelScheme::LossyDct
        };

        Classifier {
            rules: vec![
                dct(b"r"), dct(b"g"), dct(b"b"), dct(b"y"), dct(b"ry"), dct(b"by"),
                Rule { suffix: Text::from_slice_unchecked(b"a"), scheme: ChannelScheme::RunLength },
            ]
        }
    }
}

impl Classifier {

    /// Decide how the specified channel is encoded.
    /// Lossy schemes only ever apply to f16 channels.
    pub fn scheme_for(&self, channel: &ChannelDescription) -> ChannelScheme {
        if channel.sample_type != SampleType::F16 {
            return ChannelScheme::Deflate;
        }

        let name_bytes = channel.name.bytes();

        // the layer prefix does not matter, only the last name section
        let suffix_start = name_bytes.iter()
            .rposition(|&byte| byte == b'.')
            .map_or(0, |dot_index| dot_index + 1);

        let suffix = &name_bytes[suffix_start..];

        self.rules.iter()
            .find(|rule| {
                rule.suffix.bytes().len() == suffix.len()
                    && rule.suffix.bytes().iter().zip(suffix)
                        .all(|(a, b)| a.eq_ignore_ascii_case(b))
            })
            .map(|rule| rule.scheme)
            .unwrap_or(ChannelScheme::Deflate)
    }

    /// Serialize the rules into the compressed block.
    pub fn write(&self, out: &mut ByteVec) -> UnitResult {
        i32::write(crate::error::usize_to_i32(self.rules.len()), out)?;

        for rule in &self.rules {
            rule.suffix.write_i32_sized(out)?;
            rule.scheme.to_id().write(out)?;
        }

        Ok(())
    }

    /// Read the rules of the compressed block.
    pub fn read(read: &mut Bytes<'_>) -> Result<Self> {
        let rule_count = i32_to_usize(i32::read(read)?, "classifier rule count")?;

        if rule_count > 1024 {
            return Err(Error::corrupt("classifier rule count"));
        }

        let mut rules = Vec::with_capacity(rule_count);

        for _ in 0 .. rule_count {
            let suffix = Text::read_i32_sized(read, 256)?;
            let scheme = ChannelScheme::from_id(u8::read(read)?)?;
            rules.push(Rule { suffix, scheme });
        }

        Ok(Classifier { rules })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn channel(name: &str, sample_type: SampleType) -> ChannelDescription {
        ChannelDescription::new(name, sample_type, false)
    }

    #[test]
    fn default_rules() {
        let classifier = Classifier::default();

        assert_eq!(classifier.scheme_for(&channel("R", SampleType::F16)), ChannelScheme::LossyDct);
        assert_eq!(classifier.scheme_for(&channel("layer.one.B", SampleType::F16)), ChannelScheme::LossyDct);
        assert_eq!(classifier.scheme_for(&channel("A", SampleType::F16)), ChannelScheme::RunLength);
        assert_eq!(classifier.scheme_for(&channel("Z", SampleType::F16)), ChannelScheme::Deflate);

        // lossy compression never applies to full-precision data
        assert_eq!(classifier.scheme_for(&channel("R", SampleType::F32)), ChannelScheme::Deflate);
        assert_eq!(classifier.scheme_for(&channel("id", SampleType::U32)), ChannelScheme::Deflate);
    }

    #[test]
    fn roundtrip_rules() {
        let classifier = Classifier {
            rules: vec![
                Rule { suffix: Text::new_or_panic("specular"), scheme: ChannelScheme::LossyDct },
                Rule { suffix: Text::new_or_panic("mask"), scheme: ChannelScheme::RunLength },
            ]
        };

        let mut bytes = Vec::new();
        classifier.write(&mut bytes).unwrap();

        let read_back = Classifier::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(classifier, read_back);
    }
}
