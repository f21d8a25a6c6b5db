
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfZipCompressor.cpp

//! The zip compression method compresses either
//! sixteen scan lines at once or a single scan line at once.

use super::*;
use super::optimize_bytes::*;


pub fn decompress_bytes(compressed: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
    let mut decompressed = zune_inflate::DeflateDecoder::new_with_options(
        compressed,
        zune_inflate::DeflateOptions::default()
            .set_limit(expected_byte_size)
            .set_size_hint(expected_byte_size)
    ).decode_zlib().map_err(|_| Error::corrupt("zip block data"))?;

    differences_to_samples(&mut decompressed);
    interleave_byte_blocks(&mut decompressed);
    Ok(decompressed)
}

pub fn compress_bytes(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    let mut packed = Vec::from(uncompressed);

    separate_bytes_fragments(&mut packed);
    samples_to_differences(&mut packed);

    Ok(miniz_oxide::deflate::compress_to_vec_zlib(packed.as_slice(), 4))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let data: Vec<u8> = (0 .. 2048).map(|index| (index % 7 * 31) as u8).collect();

        let compressed = compress_bytes(&data).unwrap();
        let decompressed = decompress_bytes(&compressed, data.len()).unwrap();

        assert_eq!(data, decompressed);
    }

    #[test]
    fn broken_stream_is_rejected() {
        assert!(decompress_bytes(&[ 1, 2, 3, 4 ], 100).is_err());
    }
}
