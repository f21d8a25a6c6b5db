
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfRle.cpp

use super::*;
use super::optimize_bytes::*;

const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 127;


pub fn decompress_bytes(compressed: Bytes<'_>, expected_byte_size: usize, pedantic: bool) -> Result<ByteVec> {
    let mut remaining = compressed;
    let mut decompressed = Vec::with_capacity(expected_byte_size.min(8 * 2048));

    while !remaining.is_empty() && decompressed.len() != expected_byte_size {
        let count = take_1(&mut remaining)? as i8 as i32;

        if count < 0 {
            // take the next '-count' bytes as-is
            let values = take_n(&mut remaining, (-count) as usize)?;
            decompressed.extend_from_slice(values);
        }
        else {
            // repeat the next value 'count + 1' times
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }

        if decompressed.len() > expected_byte_size {
            return Err(Error::corrupt("run length data exceeds block size"));
        }
    }

    if pedantic && !remaining.is_empty() {
        return Err(Error::corrupt("data amount"));
    }

    differences_to_samples(&mut decompressed);
    interleave_byte_blocks(&mut decompressed);
    Ok(decompressed)
}

pub fn compress_bytes(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    let mut data = Vec::from(uncompressed);

    separate_bytes_fragments(&mut data);
    samples_to_differences(&mut data);

    let mut compressed = Vec::with_capacity(data.len());
    let mut run_start = 0;
    let mut run_end = 1;

    while run_start < data.len() {
        while run_end < data.len()
            && data[run_start] == data[run_end]
            && (run_end - run_start) as i32 - 1 < MAX_RUN_LENGTH as i32
        {
            run_end += 1;
        }

        if run_end - run_start >= MIN_RUN_LENGTH {
            compressed.push(((run_end - run_start) as i32 - 1) as u8);
            compressed.push(data[run_start]);
            run_start = run_end;
        }
        else {
            while run_end < data.len() && (
                (run_end + 1 >= data.len() || data[run_end] != data[run_end + 1])
                    || (run_end + 2 >= data.len() || data[run_end + 1] != data[run_end + 2])
            ) && run_end - run_start < MAX_RUN_LENGTH
            {
                run_end += 1;
            }

            compressed.push((run_start as i32 - run_end as i32) as u8);
            compressed.extend_from_slice(&data[run_start .. run_end]);

            run_start = run_end;
            run_end += 1;
        }
    }

    Ok(compressed)
}

fn take_1(slice: &mut &[u8]) -> Result<u8> {
    if !slice.is_empty() {
        let result = slice[0];
        *slice = &slice[1..];
        Ok(result)
    }
    else {
        Err(Error::corrupt("compressed data"))
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    }
    else {
        Err(Error::corrupt("compressed data"))
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress_bytes(data).unwrap();
        let decompressed = decompress_bytes(&compressed, data.len(), true).unwrap();
        assert_eq!(data, decompressed.as_slice());
    }

    #[test]
    fn roundtrip_flat() {
        roundtrip(&[ 0; 4096 ]);
    }

    #[test]
    fn roundtrip_mixed_runs() {
        let mut data = Vec::new();
        data.extend_from_slice(&[ 12; 345 ]);
        data.extend((0..512).map(|index| (index % 251) as u8));
        data.extend_from_slice(&[ 0; 42 ]);

        roundtrip(&data);
    }

    #[test]
    fn roundtrip_seeded_noise_100k() {
        // a fixed seed keeps this test deterministic on all platforms
        let mut state = 0x6a09_e667_u32;
        let data: Vec<u8> = (0 .. 100_000)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();

        roundtrip(&data);
    }

    #[test]
    fn decompression_rejects_overflowing_runs() {
        // declares 128 repetitions into a 16 byte block
        let invalid = [ 127_u8, 42 ];
        assert!(decompress_bytes(&invalid, 16, true).is_err());
    }
}
