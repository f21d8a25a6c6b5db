
//! 16-bit Huffman compression and decompression.
//! Huffman compression and decompression routines written
//!	by Christian Rouet for his PIZ image file format.
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfHuf.cpp

use crate::error::{Error, Result, UnitResult, u64_to_usize, usize_to_i32, i32_to_usize};
use crate::io::Data;
use std::cmp::Reverse;
use std::collections::BinaryHeap;


const ENCODE_BITS: usize = 16; // literal (value) bit length
const DECODE_BITS: usize = 14; // decoding bit size (>= 8)

const ENCODE_SIZE: usize = (1 << ENCODE_BITS) + 1; // encoding table size
const DECODE_SIZE: usize = 1 << DECODE_BITS;       // decoding table size
const DECODE_MASK: u64 = DECODE_SIZE as u64 - 1;

const SHORT_ZEROCODE_RUN: u64 = 59;
const LONG_ZEROCODE_RUN: u64 = 63;
const SHORTEST_LONG_RUN: u64 = 2 + LONG_ZEROCODE_RUN - SHORT_ZEROCODE_RUN;
const LONGEST_LONG_RUN: u64 = 255 + SHORTEST_LONG_RUN;


/// Decompress the huffman-encoded data into `expected_value_count` 16-bit values.
pub fn decompress(compressed: &[u8], expected_value_count: usize) -> Result<Vec<u16>> {
    let mut remaining_compressed = compressed;

    let min_code_index = i32_to_usize(i32::read(&mut remaining_compressed)?, "huffman table range")?;
    let max_code_index = i32_to_usize(i32::read(&mut remaining_compressed)?, "huffman table range")?;
    let _table_size = i32_to_usize(i32::read(&mut remaining_compressed)?, "huffman table size")?; // inferred from the table content
    let bit_count = i32_to_usize(i32::read(&mut remaining_compressed)?, "huffman bit count")?;
    let _reserved = i32::read(&mut remaining_compressed)?; // reserved for future extensions

    if min_code_index >= ENCODE_SIZE || max_code_index >= ENCODE_SIZE || min_code_index > max_code_index {
        return Err(invalid_table_size());
    }

    let encoding_table = read_code_table(&mut remaining_compressed, min_code_index, max_code_index)?;

    if bit_count > 8 * remaining_compressed.len() {
        return Err(not_enough_data());
    }

    let decoding_table = build_decoding_table(&encoding_table, min_code_index, max_code_index)?;

    let result = decode_with_tables(
        &encoding_table,
        &decoding_table,
        remaining_compressed,
        bit_count,
        max_code_index,
        expected_value_count,
    )?;

    Ok(result)
}

/// Compress the 16-bit values into a huffman-encoded byte sequence.
pub fn compress(uncompressed: &[u16]) -> Result<Vec<u8>> {
    if uncompressed.is_empty() { return Ok(vec![]); }

    let mut frequencies = count_frequencies(uncompressed);
    let (min_code_index, max_code_index) = build_encoding_table(&mut frequencies);

    let mut result = Vec::with_capacity(uncompressed.len());
    u32::write_slice(&mut result, &[0; 5]).expect("write to in-memory failed"); // the header is patched below

    let table_start = result.len();
    write_code_table(&mut result, &frequencies, min_code_index, max_code_index)?;

    let data_start = result.len();
    let bit_count = encode_with_frequencies(
        &frequencies, uncompressed, max_code_index, &mut result
    )?;

    // write the meta data after the actual compression is finished
    let table_length = data_start - table_start;
    let mut result_header = result.as_mut_slice();

    usize_to_i32(min_code_index).write(&mut result_header)?;
    usize_to_i32(max_code_index).write(&mut result_header)?;
    usize_to_i32(table_length).write(&mut result_header)?;
    usize_to_i32(bit_count).write(&mut result_header)?;
    0_i32.write(&mut result_header)?;

    Ok(result)
}


fn invalid_table_size() -> Error { Error::corrupt("huffman table size") }
fn invalid_table_entry() -> Error { Error::corrupt("huffman table entry") }
fn invalid_code() -> Error { Error::corrupt("huffman code") }
fn not_enough_data() -> Error { Error::corrupt("huffman content size") }


/// The upper 58 bits of a table entry are the canonical code, the lower 6 bits its length.
#[inline]
fn length(code: u64) -> u64 { code & 63 }

#[inline]
fn code(code: u64) -> u64 { code >> 6 }


/// The state of the bit packer or unpacker:
/// a shift register of yet unwritten or unconsumed bits.
#[derive(Default, Clone, Copy)]
struct BitBuffer {
    bits: u64,
    bit_count: u64,
}

impl BitBuffer {

    #[inline]
    fn write_bits(&mut self, count: u64, bits: u64, out: &mut Vec<u8>) {
        self.bits = (self.bits << count) | bits;
        self.bit_count += count;

        while self.bit_count >= 8 {
            self.bit_count -= 8;
            out.push((self.bits >> self.bit_count) as u8);
        }
    }

    #[inline]
    fn write_code(&mut self, table_entry: u64, out: &mut Vec<u8>) {
        self.write_bits(length(table_entry), code(table_entry), out)
    }

    /// Flush the remaining bits, padded with zeroes up to the next byte.
    fn flush(&mut self, out: &mut Vec<u8>) {
        if self.bit_count > 0 {
            out.push((self.bits << (8 - self.bit_count)) as u8);
            self.bit_count = 0;
        }
    }

    #[inline]
    fn read_bits(&mut self, count: u64, read: &mut &[u8]) -> Result<u64> {
        while self.bit_count < count {
            self.bits = (self.bits << 8) | u8::read(read)? as u64;
            self.bit_count += 8;
        }

        self.bit_count -= count;
        Ok((self.bits >> self.bit_count) & ((1 << count) - 1))
    }
}


/// Build a "canonical" Huffman code table:
/// - for each (uncompressed) symbol, `table` contains the length
///   of the corresponding code (in the compressed data)
/// - canonical codes are computed and stored in `table`
/// - the rules for constructing canonical codes are as follows:
///   * shorter codes (if filled with zeroes to the right)
///     have a numerically higher value than longer codes
///   * for codes with the same length, numerical values
///     increase with numerical symbol values
/// - because the canonical code table can be constructed from
///   symbol lengths alone, the code table can be transmitted
///   without sending the actual code values
fn build_canonical_table(code_table: &mut [u64]) {
    debug_assert_eq!(code_table.len(), ENCODE_SIZE, "code table size mismatch");

    let mut count_per_code = [0_u64; 59];

    for &code in code_table.iter() {
        count_per_code[code as usize] += 1;
    }

    // for each i from 58 through 1, compute the
    // numerically lowest code with length i, and
    // store that code in count_per_code[i]
    {
        let mut code = 0_u64;
        for count in count_per_code.iter_mut().rev() {
            let next_code = (code + *count) >> 1;
            *count = code;
            code = next_code;
        }
    }

    // code_table[i] contains the length, l, of the code for symbol i.
    // assign the next available code of length l to the symbol
    // and store both l and the code in code_table[i]
    for symbol_length in code_table.iter_mut() {
        let current_length = *symbol_length;
        let code_index = current_length as usize;

        if current_length > 0 {
            *symbol_length = current_length | (count_per_code[code_index] << 6);
            count_per_code[code_index] += 1;
        }
    }
}


fn count_frequencies(data: &[u16]) -> Vec<u64> {
    let mut frequencies = vec![ 0_u64; ENCODE_SIZE ];

    for &value in data {
        frequencies[value as usize] += 1;
    }

    frequencies
}

/// Compute Huffman codes (based on the frequencies) and store them in the same table:
/// - code structure is `[63:lsb - 6:msb] | [5-0: bit length]`
/// - max code length is 58 bits
/// - codes outside the range `min_index..=max_index` have a null length (unused values)
/// - original frequencies are destroyed
///
/// Returns the range of symbols with a non-zero frequency,
/// including one additional symbol used for run-length encoding.
fn build_encoding_table(frequencies: &mut [u64]) -> (usize, usize) {
    debug_assert_eq!(frequencies.len(), ENCODE_SIZE, "frequency table size mismatch");

    // the trees of the algorithm are not stored explicitly. instead,
    // each non-leaf node links its descendants into a single linear list,
    // and the code length of a symbol is incremented once for
    // every merge of a tree that contains the symbol

    let mut search_index = 0;
    while frequencies[search_index] == 0 { search_index += 1; }
    let min_frequency_index = search_index;

    // a min heap of (frequency, symbol), with the symbol index breaking ties deterministically
    let mut heap = BinaryHeap::with_capacity(1024);
    let mut links = vec![ 0_usize; ENCODE_SIZE ];
    let mut max_frequency_index = 0;

    for (index, &frequency) in frequencies.iter().enumerate() {
        links[index] = index; // every list initially contains only its own symbol

        if frequency != 0 {
            heap.push(Reverse((frequency, index)));
            max_frequency_index = index;
        }
    }

    // add a pseudo-symbol with a frequency count of 1.
    // the encoder uses the pseudo-symbol for run-length encoding
    max_frequency_index += 1;
    frequencies[max_frequency_index] = 1;
    heap.push(Reverse((1, max_frequency_index)));

    let mut code_lengths = vec![ 0_u64; ENCODE_SIZE ];

    // repeatedly merge the two least frequent trees
    while heap.len() > 1 {
        let Reverse((least_frequency, least_symbol)) = heap.pop().expect("heap is empty bug");
        let Reverse((merged_frequency, merged_symbol)) = heap.pop().expect("heap is empty bug");

        frequencies[merged_symbol] = merged_frequency + least_frequency;

        heap.push(Reverse((frequencies[merged_symbol], merged_symbol)));

        // add a bit to all codes in the first list,
        // and merge the two lists afterwards
        let mut symbol = merged_symbol;
        loop {
            code_lengths[symbol] += 1;
            debug_assert!(code_lengths[symbol] <= 58, "code length overflow bug");

            if links[symbol] == symbol {
                links[symbol] = least_symbol;
                break;
            }

            symbol = links[symbol];
        }

        // add a bit to all codes in the second list
        let mut symbol = least_symbol;
        loop {
            code_lengths[symbol] += 1;
            debug_assert!(code_lengths[symbol] <= 58, "code length overflow bug");

            if links[symbol] == symbol { break; }
            symbol = links[symbol];
        }
    }

    build_canonical_table(&mut code_lengths);
    frequencies.copy_from_slice(&code_lengths);

    (min_frequency_index, max_frequency_index)
}


/// Pack an encoding table:
/// - only code lengths, not actual codes, are stored
/// - runs of zeroes are compressed as follows:
///
/// | unpacked         | packed                     |
/// |------------------|----------------------------|
/// | 1 zero           | 0 (6 bits)                 |
/// | 2 zeroes         | 59 (6 bits)                |
/// | 3 zeroes         | 60 (6 bits)                |
/// | 4 zeroes         | 61 (6 bits)                |
/// | 5 zeroes         | 62 (6 bits)                |
/// | n zeroes (6-261) | 63 (6 bits) + (n-6, 8 bits)|
fn write_code_table(out: &mut Vec<u8>, encoding_table: &[u64], min_code_index: usize, max_code_index: usize) -> UnitResult {
    let mut buffer = BitBuffer::default();

    let mut code_index = min_code_index;
    while code_index <= max_code_index {
        let code_length = length(encoding_table[code_index]);

        if code_length == 0 {
            let mut zero_run = 1_u64;

            while code_index < max_code_index && zero_run < LONGEST_LONG_RUN {
                if length(encoding_table[code_index + 1]) > 0 { break; }
                code_index += 1;
                zero_run += 1;
            }

            if zero_run >= 2 {
                if zero_run >= SHORTEST_LONG_RUN {
                    buffer.write_bits(6, LONG_ZEROCODE_RUN, out);
                    buffer.write_bits(8, zero_run - SHORTEST_LONG_RUN, out);
                }
                else {
                    buffer.write_bits(6, SHORT_ZEROCODE_RUN + zero_run - 2, out);
                }

                code_index += 1;
                continue;
            }
        }

        buffer.write_bits(6, code_length, out);
        code_index += 1;
    }

    buffer.flush(out);
    Ok(())
}

/// Read the packed encoding table and rebuild the canonical codes.
fn read_code_table(read: &mut &[u8], min_code_index: usize, max_code_index: usize) -> Result<Vec<u64>> {
    let mut encoding_table = vec![ 0_u64; ENCODE_SIZE ];
    let mut buffer = BitBuffer::default();

    let mut code_index = min_code_index;
    while code_index <= max_code_index {
        let code_length = buffer.read_bits(6, read)?;
        encoding_table[code_index] = code_length;

        if code_length == LONG_ZEROCODE_RUN {
            let zero_run = buffer.read_bits(8, read)? + SHORTEST_LONG_RUN;

            if code_index as u64 + zero_run > max_code_index as u64 + 1 {
                return Err(invalid_table_size());
            }

            for value in &mut encoding_table[code_index .. code_index + zero_run as usize] {
                *value = 0;
            }

            code_index += zero_run as usize;
        }
        else if code_length >= SHORT_ZEROCODE_RUN {
            let zero_run = code_length - SHORT_ZEROCODE_RUN + 2;

            if code_index as u64 + zero_run > max_code_index as u64 + 1 {
                return Err(invalid_table_size());
            }

            for value in &mut encoding_table[code_index .. code_index + zero_run as usize] {
                *value = 0;
            }

            code_index += zero_run as usize;
        }
        else {
            code_index += 1;
        }
    }

    build_canonical_table(&mut encoding_table);
    Ok(encoding_table)
}


/// One entry of the fast decoding table.
/// Short codes (up to 14 bit) are decoded by a single lookup;
/// all long codes sharing the same 14-bit prefix are collected in a list.
#[derive(Clone, Default)]
struct DecodingEntry {

    /// Length of the short code, or zero for long codes.
    short_code_length: u8,

    /// The decoded symbol of the short code.
    short_code_symbol: u32,

    /// All symbols with a long code that starts with this table index.
    long_code_symbols: Vec<u32>,
}

/// Build a decoding table from the encoding table.
fn build_decoding_table(encoding_table: &[u64], min_code_index: usize, max_code_index: usize) -> Result<Vec<DecodingEntry>> {
    let mut decoding_table = vec![ DecodingEntry::default(); DECODE_SIZE ];

    for (symbol, &entry) in encoding_table.iter().enumerate().take(max_code_index + 1).skip(min_code_index) {
        let symbol_code = code(entry);
        let code_length = length(entry);

        if symbol_code >> code_length != 0 {
            return Err(invalid_table_entry());
        }

        if code_length > DECODE_BITS as u64 {
            // long code: store the symbol in the spill list of its prefix
            let entry = &mut decoding_table[u64_to_usize(symbol_code >> (code_length - DECODE_BITS as u64))];

            if entry.short_code_length != 0 {
                return Err(invalid_table_entry());
            }

            entry.long_code_symbols.push(symbol as u32);
        }
        else if code_length != 0 {
            // short code: fill all table entries that start with this code
            let start_index = u64_to_usize(symbol_code << (DECODE_BITS as u64 - code_length));
            let count = 1_usize << (DECODE_BITS as u64 - code_length);

            for entry in &mut decoding_table[start_index .. start_index + count] {
                if entry.short_code_length != 0 || !entry.long_code_symbols.is_empty() {
                    return Err(invalid_table_entry());
                }

                entry.short_code_length = code_length as u8;
                entry.short_code_symbol = symbol as u32;
            }
        }
    }

    Ok(decoding_table)
}


/// Run-length encode and huffman-encode all values. Returns the number of bits written.
fn encode_with_frequencies(
    encoding_table: &[u64],
    uncompressed: &[u16],
    run_length_symbol: usize,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let mut buffer = BitBuffer::default();
    let start_byte_count = out.len();

    let run_length_code = encoding_table[run_length_symbol];

    let mut current_value = uncompressed[0];
    let mut current_run = 0_u64;

    for &value in &uncompressed[1..] {
        if value == current_value && current_run < 255 {
            current_run += 1;
        }
        else {
            send_code(encoding_table[current_value as usize], current_run, run_length_code, &mut buffer, out);
            current_value = value;
            current_run = 0;
        }
    }

    send_code(encoding_table[current_value as usize], current_run, run_length_code, &mut buffer, out);

    let total_bit_count = (out.len() - start_byte_count) * 8 + buffer.bit_count as usize;
    buffer.flush(out);

    Ok(total_bit_count)
}

/// Output a code for a value that repeats `run_count` additional times.
/// The run is either emitted as a run-length marker, or the code is simply repeated,
/// whichever is shorter.
#[inline]
fn send_code(value_code: u64, run_count: u64, run_length_code: u64, buffer: &mut BitBuffer, out: &mut Vec<u8>) {
    if length(value_code) + length(run_length_code) + 8 < length(value_code) * run_count {
        buffer.write_code(value_code, out);
        buffer.write_code(run_length_code, out);
        buffer.write_bits(8, run_count, out);
    }
    else {
        for _ in 0 ..= run_count {
            buffer.write_code(value_code, out);
        }
    }
}

/// Push a decoded symbol, expanding run-length markers.
#[inline]
fn push_decoded(
    symbol: u32,
    run_length_symbol: usize,
    bits: &mut BitBuffer,
    read: &mut &[u8],
    out: &mut Vec<u16>,
    expected_value_count: usize,
) -> UnitResult {
    if symbol as usize == run_length_symbol {
        let run = bits.read_bits(8, read)?;

        let &repeated = out.last().ok_or_else(not_enough_data)?;

        if out.len() + run as usize > expected_value_count {
            return Err(too_much_data());
        }

        out.resize(out.len() + run as usize, repeated);
    }
    else {
        if out.len() >= expected_value_count {
            return Err(too_much_data());
        }

        out.push(symbol as u16);
    }

    Ok(())
}

fn too_much_data() -> Error { Error::corrupt("huffman data size") }

/// Decode the bit stream using the lookup tables.
fn decode_with_tables(
    encoding_table: &[u64],
    decoding_table: &[DecodingEntry],
    compressed: &[u8],
    bit_count: usize,
    run_length_symbol: usize,
    expected_value_count: usize,
) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(expected_value_count);
    let mut bits = BitBuffer::default();

    let byte_count = (bit_count + 7) / 8;
    if byte_count > compressed.len() {
        return Err(not_enough_data());
    }

    let mut read = &compressed[..byte_count];

    while !read.is_empty() {
        bits.bits = (bits.bits << 8) | u8::read(&mut read)? as u64;
        bits.bit_count += 8;

        while bits.bit_count >= DECODE_BITS as u64 {
            let entry_index = ((bits.bits >> (bits.bit_count - DECODE_BITS as u64)) & DECODE_MASK) as usize;
            let entry = &decoding_table[entry_index];

            if entry.short_code_length != 0 {
                bits.bit_count -= entry.short_code_length as u64;
                push_decoded(entry.short_code_symbol, run_length_symbol, &mut bits, &mut read, &mut out, expected_value_count)?;
            }
            else {
                // the prefix references long codes, search the matching one.
                // long codes exceed the buffered bits, so more bytes may be pulled in
                let mut symbol = None;

                for &candidate in &entry.long_code_symbols {
                    let candidate_entry = encoding_table[candidate as usize];
                    let candidate_length = length(candidate_entry);

                    while bits.bit_count < candidate_length && !read.is_empty() {
                        bits.bits = (bits.bits << 8) | u8::read(&mut read)? as u64;
                        bits.bit_count += 8;
                    }

                    let matches = bits.bit_count >= candidate_length && code(candidate_entry)
                        == (bits.bits >> (bits.bit_count - candidate_length)) & ((1 << candidate_length) - 1);

                    if matches {
                        symbol = Some(candidate);
                        break;
                    }
                }

                match symbol {
                    None => return Err(invalid_code()),
                    Some(symbol) => {
                        bits.bit_count -= length(encoding_table[symbol as usize]);
                        push_decoded(symbol, run_length_symbol, &mut bits, &mut read, &mut out, expected_value_count)?;
                    }
                }
            }
        }
    }

    // discard the zero-padding bits of the last byte
    let padding = 8_u64.wrapping_sub(bit_count as u64) & 7;
    if bits.bit_count < padding { return Err(not_enough_data()); }
    bits.bits >>= padding;
    bits.bit_count -= padding;

    // drain the remaining short codes
    while bits.bit_count > 0 {
        let entry_index = ((bits.bits << (DECODE_BITS as u64 - bits.bit_count)) & DECODE_MASK) as usize;
        let entry = &decoding_table[entry_index];

        if entry.short_code_length != 0 && entry.short_code_length as u64 <= bits.bit_count {
            bits.bit_count -= entry.short_code_length as u64;
            push_decoded(entry.short_code_symbol, run_length_symbol, &mut bits, &mut &[][..], &mut out, expected_value_count)?;
        }
        else {
            return Err(invalid_code());
        }
    }

    if out.len() != expected_value_count {
        return Err(not_enough_data());
    }

    Ok(out)
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u16]) {
        let compressed = compress(data).unwrap();
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(data, decompressed.as_slice());
    }

    #[test]
    fn roundtrip_single_value() {
        roundtrip(&[ 42 ]);
    }

    #[test]
    fn roundtrip_flat_data() {
        roundtrip(&[ 5; 10_000 ]);
    }

    #[test]
    fn roundtrip_two_symbols() {
        let data: Vec<u16> = (0..4096).map(|i| if i % 5 == 0 { 1 } else { 9 }).collect();
        roundtrip(&data);
    }

    #[test]
    fn roundtrip_ramp() {
        let data: Vec<u16> = (0..20_000).map(|i| (i % 65_536) as u16).collect();
        roundtrip(&data);
    }

    #[test]
    fn roundtrip_seeded_noise() {
        let mut state = 0xcafe_f00d_u32;
        let data: Vec<u16> = (0 .. 50_000)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 16) as u16
            })
            .collect();

        roundtrip(&data);
    }

    #[test]
    fn roundtrip_extreme_values() {
        roundtrip(&[ 0, u16::MAX, 0, u16::MAX, 1, 2, 3, u16::MAX - 1 ]);
    }

    #[test]
    fn truncated_data_is_rejected() {
        let data: Vec<u16> = (0..1000).map(|i| (i * 37 % 512) as u16).collect();
        let compressed = compress(&data).unwrap();

        let truncated = &compressed[.. compressed.len() / 2];
        assert!(decompress(truncated, data.len()).is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(decompress(&[], 100).is_err());
    }
}
