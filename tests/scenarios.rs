
//! End-to-end scenarios with literal inputs and expected outcomes.

use std::io::Cursor;

use exr_core::prelude::*;
use exr_core::block::BlockIndex;
use exr_core::block::deep::DeepBlockContents;
use exr_core::block::chunk::TileCoordinates;
use exr_core::check::{self, CheckOptions};


fn f16s(values: &[f32]) -> Vec<f16> {
    values.iter().map(|&value| f16::from_f32(value)).collect()
}

fn synchronous_write() -> WriteOptions {
    WriteOptions { worker_count: 0, .. WriteOptions::default() }
}

fn synchronous_read() -> ReadOptions {
    ReadOptions { worker_count: 0, .. ReadOptions::default() }
}

fn tiny_rgb_header() -> Header {
    Header::new(
        "main".into(), Vec2(2, 2),
        smallvec![
            ChannelDescription::new("B", SampleType::F16, false),
            ChannelDescription::new("G", SampleType::F16, false),
            ChannelDescription::new("R", SampleType::F16, false),
        ]
    ).with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing)
}

fn write_tiny_rgb(channels: &[(&str, Vec<f16>)]) -> Vec<u8> {
    let mut output = OutputFile::create(
        Cursor::new(Vec::new()), smallvec![ tiny_rgb_header() ], synchronous_write()
    ).unwrap();

    let mut frame_buffer = FrameBuffer::new();
    for (name, values) in channels {
        let mut slice = Slice::new_flat(SampleType::F16, Vec2(2, 2));
        slice.samples = SampleBuffer::F16(values.clone());
        frame_buffer.insert(*name, slice);
    }

    output.set_frame_buffer(0, frame_buffer).unwrap();
    output.write_rows(0, 0, 1).unwrap();
    output.close().unwrap().into_inner()
}


/// Tiny 2x2 rgb scan line file with uncompressed f16 data.
/// The chunk layout of the file is predicted exactly,
/// and reading back yields bit-identical values.
#[test]
fn tiny_rgb_scan_line_file() {
    let channels: Vec<(&str, Vec<f16>)> = vec![
        ("B", f16s(&[ 0.0, 0.0, 1.0, 0.0 ])),
        ("G", f16s(&[ 0.0, 1.0, 0.0, 0.0 ])),
        ("R", f16s(&[ 1.0, 0.0, 0.0, 0.0 ])),
    ];

    let bytes = write_tiny_rgb(&channels);

    // predicted layout: each scan line chunk is y(4) + size(4) + 3 channels * 2 pixels * 2 bytes
    let chunk_byte_size = 4 + 4 + 3 * 2 * 2;
    let offset_table_byte_size = 2 * 8;

    let mut input = InputFile::open(Cursor::new(bytes.clone()), synchronous_read()).unwrap();

    let offsets = input.offset_tables()[0].clone();
    assert_eq!(offsets.len(), 2, "one chunk per scan line");
    assert_eq!(offsets[1] - offsets[0], chunk_byte_size as u64, "chunks are adjacent");
    assert_eq!(bytes.len() as u64, offsets[1] + chunk_byte_size as u64, "file ends after the last chunk");
    assert!(offsets[0] > (4 + 4 + offset_table_byte_size) as u64, "magic, version, header and table come before the chunks");

    let mut read_buffer = FrameBuffer::new();
    for (name, _) in &channels {
        read_buffer.insert(*name, Slice::new_flat(SampleType::F16, Vec2(2, 2)));
    }

    input.set_frame_buffer(0, read_buffer).unwrap();
    input.read_rows(0, 0, 1).unwrap();

    let result = input.take_frame_buffer(0).unwrap();
    for (name, values) in &channels {
        match &result.get(&Text::new_or_panic(name)).unwrap().samples {
            SampleBuffer::F16(read_values) => assert_eq!(read_values, values, "channel {}", name),
            _ => panic!("sample type changed"),
        }
    }
}

/// A 4x4 image with 2x2 tiles and mip maps rounding down
/// has the levels 4x4, 2x2 and 1x1, which makes 4 + 1 + 1 chunks.
#[test]
fn tiled_file_with_mip_maps() {
    let header = Header::new(
        "main".into(), Vec2(4, 4),
        smallvec![ ChannelDescription::new("L", SampleType::F32, false) ]
    ).with_encoding(
        Compression::Uncompressed,
        BlockDescription::Tiles(TileDescription {
            tile_size: Vec2(2, 2),
            level_mode: LevelMode::MipMap,
            rounding_mode: RoundingMode::Down,
        }),
        LineOrder::Increasing
    );

    assert_eq!(header.chunk_count, 6);

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();

    let mut slice = Slice::new_flat(SampleType::F32, Vec2(4, 4));
    slice.samples = SampleBuffer::F32((0..16).map(|index| index as f32).collect());

    let mut frame_buffer = FrameBuffer::new();
    frame_buffer.insert("L", slice);
    output.set_frame_buffer(0, frame_buffer).unwrap();

    // all levels gather their pixels from the same slice
    for tile in [
        TileCoordinates { tile_index: Vec2(0, 0), level_index: Vec2(0, 0) },
        TileCoordinates { tile_index: Vec2(1, 0), level_index: Vec2(0, 0) },
        TileCoordinates { tile_index: Vec2(0, 1), level_index: Vec2(0, 0) },
        TileCoordinates { tile_index: Vec2(1, 1), level_index: Vec2(0, 0) },
        TileCoordinates { tile_index: Vec2(0, 0), level_index: Vec2(1, 1) },
        TileCoordinates { tile_index: Vec2(0, 0), level_index: Vec2(2, 2) },
    ] {
        output.write_tile(0, tile).unwrap();
    }

    let bytes = output.close().unwrap().into_inner();

    let input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();
    assert_eq!(input.offset_tables()[0].len(), 6, "offset table contains all levels");
}

/// Deep scan line data: 2x1 pixels of f32+f16 samples with the counts [2, 0].
/// The unpacked sample size must match the counts exactly.
#[test]
fn deep_scan_line_sizes() {
    let channels = smallvec![
        ChannelDescription::new("A", SampleType::F16, false),
        ChannelDescription::new("Z", SampleType::F32, false),
    ];

    let header = Header::new("deep".into(), Vec2(2, 1), channels)
        .with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing)
        .with_deep_data(Some(2));

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();

    let index = BlockIndex {
        layer: 0,
        pixel_position: Vec2(0, 0),
        pixel_size: Vec2(2, 1),
        level: Vec2(0, 0),
    };

    // two samples in the left pixel, none in the right:
    // 2 * (2 bytes f16 + 4 bytes f32) = 12 bytes of sample data
    let contents = DeepBlockContents {
        index,
        sample_counts: vec![ 2, 0 ],
        sample_data: vec![ 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12 ],
    };

    assert_eq!(contents.total_sample_count(), 2);

    // a block whose data size disagrees with the counts is rejected
    let mut broken = contents.clone();
    broken.sample_data.truncate(10);
    assert!(output.write_deep_block(0, &broken).is_err());

    // recreate the file, as the failed chunk refuses finalization
    let mut output = OutputFile::create(
        Cursor::new(Vec::new()),
        smallvec![
            Header::new("deep".into(), Vec2(2, 1), smallvec![
                ChannelDescription::new("A", SampleType::F16, false),
                ChannelDescription::new("Z", SampleType::F32, false),
            ])
                .with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing)
                .with_deep_data(Some(2))
        ],
        synchronous_write()
    ).unwrap();

    output.write_deep_block(0, &contents).unwrap();
    let bytes = output.close().unwrap().into_inner();

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();
    let read_back = input.read_deep_row_block(0, 0).unwrap();

    assert_eq!(read_back.sample_counts, contents.sample_counts);
    assert_eq!(read_back.sample_data, contents.sample_data);
}

/// A wrong magic number fails immediately, without parsing anything else.
#[test]
fn malformed_magic_number() {
    let bytes = [ 0xde, 0xad, 0xbe, 0xef, 2, 0, 0, 0, 42, 43, 44 ];

    let result = InputFile::open(Cursor::new(bytes.to_vec()), synchronous_read());

    match result {
        Err(Error::Corrupt { message, byte_offset }) => {
            assert!(message.contains("identifier"), "unexpected message: {}", message);
            assert_eq!(byte_offset, Some(0));
        },
        other => panic!("expected corrupt data error, got {:?}", other.map(|_| ())),
    }
}

/// A chunk offset pointing past the end of the file fails that chunk,
/// while earlier chunks still read successfully.
#[test]
fn chunk_offset_past_end_of_file() {
    let channels: Vec<(&str, Vec<f16>)> = vec![
        ("B", f16s(&[ 0.5, 0.25, 0.125, 1.0 ])),
        ("G", f16s(&[ 0.0, 1.0, 0.0, 0.0 ])),
        ("R", f16s(&[ 1.0, 0.0, 0.0, 0.0 ])),
    ];

    let mut bytes = write_tiny_rgb(&channels);

    // patch the second offset table entry to point past the end of the file
    let input = InputFile::open(Cursor::new(bytes.clone()), synchronous_read()).unwrap();
    let second_offset = input.offset_tables()[0][1];
    drop(input);

    let search_pattern = second_offset.to_le_bytes();
    let position = bytes.windows(8).position(|window| window == search_pattern)
        .expect("offset table entry not found in file");

    let broken_offset = (bytes.len() + 1) as u64;
    bytes[position .. position + 8].copy_from_slice(&broken_offset.to_le_bytes());

    let mut input = InputFile::open(
        Cursor::new(bytes),
        ReadOptions { reconstruct_missing_table: false, .. synchronous_read() }
    ).unwrap();

    let mut read_buffer = FrameBuffer::new();
    for (name, _) in &channels {
        read_buffer.insert(*name, Slice::new_flat(SampleType::F16, Vec2(2, 2)));
    }
    input.set_frame_buffer(0, read_buffer).unwrap();

    // the first scan line still reads fine
    input.read_rows(0, 0, 0).unwrap();

    // the second chunk is corrupt, but the handle stays usable
    assert!(matches!(input.read_rows(0, 1, 1), Err(Error::Corrupt { .. })));
    input.read_rows(0, 0, 0).unwrap();
}

/// Every written file passes the validator, and corrupting it breaks both
/// the validator and the decoder.
#[test]
fn validator_agrees_with_decoder() {
    let channels: Vec<(&str, Vec<f16>)> = vec![
        ("B", f16s(&[ 0.5, 0.25, 0.125, 1.0 ])),
        ("G", f16s(&[ 0.0, 1.0, 0.0, 0.0 ])),
        ("R", f16s(&[ 1.0, 0.0, 0.0, 0.0 ])),
    ];

    let bytes = write_tiny_rgb(&channels);

    assert!(check::is_structurally_sound(&bytes, CheckOptions::default()));
    assert!(check::is_structurally_sound(&bytes, CheckOptions { reduce_memory: true, reduce_time: true, .. CheckOptions::default() }));

    // truncating the file breaks it for both the validator and the decoder
    let truncated = &bytes[.. bytes.len() - 10];

    assert!(!check::is_structurally_sound(truncated, CheckOptions::default()));

    let open_result = InputFile::open(
        Cursor::new(truncated.to_vec()),
        ReadOptions { reconstruct_missing_table: false, pedantic: true, .. synchronous_read() }
    );

    let decodes = open_result.and_then(|mut input| {
        let mut read_buffer = FrameBuffer::new();
        read_buffer.insert("R", Slice::new_flat(SampleType::F16, Vec2(2, 2)));
        input.set_frame_buffer(0, read_buffer)?;
        input.read_rows(0, 0, 1)
    });

    assert!(decodes.is_err(), "truncated file decoded without error");
}
