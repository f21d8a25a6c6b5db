
//! Write images and read them back, for every storage class
//! and every compression method.

use std::io::Cursor;

use exr_core::prelude::*;
use exr_core::block::chunk::TileCoordinates;
use exr_core::check::{self, CheckOptions};


fn synchronous_write() -> WriteOptions {
    WriteOptions { worker_count: 0, .. WriteOptions::default() }
}

fn synchronous_read() -> ReadOptions {
    ReadOptions { worker_count: 0, .. ReadOptions::default() }
}

fn all_compressions() -> Vec<Compression> {
    vec![
        Compression::Uncompressed,
        Compression::RLE,
        Compression::ZIP1,
        Compression::ZIP16,
        Compression::PIZ,
        Compression::PXR24,
        Compression::B44,
        Compression::B44A,
        Compression::DWAA(None),
        Compression::DWAB(None),
    ]
}

/// Deterministic pixel values: a smooth gradient with a slight wiggle,
/// so that the lossy codecs stay within their documented error bounds.
fn generate_values(resolution: Vec2<usize>, seed: u32) -> Vec<f32> {
    let mut state = seed | 1;

    (0 .. resolution.area())
        .map(|index| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let wiggle = (state >> 24) as f32 / 100_000.0;

            let x = index % resolution.width();
            let y = index / resolution.width();

            0.25 + x as f32 * 0.011 + y as f32 * 0.007 + wiggle
        })
        .collect()
}

fn rgb_channels() -> smallvec::SmallVec<[ChannelDescription; 5]> {
    smallvec![
        ChannelDescription::new("B", SampleType::F16, false),
        ChannelDescription::new("G", SampleType::F16, false),
        ChannelDescription::new("R", SampleType::F16, false),
    ]
}

fn f16_frame_buffer(resolution: Vec2<usize>, seed: u32) -> FrameBuffer {
    let mut frame_buffer = FrameBuffer::new();

    for (channel_index, name) in [ "B", "G", "R" ].iter().enumerate() {
        let values = generate_values(resolution, seed + channel_index as u32 * 7919);

        let mut slice = Slice::new_flat(SampleType::F16, resolution);
        slice.samples = SampleBuffer::F16(values.iter().map(|&value| f16::from_f32(value)).collect());
        frame_buffer.insert(*name, slice);
    }

    frame_buffer
}

fn assert_equal_within(original: &FrameBuffer, result: &FrameBuffer, name: &str, tolerance: f32, compression: Compression) {
    let name = Text::new_or_panic(name);

    let original = match &original.get(&name).unwrap().samples {
        SampleBuffer::F16(values) => values,
        _ => panic!("sample type changed"),
    };

    let result = match &result.get(&name).unwrap().samples {
        SampleBuffer::F16(values) => values,
        _ => panic!("sample type changed"),
    };

    assert_eq!(original.len(), result.len());

    for (index, (&original, &result)) in original.iter().zip(result.iter()).enumerate() {
        let difference = (original.to_f32() - result.to_f32()).abs();

        assert!(
            difference <= tolerance,
            "{}: pixel {} was {} and became {} (tolerance {})",
            compression, index, original, result, tolerance
        );
    }
}

fn tolerance_of(compression: Compression) -> f32 {
    if compression.may_loose_data() { 0.2 } else { 0.0 }
}


#[test]
fn scan_lines_with_every_compression() {
    let resolution = Vec2(61, 37);

    for compression in all_compressions() {
        let header = Header::new("main".into(), resolution, rgb_channels())
            .with_encoding(compression, BlockDescription::ScanLines, LineOrder::Increasing);

        let original = f16_frame_buffer(resolution, 42);

        let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();
        output.set_frame_buffer(0, original.clone()).unwrap();
        output.write_all_blocks(0).unwrap();
        let bytes = output.close().unwrap().into_inner();

        assert!(check::is_structurally_sound(&bytes, CheckOptions::default()), "{} produced unsound file", compression);

        let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();

        let mut read_buffer = FrameBuffer::new();
        for name in [ "B", "G", "R" ] {
            read_buffer.insert(name, Slice::new_flat(SampleType::F16, resolution));
        }

        input.set_frame_buffer(0, read_buffer).unwrap();
        input.read_all_blocks(0).unwrap();

        let result = input.take_frame_buffer(0).unwrap();

        for name in [ "B", "G", "R" ] {
            assert_equal_within(&original, &result, name, tolerance_of(compression), compression);
        }
    }
}

#[test]
fn tiles_with_every_compression() {
    let resolution = Vec2(40, 33);

    let tiles = BlockDescription::Tiles(TileDescription {
        tile_size: Vec2(16, 16),
        level_mode: LevelMode::Singular,
        rounding_mode: RoundingMode::Down,
    });

    for compression in all_compressions() {
        let header = Header::new("main".into(), resolution, rgb_channels())
            .with_encoding(compression, tiles, LineOrder::Increasing);

        let chunk_count = header.chunk_count;
        let original = f16_frame_buffer(resolution, 1729);

        let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();
        output.set_frame_buffer(0, original.clone()).unwrap();
        output.write_all_blocks(0).unwrap();
        let bytes = output.close().unwrap().into_inner();

        let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();
        assert_eq!(input.offset_tables()[0].len(), chunk_count);

        let mut read_buffer = FrameBuffer::new();
        for name in [ "B", "G", "R" ] {
            read_buffer.insert(name, Slice::new_flat(SampleType::F16, resolution));
        }

        input.set_frame_buffer(0, read_buffer).unwrap();

        // single tiles can be read in arbitrary order
        for tile_y in (0 .. 3).rev() {
            for tile_x in 0 .. 3 {
                input.read_tile(0, TileCoordinates {
                    tile_index: Vec2(tile_x, tile_y),
                    level_index: Vec2(0, 0),
                }).unwrap();
            }
        }

        let result = input.take_frame_buffer(0).unwrap();

        for name in [ "B", "G", "R" ] {
            assert_equal_within(&original, &result, name, tolerance_of(compression), compression);
        }
    }
}

/// Writing rows top to bottom and reading them back bottom to top
/// yields the same values.
#[test]
fn reading_rows_in_reverse_order() {
    let resolution = Vec2(17, 32);

    let header = Header::new("main".into(), resolution, rgb_channels())
        .with_encoding(Compression::ZIP16, BlockDescription::ScanLines, LineOrder::Increasing);

    let block_count = header.chunk_count;
    let original = f16_frame_buffer(resolution, 99);

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();
    output.set_frame_buffer(0, original.clone()).unwrap();
    output.write_all_blocks(0).unwrap();
    let bytes = output.close().unwrap().into_inner();

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();

    let mut read_buffer = FrameBuffer::new();
    for name in [ "B", "G", "R" ] {
        read_buffer.insert(name, Slice::new_flat(SampleType::F16, resolution));
    }

    input.set_frame_buffer(0, read_buffer).unwrap();

    // request one block at a time, bottom to top
    for block in (0 .. block_count).rev() {
        let y = (block * 16) as i32;
        input.read_rows(0, y, (y + 15).min(31)).unwrap();
    }

    let result = input.take_frame_buffer(0).unwrap();

    for name in [ "B", "G", "R" ] {
        assert_equal_within(&original, &result, name, 0.0, Compression::ZIP16);
    }
}

/// A flipped slice reads the same pixels, only mirrored vertically.
#[test]
fn flipped_slice_reads_mirrored_rows() {
    let resolution = Vec2(5, 4);

    let header = Header::new("main".into(), resolution, rgb_channels())
        .with_encoding(Compression::RLE, BlockDescription::ScanLines, LineOrder::Increasing);

    let original = f16_frame_buffer(resolution, 3);

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();
    output.set_frame_buffer(0, original.clone()).unwrap();
    output.write_all_blocks(0).unwrap();
    let bytes = output.close().unwrap().into_inner();

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();

    let mut read_buffer = FrameBuffer::new();
    read_buffer.insert("G", Slice::new_flipped(SampleType::F16, resolution));
    input.set_frame_buffer(0, read_buffer).unwrap();
    input.read_all_blocks(0).unwrap();

    let result = input.take_frame_buffer(0).unwrap();

    let original_values = match &original.get(&Text::new_or_panic("G")).unwrap().samples {
        SampleBuffer::F16(values) => values.clone(),
        _ => panic!("sample type changed"),
    };

    let flipped_values = match &result.get(&Text::new_or_panic("G")).unwrap().samples {
        SampleBuffer::F16(values) => values.clone(),
        _ => panic!("sample type changed"),
    };

    let width = resolution.width();
    for y in 0 .. resolution.height() {
        let original_row = &original_values[y * width .. (y + 1) * width];
        let flipped_row = &flipped_values[(resolution.height() - 1 - y) * width .. (resolution.height() - y) * width];
        assert_eq!(original_row, flipped_row, "row {}", y);
    }
}

/// Two parts with different storage classes in one file.
#[test]
fn multipart_with_mixed_storage_classes() {
    let scan_line_header = Header::new("colors".into(), Vec2(8, 8), rgb_channels())
        .with_encoding(Compression::ZIP1, BlockDescription::ScanLines, LineOrder::Increasing);

    let tiled_header = Header::new("depth".into(), Vec2(8, 8), smallvec![
        ChannelDescription::new("Z", SampleType::F32, false)
    ]).with_encoding(
        Compression::Uncompressed,
        BlockDescription::Tiles(TileDescription {
            tile_size: Vec2(4, 4),
            level_mode: LevelMode::Singular,
            rounding_mode: RoundingMode::Down,
        }),
        LineOrder::Increasing
    );

    let colors = f16_frame_buffer(Vec2(8, 8), 7);

    let mut depth = FrameBuffer::new();
    let mut depth_slice = Slice::new_flat(SampleType::F32, Vec2(8, 8));
    depth_slice.samples = SampleBuffer::F32((0..64).map(|index| index as f32 / 10.0).collect());
    depth.insert("Z", depth_slice.clone());

    let mut output = OutputFile::create(
        Cursor::new(Vec::new()),
        smallvec![ scan_line_header, tiled_header ],
        synchronous_write()
    ).unwrap();

    output.set_frame_buffer(0, colors.clone()).unwrap();
    output.set_frame_buffer(1, depth.clone()).unwrap();

    output.write_all_blocks(0).unwrap();
    output.write_all_blocks(1).unwrap();

    let bytes = output.close().unwrap().into_inner();

    assert!(check::is_structurally_sound(&bytes, CheckOptions::default()));

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();
    assert_eq!(input.headers().len(), 2);
    assert!(input.headers()[1].blocks.has_tiles());

    let mut color_reader = FrameBuffer::new();
    for name in [ "B", "G", "R" ] {
        color_reader.insert(name, Slice::new_flat(SampleType::F16, Vec2(8, 8)));
    }

    let mut depth_reader = FrameBuffer::new();
    depth_reader.insert("Z", Slice::new_flat(SampleType::F32, Vec2(8, 8)));

    input.set_frame_buffer(0, color_reader).unwrap();
    input.set_frame_buffer(1, depth_reader).unwrap();

    input.read_all_blocks(1).unwrap();
    input.read_all_blocks(0).unwrap();

    let colors_read = input.take_frame_buffer(0).unwrap();
    let depth_read = input.take_frame_buffer(1).unwrap();

    for name in [ "B", "G", "R" ] {
        assert_equal_within(&colors, &colors_read, name, 0.0, Compression::ZIP1);
    }

    assert_eq!(
        depth_read.get(&Text::new_or_panic("Z")).unwrap().samples,
        depth_slice.samples
    );
}

/// Channels in the file without a slice are skipped,
/// and slices without a channel receive their fill value.
#[test]
fn partial_frame_buffers() {
    let resolution = Vec2(6, 6);

    let header = Header::new("main".into(), resolution, rgb_channels())
        .with_encoding(Compression::RLE, BlockDescription::ScanLines, LineOrder::Increasing);

    let original = f16_frame_buffer(resolution, 1);

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();
    output.set_frame_buffer(0, original.clone()).unwrap();
    output.write_all_blocks(0).unwrap();
    let bytes = output.close().unwrap().into_inner();

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();

    let mut read_buffer = FrameBuffer::new();
    read_buffer.insert("G", Slice::new_flat(SampleType::F16, resolution));

    let mut filled = Slice::new_flat(SampleType::F16, resolution);
    filled.fill = exr_core::block::samples::Sample::F16(f16::from_f32(0.5));
    read_buffer.insert("distance", filled);

    input.set_frame_buffer(0, read_buffer).unwrap();
    input.read_all_blocks(0).unwrap();

    let result = input.take_frame_buffer(0).unwrap();

    assert_equal_within(&original, &result, "G", 0.0, Compression::RLE);

    match &result.get(&Text::new_or_panic("distance")).unwrap().samples {
        SampleBuffer::F16(values) => assert!(values.iter().all(|&value| value == f16::from_f32(0.5))),
        _ => panic!("sample type changed"),
    }
}

/// The same file written and read with a worker pool
/// contains the same bytes as the synchronous rendition.
#[cfg(feature = "rayon")]
#[test]
fn parallel_write_matches_sequential_write() {
    let resolution = Vec2(64, 80);

    let make_header = || Header::new("main".into(), resolution, rgb_channels())
        .with_encoding(Compression::ZIP16, BlockDescription::ScanLines, LineOrder::Increasing);

    let original = f16_frame_buffer(resolution, 1234);

    let mut sequential = OutputFile::create(Cursor::new(Vec::new()), smallvec![ make_header() ], synchronous_write()).unwrap();
    sequential.set_frame_buffer(0, original.clone()).unwrap();
    sequential.write_all_blocks(0).unwrap();
    let sequential_bytes = sequential.close().unwrap().into_inner();

    let parallel_options = WriteOptions { worker_count: 4, .. WriteOptions::default() };
    let mut parallel = OutputFile::create(Cursor::new(Vec::new()), smallvec![ make_header() ], parallel_options).unwrap();
    parallel.set_frame_buffer(0, original.clone()).unwrap();
    parallel.write_all_blocks(0).unwrap();
    let parallel_bytes = parallel.close().unwrap().into_inner();

    assert_eq!(sequential_bytes, parallel_bytes, "file bytes depend on worker count");

    // and read it back with readahead workers
    let read_options = ReadOptions { worker_count: 4, .. ReadOptions::default() };
    let mut input = InputFile::open(Cursor::new(parallel_bytes), read_options).unwrap();

    let mut read_buffer = FrameBuffer::new();
    for name in [ "B", "G", "R" ] {
        read_buffer.insert(name, Slice::new_flat(SampleType::F16, resolution));
    }

    input.set_frame_buffer(0, read_buffer).unwrap();
    input.read_all_blocks(0).unwrap();

    let result = input.take_frame_buffer(0).unwrap();
    for name in [ "B", "G", "R" ] {
        assert_equal_within(&original, &result, name, 0.0, Compression::ZIP16);
    }
}
