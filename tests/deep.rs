
//! Deep data storage classes: multiple samples per pixel,
//! in scan line blocks and in tiles.

use std::io::Cursor;

use exr_core::prelude::*;
use exr_core::block::BlockIndex;
use exr_core::block::chunk::TileCoordinates;
use exr_core::block::deep::{bytes_per_deep_pixel, DeepBlockContents};


fn synchronous_write() -> WriteOptions {
    WriteOptions { worker_count: 0, .. WriteOptions::default() }
}

fn synchronous_read() -> ReadOptions {
    ReadOptions { worker_count: 0, .. ReadOptions::default() }
}

fn deep_channels() -> smallvec::SmallVec<[ChannelDescription; 5]> {
    smallvec![
        ChannelDescription::new("A", SampleType::F16, false),
        ChannelDescription::new("Z", SampleType::F32, false),
    ]
}

fn sample_data_for(counts: &[u32], channels: &ChannelList, seed: u8) -> Vec<u8> {
    let total: u32 = counts.iter().sum();
    let byte_count = total as usize * bytes_per_deep_pixel(channels);
    (0 .. byte_count).map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}


#[test]
fn deep_scan_line_roundtrip_with_every_deep_compression() {
    for compression in [ Compression::Uncompressed, Compression::RLE, Compression::ZIP1 ] {
        let header = Header::new("deep".into(), Vec2(5, 3), deep_channels())
            .with_encoding(compression, BlockDescription::ScanLines, LineOrder::Increasing)
            .with_deep_data(Some(4));

        let channels = header.channels.clone();
        let block_count = header.chunk_count;
        assert_eq!(block_count, 3, "deep scan line blocks always contain one line");

        let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();

        let mut written = Vec::new();

        for y in 0 .. 3 {
            let counts: Vec<u32> = (0 .. 5).map(|x| ((x + y) % 4) as u32).collect();

            let contents = DeepBlockContents {
                index: BlockIndex {
                    layer: 0,
                    pixel_position: Vec2(0, y),
                    pixel_size: Vec2(5, 1),
                    level: Vec2(0, 0),
                },
                sample_data: sample_data_for(&counts, &channels, y as u8),
                sample_counts: counts,
            };

            output.write_deep_block(0, &contents).unwrap();
            written.push(contents);
        }

        let bytes = output.close().unwrap().into_inner();

        let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();
        assert!(input.headers()[0].deep);

        for (y, contents) in written.iter().enumerate() {
            let read_back = input.read_deep_row_block(0, y as i32).unwrap();
            assert_eq!(&read_back, contents, "{} roundtrip of line {}", compression, y);
        }
    }
}

#[test]
fn deep_tile_roundtrip() {
    let header = Header::new("deep".into(), Vec2(4, 4), deep_channels())
        .with_encoding(
            Compression::ZIP1,
            BlockDescription::Tiles(TileDescription {
                tile_size: Vec2(2, 2),
                level_mode: LevelMode::Singular,
                rounding_mode: RoundingMode::Down,
            }),
            LineOrder::Increasing
        )
        .with_deep_data(Some(3));

    let channels = header.channels.clone();
    assert_eq!(header.chunk_count, 4);

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();

    let mut written = Vec::new();

    for tile_y in 0 .. 2 {
        for tile_x in 0 .. 2 {
            let counts = vec![ 1, 0, 3, 2 ];

            let contents = DeepBlockContents {
                index: BlockIndex {
                    layer: 0,
                    pixel_position: Vec2(tile_x * 2, tile_y * 2),
                    pixel_size: Vec2(2, 2),
                    level: Vec2(0, 0),
                },
                sample_data: sample_data_for(&counts, &channels, (tile_x + tile_y * 2) as u8),
                sample_counts: counts,
            };

            output.write_deep_block(0, &contents).unwrap();
            written.push(((tile_x, tile_y), contents));
        }
    }

    let bytes = output.close().unwrap().into_inner();

    let mut input = InputFile::open(Cursor::new(bytes), synchronous_read()).unwrap();

    for ((tile_x, tile_y), contents) in &written {
        let read_back = input.read_deep_tile(0, TileCoordinates {
            tile_index: Vec2(*tile_x, *tile_y),
            level_index: Vec2(0, 0),
        }).unwrap();

        assert_eq!(&read_back, contents);
    }
}

#[test]
fn deep_data_rejects_unsupported_compression() {
    let header = Header::new("deep".into(), Vec2(4, 4), deep_channels())
        .with_encoding(Compression::PIZ, BlockDescription::ScanLines, LineOrder::Increasing)
        .with_deep_data(Some(3));

    let result = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write());
    assert!(result.is_err(), "piz compressed deep data must be rejected");
}

#[test]
fn flat_frame_buffer_cannot_bind_to_deep_part() {
    let header = Header::new("deep".into(), Vec2(4, 4), deep_channels())
        .with_encoding(Compression::RLE, BlockDescription::ScanLines, LineOrder::Increasing)
        .with_deep_data(Some(3));

    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], synchronous_write()).unwrap();

    let mut frame_buffer = FrameBuffer::new();
    frame_buffer.insert("A", Slice::new_flat(SampleType::F16, Vec2(4, 4)));

    assert!(matches!(
        output.set_frame_buffer(0, frame_buffer),
        Err(Error::Usage(_))
    ));
}
