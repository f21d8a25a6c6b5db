
//! Feed mutated and truncated files into the reader and the validator.
//! Nothing in here may panic or hang; malformed input must come back
//! as an error value.

use std::io::Cursor;

use exr_core::prelude::*;
use exr_core::check::{self, CheckOptions};


fn write_small_file() -> Vec<u8> {
    let header = Header::new(
        "main".into(), Vec2(8, 8),
        smallvec![
            ChannelDescription::new("G", SampleType::F16, false),
            ChannelDescription::new("R", SampleType::F32, false),
        ]
    ).with_encoding(Compression::ZIP16, BlockDescription::ScanLines, LineOrder::Increasing);

    let options = WriteOptions { worker_count: 0, .. WriteOptions::default() };
    let mut output = OutputFile::create(Cursor::new(Vec::new()), smallvec![ header ], options).unwrap();

    let mut frame_buffer = FrameBuffer::new();
    frame_buffer.insert("G", Slice::new_flat(SampleType::F16, Vec2(8, 8)));
    frame_buffer.insert("R", Slice::new_flat(SampleType::F32, Vec2(8, 8)));

    output.set_frame_buffer(0, frame_buffer).unwrap();
    output.write_all_blocks(0).unwrap();
    output.close().unwrap().into_inner()
}

fn try_to_read(bytes: &[u8]) {
    let options = ReadOptions { worker_count: 0, .. ReadOptions::default() };

    if let Ok(mut input) = InputFile::open(Cursor::new(bytes.to_vec()), options) {
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert("G", Slice::new_flat(SampleType::F16, Vec2(8, 8)));

        if input.set_frame_buffer(0, frame_buffer).is_ok() {
            let _ = input.read_all_blocks(0);
        }
    }

    let _ = check::is_structurally_sound(bytes, CheckOptions::default());
    let _ = check::is_structurally_sound(bytes, CheckOptions {
        reduce_memory: true,
        reduce_time: true,
        .. CheckOptions::default()
    });
}


#[test]
fn truncated_files_do_not_panic() {
    let bytes = write_small_file();

    for length in (0 .. bytes.len()).step_by(7).chain(std::iter::once(bytes.len() - 1)) {
        try_to_read(&bytes[..length]);
    }
}

#[test]
fn bit_flipped_files_do_not_panic() {
    let bytes = write_small_file();

    for index in (0 .. bytes.len()).step_by(3) {
        let mut mutated = bytes.clone();
        mutated[index] ^= 0b0010_1001;
        try_to_read(&mutated);
    }
}

#[test]
fn random_bytes_do_not_panic() {
    for _ in 0 .. 256 {
        let length = 4 + rand::random::<u16>() as usize % 512;
        let random_bytes: Vec<u8> = (0 .. length).map(|_| rand::random()).collect();
        try_to_read(&random_bytes);
    }

    // random garbage behind a valid magic number
    for _ in 0 .. 256 {
        let mut bytes = exr_core::meta::magic_number::BYTES.to_vec();
        bytes.extend((0 .. rand::random::<u16>() as usize % 512).map(|_| rand::random::<u8>()));
        try_to_read(&bytes);
    }
}
