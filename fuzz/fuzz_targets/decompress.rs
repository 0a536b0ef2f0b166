//! Fuzz target for archive entry decompression with arbitrary input.
//!
//! Feeds arbitrary bytes to every built-in codec through the same partial
//! decompression path the decompressor stage uses. Corrupt input must end in
//! `false`, never in a panic or an out-of-bounds write.
//!
//! Run with: cargo +nightly fuzz run decompress

#![no_main]

use libfuzzer_sys::fuzz_target;
use stackio::compression::CompressionInfo;
use stackio::decompressor::partial_decompression;
use stackio::{RequestPath, codec};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    // First bytes pick the claimed size and the requested range.
    let uncompressed = u16::from_le_bytes([data[0], data[1]]) as u64;
    let read_offset = data[2] as u64;
    let read_size = data[3] as usize;
    let input = &data[4..];

    let archive = RequestPath::from_root("/fuzz", "input.pak").unwrap();
    for decompressor in [codec::store(), codec::deflate(), codec::lz4_block(), codec::zstd()] {
        let info = CompressionInfo::compressed(
            archive.clone(),
            0,
            input.len() as u64,
            uncompressed,
            decompressor,
        );
        let mut output = vec![0u8; read_size];
        let _ = partial_decompression(&info, input, read_offset, &mut output);
    }
});
