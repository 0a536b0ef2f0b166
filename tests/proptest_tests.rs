//! Property-based tests using proptest.
//!
//! These tests verify invariants of the pipeline using randomly generated
//! inputs: slot accounting of the storage drive, confinement of reads to the
//! requested range, and agreement between partial and full decompression.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use stackio::buffer::{align_down, align_up};
use stackio::compression::CompressionInfo;
use stackio::context::StreamerContext;
use stackio::decompressor::{full_decompression, partial_decompression};
use stackio::request::command::ReadData;
use stackio::request::{Command, RequestStatus};
use stackio::storage::{DriveOptions, StorageDrive, StorageDriveConfig};
use stackio::{FileRequestPtr, OutputBuffer, RequestPath, StackBuilder, StreamStackEntry, codec};
use tempfile::TempDir;

mod common;

/// Operations applied to a storage drive in the slot accounting property.
#[derive(Debug, Clone)]
enum DriveOp {
    Read { offset: u64, size: u64 },
    Exists,
    Execute,
}

fn drive_op_strategy() -> impl Strategy<Value = DriveOp> {
    prop_oneof![
        (0u64..6000, 1u64..2000).prop_map(|(offset, size)| DriveOp::Read { offset, size }),
        Just(DriveOp::Exists),
        Just(DriveOp::Execute),
    ]
}

fn assert_slots_balance(drive: &StorageDrive) -> Result<(), TestCaseError> {
    prop_assert_eq!(
        drive.available_slots() + drive.in_flight_slots(),
        drive.configured_slots()
    );
    let mut status = stackio::Status::default();
    drive.update_status(&mut status);
    prop_assert_eq!(status.num_available_slots, drive.available_slots());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Available and in-flight slots always add up to the configured total.
    #[test]
    fn slot_accounting_balances(
        channels in 1u32..5,
        overcommit in -2i32..4,
        ops in proptest::collection::vec(drive_op_strategy(), 1..40),
    ) {
        prop_assume!(channels as i32 + overcommit > 0);
        let dir = TempDir::new().unwrap();
        let path = common::write_file(dir.path(), "slots.bin", &common::random_bytes(8192, 1));
        let config = StorageDriveConfig::new()
            .drive_path(dir.path())
            .io_channels(channels)
            .overcommit(overcommit);
        let mut drive = StorageDrive::new(config);
        let mut ctx = StreamerContext::new();
        prop_assert_eq!(drive.configured_slots(), channels as i32 + overcommit);
        assert_slots_balance(&drive)?;

        for op in ops {
            match op {
                DriveOp::Read { offset, size } => {
                    let read = Command::Read(ReadData {
                        output: OutputBuffer::new(size as usize),
                        output_size: size,
                        path: path.clone(),
                        offset,
                        size,
                        shared_read: false,
                    });
                    let id = ctx.new_internal_request(read, None);
                    drive.queue_request(&mut ctx, id);
                }
                DriveOp::Exists => {
                    let id = ctx.new_internal_request(
                        Command::FileExistsCheck(stackio::request::command::FileExistsCheckData {
                            path: path.clone(),
                            found: false,
                        }),
                        None,
                    );
                    drive.queue_request(&mut ctx, id);
                }
                DriveOp::Execute => {
                    drive.execute_requests(&mut ctx);
                    ctx.finalize_completed_requests(&mut drive);
                }
            }
            assert_slots_balance(&drive)?;
        }

        let deadline = Instant::now() + common::DRAIN_TIMEOUT;
        while drive.in_flight_slots() > 0 && Instant::now() < deadline {
            if !drive.execute_requests(&mut ctx) {
                ctx.thread_sync().wait_timeout(Duration::from_millis(2));
            }
            ctx.finalize_completed_requests(&mut drive);
            assert_slots_balance(&drive)?;
        }
        prop_assert_eq!(drive.in_flight_slots(), 0);
        prop_assert_eq!(drive.available_slots(), drive.configured_slots());
    }

    /// Reads never touch caller memory past the requested size.
    #[test]
    fn reads_stay_inside_the_requested_range(
        file_len in 1usize..20_000,
        start in 0.0f64..1.0,
        length in 0.0f64..1.0,
        logical in prop_oneof![Just(512u64), Just(4096u64)],
        unbuffered in any::<bool>(),
    ) {
        let offset = ((file_len - 1) as f64 * start) as usize;
        let size = (((file_len - offset) as f64 * length) as usize).max(1);
        let dir = TempDir::new().unwrap();
        let data = common::random_bytes(file_len, file_len as u64);
        let path = common::write_file(dir.path(), "range.bin", &data);
        let options = DriveOptions {
            enable_unbuffered_reads: unbuffered,
            ..DriveOptions::default()
        };
        let stack = StackBuilder::new()
            .drive(
                StorageDriveConfig::new()
                    .drive_path(dir.path())
                    .sector_sizes(4096, logical)
                    .options(options),
            )
            .build()
            .unwrap();
        let mut scheduler = common::scheduler(stack);

        let output = OutputBuffer::filled(size + 4, 0xCD);
        let read = FileRequestPtr::read(path, output.clone(), offset as u64, size as u64);
        scheduler.submit(&read).unwrap();
        prop_assert!(scheduler.run_until_idle(common::DRAIN_TIMEOUT));

        prop_assert_eq!(read.status(), RequestStatus::Completed);
        let bytes = output.to_vec();
        prop_assert_eq!(&bytes[..size], &data[offset..offset + size]);
        prop_assert_eq!(&bytes[size..], &[0xCD; 4][..]);
    }

    /// A partial decompression equals the same slice of a full decompression.
    #[test]
    fn partial_decompression_matches_full_slice(
        len in 1usize..8_000,
        seed in any::<u64>(),
        start in 0.0f64..1.0,
        length in 0.0f64..1.0,
        use_lz4 in any::<bool>(),
    ) {
        let data = common::compressible_bytes(len, seed);
        let (packed, decompressor) = if use_lz4 {
            (codec::lz4_compress(&data), codec::lz4_block())
        } else {
            (codec::deflate_compress(&data).unwrap(), codec::deflate())
        };
        let archive = RequestPath::from_root("/archives", "test.pak").unwrap();
        let info = CompressionInfo::compressed(
            archive,
            0,
            packed.len() as u64,
            data.len() as u64,
            decompressor,
        );

        let mut full = vec![0u8; len];
        prop_assert!(full_decompression(&info, &packed, &mut full));
        prop_assert_eq!(&full, &data);

        let offset = ((len - 1) as f64 * start) as usize;
        let size = (((len - offset) as f64 * length) as usize).max(1);
        let mut part = vec![0u8; size];
        prop_assert!(partial_decompression(&info, &packed, offset as u64, &mut part));
        prop_assert_eq!(&part[..], &full[offset..offset + size]);
    }

    /// Aligned bounds enclose the value and are multiples of the alignment.
    #[test]
    fn alignment_bounds_enclose_value(value in 0u64..(1 << 40), shift in 0u32..16) {
        let alignment = 1u64 << shift;
        let down = align_down(value, alignment);
        let up = align_up(value, alignment);
        prop_assert!(down <= value && value <= up);
        prop_assert_eq!(down % alignment, 0);
        prop_assert_eq!(up % alignment, 0);
        prop_assert!(up - down < 2 * alignment);
    }
}
