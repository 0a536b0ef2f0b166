//! Storage drive tests driven through a scheduler.
//!
//! These tests run the bottom stage against real files in a temporary
//! directory and check what callers observe: statuses, buffer contents and
//! reports.

use stackio::request::ReportType;
use stackio::storage::{DriveOptions, StorageDriveConfig};
use stackio::{FileRequestPtr, OutputBuffer, RequestStatus, StackBuilder, stats};
use tempfile::TempDir;

mod common;

use common::DRAIN_TIMEOUT;

fn drive_scheduler(dir: &TempDir, config: StorageDriveConfig) -> stackio::scheduler::Scheduler {
    let stack = StackBuilder::new()
        .drive(config.drive_path(dir.path()))
        .build()
        .expect("Failed to build stack");
    common::scheduler(stack)
}

// =============================================================================
// Reads
// =============================================================================

#[test]
fn test_unaligned_read_leaves_bytes_past_size_untouched() {
    let dir = TempDir::new().unwrap();
    let data = common::random_bytes(5000, 1);
    let path = common::write_file(dir.path(), "blob.bin", &data);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new().sector_sizes(4096, 512));

    let (offset, size) = (777u64, 1234u64);
    let output = OutputBuffer::filled(size as usize + 4, 0xCD);
    let read = FileRequestPtr::read(path, output.clone(), offset, size);
    scheduler.submit(&read).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(read.status(), RequestStatus::Completed);
    let bytes = output.to_vec();
    assert_eq!(&bytes[..size as usize], &data[777..2011]);
    assert_eq!(&bytes[size as usize..], &[0xCD; 4]);
}

#[test]
fn test_buffered_read_matches_file() {
    let dir = TempDir::new().unwrap();
    let data = common::random_bytes(3000, 2);
    let path = common::write_file(dir.path(), "plain.bin", &data);
    let options = DriveOptions {
        enable_unbuffered_reads: false,
        ..DriveOptions::default()
    };
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new().options(options));

    let output = OutputBuffer::new(100);
    let read = FileRequestPtr::read(path, output.clone(), 2900, 100);
    scheduler.submit(&read).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(read.status(), RequestStatus::Completed);
    assert_eq!(output.to_vec(), &data[2900..]);
}

#[test]
fn test_read_past_end_of_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "short.bin", &[1u8; 100]);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let read = FileRequestPtr::read(path, OutputBuffer::new(200), 0, 200);
    scheduler.submit(&read).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert_eq!(read.status(), RequestStatus::Failed);
}

#[test]
fn test_missing_file_fails_but_other_reads_complete() {
    let dir = TempDir::new().unwrap();
    let data = common::random_bytes(512, 3);
    let present = common::write_file(dir.path(), "present.bin", &data);
    let missing = stackio::RequestPath::from_root(dir.path(), "missing.bin").unwrap();
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let good_output = OutputBuffer::new(512);
    let bad = FileRequestPtr::read(missing.clone(), OutputBuffer::new(512), 0, 512);
    let good = FileRequestPtr::read(present, good_output.clone(), 0, 512);
    let exists = FileRequestPtr::file_exists_check(missing);
    for request in [&bad, &good, &exists] {
        scheduler.submit(request).unwrap();
    }
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(bad.status(), RequestStatus::Failed);
    assert_eq!(good.status(), RequestStatus::Completed);
    assert_eq!(good_output.to_vec(), data);
    assert_eq!(exists.status(), RequestStatus::Completed);
    assert_eq!(exists.found(), Some(false));
}

#[test]
fn test_exists_check_notices_deleted_file() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "gone.bin", &[3u8; 64]);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let metadata = FileRequestPtr::file_metadata(path.clone());
    scheduler.submit(&metadata).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert_eq!(metadata.file_size(), Some(64));

    std::fs::remove_file(path.absolute_path()).unwrap();
    let exists = FileRequestPtr::file_exists_check(path);
    scheduler.submit(&exists).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert_eq!(exists.status(), RequestStatus::Completed);
    assert_eq!(exists.found(), Some(false));
}

#[test]
fn test_metadata_reports_file_size() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "sized.bin", &[0u8; 4321]);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let metadata = FileRequestPtr::file_metadata(path);
    scheduler.submit(&metadata).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(metadata.status(), RequestStatus::Completed);
    assert_eq!(metadata.file_size(), Some(4321));
}

#[test]
fn test_estimates_are_set_and_not_in_the_past() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "estimated.bin", &common::random_bytes(32 * 1024, 6));
    let mut scheduler =
        drive_scheduler(&dir, StorageDriveConfig::new().io_channels(1).overcommit(0));

    let before = std::time::Instant::now();
    let reads: Vec<FileRequestPtr> = (0..8u64)
        .map(|i| FileRequestPtr::read(path.clone(), OutputBuffer::new(4096), i * 4096, 4096))
        .collect();
    for read in &reads {
        scheduler.submit(read).unwrap();
    }
    scheduler.tick();

    // Requests that already finished may never have received an estimate.
    for read in reads.iter().filter(|r| !r.status().is_terminal()) {
        let estimate = read.estimated_completion().expect("unfinished read has an estimate");
        assert!(estimate >= before);
    }
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert!(reads.iter().all(|r| r.status() == RequestStatus::Completed));
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_before_execution_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "data.bin", &common::random_bytes(8192, 4));
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let reads: Vec<(FileRequestPtr, OutputBuffer)> = (0..6u64)
        .map(|i| {
            let output = OutputBuffer::filled(1024, 0x5A);
            (FileRequestPtr::read(path.clone(), output.clone(), i * 1024, 1024), output)
        })
        .collect();
    for (read, _) in &reads {
        scheduler.submit(read).unwrap();
    }
    let cancels: Vec<FileRequestPtr> = reads.iter().map(|(read, _)| FileRequestPtr::cancel(read)).collect();
    for cancel in &cancels {
        scheduler.submit(cancel).unwrap();
    }
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    for (read, output) in &reads {
        assert_eq!(read.status(), RequestStatus::Canceled);
        assert!(output.to_vec().iter().all(|&b| b == 0x5A));
    }
    for cancel in &cancels {
        assert_eq!(cancel.status(), RequestStatus::Completed);
    }
}

#[test]
fn test_cancel_in_flight_read_still_reports_canceled() {
    let dir = TempDir::new().unwrap();
    let data = common::random_bytes(64 * 1024, 5);
    let path = common::write_file(dir.path(), "large.bin", &data);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let output = OutputBuffer::new(data.len());
    let read = FileRequestPtr::read(path, output.clone(), 0, data.len() as u64);
    scheduler.submit(&read).unwrap();
    // One tick prepares, queues and starts the read on an I/O channel.
    assert!(scheduler.tick());

    let cancel = FileRequestPtr::cancel(&read);
    scheduler.submit(&cancel).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(read.status(), RequestStatus::Canceled);
    assert_eq!(cancel.status(), RequestStatus::Completed);
    // The I/O was not interrupted; the data is there but must be discarded.
    assert_eq!(output.to_vec(), data);
}

// =============================================================================
// Control commands and reports
// =============================================================================

#[test]
fn test_file_locks_follow_flush() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "locked.bin", &[9u8; 256]);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let read = FileRequestPtr::read(path.clone(), OutputBuffer::new(256), 0, 256);
    scheduler.submit(&read).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    let locks = FileRequestPtr::report(ReportType::FileLocks);
    scheduler.submit(&locks).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    let records = locks.report_output().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "File lock");
    assert_eq!(records[0].value.to_string(), "locked.bin");

    let flush = FileRequestPtr::flush(path);
    let after = FileRequestPtr::report(ReportType::FileLocks);
    scheduler.submit(&flush).unwrap();
    scheduler.submit(&after).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert_eq!(flush.status(), RequestStatus::Completed);
    assert!(after.report_output().unwrap().is_empty());
}

#[test]
fn test_dedicated_cache_commands_complete() {
    let dir = TempDir::new().unwrap();
    let path = common::write_file(dir.path(), "pinned.bin", &[1u8; 64]);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new());

    let create = FileRequestPtr::create_dedicated_cache(path.clone());
    let destroy = FileRequestPtr::destroy_dedicated_cache(path);
    let flush_all = FileRequestPtr::flush_all();
    for request in [&create, &destroy, &flush_all] {
        scheduler.submit(request).unwrap();
    }
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    for request in [&create, &destroy, &flush_all] {
        assert_eq!(request.status(), RequestStatus::Completed);
    }
}

#[test]
fn test_pinned_file_does_not_block_other_reads() {
    let dir = TempDir::new().unwrap();
    let pinned_data = common::random_bytes(1024, 7);
    let other_data = common::random_bytes(1024, 8);
    let pinned = common::write_file(dir.path(), "a.bin", &pinned_data);
    let other = common::write_file(dir.path(), "b.bin", &other_data);
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new().max_file_handles(1));

    let create = FileRequestPtr::create_dedicated_cache(pinned.clone());
    let first = FileRequestPtr::read(pinned.clone(), OutputBuffer::new(1024), 0, 1024);
    scheduler.submit(&create).unwrap();
    scheduler.submit(&first).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    assert_eq!(first.status(), RequestStatus::Completed);

    let other_output = OutputBuffer::new(1024);
    let pinned_output = OutputBuffer::new(1024);
    let other_read = FileRequestPtr::read(other, other_output.clone(), 0, 1024);
    let pinned_read = FileRequestPtr::read(pinned, pinned_output.clone(), 0, 1024);
    scheduler.submit(&other_read).unwrap();
    scheduler.submit(&pinned_read).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    assert_eq!(other_read.status(), RequestStatus::Completed);
    assert_eq!(pinned_read.status(), RequestStatus::Completed);
    assert_eq!(other_output.to_vec(), other_data);
    assert_eq!(pinned_output.to_vec(), pinned_data);

    let locks = FileRequestPtr::report(ReportType::FileLocks);
    scheduler.submit(&locks).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));
    let mut open: Vec<String> = locks
        .report_output()
        .unwrap()
        .iter()
        .map(|record| record.value.to_string())
        .collect();
    open.sort();
    assert_eq!(open, vec!["a.bin".to_string(), "b.bin".to_string()]);
}

#[test]
fn test_config_report_lists_tunables() {
    let dir = TempDir::new().unwrap();
    let mut scheduler = drive_scheduler(&dir, StorageDriveConfig::new().io_channels(3).overcommit(-1));

    let report = FileRequestPtr::report(ReportType::Config);
    scheduler.submit(&report).unwrap();
    assert!(scheduler.run_until_idle(DRAIN_TIMEOUT));

    let records = report.report_output().unwrap();
    let owner = records[0].owner.clone();
    assert!(owner.starts_with("Storage drive ("));
    let channels = stats::find(&records, &owner, "IO channel count").unwrap();
    assert_eq!(channels.value.to_string(), "3");
    let overcommit = stats::find(&records, &owner, "Overcommit").unwrap();
    assert_eq!(overcommit.value.to_string(), "-1");
    let next = stats::find(&records, &owner, "Next node").unwrap();
    assert_eq!(next.value.to_string(), "<None>");
}

#[test]
fn test_statistics_include_drive_slots() {
    let dir = TempDir::new().unwrap();
    let scheduler = drive_scheduler(&dir, StorageDriveConfig::new().io_channels(2).overcommit(1));
    let statistics = scheduler.collect_statistics();
    let slots = statistics
        .iter()
        .find(|s| s.name == "Available slots")
        .expect("drive reports its slots");
    assert_eq!(slots.value.to_string(), "3");
}
