//! LC2 matrix scenarios
//!
//! End-to-end behaviour of the LC2 format through the public handle:
//! persistence, slot placement, conversion, bounds and corruption handling.

use specstore::lc2::{codec, HEADER_SIZE, STATUS_OPEN};
use specstore::{
    AccessMethod, AccessMode, AccessStats, Config, Dimensions, FileAccess, FormatHint, FormatId,
    MatrixBuilder, MatrixError, MatrixHandle, MatrixInfo,
};
use std::cell::Cell;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

/// Helper: Overwrite bytes at `offset`
fn patch_file(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

fn new_lc2(dir: &TempDir, name: &str, levels: u32, lines: u32, columns: u32) -> MatrixHandle {
    let path = dir.path().join(name);
    let mode = format!("w,{}.{}.{}.lc2", levels, lines, columns);
    MatrixHandle::open(&path, &mode).unwrap()
}

#[test]
fn test_zero_line_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("zeros.lc2");

    let mut m = MatrixHandle::open(&path, "w,1.1.16k.lc2").unwrap();
    assert_eq!(m.dimensions(), Dimensions::new(1, 1, 16384));
    m.put(0, 0, 0, &vec![0i32; 16384]).unwrap();
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(m.format(), FormatId::Lc2);
    let line: Vec<i32> = m.get_vec(0, 0, 0, 16384).unwrap();
    assert_eq!(line.len(), 16384);
    assert!(line.iter().all(|&v| v == 0));
}

#[test]
fn test_isolated_spike_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("spike.lc2");

    let mut spectrum = vec![0i32; 16384];
    spectrum[15999] = 12345;

    let mut m = MatrixHandle::open(&path, "w,16384.lc2").unwrap();
    m.put(0, 0, 0, &spectrum).unwrap();
    assert_eq!(m.get_vec::<i32>(0, 0, 0, 16384).unwrap(), spectrum);
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(m.get_vec::<i32>(0, 0, 15990, 20).unwrap(), spectrum[15990..16010].to_vec());

    // Sparse content compresses far below the raw size
    let size = std::fs::metadata(&path).unwrap().len();
    assert!(size < 200, "spike file is {} bytes", size);
}

#[test]
fn test_growing_line_moves_to_free_cursor() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "grow.lc2", 1, 2, 16);

    m.put_line(0, 0, &[0i32; 16]).unwrap();
    m.put_line(0, 1, &[1i32; 16]).unwrap();
    m.flush().unwrap();

    let before = m.lc2_slot(0, 0).unwrap();
    let cursor = m.lc2_stats().unwrap().free_cursor;
    assert!(before.end() < cursor as u64, "line 0 should not be the tail");

    let longer: Vec<i32> = (0..16).map(|i| i * 1_000_003 - 7_000_000).collect();
    let new_len = codec::encode(&longer).len() as u32;
    assert!(new_len > before.len);

    m.put_line(0, 0, &longer).unwrap();
    m.flush().unwrap();

    let after = m.lc2_slot(0, 0).unwrap();
    let stats = m.lc2_stats().unwrap();
    assert_ne!(after.pos, before.pos);
    assert_eq!(after.pos, cursor);
    assert_eq!(after.len, new_len);
    assert_eq!(stats.free_cursor, cursor + new_len);

    // The abandoned bytes are counted, not reused
    assert_eq!(stats.free, before.len as u64);
    assert_eq!(m.get_line::<i32>(0, 0).unwrap(), longer);
}

#[test]
fn test_tail_line_resizes_in_place() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "tail.lc2", 1, 2, 16);

    m.put_line(0, 1, &[0i32; 16]).unwrap();
    m.flush().unwrap();
    let before = m.lc2_slot(0, 1).unwrap();

    let longer: Vec<i32> = (0..16).map(|i| i * i * 977).collect();
    m.put_line(0, 1, &longer).unwrap();
    m.flush().unwrap();

    let after = m.lc2_slot(0, 1).unwrap();
    assert_eq!(after.pos, before.pos);
    assert_eq!(
        m.lc2_stats().unwrap().free_cursor as u64,
        after.pos as u64 + after.len as u64
    );
    assert_eq!(m.lc2_stats().unwrap().free, 0);
}

#[test]
fn test_integer_data_read_as_floats() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "kinds.lc2", 1, 1, 6);

    let data = [0i32, 1, -1, 16_777_216, i32::MAX, i32::MIN];
    m.put(0, 0, 0, &data).unwrap();

    let as_f64: Vec<f64> = m.get_vec(0, 0, 0, 6).unwrap();
    let expected: Vec<f64> = data.iter().map(|&v| v as f64).collect();
    assert_eq!(as_f64, expected);

    let as_f32: Vec<f32> = m.get_vec(0, 0, 0, 4).unwrap();
    assert_eq!(as_f32, vec![0.0, 1.0, -1.0, 16_777_216.0]);
}

#[test]
fn test_read_past_last_column_is_out_of_range() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "bounds.lc2", 1, 1, 64);

    match m.get_vec::<i32>(0, 0, 63, 2) {
        Err(MatrixError::OutOfRange { col, num, columns, .. }) => {
            assert_eq!((col, num, columns), (63, 2, 64));
        }
        other => panic!("expected OutOfRange, got {:?}", other),
    }
    assert_eq!(m.get_vec::<i32>(0, 0, 63, 1).unwrap(), vec![0]);
}

#[test]
fn test_bounds_errors_leave_state_untouched() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "untouched.lc2", 2, 2, 8);
    m.put_line(0, 0, &[3i32; 8]).unwrap();
    m.flush().unwrap();

    let io_before = m.access_stats();
    let stats_before = m.lc2_stats().unwrap();

    let attempts: [(u32, u32, u32, usize); 4] = [(2, 0, 0, 1), (0, 2, 0, 1), (0, 0, 8, 1), (0, 0, 4, 5)];
    for (level, line, col, num) in attempts {
        let data = vec![9i32; num];
        assert!(matches!(
            m.put(level, line, col, &data),
            Err(MatrixError::OutOfRange { .. })
        ));
        assert!(matches!(
            m.get_vec::<i32>(level, line, col, num),
            Err(MatrixError::OutOfRange { .. })
        ));
    }

    assert!(!m.is_dirty());
    assert_eq!(m.access_stats(), io_before);
    let stats_after = m.lc2_stats().unwrap();
    assert_eq!(stats_after.free_cursor, stats_before.free_cursor);
    assert_eq!(stats_after.used, stats_before.used);
    assert_eq!(m.get_line::<i32>(0, 0).unwrap(), vec![3; 8]);
}

#[test]
fn test_dimensions_lock_after_first_put() {
    let mut m = MatrixBuilder::new()
        .format(FormatId::Lc2)
        .dimensions(1, 4, 32)
        .build_in_memory()
        .unwrap();

    // Free to change before any data exists
    m.set_dimensions(Dimensions::new(1, 8, 32)).unwrap();
    assert!(!m.dimensions_locked());

    m.put(0, 7, 0, &[1i32]).unwrap();
    assert!(m.dimensions_locked());

    assert!(matches!(
        m.set_dimensions(Dimensions::new(1, 8, 64)),
        Err(MatrixError::DimensionLocked)
    ));
    assert!(matches!(
        m.set_format(FormatId::Le4),
        Err(MatrixError::DimensionLocked)
    ));

    // Identical info is accepted as a no-op
    let info = m.info();
    m.set_info(&info).unwrap();
    m.set_info(&MatrixInfo::new(FormatId::Lc2, Dimensions::new(1, 8, 32)))
        .unwrap();
    assert_eq!(m.get_vec::<i32>(0, 7, 0, 1).unwrap(), vec![1]);
}

#[test]
fn test_existing_file_is_locked_at_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locked.lc2");
    let mut m = MatrixHandle::open(&path, "w,2.2.lc2").unwrap();
    m.put(0, 0, 0, &[5i32, 6]).unwrap();
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "a").unwrap();
    assert!(m.dimensions_locked());
    assert!(matches!(
        m.set_dimensions(Dimensions::new(1, 3, 2)),
        Err(MatrixError::DimensionLocked)
    ));
}

#[test]
fn test_writing_one_line_leaves_others_empty() {
    let dir = TempDir::new().unwrap();
    let mut m = new_lc2(&dir, "independent.lc2", 2, 3, 100);

    let data: Vec<i32> = (0..100).map(|i| (i * 37) % 101 - 50).collect();
    m.put_line(1, 1, &data).unwrap();

    for level in 0..2 {
        for line in 0..3 {
            let read: Vec<i32> = m.get_line(level, line).unwrap();
            if (level, line) == (1, 1) {
                assert_eq!(read, data);
            } else {
                assert_eq!(read, vec![0; 100], "line {}.{} not empty", level, line);
            }
        }
    }
}

#[test]
fn test_second_flush_does_no_io() {
    let mut m = MatrixBuilder::new()
        .format(FormatId::Lc2)
        .dimensions(1, 3, 16)
        .build_in_memory()
        .unwrap();

    m.put(0, 1, 2, &[1i32, 2, 3]).unwrap();
    m.flush().unwrap();
    let after_first = m.access_stats();
    assert!(after_first.writes > 0);

    m.flush().unwrap();
    assert_eq!(m.access_stats(), after_first);

    // Reading the cached line keeps it clean
    let _ = m.get_vec::<i32>(0, 1, 0, 16).unwrap();
    m.flush().unwrap();
    assert_eq!(m.access_stats().writes, after_first.writes);
    assert_eq!(m.access_stats().flushes, after_first.flushes);
}

#[test]
fn test_partial_puts_accumulate_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.lc2");

    let mut m = MatrixHandle::open(&path, "w,3.2.10.lc2").unwrap();
    m.put(2, 1, 0, &[1i32, 2]).unwrap();
    m.put(0, 0, 5, &[9i32]).unwrap();
    m.put(2, 1, 8, &[3i32, 4]).unwrap();
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "a").unwrap();
    assert_eq!(m.dimensions(), Dimensions::new(3, 2, 10));
    m.put(2, 1, 4, &[7i32]).unwrap();
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(
        m.get_line::<i32>(2, 1).unwrap(),
        vec![1, 2, 0, 0, 7, 0, 0, 0, 3, 4]
    );
    assert_eq!(m.get_vec::<i32>(0, 0, 5, 1).unwrap(), vec![9]);
}

#[test]
fn test_read_only_handle_rejects_put() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ro.lc2");
    MatrixHandle::open(&path, "w,4.lc2")
        .unwrap()
        .put(0, 0, 0, &[1i32])
        .unwrap();

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert!(matches!(m.put(0, 0, 0, &[2i32]), Err(MatrixError::ReadOnly(_))));
    assert_eq!(m.get_vec::<i32>(0, 0, 0, 1).unwrap(), vec![1]);
}

#[test]
fn test_truncated_payload_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.lc2");

    let data: Vec<i32> = (0..256).map(|i| i * 7919).collect();
    let mut m = MatrixHandle::open(&path, "w,256.lc2").unwrap();
    m.put_line(0, 0, &data).unwrap();
    m.close().unwrap();

    let size = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(size - 10)
        .unwrap();

    // The table still points past the end of the file
    match MatrixHandle::open(&path, "r") {
        Ok(mut m) => assert!(matches!(
            m.get_line::<i32>(0, 0),
            Err(MatrixError::DecodeCorruption(_))
        )),
        Err(e) => assert!(matches!(e, MatrixError::DecodeCorruption(_)), "{}", e),
    }
}

#[test]
fn test_shortened_slot_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short-slot.lc2");

    let data: Vec<i32> = (0..16).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
    let mut m = MatrixHandle::open(&path, "w,16.lc2").unwrap();
    m.put_line(0, 0, &data).unwrap();
    m.close().unwrap();

    // Slot 0 length lives right after its position
    patch_file(&path, HEADER_SIZE as u64 + 4, &1u32.to_le_bytes());

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    match m.get_line::<i32>(0, 0) {
        Err(MatrixError::DecodeCorruption(msg)) => assert!(msg.contains("line 0"), "{}", msg),
        other => panic!("expected DecodeCorruption, got {:?}", other),
    }
}

#[test]
fn test_bad_magic_with_lc2_hint_is_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("magic.lc2");
    MatrixHandle::open(&path, "w,8.lc2")
        .unwrap()
        .put(0, 0, 0, &[1i32; 8])
        .unwrap();

    patch_file(&path, 0, &[0, 0, 0, 0]);

    assert!(matches!(
        MatrixHandle::open(&path, "r,lc2"),
        Err(MatrixError::FormatMismatch { .. })
    ));
}

#[test]
fn test_unflushed_writer_leaves_open_status() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crashed.lc2");

    let mut m = MatrixHandle::open(&path, "w,2.4.lc2").unwrap();
    m.put_line(0, 0, &[1i32, 2, 3, 4]).unwrap();
    m.flush().unwrap();

    // Switching lines writes line 0 back and marks the file open
    m.put_line(0, 0, &[5i32, 6, 7, 8]).unwrap();
    m.put_line(0, 1, &[9i32; 4]).unwrap();
    std::mem::forget(m);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[40..44], &STATUS_OPEN.to_le_bytes());

    // Still readable; the table on disk is the last flushed one
    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(m.get_line::<i32>(0, 1).unwrap(), vec![0; 4]);
}

#[test]
fn test_drop_without_close_flushes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dropped.lc2");

    {
        let mut m = MatrixHandle::open(&path, "w,1.2.3.lc2").unwrap();
        m.put_line(0, 1, &[4i32, 5, 6]).unwrap();
    }

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(m.get_line::<i32>(0, 1).unwrap(), vec![4, 5, 6]);
}

/// File backend whose writes fail while the switch is set
struct FailingWrites {
    inner: FileAccess,
    fail: Rc<Cell<bool>>,
}

impl AccessMethod for FailingWrites {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> specstore::Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> specstore::Result<usize> {
        if self.fail.get() {
            return Err(MatrixError::Io(std::io::Error::other("no space left on device")));
        }
        self.inner.write_at(offset, data)
    }

    fn set_len(&mut self, len: u64) -> specstore::Result<()> {
        self.inner.set_len(len)
    }

    fn flush(&mut self) -> specstore::Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> specstore::Result<()> {
        self.inner.close()
    }

    fn stats(&self) -> AccessStats {
        self.inner.stats()
    }
}

#[test]
fn test_failed_flush_keeps_line_for_retry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("retry.lc2");

    let fail = Rc::new(Cell::new(false));
    let access = FailingWrites {
        inner: FileAccess::open(&path, AccessMode::Write).unwrap(),
        fail: Rc::clone(&fail),
    };
    let mut hint = FormatHint::new(FormatId::Lc2);
    hint.levels = Some(1);
    hint.lines = Some(2);
    hint.columns = Some(4);

    let mut m = MatrixHandle::from_access(Box::new(access), Some(hint), &Config::default()).unwrap();
    m.put_line(0, 0, &[1i32, 2, 3, 4]).unwrap();

    let slot_before = m.lc2_slot(0, 0).unwrap();
    let cursor_before = m.lc2_stats().unwrap().free_cursor;

    fail.set(true);
    assert!(matches!(m.flush(), Err(MatrixError::Io(_))));

    // Nothing was placed and the line is still pending
    assert_eq!(m.lc2_slot(0, 0).unwrap(), slot_before);
    assert_eq!(m.lc2_stats().unwrap().free_cursor, cursor_before);
    assert!(m.is_dirty());
    assert_eq!(m.get_line::<i32>(0, 0).unwrap(), vec![1, 2, 3, 4]);

    fail.set(false);
    m.flush().unwrap();
    assert!(!m.is_dirty());
    assert!(m.lc2_slot(0, 0).unwrap().len > 0);
    m.close().unwrap();

    let mut m = MatrixHandle::open(&path, "r").unwrap();
    assert_eq!(m.get_line::<i32>(0, 0).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(m.get_line::<i32>(0, 1).unwrap(), vec![0; 4]);
}
