#![no_main]
use libfuzzer_sys::fuzz_target;
use specstore::{Config, MatrixHandle, MemoryAccess};

// Detection and reads on arbitrary content must never panic
fuzz_target!(|data: &[u8]| {
    let store = MemoryAccess::from_bytes(data.to_vec(), false);
    let mut m = match MatrixHandle::from_access(Box::new(store), None, &Config::default()) {
        Ok(m) => m,
        Err(_) => return,
    };

    let dims = m.dimensions();
    if dims.samples() > 1 << 20 {
        return;
    }
    for level in 0..dims.levels {
        for line in 0..dims.lines {
            if m.get_line::<i32>(level, line).is_err() {
                return;
            }
        }
    }
});
