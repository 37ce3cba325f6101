//! Runtime binding to the linux-gpib user library (`libgpib.so.0`).
//!
//! The library is loaded on first use so the binary still starts (for example in simulation
//! mode) on machines without a GPIB board.
use std::collections::HashMap;
use std::os::raw::{c_int, c_long, c_void};
use std::time::Duration;

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::drivers::bus::GpibBus;
use crate::drivers::error::BenchError;

const LIBRARY_NAMES: [&str; 2] = ["libgpib.so.0", "libgpib.so"];
/// `ibsta` error bit.
const ERR: c_int = 0x8000;
const READ_CHUNK: usize = 512;

struct GpibApi {
    #[allow(dead_code)]
    lib: Library,
    ibdev: unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int, c_int) -> c_int,
    ibwrt: unsafe extern "C" fn(c_int, *const c_void, c_long) -> c_int,
    ibrd: unsafe extern "C" fn(c_int, *mut c_void, c_long) -> c_int,
    ibonl: unsafe extern "C" fn(c_int, c_int) -> c_int,
    thread_iberr: unsafe extern "C" fn() -> c_int,
    thread_ibcntl: unsafe extern "C" fn() -> c_long,
}

impl GpibApi {
    fn load() -> Result<Self, BenchError> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(name) }.ok())
            .ok_or_else(|| BenchError::Library("libgpib.so.0 not found".to_owned()))?;
        let missing = |e: libloading::Error| BenchError::Library(e.to_string());
        // Safety: signatures follow the linux-gpib C API (ib.h).
        unsafe {
            Ok(Self {
                ibdev: *lib.get(b"ibdev\0").map_err(missing)?,
                ibwrt: *lib.get(b"ibwrt\0").map_err(missing)?,
                ibrd: *lib.get(b"ibrd\0").map_err(missing)?,
                ibonl: *lib.get(b"ibonl\0").map_err(missing)?,
                thread_iberr: *lib.get(b"ThreadIberr\0").map_err(missing)?,
                thread_ibcntl: *lib.get(b"ThreadIbcntl\0").map_err(missing)?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static GpibApi, BenchError> {
        static API: OnceCell<GpibApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn iberr(&self) -> i32 {
        unsafe { (self.thread_iberr)() }
    }
}

/// Maps a timeout to the nearest linux-gpib `Txxx` constant that is not shorter.
fn timeout_code(timeout: Duration) -> c_int {
    const STEPS_US: [u64; 17] = [
        10,
        30,
        100,
        300,
        1_000,
        3_000,
        10_000,
        30_000,
        100_000,
        300_000,
        1_000_000,
        3_000_000,
        10_000_000,
        30_000_000,
        100_000_000,
        300_000_000,
        1_000_000_000,
    ];
    let micros = timeout.as_micros() as u64;
    if micros == 0 {
        return 0; // TNONE
    }
    STEPS_US
        .iter()
        .position(|&step| micros <= step)
        .map(|idx| idx as c_int + 1)
        .unwrap_or(STEPS_US.len() as c_int)
}

pub struct LinuxGpibBus {
    api: &'static GpibApi,
    board: i32,
    timeout: c_int,
    descriptors: HashMap<u8, c_int>,
}

impl LinuxGpibBus {
    pub fn open(board: i32, timeout: Duration) -> Result<Self, BenchError> {
        Ok(Self {
            api: GpibApi::instance()?,
            board,
            timeout: timeout_code(timeout),
            descriptors: HashMap::new(),
        })
    }

    fn descriptor(&mut self, address: u8) -> Result<c_int, BenchError> {
        if let Some(ud) = self.descriptors.get(&address) {
            return Ok(*ud);
        }
        // send EOI with the last byte, no EOS character
        let ud = unsafe {
            (self.api.ibdev)(self.board, address as c_int, 0, self.timeout, 1, 0)
        };
        if ud < 0 {
            return Err(BenchError::Gpib {
                call: "ibdev",
                address,
                code: self.api.iberr(),
            });
        }
        self.descriptors.insert(address, ud);
        Ok(ud)
    }
}

impl GpibBus for LinuxGpibBus {
    fn write(&mut self, address: u8, command: &str) -> Result<(), BenchError> {
        let ud = self.descriptor(address)?;
        let status = unsafe {
            (self.api.ibwrt)(
                ud,
                command.as_ptr() as *const c_void,
                command.len() as c_long,
            )
        };
        if status & ERR != 0 {
            return Err(BenchError::Gpib {
                call: "ibwrt",
                address,
                code: self.api.iberr(),
            });
        }
        Ok(())
    }

    fn read(&mut self, address: u8) -> Result<String, BenchError> {
        let ud = self.descriptor(address)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let status =
            unsafe { (self.api.ibrd)(ud, buf.as_mut_ptr() as *mut c_void, buf.len() as c_long) };
        if status & ERR != 0 {
            return Err(BenchError::Gpib {
                call: "ibrd",
                address,
                code: self.api.iberr(),
            });
        }
        let count = unsafe { (self.api.thread_ibcntl)() }.max(0) as usize;
        if count == 0 {
            return Err(BenchError::NoResponse(address));
        }
        buf.truncate(count.min(READ_CHUNK));
        Ok(String::from_utf8_lossy(&buf).trim_end().to_owned())
    }
}

impl Drop for LinuxGpibBus {
    fn drop(&mut self) {
        for ud in self.descriptors.values() {
            unsafe {
                (self.api.ibonl)(*ud, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_codes_round_up() {
        assert_eq!(timeout_code(Duration::ZERO), 0);
        assert_eq!(timeout_code(Duration::from_micros(10)), 1);
        // T3s
        assert_eq!(timeout_code(Duration::from_secs(3)), 12);
        // T10s
        assert_eq!(timeout_code(Duration::from_millis(3_500)), 13);
        assert_eq!(timeout_code(Duration::from_secs(5_000)), 17);
    }
}
