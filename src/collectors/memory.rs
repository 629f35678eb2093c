use async_trait::async_trait;

use super::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, MemoryReading, Reading};

/// Page counters straight from the Mach host on macOS; sysinfo elsewhere.
pub struct MemoryCollector {
    #[cfg(not(target_os = "macos"))]
    system: sysinfo::System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        MemoryCollector {
            #[cfg(not(target_os = "macos"))]
            system: sysinfo::System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Memory
    }

    fn source(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            "mach::host_statistics64"
        } else {
            "sysinfo::memory"
        }
    }

    #[cfg(target_os = "macos")]
    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        mach::sample().map(Reading::Memory)
    }

    #[cfg(not(target_os = "macos"))]
    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectorError::unavailable("memory total reported as zero"));
        }
        let used = self.system.used_memory();
        let free = self.system.free_memory();
        Ok(Reading::Memory(MemoryReading {
            total_bytes: total,
            used_bytes: used,
            free_bytes: free,
            active_bytes: used,
            inactive_bytes: self.system.available_memory().saturating_sub(free),
            wired_bytes: 0,
            compressed_bytes: 0,
        }))
    }
}

/// Combine raw page counts the way Activity Monitor does: used memory is
/// active + wired + compressed.
pub fn from_pages(
    total_bytes: u64,
    page_size: u64,
    free: u64,
    active: u64,
    inactive: u64,
    wired: u64,
    compressed: u64,
) -> MemoryReading {
    let active_bytes = active * page_size;
    let wired_bytes = wired * page_size;
    let compressed_bytes = compressed * page_size;
    MemoryReading {
        total_bytes,
        used_bytes: (active_bytes + wired_bytes + compressed_bytes).min(total_bytes),
        free_bytes: free * page_size,
        active_bytes,
        inactive_bytes: inactive * page_size,
        wired_bytes,
        compressed_bytes,
    }
}

#[cfg(target_os = "macos")]
mod mach {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::ptr;

    use libc::{
        c_void, host_statistics64, mach_msg_type_number_t, vm_statistics64, HOST_VM_INFO64,
        HOST_VM_INFO64_COUNT,
    };

    use super::from_pages;
    use crate::error::CollectorError;
    use crate::metrics::MemoryReading;

    pub fn sample() -> Result<MemoryReading, CollectorError> {
        let stats = unsafe {
            #[allow(deprecated)]
            let host = libc::mach_host_self();

            let mut stats = MaybeUninit::<vm_statistics64>::uninit();
            let mut count: mach_msg_type_number_t = HOST_VM_INFO64_COUNT;
            let result = host_statistics64(
                host,
                HOST_VM_INFO64,
                stats.as_mut_ptr() as *mut _,
                &mut count,
            );
            if result != 0 {
                return Err(CollectorError::unavailable(format!(
                    "host_statistics64 returned {}",
                    result
                )));
            }
            stats.assume_init()
        };

        let page_size_raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size_raw > 0 {
            page_size_raw as u64
        } else {
            4096
        };

        let total = read_sysctl_u64("hw.memsize")?;
        Ok(from_pages(
            total,
            page_size,
            stats.free_count as u64,
            stats.active_count as u64,
            stats.inactive_count as u64,
            stats.wire_count as u64,
            stats.compressor_page_count as u64,
        ))
    }

    fn read_sysctl_u64(name: &str) -> Result<u64, CollectorError> {
        let c_name = CString::new(name).map_err(|err| CollectorError::parse(err.to_string()))?;
        let mut size: libc::size_t = std::mem::size_of::<u64>() as libc::size_t;
        let mut value: u64 = 0;
        let result = unsafe {
            libc::sysctlbyname(
                c_name.as_ptr(),
                &mut value as *mut u64 as *mut c_void,
                &mut size as *mut libc::size_t,
                ptr::null_mut(),
                0,
            )
        };
        if result != 0 {
            return Err(CollectorError::unavailable(format!(
                "sysctl {} failed: {}",
                name,
                std::io::Error::last_os_error()
            )));
        }
        Ok(value)
    }
}
