// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named counting semaphore used to wake a blocked ring consumer.
// POSIX backend mirrors the idm-protocol reference transport's use of
// sem_open/sem_post/sem_wait/sem_timedwait; Windows backend uses a
// named kernel semaphore object, matching the CreateSemaphoreW /
// WaitForSingleObject / ReleaseSemaphore triad.

#[cfg(unix)]
mod imp {
    use std::ffi::CString;
    use std::io;
    #[cfg(target_os = "macos")]
    use std::time::{Duration, Instant};

    use crate::shm_name;

    pub struct IpcSemaphore {
        sem: *mut libc::sem_t,
        name: String,
    }

    unsafe impl Send for IpcSemaphore {}
    unsafe impl Sync for IpcSemaphore {}

    impl IpcSemaphore {
        pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
            let posix_name = shm_name::make_shm_name(name);
            let c_name = CString::new(posix_name.as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

            let sem = unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT,
                    0o666 as libc::c_uint,
                    initial_count as libc::c_uint,
                )
            };
            if sem == libc::SEM_FAILED {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { sem, name: posix_name })
        }

        /// `None` blocks indefinitely, `Some(0)` polls once without blocking,
        /// `Some(ms)` blocks up to `ms` milliseconds. Returns `true` if a
        /// permit was acquired, `false` on timeout.
        pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
            match timeout_ms {
                None => loop {
                    let ret = unsafe { libc::sem_wait(self.sem) };
                    if ret == 0 {
                        return Ok(true);
                    }
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                },
                Some(0) => loop {
                    let ret = unsafe { libc::sem_trywait(self.sem) };
                    if ret == 0 {
                        return Ok(true);
                    }
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EAGAIN) {
                        return Ok(false);
                    }
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                },
                Some(ms) => self.wait_timed(ms),
            }
        }

        #[cfg(not(target_os = "macos"))]
        fn wait_timed(&self, ms: u64) -> io::Result<bool> {
            let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
            if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
                return Err(io::Error::last_os_error());
            }
            ts.tv_sec += (ms / 1000) as libc::time_t;
            ts.tv_nsec += ((ms % 1000) * 1_000_000) as i64;
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }

            loop {
                let ret = unsafe { libc::sem_timedwait(self.sem, &ts) };
                if ret == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::ETIMEDOUT) => return Ok(false),
                    _ if err.kind() == io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
        }

        // macOS has no sem_timedwait; poll sem_trywait with adaptive backoff.
        #[cfg(target_os = "macos")]
        fn wait_timed(&self, ms: u64) -> io::Result<bool> {
            let deadline = Instant::now() + Duration::from_millis(ms);
            let mut spins = 0u32;
            loop {
                let ret = unsafe { libc::sem_trywait(self.sem) };
                if ret == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EAGAIN)
                    && err.kind() != io::ErrorKind::Interrupted
                {
                    return Err(err);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                crate::spin_lock::adaptive_yield_pub(&mut spins);
            }
        }

        pub fn post(&self, n: u32) -> io::Result<()> {
            for _ in 0..n {
                if unsafe { libc::sem_post(self.sem) } != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }

        pub fn clear_storage(name: &str) {
            let posix_name = shm_name::make_shm_name(name);
            if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
                unsafe { libc::sem_unlink(c_name.as_ptr()) };
            }
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for IpcSemaphore {
        fn drop(&mut self) {
            unsafe { libc::sem_close(self.sem) };
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::ptr;

    pub struct IpcSemaphore {
        handle: windows_sys::Win32::Foundation::HANDLE,
        name: String,
    }

    unsafe impl Send for IpcSemaphore {}
    unsafe impl Sync for IpcSemaphore {}

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    impl IpcSemaphore {
        pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
            use windows_sys::Win32::System::Threading::CreateSemaphoreW;

            let wide_name = to_wide(name);
            let handle = unsafe {
                CreateSemaphoreW(
                    ptr::null(),
                    initial_count as i32,
                    i32::MAX,
                    wide_name.as_ptr(),
                )
            };
            if handle == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle, name: name.to_string() })
        }

        pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
            use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

            let millis = match timeout_ms {
                None => INFINITE,
                Some(ms) => ms as u32,
            };
            let ret = unsafe { WaitForSingleObject(self.handle, millis) };
            const WAIT_OBJECT_0: u32 = 0;
            const WAIT_TIMEOUT: u32 = 258;
            match ret {
                WAIT_OBJECT_0 => Ok(true),
                WAIT_TIMEOUT => Ok(false),
                _ => Err(io::Error::last_os_error()),
            }
        }

        pub fn post(&self, n: u32) -> io::Result<()> {
            use windows_sys::Win32::System::Threading::ReleaseSemaphore;

            if unsafe { ReleaseSemaphore(self.handle, n as i32, ptr::null_mut()) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn clear_storage(_name: &str) {
            // Named kernel objects are reclaimed when the last handle closes.
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for IpcSemaphore {
        fn drop(&mut self) {
            use windows_sys::Win32::Foundation::CloseHandle;
            if self.handle != 0 {
                unsafe { CloseHandle(self.handle) };
            }
        }
    }
}

pub use imp::IpcSemaphore;
