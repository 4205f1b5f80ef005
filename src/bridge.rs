//! Async bridge: run any comparison on a worker thread and signal completion
//! through a readable notification descriptor (eventfd on Linux, a pipe pair
//! elsewhere).

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::debug;

use crate::types::{CompareError, Result};

/// A comparison running on a background thread.
///
/// Register [`notify_fd`](AsyncTask::notify_fd) for readability with any
/// event loop: exactly one wakeup arrives when the task completes, and the
/// descriptor must not be re-registered afterwards. [`result`](AsyncTask::result)
/// collects the value or error and closes the descriptor. Dropping an
/// unconsumed task still closes the descriptor; only the parked result's
/// memory lives until the worker finishes.
#[derive(Debug)]
pub struct AsyncTask<T> {
    read_fd: OwnedFd,
    slot: Arc<Mutex<Option<Result<T>>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> AsyncTask<T> {
    /// Spawn `task` on a worker thread. The notification descriptor exists
    /// (and is writable) before the worker starts, so the signal can never
    /// race the registration.
    pub(crate) fn spawn(task: impl FnOnce() -> Result<T> + Send + 'static) -> Result<AsyncTask<T>> {
        let (read_fd, write_fd) = notify_pair().map_err(|e| {
            CompareError::Config(format!("cannot create notification descriptor: {e}"))
        })?;
        let slot = Arc::new(Mutex::new(None));
        let parked = Arc::clone(&slot);
        let worker = std::thread::spawn(move || {
            let result = task();
            *parked.lock().unwrap() = Some(result);
            signal(&write_fd);
        });
        debug!("async task started, notify fd {}", read_fd.as_raw_fd());
        Ok(AsyncTask {
            read_fd,
            slot,
            worker: Some(worker),
        })
    }

    /// Descriptor that becomes readable exactly once, on completion.
    pub fn notify_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    /// Collect the comparison outcome, joining the worker if it has not
    /// finished yet, and release the descriptor.
    pub fn result(mut self) -> Result<T> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.slot
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(CompareError::read("async task", "worker exited without a result")))
    }
}

/// Write one event to the notification descriptor. An eventfd insists on an
/// 8-byte counter; a pipe accepts the same bytes, still one wakeup.
fn signal(fd: &OwnedFd) {
    let one: u64 = 1;
    let buf = one.to_ne_bytes();
    unsafe {
        libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len());
    }
}

/// (read side, write side) of a fresh notification channel.
#[cfg(target_os = "linux")]
fn notify_pair() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let read_fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let write_fd = unsafe { OwnedFd::from_raw_fd(dup) };
    Ok((read_fd, write_fd))
}

#[cfg(not(target_os = "linux"))]
fn notify_pair() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let read_fd = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write_fd = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    for fd in [&read_fd, &write_fd] {
        unsafe {
            libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    Ok((read_fd, write_fd))
}
