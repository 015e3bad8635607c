use std::fmt;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{Error, Result};

/// Sync fence guarding a graphic buffer.
///
/// A fence is a file descriptor that becomes readable once the producer is
/// done with the buffer. Cloning shares the descriptor.
#[derive(Clone, Default)]
pub struct Fence(Option<Arc<OwnedFd>>);

impl Fence {
    /// No fence: the buffer is ready immediately
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_fd(fd: OwnedFd) -> Self {
        Self(Some(Arc::new(fd)))
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Block until the fence signals or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let Some(fd) = &self.0 else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Round up so a sub-millisecond remainder still sleeps
            let ms = remaining.as_micros().div_ceil(1000).min(u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];

            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) if Instant::now() >= deadline => return Err(Error::Timeout(timeout)),
                Ok(0) => continue,
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                        return Err(Errno::EINVAL.into());
                    }
                    return Ok(());
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(fd) => write!(f, "Fence({:?})", fd),
            None => write!(f, "Fence(none)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_unset_fence_is_ready() {
        Fence::none().wait(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_signalled_fence() {
        let (rx, tx) = nix::unistd::pipe().unwrap();
        File::from(tx).write_all(b"x").unwrap();
        Fence::from_fd(rx).wait(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_unsignalled_fence_times_out() {
        let (rx, _tx) = nix::unistd::pipe().unwrap();
        let started = Instant::now();
        let err = Fence::from_fd(rx)
            .wait(Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
