use nix::unistd::close;
use std::os::unix::io::RawFd;

// We DON'T want this to be Copy or Clone because of the Drop.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn from_raw(fd: RawFd) -> Self {
        ScopedFd { fd }
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            // We swallow any error on close
            close(self.fd).unwrap_or(());
        }

        self.fd = -1;
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn as_raw(&self) -> RawFd {
        self.fd
    }

    /// Give up ownership without closing.
    pub fn extract(&mut self) -> RawFd {
        let result = self.fd;
        self.fd = -1;
        result
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    #[test]
    fn extract_releases_ownership() {
        let (r, w) = pipe().unwrap();
        let mut read_end = ScopedFd::from_raw(r);
        let raw = read_end.extract();
        assert!(!read_end.is_open());
        drop(read_end);
        // Still ours to close.
        close(raw).unwrap();

        let mut write_end = ScopedFd::from_raw(w);
        assert!(write_end.is_open());
        write_end.close();
        assert_eq!(-1, write_end.as_raw());
    }
}
