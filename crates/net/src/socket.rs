//! Buffered non-blocking socket.
use std::collections::VecDeque;
use std::io;
use std::io::prelude::*;
use std::net;

/// A non-blocking socket with an outbound byte buffer.
///
/// Bytes the kernel would not accept stay buffered and are written on the
/// next writable readiness event, preserving order.
#[derive(Debug)]
pub struct Socket<R: Read + Write> {
    raw: R,
    buffer: VecDeque<u8>,
    /// Remote address.
    pub addr: net::SocketAddr,
}

impl<R: Read + Write> Socket<R> {
    pub fn from(raw: R, addr: net::SocketAddr) -> Self {
        Self {
            raw,
            buffer: VecDeque::new(),
            addr,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.raw.read(buf)
    }

    /// Append bytes to the outbound buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Whether buffered bytes are still waiting to be written.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Write out as much of the buffer as the socket accepts.
    ///
    /// Returns a `WouldBlock` error when the kernel buffer filled up before
    /// ours emptied; the remainder stays buffered for the next attempt.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.buffer.is_empty() {
            let (front, _) = self.buffer.as_slices();

            match self.raw.write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.buffer.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Socket<net::TcpStream> {
    /// Shut down the underlying stream, both directions.
    pub fn disconnect(&self) -> io::Result<()> {
        self.raw.shutdown(net::Shutdown::Both)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts a fixed number of bytes per write, then signals `WouldBlock`.
    struct Throttled {
        written: Vec<u8>,
        budget: usize,
    }

    impl Read for Throttled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_keep_the_remainder_buffered() {
        let addr = ([127, 0, 0, 1], 0).into();
        let mut socket = Socket::from(
            Throttled {
                written: Vec::new(),
                budget: 4,
            },
            addr,
        );

        socket.push(b"hyperion");
        let err = socket.flush().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(socket.has_pending());

        socket.raw.budget = 16;
        socket.flush().unwrap();
        assert!(!socket.has_pending());
        assert_eq!(socket.raw.written, b"hyperion");
    }
}
