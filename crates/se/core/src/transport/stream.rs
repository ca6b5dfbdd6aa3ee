//! Driver over any blocking byte stream
//!
//! Useful for character devices exposed by a kernel bus driver, serial ports
//! and sockets bridging to a remote secure element. Read timeouts are the
//! stream's business and surface as [`TransportError::Timeout`].

use std::{
    fmt,
    io::{Read, Write},
};

use bytes::Bytes;

use super::{DriverContext, PhysicalDriver, TransportError};

/// Size of a single unbounded read
const CHUNK_SIZE: usize = 512;

/// [`PhysicalDriver`] reading and writing a [`Read`] + [`Write`] stream
pub struct StreamDriver<T> {
    stream: T,
}

impl<T: Read + Write + Send> StreamDriver<T> {
    /// Wrap a stream
    pub const fn new(stream: T) -> Self {
        Self { stream }
    }

    /// The wrapped stream
    pub const fn get_ref(&self) -> &T {
        &self.stream
    }
}

impl<T> fmt::Debug for StreamDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDriver").field("stream", &std::any::type_name::<T>()).finish()
    }
}

impl<T: Read + Write + Send> PhysicalDriver for StreamDriver<T> {
    fn open(&mut self, ctx: &mut DriverContext) -> Result<(), TransportError> {
        ctx.is_open = true;
        Ok(())
    }

    fn do_read(&mut self, ctx: &DriverContext, len: Option<usize>) -> Result<Bytes, TransportError> {
        if !ctx.is_open {
            return Err(TransportError::Connection);
        }
        match len {
            Some(len) => {
                let mut buf = vec![0u8; len];
                self.stream.read_exact(&mut buf)?;
                Ok(Bytes::from(buf))
            }
            None => {
                let mut buf = vec![0u8; CHUNK_SIZE];
                let n = self.stream.read(&mut buf)?;
                if n == 0 {
                    return Err(TransportError::Timeout);
                }
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
        }
    }

    fn do_write(&mut self, ctx: &DriverContext, data: &[u8]) -> Result<(), TransportError> {
        if !ctx.is_open {
            return Err(TransportError::Connection);
        }
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }
}
