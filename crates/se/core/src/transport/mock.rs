//! Scripted bus for tests
//!
//! The script is an ordered list of expected writes and frames the device
//! answers with. Reads consume queued frames byte by byte, so a frame may be
//! picked up by several smaller reads. Clones share the same script, which lets
//! a test keep a handle after the driver moved into a stack.

use std::{collections::VecDeque, sync::Arc};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;

use super::{DriverContext, PhysicalDriver, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Write(Bytes),
    Read(Bytes),
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Step>,
    writes: Vec<Bytes>,
    opened: usize,
    closed: usize,
    clock_frequencies: Vec<u32>,
    addresses: Vec<u16>,
}

/// Scripted [`PhysicalDriver`]
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a driver with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the host to write exactly `data` next
    pub fn expect_write(&self, data: impl AsRef<[u8]>) -> &Self {
        self.state.lock().script.push_back(Step::Write(Bytes::copy_from_slice(data.as_ref())));
        self
    }

    /// Make `data` available to the following reads
    pub fn queue_read(&self, data: impl AsRef<[u8]>) -> &Self {
        self.state.lock().script.push_back(Step::Read(Bytes::copy_from_slice(data.as_ref())));
        self
    }

    /// Expect `request` and answer with `response`
    pub fn exchange(&self, request: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> &Self {
        self.expect_write(request).queue_read(response)
    }

    /// Whether the whole script was consumed
    pub fn is_done(&self) -> bool {
        self.state.lock().script.is_empty()
    }

    /// Number of script steps not consumed yet
    pub fn remaining(&self) -> usize {
        self.state.lock().script.len()
    }

    /// Every write performed so far
    pub fn writes(&self) -> Vec<Bytes> {
        self.state.lock().writes.clone()
    }

    /// How often the driver was opened
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    /// How often the driver was closed
    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Clock frequencies set by the host, in order
    pub fn clock_frequencies(&self) -> Vec<u32> {
        self.state.lock().clock_frequencies.clone()
    }

    /// Bus addresses set by the host, in order
    pub fn addresses(&self) -> Vec<u16> {
        self.state.lock().addresses.clone()
    }
}

impl PhysicalDriver for MockDriver {
    fn open(&mut self, ctx: &mut DriverContext) -> Result<(), TransportError> {
        self.state.lock().opened += 1;
        ctx.is_open = true;
        Ok(())
    }

    fn do_read(&mut self, _ctx: &DriverContext, len: Option<usize>) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock();

        let Some(len) = len else {
            return match state.script.pop_front() {
                Some(Step::Read(frame)) => Ok(frame),
                Some(step) => {
                    state.script.push_front(step);
                    Err(TransportError::Timeout)
                }
                None => Err(TransportError::Timeout),
            };
        };

        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match state.script.front_mut() {
                Some(Step::Read(frame)) => {
                    let take = frame.len().min(len - out.len());
                    out.extend_from_slice(&frame[..take]);
                    frame.advance(take);
                    if frame.is_empty() {
                        state.script.pop_front();
                    }
                }
                _ => return Err(TransportError::Timeout),
            }
        }
        Ok(Bytes::from(out))
    }

    fn do_write(&mut self, _ctx: &DriverContext, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.writes.push(Bytes::copy_from_slice(data));

        match state.script.pop_front() {
            Some(Step::Write(expected)) if expected.as_ref() == data => Ok(()),
            Some(Step::Write(expected)) => Err(TransportError::other(format!(
                "unexpected write {}, expected {}",
                hex::encode(data),
                hex::encode(&expected)
            ))),
            Some(step) => {
                state.script.push_front(step);
                Err(TransportError::other(format!("unexpected write {} while data is pending", hex::encode(data))))
            }
            None => Err(TransportError::other(format!("unexpected write {} after end of script", hex::encode(data)))),
        }
    }

    fn set_clock_frequency(&mut self, ctx: &mut DriverContext, hz: u32) -> Result<(), TransportError> {
        self.state.lock().clock_frequencies.push(hz);
        ctx.clock_frequency = hz;
        Ok(())
    }

    fn set_address(&mut self, ctx: &mut DriverContext, address: u16) -> Result<(), TransportError> {
        self.state.lock().addresses.push(address);
        ctx.address = address;
        Ok(())
    }

    fn close(&mut self, ctx: &mut DriverContext) -> Result<(), TransportError> {
        self.state.lock().closed += 1;
        ctx.is_open = false;
        Ok(())
    }
}
