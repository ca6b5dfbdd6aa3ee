//! APDU response definitions
//!
//! A response is a payload followed by the two status bytes SW1 SW2.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, ErrorKind, Result, function, module};
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self { payload: payload.into(), status: status.into() }
    }

    /// Create a success response
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, StatusWord::SUCCESS)
    }

    /// Create a response that carries only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some(split) = data.len().checked_sub(2) else {
            return Err(Error::new(module::APDU, function::RESPONSE_DECODE, ErrorKind::TooLittleData));
        };
        let status = StatusWord::new(data[split], data[split + 1]);
        let payload = Bytes::copy_from_slice(&data[..split]);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self { payload, status })
    }

    /// Serialize as payload followed by SW1 SW2
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 2);
        buf.put_slice(&self.payload);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }

    /// Response payload data
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Split into payload and status word
    pub fn into_parts(self) -> (Bytes, StatusWord) {
        (self.payload, self.status)
    }

    /// Payload if the status word is 90 00, otherwise a status error
    pub fn into_result(self) -> Result<Bytes> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(Error::with_reason(
                module::APDU_PROTOCOL,
                function::TRANSCEIVE,
                self.status.general_error_reason(),
                ErrorKind::Status(self.status),
            ))
        }
    }
}
