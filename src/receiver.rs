//! Central-side view of the data characteristic: parses notifications and
//! puts split payloads and paged logs back together.
//!
//! Used by the host simulation and by tests that check what a phone would
//! actually see.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::bus::Status;
use crate::protocol::frame::{MAX_FIRST_PART, OFFSET_LEN};
use crate::protocol::{FrameError, ResponseType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    Frame(FrameError),
    /// Frame addressed to another client reference
    WrongReference(u8),
    /// Frame kind not valid at this point
    Unexpected(ResponseType),
    /// `DataPart2` without the `Data` frame it continues
    OrphanPart,
    /// Command result that is neither a greeting nor a status
    MalformedResult(usize),
}

impl From<FrameError> for ReceiveError {
    fn from(e: FrameError) -> Self {
        ReceiveError::Frame(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Hello,
    Status(Status),
}

/// One notification split into its header and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub kind: ResponseType,
    pub reference: u8,
    pub body: &'a [u8],
}

impl<'a> DataFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let [kind, reference, body @ ..] = bytes else {
            return Err(FrameError::Truncated(bytes.len()));
        };

        Ok(Self {
            kind: ResponseType::try_from(*kind)?,
            reference: *reference,
            body,
        })
    }

    /// Split the body of an offset-carrying frame into offset and payload.
    pub fn with_offset(&self) -> Result<(u32, &'a [u8]), FrameError> {
        if self.body.len() < OFFSET_LEN {
            return Err(FrameError::Truncated(self.body.len()));
        }
        let (offset, payload) = self.body.split_at(OFFSET_LEN);
        let offset = u32::from_le_bytes([offset[0], offset[1], offset[2], offset[3]]);
        Ok((offset, payload))
    }

    pub fn command_result(&self) -> Result<CommandResult, ReceiveError> {
        if self.kind != ResponseType::CommandResult {
            return Err(ReceiveError::Unexpected(self.kind));
        }

        match self.body {
            b"Hello" => Ok(CommandResult::Hello),
            [hi, lo] => Ok(CommandResult::Status(Status(u16::from_be_bytes([*hi, *lo])))),
            other => Err(ReceiveError::MalformedResult(other.len())),
        }
    }
}

/// Rebuilds a fetched log from its offset-addressed frames.
#[derive(Debug, Default)]
pub struct LogAssembler {
    reference: u8,
    bytes: Vec<u8>,
    complete: bool,
}

impl LogAssembler {
    pub fn new(reference: u8) -> Self {
        Self {
            reference,
            ..Self::default()
        }
    }

    /// Feed one notification. Returns `true` once the end marker arrived.
    pub fn push(&mut self, frame: &[u8]) -> Result<bool, ReceiveError> {
        let frame = DataFrame::parse(frame)?;
        if frame.reference != self.reference {
            return Err(ReceiveError::WrongReference(frame.reference));
        }
        if frame.kind == ResponseType::CommandResult {
            return Err(ReceiveError::Unexpected(frame.kind));
        }

        let (offset, payload) = frame.with_offset()?;
        if frame.kind == ResponseType::Data && payload.is_empty() {
            trace!("end of log at offset {}", offset);
            self.complete = true;
            return Ok(true);
        }

        let start = offset as usize;
        let end = start + payload.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(payload);

        Ok(false)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Rebuilds live stream payloads, which carry no offset.
///
/// A full-size `Data` frame may be followed by a `DataPart2`, so it is held
/// back until the next frame shows whether it was complete. [`flush`] gives
/// up waiting.
///
/// [`flush`]: StreamAssembler::flush
#[derive(Debug, Default)]
pub struct StreamAssembler {
    reference: u8,
    partial: Option<Vec<u8>>,
    ready: VecDeque<Vec<u8>>,
}

impl StreamAssembler {
    pub fn new(reference: u8) -> Self {
        Self {
            reference,
            ..Self::default()
        }
    }

    pub fn push(&mut self, frame: &[u8]) -> Result<(), ReceiveError> {
        let frame = DataFrame::parse(frame)?;
        if frame.reference != self.reference {
            return Err(ReceiveError::WrongReference(frame.reference));
        }

        match frame.kind {
            ResponseType::Data => {
                self.flush();
                if frame.body.len() == MAX_FIRST_PART {
                    self.partial = Some(frame.body.to_vec());
                } else {
                    self.ready.push_back(frame.body.to_vec());
                }
                Ok(())
            }
            ResponseType::DataPart2 => {
                let mut payload = self.partial.take().ok_or(ReceiveError::OrphanPart)?;
                payload.extend_from_slice(frame.body);
                self.ready.push_back(payload);
                Ok(())
            }
            ResponseType::CommandResult => Err(ReceiveError::Unexpected(frame.kind)),
        }
    }

    /// Treat a held-back full-size frame as a complete payload.
    pub fn flush(&mut self) {
        if let Some(payload) = self.partial.take() {
            self.ready.push_back(payload);
        }
    }

    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }
}
