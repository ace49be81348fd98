//! Framing of outbound data-characteristic notifications.
//!
//! A payload that does not fit into one notification is split in two:
//! a `Data` frame with the first [`MAX_FIRST_PART`] bytes followed by a
//! `DataPart2` frame with the rest. Each frame owns its buffer, so nothing
//! is shared between building a frame and the (asynchronous) send.

use heapless::Vec;

use super::error::FrameError;
use crate::bus::Status;

/// Payload bytes carried by one notification.
pub const MAX_FIRST_PART: usize = 150;

/// Longest payload that can be framed (two parts).
pub const MAX_PAYLOAD_LEN: usize = 2 * MAX_FIRST_PART;

pub const HEADER_LEN: usize = 2;
pub const OFFSET_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = HEADER_LEN + OFFSET_LEN + MAX_FIRST_PART;

pub type Frame = Vec<u8, MAX_FRAME_LEN>;

const HELLO: &[u8] = b"Hello";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseType {
    CommandResult = 1,
    Data = 2,
    DataPart2 = 3,
}

impl TryFrom<u8> for ResponseType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ResponseType::CommandResult),
            2 => Ok(ResponseType::Data),
            3 => Ok(ResponseType::DataPart2),
            other => Err(FrameError::UnknownResponseType(other)),
        }
    }
}

/// One or two frames produced from a single payload, in sending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frames {
    first: Frame,
    second: Option<Frame>,
}

impl Frames {
    /// Frame a payload with a running byte offset.
    ///
    /// The second part's offset is `offset` plus the length of the first part.
    /// An empty payload produces a single header-only frame, which marks the
    /// end of a stream.
    pub fn with_offset(reference: u8, offset: u32, payload: &[u8]) -> Result<Self, FrameError> {
        Self::split(reference, Some(offset), payload)
    }

    /// Frame a payload without the offset field (live sensor streams).
    pub fn without_offset(reference: u8, payload: &[u8]) -> Result<Self, FrameError> {
        Self::split(reference, None, payload)
    }

    fn split(reference: u8, offset: Option<u32>, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }

        let split_at = payload.len().min(MAX_FIRST_PART);
        let (head, tail) = payload.split_at(split_at);

        let first = build(ResponseType::Data, reference, offset, head)?;
        let second = if tail.is_empty() {
            None
        } else {
            // head is at most MAX_FIRST_PART long, so this cannot wrap
            let offset = offset.map(|o| o.wrapping_add(head.len() as u32));
            Some(build(ResponseType::DataPart2, reference, offset, tail)?)
        };

        Ok(Self { first, second })
    }

    /// Number of notifications needed, one or two.
    pub fn count(&self) -> usize {
        1 + self.second.is_some() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        core::iter::once(self.first.as_slice()).chain(self.second.as_deref())
    }
}

impl IntoIterator for Frames {
    type Item = Frame;
    type IntoIter = core::iter::Chain<core::iter::Once<Frame>, core::option::IntoIter<Frame>>;

    fn into_iter(self) -> Self::IntoIter {
        core::iter::once(self.first).chain(self.second)
    }
}

/// `[CommandResult][reference]"Hello"`. Command results carry no offset.
pub fn hello(reference: u8) -> Frame {
    let mut frame = Frame::new();
    // Fits: header plus five bytes
    let _ = frame.extend_from_slice(&[ResponseType::CommandResult as u8, reference]);
    let _ = frame.extend_from_slice(HELLO);
    frame
}

/// `[CommandResult][reference][status, big endian]`.
pub fn status(reference: u8, status: Status) -> Frame {
    let mut frame = Frame::new();
    let _ = frame.extend_from_slice(&[ResponseType::CommandResult as u8, reference]);
    let _ = frame.extend_from_slice(&status.to_be_bytes());
    frame
}

fn build(
    kind: ResponseType,
    reference: u8,
    offset: Option<u32>,
    payload: &[u8],
) -> Result<Frame, FrameError> {
    let too_large = |_| FrameError::PayloadTooLarge(payload.len());

    let mut frame = Frame::new();
    frame
        .extend_from_slice(&[kind as u8, reference])
        .map_err(too_large)?;
    if let Some(offset) = offset {
        frame
            .extend_from_slice(&offset.to_le_bytes())
            .map_err(too_large)?;
    }
    frame.extend_from_slice(payload).map_err(too_large)?;

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> std::vec::Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    fn offset_of(frame: &[u8]) -> u32 {
        u32::from_le_bytes(frame[2..6].try_into().unwrap())
    }

    #[test]
    fn test_frame_count_and_payload_preserved() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let data = payload(len);
            let frames = Frames::with_offset(4, 1000, &data).unwrap();

            let expected = if len <= MAX_FIRST_PART { 1 } else { 2 };
            assert_eq!(frames.count(), expected, "len {len}");

            let joined: std::vec::Vec<u8> = frames
                .iter()
                .flat_map(|frame| frame[HEADER_LEN + OFFSET_LEN..].to_vec())
                .collect();
            assert_eq!(joined, data, "len {len}");

            let parts: std::vec::Vec<&[u8]> = frames.iter().collect();
            assert_eq!(parts[0][0], ResponseType::Data as u8);
            assert_eq!(parts[0][1], 4);
            assert_eq!(offset_of(parts[0]), 1000);
            if let Some(second) = parts.get(1) {
                assert_eq!(second[0], ResponseType::DataPart2 as u8);
                assert_eq!(second[1], 4);
                assert_eq!(offset_of(second), 1000 + MAX_FIRST_PART as u32);
            }
        }
    }

    #[test]
    fn test_empty_payload_is_end_marker() {
        let frames = Frames::with_offset(7, 320, &[]).unwrap();
        let parts: std::vec::Vec<&[u8]> = frames.iter().collect();

        assert_eq!(parts, vec![&[2u8, 7, 64, 1, 0, 0][..]]);
    }

    #[test]
    fn test_without_offset() {
        let data = payload(200);
        let frames = Frames::without_offset(3, &data).unwrap();
        let parts: std::vec::Vec<&[u8]> = frames.iter().collect();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), HEADER_LEN + MAX_FIRST_PART);
        assert_eq!(&parts[0][..2], &[2, 3]);
        assert_eq!(&parts[1][..2], &[3, 3]);
        assert_eq!(&parts[1][2..], &data[MAX_FIRST_PART..]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let data = payload(MAX_PAYLOAD_LEN + 1);
        assert_eq!(
            Frames::with_offset(1, 0, &data),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_hello_has_no_offset() {
        assert_eq!(hello(9).as_slice(), &[1, 9, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_status_frame() {
        assert_eq!(
            status(5, Status::INSUFFICIENT_STORAGE).as_slice(),
            &[1, 5, 0x01, 0xFB]
        );
    }
}
