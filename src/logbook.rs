//! Paginated log fetching.
//!
//! One fetch can be active at a time. Each page result either asks for the
//! next page (`Status::CONTINUE`) or ends the log, in which case a
//! header-only `Data` frame is appended as the end-of-log marker.

use heapless::Vec;

use crate::bus::{RequestId, Status};
use crate::protocol::{Frame, FrameError, Frames};

/// Two data parts plus the end-of-log marker.
pub const MAX_PAGE_FRAMES: usize = 3;

pub type PageFrames = Vec<Frame, MAX_PAGE_FRAMES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// More pages follow; request the next one
    NextPage,
    /// Log fully sent, session cleared
    Finished,
    /// Fetch abandoned; the session is left as it was
    Aborted,
}

#[derive(Debug)]
pub struct Page {
    pub frames: PageFrames,
    pub step: Step,
}

impl Page {
    fn aborted() -> Self {
        Self {
            frames: Vec::new(),
            step: Step::Aborted,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogFetch {
    log_id: u32,
    offset: u32,
    reference: u8,
    pending: Option<RequestId>,
}

impl LogFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start streaming `log_id`, replacing whatever fetch was in progress.
    pub fn begin(&mut self, log_id: u32, reference: u8) {
        if self.is_active() {
            debug!("replacing log fetch {} with {}", self.log_id, log_id);
        }

        *self = Self {
            log_id,
            offset: 0,
            reference,
            pending: None,
        };
    }

    pub fn is_active(&self) -> bool {
        self.log_id != 0
    }

    pub fn log_id(&self) -> u32 {
        self.log_id
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn reference(&self) -> u8 {
        self.reference
    }

    pub fn pending(&self) -> Option<RequestId> {
        self.pending
    }

    pub fn page_requested(&mut self, request: RequestId) {
        self.pending = Some(request);
    }

    /// Whether `request` is the outstanding page request of this session.
    pub fn owns(&self, request: RequestId) -> bool {
        self.is_active() && self.pending == Some(request)
    }

    /// Stop waiting for pages without clearing the session.
    pub fn abandon(&mut self) {
        self.pending = None;
    }

    /// Turn a page result into outbound frames and decide what comes next.
    pub fn on_page(&mut self, status: Status, bytes: &[u8]) -> Page {
        self.pending = None;

        if status.is_error() {
            warn!("log {} page failed: {}", self.log_id, status.0);
            return Page::aborted();
        }

        match self.frame_page(status, bytes) {
            Ok(page) => page,
            Err(e) => {
                error!("log {} page not framed: {:?}", self.log_id, e);
                Page::aborted()
            }
        }
    }

    fn frame_page(&mut self, status: Status, bytes: &[u8]) -> Result<Page, FrameError> {
        let mut frames = PageFrames::new();

        if !bytes.is_empty() {
            for frame in Frames::with_offset(self.reference, self.offset, bytes)? {
                let _ = frames.push(frame);
            }
            self.offset = self.offset.wrapping_add(bytes.len() as u32);
        }

        if status == Status::CONTINUE {
            return Ok(Page {
                frames,
                step: Step::NextPage,
            });
        }

        info!("log {} complete, {} bytes", self.log_id, self.offset);
        for frame in Frames::with_offset(self.reference, self.offset, &[])? {
            let _ = frames.push(frame);
        }
        *self = Self::default();

        Ok(Page {
            frames,
            step: Step::Finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_of(frame: &[u8]) -> u32 {
        u32::from_le_bytes(frame[2..6].try_into().unwrap())
    }

    #[test]
    fn test_begin_opens_session() {
        let mut fetch = LogFetch::new();
        assert!(!fetch.is_active());

        fetch.begin(42, 101);
        fetch.page_requested(RequestId(1));

        assert!(fetch.is_active());
        assert_eq!(fetch.log_id(), 42);
        assert_eq!(fetch.offset(), 0);
        assert_eq!(fetch.reference(), 101);
        assert!(fetch.owns(RequestId(1)));
        assert!(!fetch.owns(RequestId(2)));
    }

    #[test]
    fn test_continue_advances_offset() {
        let mut fetch = LogFetch::new();
        fetch.begin(1, 9);

        let page = fetch.on_page(Status::CONTINUE, &[0xAA; 200]);
        assert_eq!(page.step, Step::NextPage);
        assert_eq!(page.frames.len(), 2);
        assert_eq!(offset_of(&page.frames[0]), 0);
        assert_eq!(offset_of(&page.frames[1]), 150);
        assert_eq!(fetch.offset(), 200);

        let page = fetch.on_page(Status::CONTINUE, &[0xBB; 10]);
        assert_eq!(page.frames.len(), 1);
        assert_eq!(offset_of(&page.frames[0]), 200);
        assert_eq!(fetch.offset(), 210);
        assert!(fetch.is_active());
    }

    #[test]
    fn test_final_page_appends_end_marker() {
        let mut fetch = LogFetch::new();
        fetch.begin(1, 9);
        fetch.on_page(Status::CONTINUE, &[1; 100]);

        let page = fetch.on_page(Status::OK, &[2; 20]);

        assert_eq!(page.step, Step::Finished);
        assert_eq!(page.frames.len(), 2);
        assert_eq!(offset_of(&page.frames[0]), 100);
        assert_eq!(page.frames[1].as_slice(), &[2, 9, 120, 0, 0, 0]);
        assert_eq!(fetch, LogFetch::default());
    }

    #[test]
    fn test_empty_final_page_sends_only_marker() {
        let mut fetch = LogFetch::new();
        fetch.begin(1, 9);
        fetch.on_page(Status::CONTINUE, &[1; 30]);

        let page = fetch.on_page(Status::OK, &[]);

        assert_eq!(page.frames.len(), 1);
        assert_eq!(page.frames[0].as_slice(), &[2, 9, 30, 0, 0, 0]);
    }

    #[test]
    fn test_error_leaves_session_stale() {
        let mut fetch = LogFetch::new();
        fetch.begin(5, 3);
        fetch.on_page(Status::CONTINUE, &[0; 40]);
        fetch.page_requested(RequestId(8));

        let page = fetch.on_page(Status::NOT_FOUND, &[1, 2, 3]);

        assert_eq!(page.step, Step::Aborted);
        assert!(page.frames.is_empty());
        assert!(fetch.is_active());
        assert_eq!(fetch.offset(), 40);
        assert_eq!(fetch.pending(), None);
    }

    #[test]
    fn test_oversized_page_aborts() {
        let mut fetch = LogFetch::new();
        fetch.begin(5, 3);

        let page = fetch.on_page(Status::CONTINUE, &[0; 301]);

        assert_eq!(page.step, Step::Aborted);
        assert_eq!(fetch.offset(), 0);
    }
}
