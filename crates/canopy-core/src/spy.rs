#![forbid(unsafe_code)]

//! Read tracking for observer runs.
//!
//! While an observer runs, every read of an observable value reports a
//! [`ReadPath`] to the [`PathTracker`]. The paths recorded between
//! [`start_spy`](PathTracker::start_spy) and
//! [`stop_spy`](PathTracker::stop_spy) become the observer's dependencies.
//!
//! # Invariants
//!
//! 1. Frames form a stack. An inner observer's frame is closed before the
//!    outer frame records again.
//! 2. Within a frame only the deepest path per branch is kept: reading
//!    `/a` then `/a/b` records `["/a/b"]`.
//! 3. A paused frame records nothing. Pauses nest and are released through
//!    the [`PauseToken`] returned by [`pause`](PathTracker::pause).

use crate::error::{Error, Result};
use crate::id::Uid;
use crate::path::ReadPath;

#[derive(Debug, Clone)]
struct SpyFrame {
    observer: Uid,
    paths: Vec<ReadPath>,
    paused: u32,
}

/// Handle releasing one [`PathTracker::pause`].
///
/// Holds the depth and observer of the frame it paused, or nothing when no
/// frame was active. Pass it back to [`PathTracker::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pause must be released with PathTracker::resume"]
pub struct PauseToken(Option<(usize, Uid)>);

/// Stack of spy frames, one per running observer.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    frames: Vec<SpyFrame>,
}

impl PathTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a frame for `observer`.
    pub fn start_spy(&mut self, observer: Uid) {
        self.frames.push(SpyFrame {
            observer,
            paths: Vec::new(),
            paused: 0,
        });
    }

    /// Close the top frame and return what it recorded.
    ///
    /// # Errors
    ///
    /// [`Error::SpyMismatch`] if the top frame belongs to another observer
    /// or no frame is open. The stack is left untouched in that case.
    pub fn stop_spy(&mut self, observer: Uid) -> Result<Vec<ReadPath>> {
        match self.frames.last() {
            Some(frame) if frame.observer == observer => {}
            other => {
                return Err(Error::SpyMismatch {
                    expected: observer,
                    found: other.map(|frame| frame.observer),
                });
            }
        }
        Ok(self.frames.pop().map(|frame| frame.paths).unwrap_or_default())
    }

    /// Record a read in the top frame, if one is active.
    pub fn notify_read(&mut self, read: ReadPath) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.paused > 0 {
            return;
        }
        let paths = &mut frame.paths;
        if paths
            .iter()
            .any(|existing| existing.source == read.source && existing.path.starts_with(&read.path))
        {
            return;
        }
        let shallower = |existing: &ReadPath| {
            existing.source == read.source && read.path.starts_with(&existing.path)
        };
        match paths.iter().position(shallower) {
            Some(first) => {
                paths[first] = read.clone();
                let mut index = 0;
                paths.retain(|existing| {
                    let keep = index <= first || !shallower(existing);
                    index += 1;
                    keep
                });
            }
            None => paths.push(read),
        }
    }

    /// Suspend recording in the top frame.
    pub fn pause(&mut self) -> PauseToken {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.paused += 1;
                let observer = frame.observer;
                PauseToken(Some((self.frames.len() - 1, observer)))
            }
            None => PauseToken(None),
        }
    }

    /// Release a pause. A token whose frame has been closed is ignored,
    /// even if another observer's frame now sits at the same depth.
    pub fn resume(&mut self, token: PauseToken) {
        if let Some((depth, observer)) = token.0
            && let Some(frame) = self.frames.get_mut(depth)
            && frame.observer == observer
        {
            frame.paused = frame.paused.saturating_sub(1);
        }
    }

    /// Whether `observer` has an open frame anywhere in the stack.
    #[must_use]
    pub fn is_spying(&self, observer: Uid) -> bool {
        self.frames.iter().any(|frame| frame.observer == observer)
    }

    /// The observer owning the top frame.
    #[must_use]
    pub fn current(&self) -> Option<Uid> {
        self.frames.last().map(|frame| frame.observer)
    }

    /// Whether a read right now would be recorded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.paused == 0)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop every frame of `observer`, discarding what it recorded.
    pub fn detach(&mut self, observer: Uid) -> bool {
        let before = self.frames.len();
        self.frames.retain(|frame| frame.observer != observer);
        self.frames.len() != before
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
