use tracing::debug;

use crate::pacing::FrameRate;

/// One encoded frame as produced by a [`crate::FrameCodec`].
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedFrame {
    data: Vec<u8>,
}

impl CompressedFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for CompressedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedFrame")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Observable state of a [`FrameCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Zero capacity; frames are never stored.
    Disabled,
    /// `written` slots filled so far, always below capacity.
    Recording { written: usize },
    /// Every slot filled; `cursor` is the next slot handed out.
    Playback { cursor: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("frame cache is disabled")]
    Disabled,
    #[error("frame cache is already full ({capacity} frames)")]
    Full { capacity: usize },
    #[error("frame cache holds {requested} slots which does not fit in memory")]
    TooLarge { requested: u64 },
}

/// Fixed-capacity loop of compressed frames.
///
/// Slots are written in order until the cache is full, after which the cache
/// is permanently in playback and hands slots out cyclically. Written slots are
/// never replaced.
#[derive(Debug)]
pub struct FrameCache {
    capacity: usize,
    frames: Vec<CompressedFrame>,
    cursor: usize,
}

impl FrameCache {
    /// Sizes the cache for `seconds` of animation at `rate`.
    pub fn new(seconds: u32, rate: FrameRate) -> Result<Self, CacheError> {
        let requested = u64::from(seconds) * u64::from(rate.get());
        let capacity =
            usize::try_from(requested).map_err(|_| CacheError::TooLarge { requested })?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::with_capacity(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> CacheMode {
        if self.capacity == 0 {
            CacheMode::Disabled
        } else if self.frames.len() < self.capacity {
            CacheMode::Recording {
                written: self.frames.len(),
            }
        } else {
            CacheMode::Playback {
                cursor: self.cursor,
            }
        }
    }

    /// Total encoded bytes currently held.
    pub fn stored_bytes(&self) -> usize {
        self.frames.iter().map(CompressedFrame::len).sum()
    }

    /// Appends the next frame and reports the resulting mode.
    pub fn record(&mut self, frame: CompressedFrame) -> Result<CacheMode, CacheError> {
        match self.mode() {
            CacheMode::Disabled => Err(CacheError::Disabled),
            CacheMode::Playback { .. } => Err(CacheError::Full {
                capacity: self.capacity,
            }),
            CacheMode::Recording { written } => {
                debug!(index = written, bytes = frame.len(), "cached frame");
                self.frames.push(frame);
                let mode = self.mode();
                if matches!(mode, CacheMode::Playback { .. }) {
                    debug!(
                        frames = self.capacity,
                        bytes = self.stored_bytes(),
                        "frame cache full, switching to playback"
                    );
                }
                Ok(mode)
            }
        }
    }

    /// Returns the slot under the cursor and advances it modulo capacity.
    ///
    /// `None` unless the cache is in playback.
    pub fn next_frame(&mut self) -> Option<(usize, &CompressedFrame)> {
        if !matches!(self.mode(), CacheMode::Playback { .. }) {
            return None;
        }
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.capacity;
        self.frames.get(index).map(|frame| (index, frame))
    }

    /// Drops every stored frame and disables the cache. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.capacity == 0 && self.frames.capacity() == 0 {
            return;
        }
        debug!(frames = self.frames.len(), "releasing frame cache");
        self.frames = Vec::new();
        self.capacity = 0;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> CompressedFrame {
        CompressedFrame::new(vec![tag; 3])
    }

    #[test]
    fn capacity_is_seconds_times_fps() {
        let cache = FrameCache::new(3, FrameRate::new(24).unwrap()).unwrap();
        assert_eq!(cache.capacity(), 72);
        assert_eq!(cache.mode(), CacheMode::Recording { written: 0 });

        let cache = FrameCache::new(0, FrameRate::new(60).unwrap()).unwrap();
        assert_eq!(cache.mode(), CacheMode::Disabled);
    }

    #[test]
    fn flips_to_playback_on_last_slot() {
        let mut cache = FrameCache::with_capacity(2);
        assert_eq!(
            cache.record(frame(0)).unwrap(),
            CacheMode::Recording { written: 1 }
        );
        assert!(cache.next_frame().is_none());
        assert_eq!(
            cache.record(frame(1)).unwrap(),
            CacheMode::Playback { cursor: 0 }
        );
        assert!(matches!(cache.record(frame(2)), Err(CacheError::Full { capacity: 2 })));
    }

    #[test]
    fn playback_wraps() {
        let mut cache = FrameCache::with_capacity(3);
        for tag in 0..3 {
            cache.record(frame(tag)).unwrap();
        }
        let order: Vec<(usize, u8)> = (0..7)
            .map(|_| {
                let (index, frame) = cache.next_frame().unwrap();
                (index, frame.as_bytes()[0])
            })
            .collect();
        assert_eq!(
            order,
            vec![(0, 0), (1, 1), (2, 2), (0, 0), (1, 1), (2, 2), (0, 0)]
        );
    }

    #[test]
    fn disabled_cache_refuses_frames() {
        let mut cache = FrameCache::disabled();
        assert!(matches!(cache.record(frame(0)), Err(CacheError::Disabled)));
        assert!(cache.next_frame().is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let mut cache = FrameCache::with_capacity(2);
        cache.record(frame(9)).unwrap();
        cache.release();
        cache.release();
        assert_eq!(cache.mode(), CacheMode::Disabled);
        assert_eq!(cache.stored_bytes(), 0);
    }
}
