//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed at the current logical time.
    fn record_access(&self, frame_id: FrameId);

    /// Flips the evictability bit of a tracked frame.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects and removes a victim frame for eviction.
    ///
    /// Returns None if no frame is evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Drops a frame from the replacer unconditionally.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement algorithm.
///
/// Prefers to evict the frame whose k-th most recent access is oldest
/// (largest backward k-distance). Frames with fewer than k recorded
/// accesses have infinite backward k-distance and win over all others,
/// tie-broken by earliest first access (classic LRU).
pub struct LruKReplacer {
    /// Upper bound on tracked frame ids.
    num_frames: usize,
    /// The K in LRU-K.
    k: usize,
    /// State protected by a single exclusive latch.
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    /// Access history and evictability per tracked frame.
    frames: HashMap<FrameId, FrameAccess>,
    /// Monotonic logical timestamp, advanced on every operation.
    current_ts: u64,
    /// Number of tracked frames currently evictable.
    evictable_count: usize,
}

struct FrameAccess {
    /// Most recent access timestamps, oldest first. At most k are kept;
    /// a frame that has never reached k accesses retains its true first
    /// access at the front.
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer tracking frame ids up to `num_frames`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                frames: HashMap::new(),
                current_ts: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Returns the K parameter.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            (frame_id.0 as usize) <= self.num_frames,
            "frame id {} outside replacer range {}",
            frame_id,
            self.num_frames
        );
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        inner.current_ts += 1;
        let ts = inner.current_ts;
        let k = self.k;

        let access = inner.frames.entry(frame_id).or_insert_with(|| FrameAccess {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        access.history.push_back(ts);
        if access.history.len() > k {
            access.history.pop_front();
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        inner.current_ts += 1;

        let inner = &mut *inner;
        let Some(access) = inner.frames.get_mut(&frame_id) else {
            return;
        };
        if access.evictable == evictable {
            return;
        }
        access.evictable = evictable;
        if evictable {
            inner.evictable_count += 1;
        } else {
            inner.evictable_count -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.current_ts += 1;

        // Group A: fewer than k accesses (infinite backward k-distance),
        // tie-broken by earliest first access. Group B: k-th most recent
        // access is the front of the truncated history; smallest wins.
        let mut infinite: Option<(FrameId, u64)> = None;
        let mut finite: Option<(FrameId, u64)> = None;

        for (&fid, access) in &inner.frames {
            if !access.evictable {
                continue;
            }
            let first = *access.history.front().expect("tracked frame with empty history");
            if access.history.len() < self.k {
                if infinite.map_or(true, |(_, ts)| first < ts) {
                    infinite = Some((fid, first));
                }
            } else if finite.map_or(true, |(_, ts)| first < ts) {
                finite = Some((fid, first));
            }
        }

        let victim = infinite.or(finite).map(|(fid, _)| fid)?;
        inner.frames.remove(&victim);
        inner.evictable_count -= 1;
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();
        inner.current_ts += 1;

        let Some(access) = inner.frames.get(&frame_id) else {
            return;
        };
        assert!(
            access.evictable,
            "removing non-evictable frame {} from replacer",
            frame_id
        );
        inner.frames.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
