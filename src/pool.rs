//! Reusable pixel buffers for converted frames.
//!
//! The pool keeps a fixed set of backing allocations so the acquisition
//! loop does not allocate per frame. A buffer returns its storage to its
//! slot when dropped, whichever thread drops it. When every slot is taken
//! the pool hands out a fresh unpooled buffer instead of blocking.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Channel layout of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Three 8-bit channels, red first.
    Rgb,
    /// One 8-bit channel.
    Gray,
}

impl ChannelLayout {
    /// Bytes per pixel.
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Gray => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    width: u32,
    height: u32,
    layout: ChannelLayout,
}

impl Geometry {
    const fn len(self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels()
    }
}

struct Slot {
    in_use: AtomicBool,
    storage: Mutex<Vec<u8>>,
}

struct PoolShared {
    slots: Vec<Slot>,
    geometry: Mutex<Geometry>,
}

impl PoolShared {
    fn release(&self, index: usize, data: Vec<u8>) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        *lock(&slot.storage) = data;
        slot.in_use.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool of pixel buffers.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool of `capacity` slots, each pre-allocated for
    /// `max_width` x `max_height` pixels. The nominal size starts at the maximum.
    #[must_use]
    pub fn new(capacity: usize, max_width: u32, max_height: u32, layout: ChannelLayout) -> Self {
        let geometry = Geometry {
            width: max_width,
            height: max_height,
            layout,
        };
        let slots = (0..capacity)
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                storage: Mutex::new(vec![0; geometry.len()]),
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                slots,
                geometry: Mutex::new(geometry),
            }),
        }
    }

    /// Set the size of buffers returned from now on. Buffers already handed
    /// out keep their size.
    pub fn resize(&self, width: u32, height: u32) {
        let mut geometry = lock(&self.shared.geometry);
        geometry.width = width;
        geometry.height = height;
    }

    /// Current nominal `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        let geometry = *lock(&self.shared.geometry);
        (geometry.width, geometry.height)
    }

    /// Channel layout of returned buffers.
    pub fn layout(&self) -> ChannelLayout {
        lock(&self.shared.geometry).layout
    }

    /// Number of pooled slots.
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Number of slots not currently handed out.
    pub fn available(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|slot| !slot.in_use.load(Ordering::Acquire))
            .count()
    }

    /// Hand out a buffer of the current nominal size.
    ///
    /// The contents are unspecified; callers overwrite the whole buffer.
    pub fn acquire(&self) -> PixelBuffer {
        let geometry = *lock(&self.shared.geometry);

        for (index, slot) in self.shared.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let mut data = std::mem::take(&mut *lock(&slot.storage));
            data.resize(geometry.len(), 0);
            return PixelBuffer {
                geometry,
                data,
                sequence: 0,
                timestamp: Duration::ZERO,
                origin: Some(Origin {
                    pool: Arc::downgrade(&self.shared),
                    slot: index,
                }),
            };
        }

        log::trace!("buffer pool exhausted, allocating unpooled buffer");
        PixelBuffer::new(geometry.width, geometry.height, geometry.layout)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("BufferPool")
            .field("width", &width)
            .field("height", &height)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

struct Origin {
    pool: Weak<PoolShared>,
    slot: usize,
}

/// A display-ready image, pooled or standalone.
pub struct PixelBuffer {
    geometry: Geometry,
    data: Vec<u8>,
    sequence: u32,
    timestamp: Duration,
    origin: Option<Origin>,
}

impl PixelBuffer {
    /// Allocate a standalone buffer outside any pool.
    #[must_use]
    pub fn new(width: u32, height: u32, layout: ChannelLayout) -> Self {
        let geometry = Geometry {
            width,
            height,
            layout,
        };
        Self {
            data: vec![0; geometry.len()],
            geometry,
            sequence: 0,
            timestamp: Duration::ZERO,
            origin: None,
        }
    }

    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.geometry.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.geometry.height
    }

    /// Channel layout.
    pub const fn layout(&self) -> ChannelLayout {
        self.geometry.layout
    }

    /// Bytes per row.
    pub const fn stride(&self) -> usize {
        self.geometry.width as usize * self.geometry.layout.channels()
    }

    /// Pixel bytes, row major, no padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the storage belongs to a pool slot.
    pub const fn is_pooled(&self) -> bool {
        self.origin.is_some()
    }

    /// Pool slot index, if pooled.
    pub fn slot(&self) -> Option<usize> {
        self.origin.as_ref().map(|origin| origin.slot)
    }

    /// Sequence number of the raw frame this image was converted from.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Capture timestamp of the raw frame.
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub(crate) fn set_metadata(&mut self, sequence: u32, timestamp: Duration) {
        self.sequence = sequence;
        self.timestamp = timestamp;
    }

    /// Bytes of the pixel at (`x`, `y`), or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let channels = self.layout().channels();
        let offset = y as usize * self.stride() + x as usize * channels;
        self.data.get(offset..offset + channels)
    }

    /// RGB value of the pixel at (`x`, `y`). Gray pixels are replicated.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        match *self.pixel(x, y)? {
            [r, g, b] => Some((r, g, b)),
            [gray] => Some((gray, gray, gray)),
            _ => None,
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.geometry.width)
            .field("height", &self.geometry.height)
            .field("layout", &self.geometry.layout)
            .field("sequence", &self.sequence)
            .field("slot", &self.slot())
            .finish_non_exhaustive()
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(origin) = self.origin.take() {
            if let Some(pool) = origin.pool.upgrade() {
                pool.release(origin.slot, std::mem::take(&mut self.data));
            }
        }
    }
}
