// SPDX-License-Identifier: CEPL-1.0
//! Lazily created render-target views, one per swapchain image.

use tracing::debug;

use crate::error::{PipelineError, PipelineResult, PlatformContext};
use crate::{Device, DisplayFormat, Swapchain};

/// Placement of one view inside a [`ViewHeap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewSlot {
    pub index: u32,
    pub offset: u64,
}

/// Fixed block of view descriptors with a constant stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewHeap {
    base: u64,
    stride: u32,
    capacity: u32,
}

impl ViewHeap {
    pub fn new(base: u64, stride: u32, capacity: u32) -> Self {
        Self {
            base,
            stride,
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Slot for `index`, at `base + index * stride`.
    pub fn slot(&self, index: u32) -> PipelineResult<ViewSlot> {
        if index >= self.capacity {
            return Err(PipelineError::ViewHeapExhausted {
                index,
                capacity: self.capacity,
            });
        }
        Ok(ViewSlot {
            index,
            offset: self.base + u64::from(index) * u64::from(self.stride),
        })
    }
}

/// A swapchain image together with its render-target view.
#[derive(Debug)]
pub struct Backbuffer<I, V> {
    pub image: I,
    pub view: V,
}

/// Arena of backbuffers indexed by swapchain image index.
///
/// An entry is filled on first use and then trusted until
/// [`invalidate_all`](Self::invalidate_all); callers invalidate before the
/// swapchain images can change.
pub struct BackbufferCache<I, V> {
    entries: Box<[Option<Backbuffer<I, V>>]>,
    views_created: u64,
}

impl<I, V: Copy> BackbufferCache<I, V> {
    pub fn new(image_count: u32) -> Self {
        Self {
            entries: Self::empty_entries(image_count),
            views_created: 0,
        }
    }

    fn empty_entries(image_count: u32) -> Box<[Option<Backbuffer<I, V>>]> {
        (0..image_count).map(|_| None).collect()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn is_populated(&self, image_index: u32) -> bool {
        self.entries
            .get(image_index as usize)
            .is_some_and(Option::is_some)
    }

    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn views_created(&self) -> u64 {
        self.views_created
    }

    /// Cached backbuffer for `image_index`, created on a miss.
    pub fn get_or_create<D, S>(
        &mut self,
        image_index: u32,
        device: &mut D,
        swapchain: &mut S,
        heap: &ViewHeap,
        format: DisplayFormat,
    ) -> PipelineResult<&Backbuffer<I, V>>
    where
        D: Device<Image = I, View = V>,
        S: Swapchain<Image = I>,
    {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(image_index as usize)
            .ok_or(PipelineError::ImageIndexOutOfRange {
                index: image_index,
                count,
            })?;

        let backbuffer = match entry.take() {
            Some(cached) => cached,
            None => {
                let image = swapchain
                    .image(image_index)
                    .platform("get swapchain image")?;
                let slot = heap.slot(image_index)?;
                let view = device
                    .create_render_target_view(&image, format, slot)
                    .platform("create render target view")?;
                self.views_created += 1;
                debug!(image_index, offset = slot.offset, "backbuffer view created");
                Backbuffer { image, view }
            }
        };
        Ok(entry.insert(backbuffer))
    }

    /// Drops every entry, releasing the image references. Returns how many
    /// entries were populated.
    pub fn invalidate_all(&mut self) -> usize {
        let mut released = 0;
        for entry in self.entries.iter_mut() {
            if entry.take().is_some() {
                released += 1;
            }
        }
        released
    }

    /// Resizes the arena for a new swapchain generation, dropping all entries.
    pub fn rebuild(&mut self, image_count: u32) {
        self.invalidate_all();
        if self.entries.len() != image_count as usize {
            self.entries = Self::empty_entries(image_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_placed_by_stride() {
        let heap = ViewHeap::new(0x1000, 32, 64);
        assert_eq!(
            heap.slot(0).unwrap(),
            ViewSlot {
                index: 0,
                offset: 0x1000
            }
        );
        assert_eq!(heap.slot(3).unwrap().offset, 0x1000 + 3 * 32);
        assert_eq!(heap.slot(63).unwrap().offset, 0x1000 + 63 * 32);
    }

    #[test]
    fn slot_past_capacity_is_rejected() {
        let heap = ViewHeap::new(0, 8, 4);
        let err = heap.slot(4).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ViewHeapExhausted {
                index: 4,
                capacity: 4
            }
        ));
    }

    #[test]
    fn rebuild_follows_image_count() {
        let mut cache: BackbufferCache<u32, u32> = BackbufferCache::new(3);
        assert_eq!(cache.capacity(), 3);
        assert_eq!(cache.populated(), 0);
        cache.rebuild(4);
        assert_eq!(cache.capacity(), 4);
        assert!(!cache.is_populated(3));
        assert!(!cache.is_populated(9));
    }
}
