//! Bitmap display device.

use std::fmt::{self, Debug};

use mipsim_arch::mem::{Error, Memory, Result};
use mipsim_arch::{Byte, Word};

/// Framebuffer start offset within the device range.
const FB: Word = 16;

/// A dirty region in pixel coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Rect {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl Rect {
    fn around(x: u32, y: u32) -> Self {
        Self { x, y, w: 1, h: 1 }
    }

    /// Checks whether a pixel touches or borders the region.
    fn adjacent(&self, x: u32, y: u32) -> bool {
        x + 1 >= self.x && x <= self.x + self.w && y + 1 >= self.y && y <= self.y + self.h
    }

    fn grow(&mut self, x: u32, y: u32) {
        let right = (self.x + self.w).max(x + 1);
        let bottom = (self.y + self.h).max(y + 1);
        self.x = self.x.min(x);
        self.y = self.y.min(y);
        self.w = right - self.x;
        self.h = bottom - self.y;
    }
}

/// Flush callback: consolidated dirty regions plus the full framebuffer.
pub type Flush = Box<dyn FnMut(&[Rect], &[Byte])>;

/// Bitmap framebuffer device.
///
/// | Offset | Name   | Description                          |
/// |:------:|--------|--------------------------------------|
/// | `+0`   | Width  | Pixels per row (read-only)           |
/// | `+4`   | Height | Rows (read-only)                     |
/// | `+8`   | Dirty  | Pending dirty-region count           |
/// | `+12`  | Flush  | Any write flushes pending regions    |
/// | `+16`  | Pixels | `width * height * 4` framebuffer     |
///
/// Framebuffer writes grow a pending dirty region while they stay adjacent;
/// non-adjacent writes open a new region. A flush hands the consolidated
/// regions and the framebuffer to the callback, then clears the pending set.
pub struct Bitmap {
    /// Width in pixels.
    width: u32,
    /// Height in pixels.
    height: u32,
    /// Framebuffer, 4 bytes per pixel.
    pixels: Vec<Byte>,
    /// Pending dirty regions.
    dirty: Vec<Rect>,
    /// Flush callback.
    on_flush: Option<Flush>,
}

impl Bitmap {
    /// Constructs a new `Bitmap` of the given dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
            dirty: Vec::new(),
            on_flush: None,
        }
    }

    /// Attaches the flush callback.
    pub fn attach(&mut self, on_flush: Flush) {
        self.on_flush = Some(on_flush);
    }

    /// Gets the framebuffer contents.
    #[must_use]
    pub fn pixels(&self) -> &[Byte] {
        &self.pixels
    }

    /// Gets the pending dirty regions.
    #[must_use]
    pub fn dirty(&self) -> &[Rect] {
        &self.dirty
    }

    /// Flushes pending regions through the callback.
    pub fn flush(&mut self) {
        if let Some(on_flush) = &mut self.on_flush {
            on_flush(&self.dirty, &self.pixels);
        }
        self.dirty.clear();
    }

    fn mark(&mut self, offset: Word) {
        let pixel = offset / 4;
        let (x, y) = (pixel % self.width, pixel / self.width);
        if let Some(last) = self.dirty.last_mut() {
            if last.adjacent(x, y) {
                last.grow(x, y);
                return;
            }
        }
        self.dirty.push(Rect::around(x, y));
    }
}

impl Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Memory for Bitmap {
    fn read(&self, addr: Word) -> Result<Byte> {
        let word = |value: u32| value.to_le_bytes()[(addr % 4) as usize];
        match addr {
            0..=3 => Ok(word(self.width)),
            4..=7 => Ok(word(self.height)),
            8..=11 => Ok(word(self.dirty.len() as u32)),
            12..=15 => Ok(0),
            _ => self
                .pixels
                .get((addr - FB) as usize)
                .copied()
                .ok_or(Error::Range),
        }
    }

    fn write(&mut self, addr: Word, data: Byte) -> Result<()> {
        match addr {
            // Geometry is fixed at construction.
            0..=7 => Err(Error::Misuse),
            8..=11 => Ok(()),
            // Only the command word's first byte triggers, so a word-wide
            // store flushes once.
            12 => {
                self.flush();
                Ok(())
            }
            13..=15 => Ok(()),
            _ => {
                let offset = addr - FB;
                let slot = self
                    .pixels
                    .get_mut(offset as usize)
                    .ok_or(Error::Range)?;
                *slot = data;
                self.mark(offset);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn geometry_reads_work() {
        let bitmap = Bitmap::new(64, 32);
        assert_eq!(bitmap.read(0), Ok(64));
        assert_eq!(bitmap.read(4), Ok(32));
        assert_eq!(bitmap.read(1), Ok(0));
    }

    #[test]
    fn adjacent_writes_grow_one_region() {
        let mut bitmap = Bitmap::new(64, 64);
        for offset in 0..8 {
            bitmap.write(FB + offset, 0xff).unwrap();
        }
        // Two pixels side by side, one region.
        assert_eq!(bitmap.dirty(), &[Rect { x: 0, y: 0, w: 2, h: 1 }]);
    }

    #[test]
    fn distant_writes_open_new_region() {
        let mut bitmap = Bitmap::new(64, 64);
        bitmap.write(FB, 0xff).unwrap();
        bitmap.write(FB + 40 * 64 * 4, 0xff).unwrap();
        assert_eq!(bitmap.dirty().len(), 2);
    }

    #[test]
    fn flush_fires_callback_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bitmap = Bitmap::new(64, 64);
        let sink = seen.clone();
        bitmap.attach(Box::new(move |regions, pixels| {
            sink.borrow_mut().push((regions.to_vec(), pixels[..4].to_vec()));
        }));
        for (idx, byte) in [1, 2, 3, 4].into_iter().enumerate() {
            bitmap.write(FB + idx as Word, byte).unwrap();
        }
        bitmap.write(12, 1).unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        let (regions, pixels) = &seen[0];
        assert_eq!(regions.as_slice(), &[Rect { x: 0, y: 0, w: 1, h: 1 }]);
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4]);
        assert!(bitmap.dirty().is_empty());
    }
}
