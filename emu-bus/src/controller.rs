//! Range-mapped memory controller.

use crate::device::BusDevice;
use crate::fault::BusFault;

/// Anything a CPU-like consumer can read and write through.
///
/// Keeps the CPU generic over the concrete machine wiring: a flat test RAM
/// and a full machine bus both satisfy it.
pub trait Bus {
    /// Read one byte from the 16-bit address space.
    fn read(&mut self, addr: u16) -> Result<u8, BusFault>;

    /// Write one byte to the 16-bit address space.
    fn write(&mut self, addr: u16, value: u8) -> Result<(), BusFault>;
}

struct MappedRange<D> {
    device: D,
    start: u32,
    end: u32,
}

/// Address decoder: dispatches each access to the first mapped range that
/// contains it, with the region base subtracted.
///
/// Ranges are half-open `[start, end)`. Overlap is not policed; the first
/// match wins, and the wiring is expected to keep ranges disjoint.
pub struct MemoryController<D> {
    ranges: Vec<MappedRange<D>>,
}

impl<D: BusDevice> MemoryController<D> {
    #[must_use]
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Map `device` over `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty or extends past the 16-bit space; that
    /// is a wiring bug, not a runtime condition.
    pub fn add_memory(&mut self, device: D, start: u32, end: u32) {
        assert!(end > start, "empty bus range {start:#X}..{end:#X}");
        assert!(end <= 0x1_0000, "bus range {start:#X}..{end:#X} exceeds 16-bit space");
        self.ranges.push(MappedRange { device, start, end });
    }

    /// Read 8 consecutive bytes starting at `addr`, assembled little-endian.
    ///
    /// Used for pattern-table plane fetches, which always sit well inside a
    /// single mapped region.
    pub fn read64(&mut self, addr: u16) -> Result<u64, BusFault> {
        let mut value = 0u64;
        for i in 0..8 {
            let byte = self.read(addr.wrapping_add(i))?;
            value |= u64::from(byte) << (8 * i);
        }
        Ok(value)
    }

    fn range_for(&mut self, addr: u16) -> Option<&mut MappedRange<D>> {
        let a = u32::from(addr);
        self.ranges.iter_mut().find(|r| r.start <= a && a < r.end)
    }
}

impl<D: BusDevice> Bus for MemoryController<D> {
    fn read(&mut self, addr: u16) -> Result<u8, BusFault> {
        match self.range_for(addr) {
            Some(range) => {
                let base = range.start as u16;
                range.device.read(addr - base).map_err(|f| f.rebase(base))
            }
            None => Err(BusFault::Unmapped { addr }),
        }
    }

    fn write(&mut self, addr: u16, value: u8) -> Result<(), BusFault> {
        match self.range_for(addr) {
            Some(range) => {
                let base = range.start as u16;
                range
                    .device
                    .write(addr - base, value)
                    .map_err(|f| f.rebase(base))
            }
            None => Err(BusFault::Unmapped { addr }),
        }
    }
}

impl<D: BusDevice> Default for MemoryController<D> {
    fn default() -> Self {
        Self::new()
    }
}
