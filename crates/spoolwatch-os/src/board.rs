use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use spoolwatch_hal::coredump::{Flash, PARTITION_TABLE_OFFSET, find_coredump_partition};
use spoolwatch_hal::platform::Board;
use spoolwatch_hal::system::HeapStats;

use tracing::{error, info};

// Simulated clock frequency, in MHz.
const CPU_MHZ: u128 = 240;

/// Default heap statistics of a [`SimulatedBoard`].
pub const DEFAULT_HEAP: HeapStats = HeapStats {
    free: 180_000,
    min_free: 152_000,
    max_alloc: 110_000,
};

/// A board simulated on the host.
///
/// Restarts and aborts are only counted, the process keeps running.
#[derive(Debug)]
pub struct SimulatedBoard {
    reset_code: u32,
    heap: HeapStats,
    boot: Instant,
    restarts: AtomicU32,
    aborts: AtomicU32,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    /// Creates a [`SimulatedBoard`] which has just been powered on.
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Power-on on both platform families.
            reset_code: 1,
            heap: DEFAULT_HEAP,
            boot: Instant::now(),
            restarts: AtomicU32::new(0),
            aborts: AtomicU32::new(0),
        }
    }

    /// Sets the raw reset value reported by the board.
    #[must_use]
    pub const fn reset_code(mut self, reset_code: u32) -> Self {
        self.reset_code = reset_code;
        self
    }

    /// Sets the heap statistics reported by the board.
    #[must_use]
    pub const fn heap(mut self, heap: HeapStats) -> Self {
        self.heap = heap;
        self
    }

    /// Returns the number of requested restarts.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Returns the number of requested aborts.
    #[must_use]
    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::Relaxed)
    }
}

impl Board for SimulatedBoard {
    fn raw_reset_reason(&self) -> u32 {
        self.reset_code
    }

    fn heap(&self) -> HeapStats {
        self.heap
    }

    fn cycle_count(&self) -> u32 {
        // The counter wraps, as on hardware.
        (self.boot.elapsed().as_micros().wrapping_mul(CPU_MHZ) & u128::from(u32::MAX)) as u32
    }

    fn restart(&self) {
        info!("Restart requested");
        let _ = self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    fn delay_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn abort(&self, message: &str) {
        error!("Abort requested: {message}");
        let _ = self.aborts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Errors of a [`MemoryFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryFlashError {
    /// The access falls outside of the flash.
    #[error("Access of {len} bytes at {address:#x} is out of range")]
    OutOfRange {
        /// Start address.
        address: u32,
        /// Access length.
        len: usize,
    },
    /// There is no crash dump partition.
    #[error("No crash dump partition")]
    NoPartition,
    /// The crash dump does not fit its partition.
    #[error("A crash dump of {0} bytes does not fit its partition")]
    TooLarge(usize),
}

// Erased flash value.
const ERASED: u8 = 0xFF;
// Size of a crash dump partition.
const COREDUMP_PARTITION_SIZE: u32 = 0x10000;
// Start of the application partition.
const APP_OFFSET: u32 = 0x10000;

/// A flash stored in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFlash {
    memory: Vec<u8>,
}

impl MemoryFlash {
    /// Creates an erased [`MemoryFlash`] of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: vec![ERASED; capacity],
        }
    }

    /// Creates a [`MemoryFlash`] of `capacity` bytes laid out as an `ESP32`
    /// flash: a partition table with an `nvs`, a `phy_init`, a `factory`
    /// application and a trailing crash dump partition.
    ///
    /// Returns an erased flash when `capacity` is too small for this layout.
    #[must_use]
    pub fn esp32(capacity: usize) -> Self {
        let mut flash = Self::new(capacity);

        let Some(coredump_offset) = u32::try_from(capacity)
            .ok()
            .and_then(|capacity| capacity.checked_sub(COREDUMP_PARTITION_SIZE))
            .filter(|offset| *offset > APP_OFFSET)
        else {
            return flash;
        };

        let partitions = [
            (0x01, 0x02, 0x9000, 0x5000),
            (0x01, 0x01, 0xF000, 0x1000),
            (0x00, 0x00, APP_OFFSET, coredump_offset - APP_OFFSET),
            (0x01, 0x03, coredump_offset, COREDUMP_PARTITION_SIZE),
        ];

        for (index, (kind, subtype, offset, size)) in partitions.into_iter().enumerate() {
            let mut entry = [ERASED; 32];
            entry[..2].copy_from_slice(&0x50AAu16.to_le_bytes());
            entry[2] = kind;
            entry[3] = subtype;
            entry[4..8].copy_from_slice(&u32::to_le_bytes(offset));
            entry[8..12].copy_from_slice(&u32::to_le_bytes(size));

            let start = PARTITION_TABLE_OFFSET as usize + index * entry.len();
            flash.memory[start..start + entry.len()].copy_from_slice(&entry);
        }

        flash
    }

    /// Writes `data` starting at `address`.
    ///
    /// # Errors
    ///
    /// The write falls outside of the flash.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryFlashError> {
        let range = self.range(address, data.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    /// Stores a crash dump image, as the firmware does when it crashes.
    ///
    /// The image is prefixed with its total length.
    ///
    /// # Errors
    ///
    /// - There is no crash dump partition
    /// - The image does not fit the partition
    pub fn store_coredump(&mut self, image: &[u8]) -> Result<(), MemoryFlashError> {
        let partition = find_coredump_partition(self)
            .ok()
            .flatten()
            .ok_or(MemoryFlashError::NoPartition)?;

        let total = image.len() + 4;
        let length = u32::try_from(total)
            .ok()
            .filter(|length| *length <= partition.size())
            .ok_or(MemoryFlashError::TooLarge(image.len()))?;

        self.write(partition.offset(), &length.to_le_bytes())?;
        self.write(partition.offset() + 4, image)
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, MemoryFlashError> {
        let start = address as usize;
        start
            .checked_add(len)
            .filter(|end| *end <= self.memory.len())
            .map(|end| start..end)
            .ok_or(MemoryFlashError::OutOfRange { address, len })
    }
}

impl Flash for MemoryFlash {
    type Error = MemoryFlashError;

    fn capacity(&self) -> usize {
        self.memory.len()
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn erase(&mut self, address: u32, len: u32) -> Result<(), Self::Error> {
        let range = self.range(address, len as usize)?;
        self.memory[range].fill(ERASED);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use spoolwatch_hal::coredump::{CoreDump, FlashCoreDump};
    use spoolwatch_hal::platform::{Board, Esp32};
    use spoolwatch_hal::system::{ResetReason, SystemDiagnostics, system_abort};

    use super::{MemoryFlash, MemoryFlashError, SimulatedBoard};

    const CAPACITY: usize = 0x40_0000;

    #[test]
    fn test_simulated_board() {
        let board = SimulatedBoard::new().reset_code(4);
        let diagnostics = SystemDiagnostics::<Esp32, _>::new(&board);

        assert_eq!(diagnostics.reset_reason(), ResetReason::Panic);
        assert!(diagnostics.was_reset_by_panic());
        assert_eq!(diagnostics.free_heap(), super::DEFAULT_HEAP.free);

        diagnostics.restart();
        system_abort::<Esp32, _>(&board, "test");
        assert_eq!(board.restarts(), 1);
        assert_eq!(board.aborts(), 1);

        board.delay_ms(0);
    }

    #[test]
    fn test_esp32_layout() {
        let mut coredump = FlashCoreDump::new(MemoryFlash::esp32(CAPACITY));
        let partition = coredump.locate().unwrap();

        assert_eq!(partition.offset(), 0x3F_0000);
        assert_eq!(partition.size(), 0x1_0000);
        assert!(!coredump.is_available());
    }

    #[test]
    fn test_store_coredump() {
        let mut flash = MemoryFlash::esp32(CAPACITY);
        flash.store_coredump(b"registers").unwrap();

        let mut coredump = FlashCoreDump::new(flash);
        let partition = coredump.locate().unwrap();
        assert_eq!(coredump.image_size(&partition), 13);

        let mut image = [0u8; 9];
        coredump.read(&partition, 4, &mut image).unwrap();
        assert_eq!(&image, b"registers");

        coredump.erase(&partition).unwrap();
        assert!(!coredump.is_available());
    }

    #[test]
    fn test_store_coredump_errors() {
        let mut flash = MemoryFlash::new(CAPACITY);
        assert_eq!(
            flash.store_coredump(b"registers"),
            Err(MemoryFlashError::NoPartition)
        );

        let mut flash = MemoryFlash::esp32(CAPACITY);
        let image = vec![0u8; 0x1_0000];
        assert_eq!(
            flash.store_coredump(&image),
            Err(MemoryFlashError::TooLarge(0x1_0000))
        );
    }

    #[test]
    fn test_out_of_range() {
        let mut flash = MemoryFlash::new(16);
        assert!(flash.write(10, &[0; 6]).is_ok());
        assert_eq!(
            flash.write(10, &[0; 7]),
            Err(MemoryFlashError::OutOfRange {
                address: 10,
                len: 7
            })
        );
    }

    #[test]
    fn test_small_flash_has_no_partitions() {
        let mut coredump = FlashCoreDump::new(MemoryFlash::esp32(0x1_0000));
        assert_eq!(coredump.locate(), None);
    }
}
