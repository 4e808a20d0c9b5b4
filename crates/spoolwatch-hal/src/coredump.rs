//! Access to the crash dump persisted in flash.
//!
//! When the firmware crashes, the `ESP32` family writes a crash dump into a
//! dedicated data partition. The dump can then be downloaded for post-mortem
//! analysis and erased afterwards. Other platforms have no such partition,
//! and use [`NoCoreDump`], which reports the dump as absent.
//!
//! Every operation fails closed: a flash failure is logged and reported as
//! an [`Error`](crate::error::Error), never as a panic, and nothing is
//! retried.

use core::fmt::Debug;

use log::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::platform::Platform;

/// Flash offset of the partition table.
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;

/// Maximum number of entries in the partition table.
pub const MAX_PARTITIONS: usize = 95;

// Size of a partition table entry.
const ENTRY_SIZE: usize = 32;
// Little-endian magic number of a partition table entry.
const ENTRY_MAGIC: u16 = 0x50AA;

// Partition type of data partitions.
const DATA_TYPE: u8 = 0x01;
// Data partition subtype of crash dumps.
const COREDUMP_SUBTYPE: u8 = 0x03;

// Value of an erased length word.
const ERASED_WORD: u32 = u32::MAX;

/// Raw flash storage.
pub trait Flash {
    /// Driver error.
    type Error: Debug;

    /// Returns the flash size, in bytes.
    fn capacity(&self) -> usize;

    /// Reads `buffer.len()` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Failure of the flash driver.
    fn read(&mut self, address: u32, buffer: &mut [u8]) -> core::result::Result<(), Self::Error>;

    /// Erases `len` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Failure of the flash driver.
    fn erase(&mut self, address: u32, len: u32) -> core::result::Result<(), Self::Error>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    type Error = F::Error;

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> core::result::Result<(), Self::Error> {
        (**self).read(address, buffer)
    }

    fn erase(&mut self, address: u32, len: u32) -> core::result::Result<(), Self::Error> {
        (**self).erase(address, len)
    }
}

/// The flash partition reserved to crash dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreDumpPartition {
    offset: u32,
    size: u32,
}

impl CoreDumpPartition {
    /// Returns the flash offset of the partition.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the partition size, in bytes.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns the partition size as a length.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size as usize
    }

    /// Checks whether the partition is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Looks up the crash dump partition in the partition table.
///
/// The table ends at the first entry without the partition magic number.
///
/// # Errors
///
/// Failure to read the partition table.
pub fn find_coredump_partition<F: Flash + ?Sized>(
    flash: &mut F,
) -> Result<Option<CoreDumpPartition>> {
    let mut entry = [0u8; ENTRY_SIZE];

    for index in 0..MAX_PARTITIONS {
        // Entries never exceed the first flash sector.
        let address = PARTITION_TABLE_OFFSET + (index * ENTRY_SIZE) as u32;
        flash.read(address, &mut entry).map_err(|e| {
            warn!("Failed to read the partition table entry {index}: {e:?}");
            Error::new(ErrorKind::Storage, "partition table read")
        })?;

        if u16::from_le_bytes([entry[0], entry[1]]) != ENTRY_MAGIC {
            break;
        }

        if entry[2] != DATA_TYPE || entry[3] != COREDUMP_SUBTYPE {
            continue;
        }

        let offset = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
        let size = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);

        let outside = (offset as usize)
            .checked_add(size as usize)
            .is_none_or(|end| end > flash.capacity());
        if size == 0 || outside {
            warn!("Ignoring the crash dump partition at {offset:#x}: invalid size {size:#x}");
            return Ok(None);
        }

        debug!("Crash dump partition at {offset:#x}, {size} bytes");
        return Ok(Some(CoreDumpPartition { offset, size }));
    }

    Ok(None)
}

/// Access to a stored crash dump.
pub trait CoreDump {
    /// Returns the crash dump partition, or [`None`] when there is none.
    fn locate(&mut self) -> Option<CoreDumpPartition>;

    /// Returns the length of the stored image, `0` when no image is stored.
    fn image_size(&mut self, partition: &CoreDumpPartition) -> usize;

    /// Reads `buffer.len()` bytes of the partition starting at `offset`.
    ///
    /// # Errors
    ///
    /// - The read falls outside of the partition
    /// - Failure of the flash driver
    /// - Crash dumps are not supported
    fn read(&mut self, partition: &CoreDumpPartition, offset: usize, buffer: &mut [u8])
    -> Result<()>;

    /// Erases the partition.
    ///
    /// This is irreversible. Erase a dump only once it has been downloaded.
    ///
    /// # Errors
    ///
    /// - Failure of the flash driver
    /// - Crash dumps are not supported
    fn erase(&mut self, partition: &CoreDumpPartition) -> Result<()>;

    /// Checks whether a crash dump is stored.
    fn is_available(&mut self) -> bool {
        match self.locate() {
            Some(partition) => self.image_size(&partition) > 0,
            None => false,
        }
    }

    /// Returns the size of a partition, `0` when there is none.
    fn size_of(&self, partition: Option<&CoreDumpPartition>) -> usize {
        partition.map_or(0, CoreDumpPartition::len)
    }
}

/// A crash dump stored in a flash partition.
///
/// The partition is looked up on first use and remembered afterwards.
pub struct FlashCoreDump<F> {
    flash: F,
    partition: Option<Option<CoreDumpPartition>>,
}

impl<F: Flash> FlashCoreDump<F> {
    /// Creates a [`FlashCoreDump`].
    #[must_use]
    pub const fn new(flash: F) -> Self {
        Self {
            flash,
            partition: None,
        }
    }

    /// Returns the underlying flash.
    pub fn into_inner(self) -> F {
        self.flash
    }

    fn storage_error(context: &'static str, e: &F::Error) -> Error {
        warn!("Crash dump {context} failed: {e:?}");
        Error::new(ErrorKind::Storage, context)
    }
}

impl<F: Flash> CoreDump for FlashCoreDump<F> {
    fn locate(&mut self) -> Option<CoreDumpPartition> {
        if let Some(partition) = self.partition {
            return partition;
        }

        // Failures are not remembered, the lookup runs again on next use.
        let partition = find_coredump_partition(&mut self.flash).ok()?;
        self.partition = Some(partition);
        partition
    }

    fn image_size(&mut self, partition: &CoreDumpPartition) -> usize {
        let mut word = [0u8; 4];
        if let Err(e) = self.flash.read(partition.offset, &mut word) {
            warn!("Crash dump header read failed: {e:?}");
            return 0;
        }

        match u32::from_le_bytes(word) {
            ERASED_WORD | 0 => 0,
            len if len > partition.size => {
                warn!("Crash dump image of {len} bytes exceeds its partition");
                0
            }
            len => len as usize,
        }
    }

    fn read(
        &mut self,
        partition: &CoreDumpPartition,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        let in_bounds = offset
            .checked_add(buffer.len())
            .is_some_and(|end| end <= partition.len());
        if !in_bounds {
            return Err(Error::new(ErrorKind::OutOfBounds, "crash dump read"));
        }

        if buffer.is_empty() {
            return Ok(());
        }

        // Bounded by the partition size, which is a `u32`.
        let address = partition.offset + offset as u32;
        self.flash
            .read(address, buffer)
            .map_err(|e| Self::storage_error("read", &e))
    }

    fn erase(&mut self, partition: &CoreDumpPartition) -> Result<()> {
        self.flash
            .erase(partition.offset, partition.size)
            .map_err(|e| Self::storage_error("erase", &e))
    }
}

/// The crash dump accessor of platforms without crash dumps.
///
/// No dump is ever available and every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoreDump;

impl CoreDump for NoCoreDump {
    fn locate(&mut self) -> Option<CoreDumpPartition> {
        None
    }

    fn image_size(&mut self, _partition: &CoreDumpPartition) -> usize {
        0
    }

    fn read(
        &mut self,
        _partition: &CoreDumpPartition,
        _offset: usize,
        _buffer: &mut [u8],
    ) -> Result<()> {
        Err(Error::new(ErrorKind::Unsupported, "crash dump read"))
    }

    fn erase(&mut self, _partition: &CoreDumpPartition) -> Result<()> {
        Err(Error::new(ErrorKind::Unsupported, "crash dump erase"))
    }
}

/// The crash dump accessor of a platform.
pub enum CoreDumpAccessor<F> {
    /// Crash dumps stored in flash.
    Flash(FlashCoreDump<F>),
    /// No crash dump support.
    Absent(NoCoreDump),
}

impl<F: Flash> CoreDumpAccessor<F> {
    /// Creates the crash dump accessor of the platform `P`.
    ///
    /// The flash is dropped on platforms without crash dumps.
    #[must_use]
    pub fn new<P: Platform>(flash: F) -> Self {
        if P::HAS_COREDUMP && P::HAS_PARTITION_API {
            Self::Flash(FlashCoreDump::new(flash))
        } else {
            Self::Absent(NoCoreDump)
        }
    }
}

impl<F: Flash> CoreDump for CoreDumpAccessor<F> {
    fn locate(&mut self) -> Option<CoreDumpPartition> {
        match self {
            Self::Flash(coredump) => coredump.locate(),
            Self::Absent(coredump) => coredump.locate(),
        }
    }

    fn image_size(&mut self, partition: &CoreDumpPartition) -> usize {
        match self {
            Self::Flash(coredump) => coredump.image_size(partition),
            Self::Absent(coredump) => coredump.image_size(partition),
        }
    }

    fn read(
        &mut self,
        partition: &CoreDumpPartition,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            Self::Flash(coredump) => coredump.read(partition, offset, buffer),
            Self::Absent(coredump) => coredump.read(partition, offset, buffer),
        }
    }

    fn erase(&mut self, partition: &CoreDumpPartition) -> Result<()> {
        match self {
            Self::Flash(coredump) => coredump.erase(partition),
            Self::Absent(coredump) => coredump.erase(partition),
        }
    }
}
