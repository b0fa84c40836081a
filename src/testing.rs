//! Host-side doubles for the hardware seams.

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::lighting::{Lamp, LampOutputs};

const FLASH_SIZE: usize = 0x800;

#[derive(Debug)]
pub struct RamFlashError(NorFlashErrorKind);

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

/// Two 1 KiB pages of NOR flash in RAM. Programming can only clear bits,
/// like the real part.
pub struct RamFlash {
    bytes: [u8; FLASH_SIZE],
    pub fail_read: bool,
    pub fail_erase: bool,
    pub fail_write: bool,
    pub erase_count: u32,
}

impl RamFlash {
    pub fn new() -> Self {
        Self {
            bytes: [0xFF; FLASH_SIZE],
            fail_read: false,
            fail_erase: false,
            fail_write: false,
            erase_count: 0,
        }
    }

    pub fn preload(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn bytes_at(&self, offset: u32, len: usize) -> &[u8] {
        &self.bytes[offset as usize..offset as usize + len]
    }

    fn check(&self, offset: u32, len: usize) -> Result<(), RamFlashError> {
        if offset as usize + len > FLASH_SIZE {
            return Err(RamFlashError(NorFlashErrorKind::OutOfBounds));
        }
        Ok(())
    }
}

impl ErrorType for RamFlash {
    type Error = RamFlashError;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_read {
            return Err(RamFlashError(NorFlashErrorKind::Other));
        }
        self.check(offset, bytes.len())?;
        bytes.copy_from_slice(self.bytes_at(offset, bytes.len()));
        Ok(())
    }

    fn capacity(&self) -> usize {
        FLASH_SIZE
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 0x400;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if self.fail_erase {
            return Err(RamFlashError(NorFlashErrorKind::Other));
        }
        if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
            return Err(RamFlashError(NorFlashErrorKind::NotAligned));
        }
        self.check(from, (to - from) as usize)?;
        self.bytes[from as usize..to as usize].fill(0xFF);
        self.erase_count += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_write {
            return Err(RamFlashError(NorFlashErrorKind::Other));
        }
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(RamFlashError(NorFlashErrorKind::NotAligned));
        }
        self.check(offset, bytes.len())?;
        for (cell, byte) in self.bytes[offset as usize..].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// Remembers the last duty written to each lamp and how many writes
/// happened.
#[derive(Debug, Default)]
pub struct RecordingLamps {
    pub high: u8,
    pub low: u8,
    pub fog: u8,
    pub writes: u32,
}

impl LampOutputs for RecordingLamps {
    fn set_duty(&mut self, lamp: Lamp, duty: u8) {
        self.writes += 1;
        match lamp {
            Lamp::HighBeam => self.high = duty,
            Lamp::LowBeam => self.low = duty,
            Lamp::Fog => self.fog = duty,
        }
    }
}
