//! FatFs style disk interface over [`SdSpi`].

use bitflags::bitflags;
use log::{debug, info, warn};
use spin::{Mutex, MutexGuard};

use crate::config::SdSpiConfig;
use crate::constant::*;
use crate::err::SdError;
use crate::mmc_spi::{BlockDevice, CardType, Cid, Csd, SdSpi};
use crate::timer::Clock;
use crate::transport::SpiTransport;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        const NOINIT = 0x01;
        const NODISK = 0x02;
        const PROTECT = 0x04;
    }
}

// Control codes
pub const CTRL_SYNC: u8 = 0;
pub const GET_SECTOR_COUNT: u8 = 1;
pub const GET_SECTOR_SIZE: u8 = 2;
pub const GET_BLOCK_SIZE: u8 = 3;
pub const CTRL_TRIM: u8 = 4;
pub const MMC_GET_TYPE: u8 = 10;
pub const MMC_GET_CSD: u8 = 11;
pub const MMC_GET_CID: u8 = 12;
pub const MMC_GET_OCR: u8 = 13;
pub const MMC_GET_SDSTAT: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ioctl {
    Sync,
    GetSectorCount,
    GetSectorSize,
    GetBlockSize,
    /// Erase sectors `start..=end`.
    Trim { start: u32, end: u32 },
    GetCardType,
    GetCsd,
    GetCid,
    GetOcr,
    GetSdStatus,
}

impl Ioctl {
    /// Decodes a raw control code. `CTRL_TRIM` takes its range from `buf[0..8]`.
    pub fn from_raw(code: u8, buf: &[u8]) -> Result<Self, SdError> {
        let request = match code {
            CTRL_SYNC => Ioctl::Sync,
            GET_SECTOR_COUNT => Ioctl::GetSectorCount,
            GET_SECTOR_SIZE => Ioctl::GetSectorSize,
            GET_BLOCK_SIZE => Ioctl::GetBlockSize,
            CTRL_TRIM => {
                if buf.len() < 8 {
                    return Err(SdError::ParameterError);
                }
                Ioctl::Trim {
                    start: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
                    end: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
                }
            }
            MMC_GET_TYPE => Ioctl::GetCardType,
            MMC_GET_CSD => Ioctl::GetCsd,
            MMC_GET_CID => Ioctl::GetCid,
            MMC_GET_OCR => Ioctl::GetOcr,
            MMC_GET_SDSTAT => Ioctl::GetSdStatus,
            _ => return Err(SdError::ParameterError),
        };
        Ok(request)
    }

    // Bytes the raw interface writes back
    fn response_len(&self) -> usize {
        match self {
            Ioctl::Sync | Ioctl::Trim { .. } => 0,
            Ioctl::GetSectorCount | Ioctl::GetBlockSize => 4,
            Ioctl::GetSectorSize => 2,
            Ioctl::GetCardType => 1,
            Ioctl::GetCsd => CSD_LEN,
            Ioctl::GetCid => CID_LEN,
            Ioctl::GetOcr => OCR_LEN,
            Ioctl::GetSdStatus => SD_STATUS_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlValue {
    Done,
    SectorCount(u32),
    SectorSize(u16),
    /// Erase block size in sectors.
    BlockSize(u32),
    CardType(CardType),
    Csd(Csd),
    Cid(Cid),
    Ocr([u8; OCR_LEN]),
    SdStatus([u8; SD_STATUS_LEN]),
}

impl IoctlValue {
    // Little-endian integers, raw registers as read
    fn encode(&self, buf: &mut [u8]) {
        match self {
            IoctlValue::Done => {}
            IoctlValue::SectorCount(n) | IoctlValue::BlockSize(n) => {
                buf[..4].copy_from_slice(&n.to_le_bytes())
            }
            IoctlValue::SectorSize(n) => buf[..2].copy_from_slice(&n.to_le_bytes()),
            IoctlValue::CardType(card_type) => buf[0] = card_type.ct_flags(),
            IoctlValue::Csd(csd) => buf[..CSD_LEN].copy_from_slice(&csd.0),
            IoctlValue::Cid(cid) => buf[..CID_LEN].copy_from_slice(&cid.0),
            IoctlValue::Ocr(ocr) => buf[..OCR_LEN].copy_from_slice(ocr),
            IoctlValue::SdStatus(status) => buf[..SD_STATUS_LEN].copy_from_slice(status),
        }
    }
}

/// Drive 0 of a FatFs style disk layer, backed by one SPI card.
pub struct SdDisk<S, C> {
    card: SdSpi<S, C>,
    status: DiskStatus,
}

impl<S: SpiTransport, C: Clock> SdDisk<S, C> {
    pub fn new(spi: S, clock: C, config: SdSpiConfig) -> Self {
        Self {
            card: SdSpi::new(spi, clock, config),
            status: DiskStatus::NOINIT,
        }
    }

    pub fn with_defaults(spi: S, clock: C) -> Self {
        Self::new(spi, clock, SdSpiConfig::default())
    }

    pub fn card(&self) -> &SdSpi<S, C> {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut SdSpi<S, C> {
        &mut self.card
    }

    pub fn card_type(&self) -> CardType {
        self.card.card_type()
    }

    pub fn status(&mut self, unit: u8) -> DiskStatus {
        if unit != 0 {
            return DiskStatus::NOINIT;
        }

        if !self.status.contains(DiskStatus::NOINIT) {
            if let Err(e) = self.card.probe() {
                warn!("status probe failed: {}", e);
                self.status.insert(DiskStatus::NOINIT);
            }
        }
        self.status
    }

    pub fn initialize(&mut self, unit: u8) -> DiskStatus {
        if unit != 0 {
            return DiskStatus::NOINIT;
        }
        if self.status.contains(DiskStatus::NODISK) {
            return self.status;
        }

        if !self.status.contains(DiskStatus::NOINIT) && self.card.probe().is_ok() {
            debug!("drive already initialized");
            return self.status;
        }

        match self.card.init_card() {
            Ok(card_type) => {
                info!("drive {} initialized: {}", unit, card_type);
                self.status.remove(DiskStatus::NOINIT);
            }
            Err(e) => {
                warn!("drive {} initialization failed: {}", unit, e);
                self.status.insert(DiskStatus::NOINIT);
            }
        }
        self.status
    }

    // Length of `count` sectors, if `buf` holds them
    fn transfer_len(unit: u8, buf_len: usize, count: u32) -> Result<usize, SdError> {
        if unit != 0 || count == 0 {
            return Err(SdError::ParameterError);
        }
        let len = (count as usize)
            .checked_mul(SECTOR_SIZE)
            .ok_or(SdError::ParameterError)?;
        if buf_len < len {
            return Err(SdError::ParameterError);
        }
        Ok(len)
    }

    pub fn read(&mut self, unit: u8, buf: &mut [u8], sector: u32, count: u32) -> Result<(), SdError> {
        let len = Self::transfer_len(unit, buf.len(), count)?;
        if self.status.contains(DiskStatus::NOINIT) {
            return Err(SdError::NotReady);
        }
        self.card.read_blocks(sector, &mut buf[..len])
    }

    pub fn write(&mut self, unit: u8, buf: &[u8], sector: u32, count: u32) -> Result<(), SdError> {
        let len = Self::transfer_len(unit, buf.len(), count)?;
        if self.status.contains(DiskStatus::NOINIT) {
            return Err(SdError::NotReady);
        }
        if self.status.contains(DiskStatus::PROTECT) {
            return Err(SdError::WriteProtected);
        }
        self.card.write_blocks(sector, &buf[..len])
    }

    pub fn ioctl(&mut self, unit: u8, request: Ioctl) -> Result<IoctlValue, SdError> {
        if unit != 0 {
            return Err(SdError::ParameterError);
        }
        if self.status.contains(DiskStatus::NOINIT) {
            return Err(SdError::NotReady);
        }
        debug!("ioctl {:?}", request);

        let value = match request {
            Ioctl::Sync => {
                self.card.sync()?;
                IoctlValue::Done
            }
            Ioctl::GetSectorCount => IoctlValue::SectorCount(self.card.sector_count()?),
            Ioctl::GetSectorSize => IoctlValue::SectorSize(SECTOR_SIZE as u16),
            Ioctl::GetBlockSize => IoctlValue::BlockSize(self.card.erase_block_size()?),
            Ioctl::Trim { start, end } => {
                if self.status.contains(DiskStatus::PROTECT) {
                    return Err(SdError::WriteProtected);
                }
                self.card.trim(start, end)?;
                IoctlValue::Done
            }
            Ioctl::GetCardType => IoctlValue::CardType(self.card.card_type()),
            Ioctl::GetCsd => IoctlValue::Csd(self.card.read_csd()?),
            Ioctl::GetCid => IoctlValue::Cid(self.card.read_cid()?),
            Ioctl::GetOcr => IoctlValue::Ocr(self.card.read_ocr()?),
            Ioctl::GetSdStatus => IoctlValue::SdStatus(self.card.read_sd_status()?),
        };
        Ok(value)
    }

    /// Raw control code interface. Results are written little-endian to `buf`.
    pub fn ioctl_raw(&mut self, unit: u8, code: u8, buf: &mut [u8]) -> Result<(), SdError> {
        let request = Ioctl::from_raw(code, buf)?;
        if buf.len() < request.response_len() {
            return Err(SdError::ParameterError);
        }
        let value = self.ioctl(unit, request)?;
        value.encode(buf);
        Ok(())
    }

    /// Card-detect input. An absent card also drops the initialized state.
    pub fn set_media_present(&mut self, present: bool) {
        if present {
            self.status.remove(DiskStatus::NODISK);
        } else {
            self.status.insert(DiskStatus::NODISK | DiskStatus::NOINIT);
        }
    }

    /// Write-protect switch input.
    pub fn set_write_protected(&mut self, protected: bool) {
        self.status.set(DiskStatus::PROTECT, protected);
    }
}

/// [`SdDisk`] behind a spin lock, usable through `&self`.
pub struct SharedDisk<S, C> {
    inner: Mutex<SdDisk<S, C>>,
}

impl<S: SpiTransport, C: Clock> SharedDisk<S, C> {
    pub fn new(disk: SdDisk<S, C>) -> Self {
        Self {
            inner: Mutex::new(disk),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SdDisk<S, C>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> SdDisk<S, C> {
        self.inner.into_inner()
    }
}

impl<S: SpiTransport, C: Clock> BlockDevice for SharedDisk<S, C> {
    fn read_block(&self, block_addr: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        self.inner.lock().read(0, buffer, block_addr, 1)
    }

    fn write_block(&self, block_addr: u32, buffer: &[u8]) -> Result<(), SdError> {
        self.inner.lock().write(0, buffer, block_addr, 1)
    }

    fn read_blocks(&self, block_addr: u32, blocks: u16, buffer: &mut [u8]) -> Result<(), SdError> {
        self.inner.lock().read(0, buffer, block_addr, blocks as u32)
    }

    fn write_blocks(&self, block_addr: u32, blocks: u16, buffer: &[u8]) -> Result<(), SdError> {
        self.inner.lock().write(0, buffer, block_addr, blocks as u32)
    }

    fn get_capacity(&self) -> Result<u64, SdError> {
        match self.inner.lock().ioctl(0, Ioctl::GetSectorCount)? {
            IoctlValue::SectorCount(sectors) => Ok(sectors as u64 * SECTOR_SIZE as u64),
            _ => Err(SdError::ParameterError),
        }
    }
}
