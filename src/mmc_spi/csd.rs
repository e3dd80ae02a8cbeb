use log::{debug, info, warn};

use crate::constant::*;
use crate::err::SdError;
use crate::timer::Clock;
use crate::transport::SpiTransport;

use super::{CardType, SdSpi};

/// Card Specific Data register, as sent on the wire (bit 127 first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd(pub [u8; CSD_LEN]);

impl Csd {
    /// Bits `msb..=lsb` of the 128-bit register.
    pub fn bits(&self, msb: u32, lsb: u32) -> u32 {
        let mut value = 0;
        for bit in (lsb..=msb).rev() {
            let byte = self.0[((127 - bit) / 8) as usize];
            value = (value << 1) | ((byte >> (bit % 8)) & 1) as u32;
        }
        value
    }

    /// CSD_STRUCTURE: 0 for v1 (and MMC), 1 for v2.
    pub fn structure(&self) -> u8 {
        self.bits(127, 126) as u8
    }

    pub fn is_v2(&self) -> bool {
        self.structure() == 1
    }

    pub fn sector_count(&self) -> u32 {
        if self.is_v2() {
            let c_size = self.bits(69, 48);
            (c_size + 1) << 10
        } else {
            let c_size = self.bits(73, 62);
            let c_size_mult = self.bits(49, 47);
            let read_bl_len = self.bits(83, 80);
            let n = read_bl_len + c_size_mult + 2;
            // Capacity in bytes is (C_SIZE + 1) << n
            if n >= 9 {
                (c_size + 1) << (n - 9)
            } else {
                (c_size + 1) >> (9 - n)
            }
        }
    }

    /// ERASE_BLK_EN: the card can erase single write blocks.
    pub fn erase_single_block_enabled(&self) -> bool {
        self.bits(46, 46) == 1
    }

    // SECTOR_SIZE field, scaled from write blocks to 512-byte sectors
    pub(crate) fn sd_v1_erase_sectors(&self) -> u32 {
        let sector_size = self.bits(45, 39);
        let write_bl_len = self.bits(25, 22);
        (sector_size + 1) << write_bl_len.saturating_sub(9)
    }

    pub(crate) fn mmc_erase_sectors(&self) -> u32 {
        let erase_grp_size = self.bits(46, 42);
        let erase_grp_mult = self.bits(41, 37);
        (erase_grp_size + 1) * (erase_grp_mult + 1)
    }
}

/// Card Identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid(pub [u8; CID_LEN]);

impl Cid {
    pub fn manufacturer_id(&self) -> u8 {
        self.0[0]
    }

    pub fn oem_id(&self) -> [u8; 2] {
        [self.0[1], self.0[2]]
    }

    pub fn product_name(&self) -> [u8; 5] {
        [self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]]
    }

    pub fn product_revision(&self) -> u8 {
        self.0[8]
    }

    pub fn serial_number(&self) -> u32 {
        u32::from_be_bytes([self.0[9], self.0[10], self.0[11], self.0[12]])
    }

    pub fn manufacturing_year(&self) -> u16 {
        (((self.0[13] & 0x0F) << 4) | (self.0[14] >> 4)) as u16 + 2000
    }

    pub fn manufacturing_month(&self) -> u8 {
        self.0[14] & 0x0F
    }
}

// Card information structure
#[derive(Debug, Clone, Copy)]
pub struct CardInfo {
    pub card_type: CardType,
    pub manufacturer_id: u8,
    pub oem_id: [u8; 2],
    pub serial_number: u32,
    pub manufacturing_month: u8,
    pub manufacturing_year: u16,
    pub sector_count: u32,
    pub capacity_bytes: u64,
}

impl<S: SpiTransport, C: Clock> SdSpi<S, C> {
    // Register read: command, R1 == 0, then one data block
    fn read_register(&mut self, cmd: u8, buf: &mut [u8]) -> Result<(), SdError> {
        self.ensure_ready()?;
        let result = self.read_register_block(cmd, buf);
        self.end_transaction(result)
    }

    fn read_register_block(&mut self, cmd: u8, buf: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(cmd, 0)?;
        self.expect_ready(cmd, r1)?;
        self.receive_block(buf)
    }

    pub fn read_csd(&mut self) -> Result<Csd, SdError> {
        let mut csd = [0u8; CSD_LEN];
        self.read_register(MMC_SEND_CSD, &mut csd)?;
        debug!("CSD: {:02X?}", csd);
        Ok(Csd(csd))
    }

    pub fn read_cid(&mut self) -> Result<Cid, SdError> {
        let mut cid = [0u8; CID_LEN];
        self.read_register(MMC_SEND_CID, &mut cid)?;
        debug!("CID: {:02X?}", cid);
        Ok(Cid(cid))
    }

    pub fn read_ocr(&mut self) -> Result<[u8; OCR_LEN], SdError> {
        self.ensure_ready()?;
        let mut ocr = [0u8; OCR_LEN];
        let result = self.read_ocr_bytes(&mut ocr);
        self.end_transaction(result)?;
        Ok(ocr)
    }

    fn read_ocr_bytes(&mut self, ocr: &mut [u8; OCR_LEN]) -> Result<(), SdError> {
        let r1 = self.send_command(MMC_SPI_READ_OCR, 0)?;
        self.expect_ready(MMC_SPI_READ_OCR, r1)?;
        self.read_bytes(ocr)
    }

    /// 64-byte SD status (ACMD13). SD v2 class cards only.
    pub fn read_sd_status(&mut self) -> Result<[u8; SD_STATUS_LEN], SdError> {
        self.ensure_ready()?;
        if !self.card_type.is_sd_v2() {
            return Err(SdError::ParameterError);
        }

        let mut status = [0u8; SD_STATUS_LEN];
        let result = self.read_sd_status_block(&mut status);
        self.end_transaction(result)?;
        Ok(status)
    }

    fn read_sd_status_block(&mut self, status: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(SD_APP_SD_STATUS, 0)?;
        self.expect_ready(SD_APP_SD_STATUS, r1)?;
        // Second byte of R2
        self.exchange(FILL_BYTE)?;
        self.receive_block(status)
    }

    pub fn sector_count(&mut self) -> Result<u32, SdError> {
        let sectors = self.read_csd()?.sector_count();
        debug!("card capacity: {} sectors", sectors);
        Ok(sectors)
    }

    /// Erase block size in 512-byte sectors.
    pub fn erase_block_size(&mut self) -> Result<u32, SdError> {
        let sectors = match self.card_type {
            CardType::SdV2 | CardType::SdHc => {
                let status = self.read_sd_status()?;
                // AU_SIZE
                16u32 << (status[10] >> 4)
            }
            CardType::SdV1 => self.read_csd()?.sd_v1_erase_sectors(),
            CardType::Mmc => self.read_csd()?.mmc_erase_sectors(),
            CardType::Unknown => return Err(SdError::NotReady),
        };
        debug!("erase block: {} sectors", sectors);
        Ok(sectors)
    }

    /// Erases sectors `start..=end`. SD cards only.
    pub fn trim(&mut self, start: u32, end: u32) -> Result<(), SdError> {
        if !self.card_type.is_sd() {
            return Err(SdError::ParameterError);
        }

        let csd = self.read_csd()?;
        if !csd.is_v2() && !csd.erase_single_block_enabled() {
            warn!("card cannot erase single blocks");
            // The CSD byte holding ERASE_BLK_EN
            return Err(SdError::Rejected(csd.0[10]));
        }

        let start = self.block_address(start);
        let end = self.block_address(end);
        info!("erase 0x{:x}..=0x{:x}", start, end);

        let result = self.erase_range(start, end);
        self.end_transaction(result)
    }

    fn erase_range(&mut self, start: u32, end: u32) -> Result<(), SdError> {
        for (cmd, arg) in [
            (SD_ERASE_WR_BLK_START, start),
            (SD_ERASE_WR_BLK_END, end),
            (MMC_ERASE, 0),
        ] {
            let r1 = self.send_command(cmd, arg)?;
            self.expect_ready(cmd, r1)?;
        }

        if !self.wait_ready(self.config.erase_timeout_ms)? {
            warn!("erase did not finish in {} ms", self.config.erase_timeout_ms);
            return Err(SdError::Timeout);
        }
        Ok(())
    }

    // Get card info
    pub fn card_info(&mut self) -> Result<CardInfo, SdError> {
        let cid = self.read_cid()?;
        let sector_count = self.sector_count()?;

        Ok(CardInfo {
            card_type: self.card_type,
            manufacturer_id: cid.manufacturer_id(),
            oem_id: cid.oem_id(),
            serial_number: cid.serial_number(),
            manufacturing_month: cid.manufacturing_month(),
            manufacturing_year: cid.manufacturing_year(),
            sector_count,
            capacity_bytes: sector_count as u64 * SECTOR_SIZE as u64,
        })
    }
}
