mod block;
mod cmd;
mod csd;

use core::fmt::{self, Debug, Display};

use log::{debug, info, warn};

pub use block::BlockDevice;
pub use csd::{CardInfo, Cid, Csd};

use crate::config::SdSpiConfig;
use crate::constant::*;
use crate::err::*;
use crate::timer::{Clock, Deadline};
use crate::transport::{SpiClock, SpiTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Unknown,
    /// SD version 1, byte addressed.
    SdV1,
    /// SD version 2, byte addressed.
    SdV2,
    /// SD version 2 high capacity (SDHC/SDXC), block addressed.
    SdHc,
    /// MMC version 3.
    Mmc,
}

impl CardType {
    pub fn is_block_addressed(self) -> bool {
        self == CardType::SdHc
    }

    pub fn is_sd(self) -> bool {
        matches!(self, CardType::SdV1 | CardType::SdV2 | CardType::SdHc)
    }

    pub fn is_sd_v2(self) -> bool {
        matches!(self, CardType::SdV2 | CardType::SdHc)
    }

    /// FatFs `CT_*` flags as returned by `MMC_GET_TYPE`.
    pub fn ct_flags(self) -> u8 {
        match self {
            CardType::Unknown => 0x00,
            CardType::Mmc => 0x01,
            CardType::SdV1 => 0x02,
            CardType::SdV2 => 0x04,
            CardType::SdHc => 0x04 | 0x08,
        }
    }
}

impl Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardType::Unknown => "unknown",
            CardType::SdV1 => "SD v1",
            CardType::SdV2 => "SD v2 (byte address)",
            CardType::SdHc => "SDHC/SDXC (block address)",
            CardType::Mmc => "MMC v3",
        };
        f.write_str(name)
    }
}

// Log a transport failure and fold it into the driver error
pub(crate) fn transport_err<E: Debug>(err: E) -> SdError {
    warn!("SPI transport error: {:?}", err);
    SdError::Transport
}

/// SD/MMC card driven in SPI mode.
pub struct SdSpi<S, C> {
    spi: S,
    clock: C,
    config: SdSpiConfig,
    card_type: CardType,
}

impl<S: SpiTransport, C: Clock> SdSpi<S, C> {
    pub fn new(spi: S, clock: C, config: SdSpiConfig) -> Self {
        Self {
            spi,
            clock,
            config,
            card_type: CardType::Unknown,
        }
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn config(&self) -> &SdSpiConfig {
        &self.config
    }

    pub fn transport(&self) -> &S {
        &self.spi
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.spi
    }

    pub fn release(self) -> S {
        self.spi
    }

    // Initialize the card and classify it
    pub fn init_card(&mut self) -> Result<CardType, SdError> {
        info!("Init SD card over SPI");
        self.card_type = CardType::Unknown;

        self.spi.set_clock(SpiClock::Slow).map_err(transport_err)?;
        self.spi.deselect().map_err(transport_err)?;

        // 74+ clocks with CS high put the card into native idle
        for _ in 0..self.config.idle_clocks {
            self.exchange(FILL_BYTE)?;
        }

        let identified = self.identify();
        let identified = self.end_transaction(identified);

        let card_type = match identified {
            Ok(card_type) => card_type,
            Err(e) => {
                warn!("Card initialization failed: {}", e);
                return Err(e);
            }
        };

        self.spi.set_clock(SpiClock::Fast).map_err(transport_err)?;
        self.card_type = card_type;
        info!("Card ready: {}", card_type);

        Ok(card_type)
    }

    fn identify(&mut self) -> Result<CardType, SdError> {
        let r1 = self.send_command(MMC_GO_IDLE_STATE, 0)?;
        if r1 != R1_IDLE_STATE {
            warn!("CMD0 answered 0x{:02X}", r1);
            return Err(match r1 {
                R1_NO_RESPONSE => SdError::NoCard,
                _ => SdError::Rejected(r1),
            });
        }

        let deadline = Deadline::start(&self.clock, self.config.init_timeout_ms);

        if self.send_command(SD_SEND_IF_COND, IF_COND_PATTERN)? == R1_IDLE_STATE {
            let mut r7 = [0u8; OCR_LEN];
            self.read_bytes(&mut r7)?;
            debug!("CMD8 R7: {:02X?}", r7);

            // The card must echo the voltage range and check pattern
            if r7[2] != 0x01 || r7[3] != 0xAA {
                warn!("CMD8 echo mismatch: {:02X?}", r7);
                return Err(SdError::UnsupportedCard);
            }

            self.wait_op_cond(SD_APP_OP_COND, OCR_HCS, &deadline)?;

            let r1 = self.send_command(MMC_SPI_READ_OCR, 0)?;
            self.expect_ready(MMC_SPI_READ_OCR, r1)?;
            let mut ocr = [0u8; OCR_LEN];
            self.read_bytes(&mut ocr)?;
            debug!("OCR: {:02X?}", ocr);

            if ocr[0] & OCR_CCS_BYTE0 != 0 {
                Ok(CardType::SdHc)
            } else {
                Ok(CardType::SdV2)
            }
        } else {
            let (card_type, op_cond) = if self.send_command(SD_APP_OP_COND, 0)? <= R1_IDLE_STATE {
                (CardType::SdV1, SD_APP_OP_COND)
            } else {
                (CardType::Mmc, MMC_SEND_OP_COND)
            };
            debug!("Legacy card, polling {} with CMD{}", card_type, op_cond & CMD_INDEX_MASK);

            self.wait_op_cond(op_cond, 0, &deadline)?;

            // Byte addressed cards may default to another block length
            let r1 = self.send_command(MMC_SET_BLOCKLEN, SECTOR_SIZE as u32)?;
            self.expect_ready(MMC_SET_BLOCKLEN, r1)?;

            Ok(card_type)
        }
    }

    // Repeat an operating condition command until the card leaves idle state
    fn wait_op_cond(&mut self, cmd: u8, arg: u32, deadline: &Deadline) -> Result<(), SdError> {
        loop {
            if self.send_command(cmd, arg)? == R1_READY_STATE {
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                warn!("Card stayed idle during initialization");
                return Err(SdError::Timeout);
            }
        }
    }

    /// Cheap liveness check of an initialized card (SEND_STATUS).
    pub fn probe(&mut self) -> Result<(), SdError> {
        if self.card_type == CardType::Unknown {
            return Err(SdError::NotReady);
        }

        let result = self.send_status();
        self.end_transaction(result)
    }

    fn send_status(&mut self) -> Result<(), SdError> {
        let r1 = self.send_command(MMC_SEND_STATUS, 0)?;
        // Second byte of R2
        let status = self.exchange(FILL_BYTE)?;
        debug!("CMD13 R2: 0x{:02X} 0x{:02X}", r1, status);
        self.expect_ready(MMC_SEND_STATUS, r1)
    }

    // Address field for a sector. Byte addressed cards wrap like the 32-bit wire field.
    pub(crate) fn block_address(&self, lba: u32) -> u32 {
        if self.card_type.is_block_addressed() {
            lba
        } else {
            lba.wrapping_mul(SECTOR_SIZE as u32)
        }
    }

    fn ensure_ready(&self) -> Result<(), SdError> {
        match self.card_type {
            CardType::Unknown => Err(SdError::NotReady),
            _ => Ok(()),
        }
    }
}
