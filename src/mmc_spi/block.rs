// ===== Block Device Interface =====

use log::{debug, warn};

use crate::constant::*;
use crate::err::SdError;
use crate::timer::{Clock, Deadline};
use crate::transport::SpiTransport;

use super::{transport_err, SdSpi};

// Simple block device trait that could be used by a filesystem
pub trait BlockDevice {
    fn read_block(&self, block_addr: u32, buffer: &mut [u8]) -> Result<(), SdError>;
    fn write_block(&self, block_addr: u32, buffer: &[u8]) -> Result<(), SdError>;
    fn read_blocks(&self, block_addr: u32, blocks: u16, buffer: &mut [u8]) -> Result<(), SdError>;
    fn write_blocks(&self, block_addr: u32, blocks: u16, buffer: &[u8]) -> Result<(), SdError>;
    /// Capacity in bytes.
    fn get_capacity(&self) -> Result<u64, SdError>;
}

impl<S: SpiTransport, C: Clock> SdSpi<S, C> {
    // Move a payload through the bulk engine when the transport offers one
    fn exchange_payload(
        &mut self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        len: usize,
    ) -> Result<(), SdError> {
        if !self.spi.bulk_start(tx, len).map_err(transport_err)? {
            return self
                .spi
                .exchange_buffer(tx, rx, len)
                .map_err(transport_err);
        }

        let deadline = Deadline::start(&self.clock, self.config.bulk_timeout_ms);
        loop {
            match self.spi.bulk_poll() {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.spi.bulk_abort();
                    return Err(transport_err(e));
                }
            }
            if deadline.expired(&self.clock) {
                warn!("bulk transfer of {} bytes timed out", len);
                self.spi.bulk_abort();
                return Err(SdError::Timeout);
            }
        }

        self.spi.bulk_finish(rx).map_err(transport_err)
    }

    // Receive one data block into `buf`
    pub(crate) fn receive_block(&mut self, buf: &mut [u8]) -> Result<(), SdError> {
        let deadline = Deadline::start(&self.clock, self.config.token_timeout_ms);
        let token = loop {
            let byte = self.exchange(FILL_BYTE)?;
            if byte != FILL_BYTE {
                break byte;
            }
            if deadline.expired(&self.clock) {
                warn!("data token timeout");
                return Err(SdError::Timeout);
            }
        };

        if token != DATA_START_BLOCK {
            warn!("data error token 0x{:02X}", token);
            return Err(SdError::Rejected(token));
        }

        let len = buf.len();
        self.exchange_payload(None, Some(buf), len)?;
        // CRC is not checked in SPI mode
        self.skip_bytes(CRC_LEN)
    }

    // Send one data block, or the stop token when `data` is None
    pub(crate) fn transmit_block(&mut self, data: Option<&[u8]>, token: u8) -> Result<(), SdError> {
        let payload = match (token, data) {
            (STOP_TRAN_TOKEN, _) => None,
            (_, Some(data)) if data.len() >= SECTOR_SIZE => Some(&data[..SECTOR_SIZE]),
            _ => return Err(SdError::ParameterError),
        };

        if !self.wait_ready(self.config.ready_timeout_ms)? {
            warn!("card busy before token 0x{:02X}", token);
            return Err(SdError::Timeout);
        }

        self.exchange(token)?;

        if let Some(payload) = payload {
            self.exchange_payload(Some(payload), None, SECTOR_SIZE)?;
            self.skip_bytes(CRC_LEN)?;

            let resp = self.exchange(FILL_BYTE)?;
            if resp & DATA_RES_MASK != DATA_RES_ACCEPTED {
                warn!("data block rejected: 0x{:02X}", resp);
                return Err(SdError::Rejected(resp));
            }
        } else {
            // Busy starts one byte after the stop token
            self.exchange(FILL_BYTE)?;
        }

        if !self.wait_ready(self.config.program_timeout_ms)? {
            warn!("card still programming after {} ms", self.config.program_timeout_ms);
            return Err(SdError::Timeout);
        }

        Ok(())
    }

    /// Reads `buffer.len() / 512` sectors starting at `block_addr`.
    pub fn read_blocks(&mut self, block_addr: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        if buffer.is_empty() || buffer.len() % SECTOR_SIZE != 0 {
            return Err(SdError::ParameterError);
        }
        self.ensure_ready()?;

        let addr = self.block_address(block_addr);
        let blocks = buffer.len() / SECTOR_SIZE;
        debug!("read {} block(s) at 0x{:x}", blocks, addr);

        let result = if blocks == 1 {
            self.read_single(addr, buffer)
        } else {
            self.read_multiple(addr, buffer)
        };
        self.end_transaction(result)
    }

    fn read_single(&mut self, addr: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(MMC_READ_SINGLE_BLOCK, addr)?;
        self.expect_ready(MMC_READ_SINGLE_BLOCK, r1)?;
        self.receive_block(buffer)
    }

    fn read_multiple(&mut self, addr: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(MMC_READ_MULTIPLE_BLOCK, addr)?;
        self.expect_ready(MMC_READ_MULTIPLE_BLOCK, r1)?;

        let mut result = Ok(());
        for block in buffer.chunks_exact_mut(SECTOR_SIZE) {
            result = self.receive_block(block);
            if result.is_err() {
                break;
            }
        }

        // Stop the stream even after a failed block; its R1 is not meaningful
        let stopped = self.send_command(MMC_STOP_TRANSMISSION, 0);
        result?;
        stopped.map(|_| ())
    }

    /// Writes `buffer.len() / 512` sectors starting at `block_addr`.
    pub fn write_blocks(&mut self, block_addr: u32, buffer: &[u8]) -> Result<(), SdError> {
        if buffer.is_empty() || buffer.len() % SECTOR_SIZE != 0 {
            return Err(SdError::ParameterError);
        }
        self.ensure_ready()?;

        let addr = self.block_address(block_addr);
        let blocks = buffer.len() / SECTOR_SIZE;
        debug!("write {} block(s) at 0x{:x}", blocks, addr);

        let result = if blocks == 1 {
            self.write_single(addr, buffer)
        } else {
            self.write_multiple(addr, buffer, blocks)
        };
        self.end_transaction(result)
    }

    fn write_single(&mut self, addr: u32, buffer: &[u8]) -> Result<(), SdError> {
        let r1 = self.send_command(MMC_WRITE_BLOCK, addr)?;
        self.expect_ready(MMC_WRITE_BLOCK, r1)?;
        self.transmit_block(Some(buffer), DATA_START_BLOCK)
    }

    fn write_multiple(&mut self, addr: u32, buffer: &[u8], blocks: usize) -> Result<(), SdError> {
        let count = u32::try_from(blocks).map_err(|_| SdError::ParameterError)?;
        if self.card_type.is_sd() {
            // Pre-erase hint, the answer does not matter
            self.send_command(SD_APP_SET_WR_BLK_ERASE_COUNT, count)?;
        }

        let r1 = self.send_command(MMC_WRITE_MULTIPLE_BLOCK, addr)?;
        self.expect_ready(MMC_WRITE_MULTIPLE_BLOCK, r1)?;

        let mut result = Ok(());
        for (i, block) in buffer.chunks_exact(SECTOR_SIZE).enumerate() {
            result = self.transmit_block(Some(block), WRITE_MULTIPLE_TOKEN);
            if result.is_err() {
                warn!("multi-block write failed at block {}", i);
                break;
            }
        }

        let stopped = self.transmit_block(None, STOP_TRAN_TOKEN);
        result?;
        stopped
    }
}
