use log::{debug, trace, warn};

use crate::constant::*;
use crate::err::SdError;
use crate::timer::{Clock, Deadline};
use crate::transport::SpiTransport;

use super::{transport_err, SdSpi};

impl<S: SpiTransport, C: Clock> SdSpi<S, C> {
    pub(crate) fn exchange(&mut self, byte: u8) -> Result<u8, SdError> {
        self.spi.exchange(byte).map_err(transport_err)
    }

    pub(crate) fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), SdError> {
        let len = buf.len();
        self.spi
            .exchange_buffer(None, Some(buf), len)
            .map_err(transport_err)
    }

    pub(crate) fn skip_bytes(&mut self, len: usize) -> Result<(), SdError> {
        self.spi
            .exchange_buffer(None, None, len)
            .map_err(transport_err)
    }

    // Poll until the card releases MISO (0xFF). Returns false on expiry.
    pub(crate) fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool, SdError> {
        let deadline = Deadline::start(&self.clock, timeout_ms);
        loop {
            if self.exchange(FILL_BYTE)? == FILL_BYTE {
                return Ok(true);
            }
            if deadline.expired(&self.clock) {
                return Ok(false);
            }
        }
    }

    // CS low, one dummy clock, then wait for the card to be ready
    pub(crate) fn select(&mut self) -> Result<(), SdError> {
        self.spi.select().map_err(transport_err)?;
        self.exchange(FILL_BYTE)?;

        if self.wait_ready(self.config.ready_timeout_ms)? {
            return Ok(());
        }

        warn!("Card busy on select");
        self.deselect()?;
        Err(SdError::Timeout)
    }

    // CS high, then one dummy clock so the card releases MISO
    pub(crate) fn deselect(&mut self) -> Result<(), SdError> {
        self.spi.deselect().map_err(transport_err)?;
        self.exchange(FILL_BYTE)?;
        Ok(())
    }

    // Always deselect, keeping the first error
    pub(crate) fn end_transaction<T>(&mut self, result: Result<T, SdError>) -> Result<T, SdError> {
        let released = self.deselect();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Selects the card and waits for any pending programming to finish.
    pub fn sync(&mut self) -> Result<(), SdError> {
        let result = self.select();
        self.end_transaction(result)
    }

    // Send a command packet and return its R1 byte (0xFF when none arrived)
    pub(crate) fn send_command(&mut self, cmd: u8, arg: u32) -> Result<u8, SdError> {
        let mut cmd = cmd;
        if cmd & ACMD_FLAG != 0 {
            cmd &= !ACMD_FLAG;
            let r1 = self.send_command(MMC_APP_CMD, 0)?;
            if r1 > R1_IDLE_STATE {
                return Ok(r1);
            }
        }

        // A multi-block read is stopped while the card is still streaming
        if cmd != MMC_STOP_TRANSMISSION {
            self.deselect()?;
            match self.select() {
                Ok(()) => {}
                Err(SdError::Timeout) => return Ok(R1_NO_RESPONSE),
                Err(e) => return Err(e),
            }
        }

        let crc = match cmd {
            MMC_GO_IDLE_STATE => CRC_GO_IDLE,
            SD_SEND_IF_COND => CRC_SEND_IF_COND,
            _ => CRC_DUMMY,
        };
        let frame = [
            CMD_START_BITS | (cmd & CMD_INDEX_MASK),
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];
        trace!("CMD{} frame: {:02X?}", cmd, frame);
        self.spi
            .exchange_buffer(Some(&frame), None, frame.len())
            .map_err(transport_err)?;

        if cmd == MMC_STOP_TRANSMISSION {
            // Stuff byte
            self.exchange(FILL_BYTE)?;
        }

        let mut r1 = R1_NO_RESPONSE;
        for _ in 0..self.config.response_polls {
            r1 = self.exchange(FILL_BYTE)?;
            if r1 & R1_INVALID_MASK == 0 {
                break;
            }
        }

        debug!("CMD{}(0x{:08X}) -> R1 0x{:02X}", cmd, arg, r1);
        Ok(r1)
    }

    // Map a non-zero R1 to an error
    pub(crate) fn expect_ready(&self, cmd: u8, r1: u8) -> Result<(), SdError> {
        match r1 {
            R1_READY_STATE => Ok(()),
            R1_NO_RESPONSE => {
                warn!("CMD{} got no response", cmd & CMD_INDEX_MASK);
                Err(SdError::Timeout)
            }
            _ => {
                warn!("CMD{} rejected: R1 0x{:02X}", cmd & CMD_INDEX_MASK, r1);
                Err(SdError::Rejected(r1))
            }
        }
    }
}
