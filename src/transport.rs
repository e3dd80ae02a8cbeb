use core::fmt::Debug;

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use crate::constant::FILL_BYTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiClock {
    /// Identification clock, 100-400 kHz.
    Slow,
    /// Data transfer clock.
    Fast,
}

/// Full-duplex SPI link to a single card.
///
/// `select`/`deselect` drive the chip-select line only; the driver clocks the
/// filler bytes around them itself. Transports with a DMA engine may
/// implement the `bulk_*` hooks. The driver then starts a bulk exchange,
/// polls it for completion under its own deadline and only reads the received
/// bytes back once `bulk_poll` reported completion.
pub trait SpiTransport {
    type Error: Debug;

    fn select(&mut self) -> Result<(), Self::Error>;

    fn deselect(&mut self) -> Result<(), Self::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Clocks `len` bytes. Missing `tx` sends 0xFF, missing `rx` discards.
    fn exchange_buffer(
        &mut self,
        tx: Option<&[u8]>,
        mut rx: Option<&mut [u8]>,
        len: usize,
    ) -> Result<(), Self::Error> {
        for i in 0..len {
            let out = tx.map_or(FILL_BYTE, |tx| tx[i]);
            let byte = self.exchange(out)?;
            if let Some(rx) = rx.as_deref_mut() {
                rx[i] = byte;
            }
        }
        Ok(())
    }

    fn set_clock(&mut self, clock: SpiClock) -> Result<(), Self::Error>;

    /// Starts an asynchronous exchange of `len` bytes. `Ok(false)` means the
    /// transport has no bulk engine and the exchange must be done inline.
    fn bulk_start(&mut self, tx: Option<&[u8]>, len: usize) -> Result<bool, Self::Error> {
        let _ = (tx, len);
        Ok(false)
    }

    /// Returns `true` once the running bulk exchange has completed.
    fn bulk_poll(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Copies the bytes received by the completed bulk exchange.
    fn bulk_finish(&mut self, rx: Option<&mut [u8]>) -> Result<(), Self::Error> {
        let _ = rx;
        Ok(())
    }

    fn bulk_abort(&mut self) {}
}

#[derive(Debug)]
pub enum HalError<S, P> {
    Spi(S),
    Pin(P),
}

/// `SpiTransport` over an `embedded-hal` bus and chip-select pin.
///
/// `embedded-hal` has no notion of bus frequency, so clock changes are
/// forwarded to `set_clock`.
pub struct HalTransport<SPI, CS, F> {
    spi: SPI,
    cs: CS,
    set_clock: F,
}

impl<SPI, CS, F> HalTransport<SPI, CS, F>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    F: FnMut(SpiClock),
{
    /// The pin is left untouched until the first `deselect`.
    pub fn new(spi: SPI, cs: CS, set_clock: F) -> Self {
        Self { spi, cs, set_clock }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS, F> SpiTransport for HalTransport<SPI, CS, F>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    F: FnMut(SpiClock),
{
    type Error = HalError<SPI::Error, CS::Error>;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(HalError::Pin)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.spi.flush().map_err(HalError::Spi)?;
        self.cs.set_high().map_err(HalError::Pin)
    }

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame).map_err(HalError::Spi)?;
        Ok(frame[0])
    }

    fn exchange_buffer(
        &mut self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        len: usize,
    ) -> Result<(), Self::Error> {
        match (tx, rx) {
            (Some(tx), Some(rx)) => self.spi.transfer(&mut rx[..len], &tx[..len]),
            (Some(tx), None) => self.spi.write(&tx[..len]),
            (None, Some(rx)) => {
                // The card expects MOSI high while it streams data out.
                let rx = &mut rx[..len];
                rx.fill(FILL_BYTE);
                self.spi.transfer_in_place(rx)
            }
            (None, None) => {
                let fill = [FILL_BYTE; 16];
                let mut left = len;
                while left > 0 {
                    let chunk = left.min(fill.len());
                    self.spi.write(&fill[..chunk]).map_err(HalError::Spi)?;
                    left -= chunk;
                }
                Ok(())
            }
        }
        .map_err(HalError::Spi)
    }

    fn set_clock(&mut self, clock: SpiClock) -> Result<(), Self::Error> {
        self.spi.flush().map_err(HalError::Spi)?;
        (self.set_clock)(clock);
        Ok(())
    }
}
