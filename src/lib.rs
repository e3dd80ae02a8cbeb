#![cfg_attr(not(test), no_std)]

pub mod diskio;
pub mod mmc_spi;

mod config;
mod constant;
mod err;
mod timer;
mod transport;

pub use config::SdSpiConfig;
pub use constant::SECTOR_SIZE;
pub use diskio::{DiskStatus, Ioctl, IoctlValue, SdDisk, SharedDisk};
pub use err::SdError;
pub use mmc_spi::{BlockDevice, CardInfo, CardType, Cid, Csd, SdSpi};
pub use timer::{Clock, Deadline};
pub use transport::{HalError, HalTransport, SpiClock, SpiTransport};
