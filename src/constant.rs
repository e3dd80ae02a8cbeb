// SD/MMC command indices as sent in SPI mode. Application commands carry
// ACMD_FLAG and are preceded by APP_CMD on the wire.
pub const ACMD_FLAG: u8 = 0x80;

pub const MMC_GO_IDLE_STATE: u8 = 0;
pub const MMC_SEND_OP_COND: u8 = 1;
pub const SD_SEND_IF_COND: u8 = 8;
pub const MMC_SEND_CSD: u8 = 9;
pub const MMC_SEND_CID: u8 = 10;
pub const MMC_STOP_TRANSMISSION: u8 = 12;
pub const MMC_SEND_STATUS: u8 = 13;
pub const MMC_SET_BLOCKLEN: u8 = 16;
pub const MMC_READ_SINGLE_BLOCK: u8 = 17;
pub const MMC_READ_MULTIPLE_BLOCK: u8 = 18;
pub const MMC_WRITE_BLOCK: u8 = 24;
pub const MMC_WRITE_MULTIPLE_BLOCK: u8 = 25;
pub const SD_ERASE_WR_BLK_START: u8 = 32;
pub const SD_ERASE_WR_BLK_END: u8 = 33;
pub const MMC_ERASE: u8 = 38;
pub const MMC_APP_CMD: u8 = 55;
pub const MMC_SPI_READ_OCR: u8 = 58;

pub const SD_APP_SD_STATUS: u8 = ACMD_FLAG | 13;
pub const SD_APP_SET_WR_BLK_ERASE_COUNT: u8 = ACMD_FLAG | 23;
pub const SD_APP_OP_COND: u8 = ACMD_FLAG | 41;

// Frame layout
pub const CMD_START_BITS: u8 = 0x40;
pub const CMD_INDEX_MASK: u8 = 0x3F;
pub const CRC_GO_IDLE: u8 = 0x95;
pub const CRC_SEND_IF_COND: u8 = 0x87;
pub const CRC_DUMMY: u8 = 0x01;

/// 2.7-3.6V supply and the 0xAA check pattern.
pub const IF_COND_PATTERN: u32 = 0x1AA;
pub const OCR_HCS: u32 = 1 << 30;
/// Card Capacity Status, bit 30 of the OCR as seen in its first byte.
pub const OCR_CCS_BYTE0: u8 = 0x40;

// R1 response
pub const R1_READY_STATE: u8 = 0x00;
pub const R1_IDLE_STATE: u8 = 0x01;
pub const R1_NO_RESPONSE: u8 = 0xFF;
pub const R1_INVALID_MASK: u8 = 0x80;

// Data tokens
pub const DATA_START_BLOCK: u8 = 0xFE;
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;
pub const STOP_TRAN_TOKEN: u8 = 0xFD;
pub const DATA_RES_MASK: u8 = 0x1F;
pub const DATA_RES_ACCEPTED: u8 = 0x05;

pub const FILL_BYTE: u8 = 0xFF;

pub const SECTOR_SIZE: usize = 512;
pub const CRC_LEN: usize = 2;

pub const CSD_LEN: usize = 16;
pub const CID_LEN: usize = 16;
pub const OCR_LEN: usize = 4;
pub const SD_STATUS_LEN: usize = 64;
