#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};

use sdmmc_spi::{SdDisk, SdSpi, SdSpiConfig, SpiClock, SpiTransport};

// 1 GB SDv1, ERASE_BLK_EN set
pub const CSD_V1: [u8; 16] = [
    0x00, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xC8, 0xAD, 0xDB, 0xCF, 0xFF, 0xD2, 0x40, 0x40, 0xA5,
];
// 4 GB SDHC
pub const CSD_V2: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x8B,
];
pub const CID: [u8; 16] = [
    0x03, b'S', b'D', b'S', b'U', b'0', b'4', b'G', 0x80, 0x12, 0x34, 0x56, 0x78, 0x01, 0x73, 0x00,
];

pub const V1_SECTORS: u32 = 1_984_000;
pub const V2_SECTORS: u32 = 7_710_720;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SdV1,
    SdV2,
    SdHc,
    Mmc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    Off,
    Complete,
    Stall,
}

#[derive(Debug)]
pub struct SimError;

enum Mode {
    Command,
    ReadStream { next: u32 },
    WriteToken { multi: bool, next: u32 },
    WriteData { multi: bool, sector: u32, data: Vec<u8> },
}

/// A card in SPI mode, answering at byte level.
pub struct SimCard {
    pub kind: Kind,
    pub present: bool,
    pub selected: bool,
    pub sectors: HashMap<u32, Vec<u8>>,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub sd_status: [u8; 64],
    /// ACMD41/CMD1 answers "idle" this many times before "ready".
    pub op_cond_polls: u32,
    pub busy_after_write: usize,
    pub busy_after_erase: usize,
    pub busy_after_stop: usize,
    /// Extra 0xFF bytes before every R1.
    pub response_delay: usize,

    // faults
    pub bad_echo: bool,
    pub drop_read_token: bool,
    /// Block index and the data response sent instead of "accepted".
    pub reject_write_block: Option<(usize, u8)>,
    pub fail_transport: bool,
    pub bulk: BulkMode,

    // records
    pub commands: Vec<(u8, u32)>,
    pub frames: Vec<[u8; 6]>,
    pub clocks: Vec<SpiClock>,
    pub selects: usize,
    pub deselects: usize,
    pub exchanges: usize,
    pub stop_tokens: usize,
    pub blocks_written: usize,
    pub bulk_transfers: usize,
    pub bulk_aborts: usize,
    pub erased: Vec<(u32, u32)>,

    idle: bool,
    app_cmd: bool,
    op_polls_left: u32,
    busy: usize,
    out: VecDeque<u8>,
    frame: Vec<u8>,
    mode: Mode,
    erase_start: u32,
    erase_end: u32,
    bulk_rx: Vec<u8>,
}

impl SimCard {
    pub fn new(kind: Kind) -> Self {
        let csd = match kind {
            Kind::SdV2 | Kind::SdHc => CSD_V2,
            Kind::SdV1 | Kind::Mmc => CSD_V1,
        };
        let mut sd_status = [0u8; 64];
        // AU_SIZE 9: 4 MB
        sd_status[10] = 0x90;

        Self {
            kind,
            present: true,
            selected: false,
            sectors: HashMap::new(),
            csd,
            cid: CID,
            sd_status,
            op_cond_polls: 3,
            busy_after_write: 3,
            busy_after_erase: 5,
            busy_after_stop: 4,
            response_delay: 0,
            bad_echo: false,
            drop_read_token: false,
            reject_write_block: None,
            fail_transport: false,
            bulk: BulkMode::Off,
            commands: Vec::new(),
            frames: Vec::new(),
            clocks: Vec::new(),
            selects: 0,
            deselects: 0,
            exchanges: 0,
            stop_tokens: 0,
            blocks_written: 0,
            bulk_transfers: 0,
            bulk_aborts: 0,
            erased: Vec::new(),
            idle: true,
            app_cmd: false,
            op_polls_left: 0,
            busy: 0,
            out: VecDeque::new(),
            frame: Vec::new(),
            mode: Mode::Command,
            erase_start: 0,
            erase_end: 0,
            bulk_rx: Vec::new(),
        }
    }

    pub fn absent() -> Self {
        let mut card = Self::new(Kind::SdHc);
        card.present = false;
        card
    }

    pub fn with_sector(mut self, sector: u32, fill: u8) -> Self {
        self.sectors.insert(sector, vec![fill; 512]);
        self
    }

    pub fn sector(&self, sector: u32) -> Vec<u8> {
        self.sectors
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| vec![0u8; 512])
    }

    /// Command indices received, application commands with 0x80 set.
    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|&(cmd, _)| cmd).collect()
    }

    pub fn count_of(&self, cmd: u8) -> usize {
        self.commands.iter().filter(|&&(c, _)| c == cmd).count()
    }

    pub fn last_arg(&self, cmd: u8) -> Option<u32> {
        self.commands
            .iter()
            .rev()
            .find(|&&(c, _)| c == cmd)
            .map(|&(_, arg)| arg)
    }

    pub fn clear_records(&mut self) {
        self.commands.clear();
        self.frames.clear();
        self.exchanges = 0;
        self.stop_tokens = 0;
        self.blocks_written = 0;
        self.selects = 0;
        self.deselects = 0;
    }

    fn sector_of(&self, arg: u32) -> u32 {
        match self.kind {
            Kind::SdHc => arg,
            _ => arg / 512,
        }
    }

    fn clock_byte(&mut self, byte: u8) -> Result<u8, SimError> {
        if self.fail_transport {
            return Err(SimError);
        }
        self.exchanges += 1;
        if !self.present || !self.selected {
            return Ok(0xFF);
        }

        let out = self.next_output();
        self.consume(byte);
        Ok(out)
    }

    fn next_output(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0x00;
        }
        if let Mode::ReadStream { next } = self.mode {
            if !self.drop_read_token {
                let data = self.sector(next);
                self.mode = Mode::ReadStream { next: next + 1 };
                self.queue_data_block(&data);
                return self.out.pop_front().unwrap_or(0xFF);
            }
        }
        0xFF
    }

    fn queue_data_block(&mut self, data: &[u8]) {
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(data.iter().copied());
        self.out.extend([0x00, 0x00]);
    }

    pub fn is_busy(&self) -> bool {
        self.busy > 0
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.out.push_back(0xFF);
        self.out.extend(std::iter::repeat(0xFF).take(self.response_delay));
        self.out.extend(bytes.iter().copied());
    }

    fn consume(&mut self, byte: u8) {
        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::WriteToken { multi, next } => {
                self.mode = match (multi, byte) {
                    (false, 0xFE) | (true, 0xFC) => Mode::WriteData {
                        multi,
                        sector: next,
                        data: Vec::with_capacity(514),
                    },
                    (true, 0xFD) => {
                        self.stop_tokens += 1;
                        // one byte passes before busy is signalled
                        self.out.push_back(0xFF);
                        self.busy = self.busy_after_stop;
                        Mode::Command
                    }
                    _ => Mode::WriteToken { multi, next },
                };
            }
            Mode::WriteData {
                multi,
                sector,
                mut data,
            } => {
                data.push(byte);
                if data.len() < 514 {
                    self.mode = Mode::WriteData { multi, sector, data };
                    return;
                }

                let index = self.blocks_written;
                self.blocks_written += 1;
                if let Some((_, response)) = self.reject_write_block.filter(|&(i, _)| i == index) {
                    self.out.push_back(response);
                } else {
                    data.truncate(512);
                    self.sectors.insert(sector, data);
                    self.out.push_back(0xE5);
                    self.busy = self.busy_after_write;
                }
                self.mode = if multi {
                    Mode::WriteToken {
                        multi,
                        next: sector + 1,
                    }
                } else {
                    Mode::Command
                };
            }
            mode => {
                self.mode = mode;
                if self.frame.is_empty() && byte & 0xC0 != 0x40 {
                    return;
                }
                self.frame.push(byte);
                if self.frame.len() == 6 {
                    let frame = std::mem::take(&mut self.frame);
                    self.handle_command(&frame);
                }
            }
        }
    }

    fn handle_command(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = std::mem::take(&mut self.app_cmd);
        self.commands
            .push((if app { index | 0x80 } else { index }, arg));
        self.frames
            .push([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]);

        let r1 = if self.idle { 0x01 } else { 0x00 };

        // CRC is checked for the two commands sent before SPI mode is settled
        let crc_ok = match (app, index) {
            (false, 0) => frame[5] == 0x95,
            (false, 8) => frame[5] == 0x87,
            _ => true,
        };
        if !crc_ok {
            // illegal command | CRC error
            self.reply(&[r1 | 0x0C]);
            return;
        }
        let sd_v2 = matches!(self.kind, Kind::SdV2 | Kind::SdHc);

        match (app, index) {
            (_, 12) => {
                self.out.clear();
                self.busy = 0;
                self.mode = Mode::Command;
                // stuff byte, then R1
                self.out.extend([0xFF, 0x00]);
            }
            (false, 0) => {
                self.idle = true;
                self.op_polls_left = self.op_cond_polls;
                self.mode = Mode::Command;
                self.reply(&[0x01]);
            }
            (false, 8) if sd_v2 => {
                let check = if self.bad_echo { 0xAB } else { arg as u8 };
                self.reply(&[r1, 0x00, 0x00, ((arg >> 8) & 0x0F) as u8, check]);
            }
            (false, 55) if self.kind != Kind::Mmc => {
                self.app_cmd = true;
                self.reply(&[r1]);
            }
            (true, 41) | (false, 1) => {
                if self.op_polls_left > 0 {
                    self.op_polls_left -= 1;
                    self.reply(&[0x01]);
                } else {
                    self.idle = false;
                    self.reply(&[0x00]);
                }
            }
            (false, 58) => {
                let ocr0 = if self.kind == Kind::SdHc { 0xC0 } else { 0x80 };
                self.reply(&[r1, ocr0, 0xFF, 0x80, 0x00]);
            }
            (false, 16) => {
                let r1 = if arg == 512 { r1 } else { r1 | 0x40 };
                self.reply(&[r1]);
            }
            (false, 9) => {
                self.reply(&[r1]);
                let csd = self.csd;
                self.queue_data_block(&csd);
            }
            (false, 10) => {
                self.reply(&[r1]);
                let cid = self.cid;
                self.queue_data_block(&cid);
            }
            (false, 13) => self.reply(&[r1, 0x00]),
            (true, 13) => {
                self.reply(&[r1, 0x00]);
                let status = self.sd_status;
                self.queue_data_block(&status);
            }
            (false, 17) => {
                self.reply(&[r1]);
                if !self.drop_read_token {
                    let data = self.sector(self.sector_of(arg));
                    self.queue_data_block(&data);
                }
            }
            (false, 18) => {
                self.reply(&[r1]);
                self.mode = Mode::ReadStream {
                    next: self.sector_of(arg),
                };
            }
            (false, 24) | (false, 25) => {
                self.reply(&[r1]);
                self.mode = Mode::WriteToken {
                    multi: index == 25,
                    next: self.sector_of(arg),
                };
            }
            (true, 23) => self.reply(&[r1]),
            (false, 32) => {
                self.erase_start = self.sector_of(arg);
                self.reply(&[r1]);
            }
            (false, 33) => {
                self.erase_end = self.sector_of(arg);
                self.reply(&[r1]);
            }
            (false, 38) => {
                for sector in self.erase_start..=self.erase_end {
                    self.sectors.remove(&sector);
                }
                self.erased.push((self.erase_start, self.erase_end));
                self.reply(&[r1]);
                self.busy = self.busy_after_erase;
            }
            // illegal command
            _ => self.reply(&[r1 | 0x04]),
        }
    }
}

impl SpiTransport for SimCard {
    type Error = SimError;

    fn select(&mut self) -> Result<(), SimError> {
        self.selected = true;
        self.selects += 1;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), SimError> {
        self.selected = false;
        self.frame.clear();
        self.deselects += 1;
        Ok(())
    }

    fn exchange(&mut self, byte: u8) -> Result<u8, SimError> {
        self.clock_byte(byte)
    }

    fn set_clock(&mut self, clock: SpiClock) -> Result<(), SimError> {
        self.clocks.push(clock);
        Ok(())
    }

    fn bulk_start(&mut self, tx: Option<&[u8]>, len: usize) -> Result<bool, SimError> {
        match self.bulk {
            BulkMode::Off => Ok(false),
            BulkMode::Complete => {
                self.bulk_transfers += 1;
                self.bulk_rx.clear();
                for i in 0..len {
                    let byte = self.clock_byte(tx.map_or(0xFF, |tx| tx[i]))?;
                    self.bulk_rx.push(byte);
                }
                Ok(true)
            }
            BulkMode::Stall => {
                self.bulk_transfers += 1;
                Ok(true)
            }
        }
    }

    fn bulk_poll(&mut self) -> Result<bool, SimError> {
        Ok(self.bulk != BulkMode::Stall)
    }

    fn bulk_finish(&mut self, rx: Option<&mut [u8]>) -> Result<(), SimError> {
        if let Some(rx) = rx {
            rx.copy_from_slice(&self.bulk_rx);
        }
        Ok(())
    }

    fn bulk_abort(&mut self) {
        self.bulk_aborts += 1;
    }
}

/// Millisecond tick that advances on every read.
pub fn tick_clock() -> impl Fn() -> u32 {
    let now = Cell::new(0u32);
    move || {
        let t = now.get().wrapping_add(1);
        now.set(t);
        t
    }
}

pub fn spi(card: SimCard) -> SdSpi<SimCard, impl Fn() -> u32> {
    SdSpi::new(card, tick_clock(), SdSpiConfig::default())
}

pub fn disk(card: SimCard) -> SdDisk<SimCard, impl Fn() -> u32> {
    SdDisk::with_defaults(card, tick_clock())
}

/// Disk with the card already initialized and the records cleared.
pub fn ready_disk(card: SimCard) -> SdDisk<SimCard, impl Fn() -> u32> {
    let mut disk = disk(card);
    let status = disk.initialize(0);
    assert!(status.is_empty(), "initialization failed: {:?}", status);
    disk.card_mut().transport_mut().clear_records();
    disk
}

pub fn pattern(sector: u32) -> Vec<u8> {
    (0..512u32)
        .map(|i| (i as u8) ^ (sector as u8).wrapping_mul(31))
        .collect()
}
