/// Timing budgets and polling limits of the SPI driver.
///
/// All `*_ms` values are wall-clock milliseconds measured with the driver's
/// [`Clock`](crate::Clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdSpiConfig {
    /// Filler bytes clocked with CS high before CMD0 (8 clocks each).
    pub idle_clocks: u8,
    /// Bytes polled for an R1 response after a command frame.
    pub response_polls: u8,
    pub token_timeout_ms: u32,
    pub ready_timeout_ms: u32,
    pub init_timeout_ms: u32,
    pub program_timeout_ms: u32,
    pub bulk_timeout_ms: u32,
    pub erase_timeout_ms: u32,
}

impl Default for SdSpiConfig {
    fn default() -> Self {
        Self {
            idle_clocks: 10,
            response_polls: 10,
            token_timeout_ms: 200,
            ready_timeout_ms: 500,
            init_timeout_ms: 1000,
            program_timeout_ms: 500,
            bulk_timeout_ms: 100,
            erase_timeout_ms: 30_000,
        }
    }
}

impl SdSpiConfig {
    pub fn with_idle_clocks(mut self, idle_clocks: u8) -> Self {
        self.idle_clocks = idle_clocks;
        self
    }

    pub fn with_response_polls(mut self, response_polls: u8) -> Self {
        self.response_polls = response_polls;
        self
    }

    pub fn with_token_timeout(mut self, ms: u32) -> Self {
        self.token_timeout_ms = ms;
        self
    }

    pub fn with_ready_timeout(mut self, ms: u32) -> Self {
        self.ready_timeout_ms = ms;
        self
    }

    pub fn with_init_timeout(mut self, ms: u32) -> Self {
        self.init_timeout_ms = ms;
        self
    }

    pub fn with_program_timeout(mut self, ms: u32) -> Self {
        self.program_timeout_ms = ms;
        self
    }

    pub fn with_bulk_timeout(mut self, ms: u32) -> Self {
        self.bulk_timeout_ms = ms;
        self
    }

    pub fn with_erase_timeout(mut self, ms: u32) -> Self {
        self.erase_timeout_ms = ms;
        self
    }
}
