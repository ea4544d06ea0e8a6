use crate::ads1298::NUM_CONFIG_REGISTERS;
use confique::Config;
use serde::Deserialize;

/// Fixed configuration path; the daemon takes no command-line arguments.
pub const CONFIG_PATH: &str = "daq.toml";

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub daq: DaqSettings,
    #[config(nested)]
    pub server: ServerSettings,
    #[config(nested)]
    pub registers: Registers,
}

#[derive(Config, Debug, Clone)]
pub struct DaqSettings {
    /// SPI link clock; the chip tops out at 20 MHz.
    #[config(default = 2_000_000)]
    pub spi_clock_hz: u32,
    /// Directory output files are created in.
    #[config(default = ".")]
    pub data_dir: String,
    /// Captured frames per outbound decimated packet.
    #[config(default = 50)]
    pub ratio_packs: u32,
    pub pins: Pins,
}

/// BCM numbers of the chip control lines.
#[derive(Deserialize, Debug, Clone)]
pub struct Pins {
    pub start: u8,
    pub drdy: u8,
    pub reset: u8,
    pub clksel: u8,
}

#[derive(Config, Debug, Clone)]
pub struct ServerSettings {
    #[config(default = "0.0.0.0:7230")]
    pub bind_addr: String,
    /// Bound on blocking socket reads; a peer silent past this resets the
    /// connection.
    #[config(default = 3)]
    pub read_timeout_secs: u64,
    #[config(default = "daq.log")]
    pub log_file: String,
}

/// Chip register values written verbatim as one block during bring-up,
/// CONFIG1 through WCT2.
#[derive(Config, Debug, Clone)]
pub struct Registers {
    #[config(default = 0x86)]
    pub config1: u8,
    #[config(default = 0x00)]
    pub config2: u8,
    #[config(default = 0xCC)]
    pub config3: u8,
    #[config(default = 0x03)]
    pub loff: u8,
    #[config(default = 0x00)]
    pub ch1set: u8,
    #[config(default = 0x00)]
    pub ch2set: u8,
    #[config(default = 0x00)]
    pub ch3set: u8,
    #[config(default = 0x00)]
    pub ch4set: u8,
    #[config(default = 0x00)]
    pub ch5set: u8,
    #[config(default = 0x00)]
    pub ch6set: u8,
    #[config(default = 0x00)]
    pub ch7set: u8,
    #[config(default = 0x00)]
    pub ch8set: u8,
    #[config(default = 0xFF)]
    pub rld_sensp: u8,
    #[config(default = 0x02)]
    pub rld_sensn: u8,
    #[config(default = 0x00)]
    pub loff_sensp: u8,
    #[config(default = 0x00)]
    pub loff_sensn: u8,
    #[config(default = 0x00)]
    pub loff_flip: u8,
    #[config(default = 0x00)]
    pub loff_statp: u8,
    #[config(default = 0x00)]
    pub loff_statn: u8,
    #[config(default = 0x00)]
    pub gpio: u8,
    #[config(default = 0x00)]
    pub pace: u8,
    #[config(default = 0x00)]
    pub resp: u8,
    #[config(default = 0x00)]
    pub config4: u8,
    #[config(default = 0x00)]
    pub wct1: u8,
    #[config(default = 0x00)]
    pub wct2: u8,
}

impl Registers {
    /// Values in on-chip address order, ready for the WREG block write.
    pub fn block(&self) -> [u8; NUM_CONFIG_REGISTERS] {
        [
            self.config1,
            self.config2,
            self.config3,
            self.loff,
            self.ch1set,
            self.ch2set,
            self.ch3set,
            self.ch4set,
            self.ch5set,
            self.ch6set,
            self.ch7set,
            self.ch8set,
            self.rld_sensp,
            self.rld_sensn,
            self.loff_sensp,
            self.loff_sensn,
            self.loff_flip,
            self.loff_statp,
            self.loff_statn,
            self.gpio,
            self.pace,
            self.resp,
            self.config4,
            self.wct1,
            self.wct2,
        ]
    }
}
