//! ADS1298 opcodes, register map and frame geometry.

use std::time::Duration;

// SPI opcodes
pub const CMD_WAKEUP: u8 = 0x02;
pub const CMD_STANDBY: u8 = 0x04;
pub const CMD_RESET: u8 = 0x06;
pub const CMD_START: u8 = 0x08;
pub const CMD_STOP: u8 = 0x0A;
pub const CMD_RDATAC: u8 = 0x10;
pub const CMD_SDATAC: u8 = 0x11;
pub const CMD_RDATA: u8 = 0x12;
/// Read/write register opcodes; OR the register address into the low bits.
pub const CMD_RREG: u8 = 0x20;
pub const CMD_WREG: u8 = 0x40;

// Register addresses
pub const REG_ID: u8 = 0x00;
pub const REG_CONFIG1: u8 = 0x01;
pub const REG_CONFIG2: u8 = 0x02;
pub const REG_CONFIG3: u8 = 0x03;
pub const REG_LOFF: u8 = 0x04;
pub const REG_CH1SET: u8 = 0x05;
pub const REG_CH8SET: u8 = 0x0C;
pub const REG_RLD_SENSP: u8 = 0x0D;
pub const REG_RLD_SENSN: u8 = 0x0E;
pub const REG_LOFF_SENSP: u8 = 0x0F;
pub const REG_LOFF_SENSN: u8 = 0x10;
pub const REG_LOFF_FLIP: u8 = 0x11;
pub const REG_LOFF_STATP: u8 = 0x12;
pub const REG_LOFF_STATN: u8 = 0x13;
pub const REG_GPIO: u8 = 0x14;
pub const REG_PACE: u8 = 0x15;
pub const REG_RESP: u8 = 0x16;
pub const REG_CONFIG4: u8 = 0x17;
pub const REG_WCT1: u8 = 0x18;
pub const REG_WCT2: u8 = 0x19;

/// Total number of on-chip registers (ID through WCT2).
pub const NUM_REGISTERS: usize = 26;
/// Registers written as one WREG block, CONFIG1 through WCT2.
pub const NUM_CONFIG_REGISTERS: usize = 25;

pub const NUM_CHANNELS: usize = 8;
pub const STATUS_BYTES: usize = 3;
pub const BYTES_PER_CHANNEL: usize = 3;
/// Bytes per data-ready transfer: 24-bit status word plus eight 24-bit channels.
pub const FRAME_LEN: usize = STATUS_BYTES + NUM_CHANNELS * BYTES_PER_CHANNEL;

/// Settling delay after command and register transactions.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);
