pub mod ads1298;
pub mod config;
pub mod daq;
pub mod frame;
pub mod hal;
pub mod server;
pub mod transport;

pub use config::{Conf, CONFIG_PATH};
pub use daq::{acquisition_worker, Acquisition, Directive};
pub use frame::{DecimatedPacket, Decimator, SampleFrame};
pub use hal::{EdgeSource, HalError, OutputPin, PiDrdy, PiPin, PiSpi, SpiBus};
pub use server::{CommandServer, MSG_SIZE};
pub use transport::{Connection, TcpTransport, Transport};
