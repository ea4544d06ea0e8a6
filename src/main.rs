use anyhow::{Context, Result};
use biodaq::*;
use confique::Config as _;
use log::{info, LevelFilter};
use rppal::gpio::Gpio;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use time::macros::format_description;

fn main() -> Result<()> {
    let config = Conf::builder()
        .file(CONFIG_PATH)
        .load()
        .with_context(|| format!("loading {CONFIG_PATH}"))?;

    init_logging(&config.server.log_file)?;
    info!("biodaq starting");

    // SPI/GPIO bring-up; failing to open the bus is the one fatal error
    let bus = PiSpi::open(config.daq.spi_clock_hz).context("opening SPI bus")?;
    let gpio = Gpio::new().context("opening GPIO")?;
    let pins = &config.daq.pins;
    let start = PiPin::open(&gpio, pins.start).context("claiming START pin")?;
    let reset = PiPin::open(&gpio, pins.reset).context("claiming RESET pin")?;
    let clksel = PiPin::open(&gpio, pins.clksel).context("claiming CLKSEL pin")?;
    let drdy = PiDrdy::open(&gpio, pins.drdy).context("claiming DRDY pin")?;

    let mut daq = Acquisition::new(
        Box::new(bus),
        Box::new(start),
        Box::new(reset),
        Box::new(clksel),
        Box::new(drdy),
        PathBuf::from(&config.daq.data_dir),
        config.registers.clone(),
    );
    daq.configure();

    let (directives, worker_rx) = crossbeam_channel::unbounded();
    thread::spawn(move || acquisition_worker(daq, worker_rx));

    let transport = TcpTransport::new(
        config.server.bind_addr.clone(),
        Duration::from_secs(config.server.read_timeout_secs),
    );
    let mut server = CommandServer::new(transport, directives, config.daq.ratio_packs);
    server.run()
}

/// Terminal output plus the append-only event log, opened once and never
/// rotated.
fn init_logging(log_file: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening log file {log_file}"))?;
    let file_config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .build();
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, file_config, file),
    ])
    .context("installing logger")
}
