//! ADS1298 bring-up and edge-driven sample capture.
//!
//! All state the capture path touches (the SPI bus, the open output file,
//! the most recent frame and the outbound tap) lives in one mutex domain.
//! The data-ready handler locks it for the duration of a capture, and
//! `stop_acquisition` locks it before closing the file, so a stop issued
//! while a capture is in flight waits for the frame to land.

use crate::ads1298::{
    CMD_RDATAC, CMD_RREG, CMD_SDATAC, CMD_WREG, FRAME_LEN, NUM_CONFIG_REGISTERS, NUM_REGISTERS,
    REG_CONFIG1, SETTLE_DELAY,
};
use crate::config::Registers;
use crate::frame::SampleFrame;
use crate::hal::{EdgeSource, HalError, OutputPin, SpiBus};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Messages the command context sends to the acquisition worker.
pub enum Directive {
    Start {
        file_base: String,
        tap: Sender<SampleFrame>,
    },
    Stop,
}

struct Shared {
    bus: Box<dyn SpiBus>,
    out: Option<BufWriter<File>>,
    frame: SampleFrame,
    tap: Option<Sender<SampleFrame>>,
}

impl Shared {
    fn command(&mut self, opcode: u8) -> Result<(), HalError> {
        let mut buf = [opcode];
        self.bus.transfer(&mut buf)?;
        thread::sleep(SETTLE_DELAY);
        Ok(())
    }

    fn read_register(&mut self, address: u8) -> Result<u8, HalError> {
        self.command(CMD_SDATAC)?;
        let mut buf = [CMD_RREG | address, 0x00, 0x00];
        self.bus.transfer(&mut buf)?;
        thread::sleep(SETTLE_DELAY);
        Ok(buf[2])
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<(), HalError> {
        self.command(CMD_SDATAC)?;
        let mut buf = [CMD_WREG | address, 0x00, value];
        self.bus.transfer(&mut buf)
    }
}

pub struct Acquisition {
    shared: Arc<Mutex<Shared>>,
    start: Box<dyn OutputPin>,
    reset: Box<dyn OutputPin>,
    clksel: Box<dyn OutputPin>,
    drdy: Box<dyn EdgeSource>,
    armed: bool,
    data_dir: PathBuf,
    registers: Registers,
}

impl Acquisition {
    pub fn new(
        bus: Box<dyn SpiBus>,
        start: Box<dyn OutputPin>,
        reset: Box<dyn OutputPin>,
        clksel: Box<dyn OutputPin>,
        drdy: Box<dyn EdgeSource>,
        data_dir: PathBuf,
        registers: Registers,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                bus,
                out: None,
                frame: SampleFrame::default(),
                tap: None,
            })),
            start,
            reset,
            clksel,
            drdy,
            armed: false,
            data_dir,
            registers,
        }
    }

    /// One-time chip bring-up: power-up pin sequence, SDATAC to force a known
    /// idle state, one block write of the configured registers, then a
    /// diagnostic readback of every register. Individual transaction failures
    /// are logged and bring-up continues.
    pub fn configure(&mut self) {
        info!("starting ADS1298 bring-up");
        self.power_up_sequence();

        let mut shared = self.shared.lock().unwrap();
        if let Err(e) = shared.command(CMD_SDATAC) {
            warn!("SDATAC failed: {e}");
        }

        // WREG block: opcode at CONFIG1, count-1, then all 25 values.
        let block = self.registers.block();
        let mut buf = [0u8; NUM_CONFIG_REGISTERS + 2];
        buf[0] = CMD_WREG | REG_CONFIG1;
        buf[1] = (NUM_CONFIG_REGISTERS - 1) as u8;
        buf[2..].copy_from_slice(&block);
        if let Err(e) = shared.bus.transfer(&mut buf) {
            warn!("register block write failed: {e}");
        }
        thread::sleep(Duration::from_millis(100));

        for address in 0..NUM_REGISTERS as u8 {
            match shared.read_register(address) {
                Ok(value) => info!("register {address:#04x} = {value:#04x}"),
                Err(e) => warn!("register {address:#04x} readback failed: {e}"),
            }
        }
        info!("ADS1298 bring-up done");
    }

    // CLKSEL selects the internal oscillator, then RESET is pulsed per the
    // datasheet power-up timing.
    fn power_up_sequence(&mut self) {
        if let Err(e) = self.clksel.set_high() {
            warn!("power-up: CLKSEL write failed: {e}");
        }
        thread::sleep(Duration::from_millis(100));
        if let Err(e) = self.reset.set_high() {
            warn!("power-up: RESET write failed: {e}");
        }
        thread::sleep(Duration::from_millis(1000));
        if let Err(e) = self.reset.set_low() {
            warn!("power-up: RESET write failed: {e}");
        }
        thread::sleep(Duration::from_millis(100));
        if let Err(e) = self.reset.set_high() {
            warn!("power-up: RESET write failed: {e}");
        }
    }

    pub fn read_register(&self, address: u8) -> Result<u8, HalError> {
        self.shared.lock().unwrap().read_register(address)
    }

    pub fn write_register(&self, address: u8, value: u8) -> Result<(), HalError> {
        self.shared.lock().unwrap().write_register(address, value)
    }

    /// Open the run file, put the chip in continuous-read mode, arm the
    /// data-ready handler (first start only; it stays installed) and assert
    /// START. Frames then land asynchronously until [`Self::stop_acquisition`].
    ///
    /// The command loop serializes starts; one arriving with a run already
    /// open is logged and ignored.
    pub fn start_acquisition(&mut self, file_base: &str, tap: Sender<SampleFrame>) -> Result<()> {
        let path = self.data_dir.join(format!("rpiData_{file_base}.bin"));
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.out.is_some() {
                warn!("start requested while a run is open; ignoring");
                return Ok(());
            }
            let file = File::create(&path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            shared.out = Some(BufWriter::new(file));
            shared.tap = Some(tap);
            if let Err(e) = shared.command(CMD_RDATAC) {
                warn!("RDATAC failed: {e}");
            }
        }

        if !self.armed {
            let shared = Arc::clone(&self.shared);
            self.drdy
                .arm(Box::new(move || on_sample_ready(&shared)))
                .context("arming data-ready interrupt")?;
            self.armed = true;
        }

        if let Err(e) = self.start.set_high() {
            warn!("failed to assert START: {e}");
        }
        info!("acquisition started, writing {}", path.display());
        Ok(())
    }

    /// Deassert START, wait out any in-flight capture, then flush and close
    /// the run file. A stop with no run open is a logged no-op.
    pub fn stop_acquisition(&mut self) {
        if let Err(e) = self.start.set_low() {
            warn!("failed to deassert START: {e}");
        }
        let mut shared = self.shared.lock().unwrap();
        shared.tap = None;
        match shared.out.take() {
            Some(mut out) => {
                if let Err(e) = out.flush() {
                    warn!("flushing output file failed: {e}");
                }
                info!("acquisition stopped, output closed");
            }
            None => info!("stop requested with no run open"),
        }
    }
}

/// Data-ready handler: one full-duplex transfer, retain the frame, append it
/// to the run file, offer it to the tap. Runs on the edge source's thread;
/// edges arriving with no run open (START is already low) are ignored.
fn on_sample_ready(shared: &Mutex<Shared>) {
    let mut shared = shared.lock().unwrap();
    if shared.out.is_none() {
        return;
    }
    let mut raw = [0u8; FRAME_LEN];
    if let Err(e) = shared.bus.transfer(&mut raw) {
        warn!("sample transfer failed: {e}");
        return;
    }
    shared.frame = SampleFrame::from_bytes(raw);
    let frame = shared.frame;
    if let Some(out) = shared.out.as_mut() {
        if let Err(e) = out.write_all(frame.as_bytes()) {
            warn!("sample write failed: {e}");
        }
    }
    if let Some(tap) = &shared.tap {
        if tap.send(frame).is_err() {
            // forwarder is gone; stop offering
            shared.tap = None;
        }
    }
}

/// Worker context: drains start/stop directives from the command loop.
/// Closes out any open run when the directive channel disconnects.
pub fn acquisition_worker(mut daq: Acquisition, directives: Receiver<Directive>) {
    for directive in directives.iter() {
        match directive {
            Directive::Start { file_base, tap } => {
                if let Err(e) = daq.start_acquisition(&file_base, tap) {
                    warn!("start failed: {e:#}");
                }
            }
            Directive::Stop => daq.stop_acquisition(),
        }
    }
    daq.stop_acquisition();
}

#[cfg(test)]
mod tests {
    use super::*;
    use confique::Config as _;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicBool, Ordering};

    type TransferLog = Arc<Mutex<Vec<Vec<u8>>>>;

    /// Records every transfer; optionally dawdles to simulate a slow capture
    /// and answers register reads with `reply_byte`.
    struct FakeBus {
        log: TransferLog,
        delay: Duration,
        reply_byte: u8,
        fill: u8,
    }

    impl FakeBus {
        fn new(log: TransferLog) -> Self {
            Self {
                log,
                delay: Duration::ZERO,
                reply_byte: 0,
                fill: 0x42,
            }
        }
    }

    impl SpiBus for FakeBus {
        fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError> {
            self.log.lock().unwrap().push(buf.to_vec());
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if buf.len() == FRAME_LEN {
                buf.fill(self.fill);
            } else if buf.len() == 3 {
                buf[2] = self.reply_byte;
            }
            Ok(())
        }
    }

    struct FakePin {
        high: Arc<AtomicBool>,
    }

    impl OutputPin for FakePin {
        fn set_high(&mut self) -> Result<(), HalError> {
            self.high.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), HalError> {
            self.high.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    type Handler = Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>;

    struct FakeEdge {
        handler: Handler,
    }

    impl EdgeSource for FakeEdge {
        fn arm(&mut self, handler: Box<dyn FnMut() + Send + 'static>) -> Result<(), HalError> {
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }
    }

    struct Rig {
        daq: Acquisition,
        log: TransferLog,
        handler: Handler,
        start_high: Arc<AtomicBool>,
        dir: tempfile::TempDir,
    }

    fn rig_with(delay: Duration) -> Rig {
        let log: TransferLog = Arc::default();
        let handler: Handler = Arc::default();
        let start_high = Arc::new(AtomicBool::new(false));
        let dir = tempfile::tempdir().unwrap();
        let mut bus = FakeBus::new(Arc::clone(&log));
        bus.delay = delay;
        let daq = Acquisition::new(
            Box::new(bus),
            Box::new(FakePin {
                high: Arc::clone(&start_high),
            }),
            Box::new(FakePin {
                high: Arc::default(),
            }),
            Box::new(FakePin {
                high: Arc::default(),
            }),
            Box::new(FakeEdge {
                handler: Arc::clone(&handler),
            }),
            dir.path().to_path_buf(),
            Registers::builder().load().unwrap(),
        );
        Rig {
            daq,
            log,
            handler,
            start_high,
            dir,
        }
    }

    fn rig() -> Rig {
        rig_with(Duration::ZERO)
    }

    fn fire(handler: &Handler) {
        let mut slot = handler.lock().unwrap();
        slot.as_mut().expect("handler armed")();
    }

    #[test]
    fn run_file_length_is_a_frame_multiple() {
        let mut rig = rig();
        let (tap, _rx) = unbounded();
        rig.daq.start_acquisition("run1", tap).unwrap();
        assert!(rig.start_high.load(Ordering::SeqCst));
        for _ in 0..7 {
            fire(&rig.handler);
        }
        rig.daq.stop_acquisition();
        assert!(!rig.start_high.load(Ordering::SeqCst));

        let path = rig.dir.path().join("rpiData_run1.bin");
        let data = std::fs::read(path).unwrap();
        assert_eq!(data.len(), 7 * FRAME_LEN);
        assert!(data.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn start_while_running_keeps_the_open_run() {
        let mut rig = rig();
        let (tap, _rx) = unbounded();
        rig.daq.start_acquisition("first", tap.clone()).unwrap();
        rig.daq.start_acquisition("second", tap).unwrap();
        fire(&rig.handler);
        rig.daq.stop_acquisition();

        let first = rig.dir.path().join("rpiData_first.bin");
        assert_eq!(std::fs::read(first).unwrap().len(), FRAME_LEN);
        assert!(!rig.dir.path().join("rpiData_second.bin").exists());
    }

    #[test]
    fn stop_without_a_run_is_a_no_op() {
        let mut rig = rig();
        rig.daq.stop_acquisition();
        assert!(rig.log.lock().unwrap().is_empty());
    }

    #[test]
    fn late_edges_are_ignored_after_stop() {
        let mut rig = rig();
        let (tap, _rx) = unbounded();
        rig.daq.start_acquisition("run", tap).unwrap();
        fire(&rig.handler);
        rig.daq.stop_acquisition();
        fire(&rig.handler);

        let data = std::fs::read(rig.dir.path().join("rpiData_run.bin")).unwrap();
        assert_eq!(data.len(), FRAME_LEN);
    }

    #[test]
    fn stop_waits_for_an_inflight_capture() {
        let mut rig = rig_with(Duration::from_millis(150));
        let (tap, _rx) = unbounded();
        rig.daq.start_acquisition("slow", tap).unwrap();

        let handler = Arc::clone(&rig.handler);
        let capture = thread::spawn(move || fire(&handler));
        // let the capture take the lock before stopping
        thread::sleep(Duration::from_millis(30));
        rig.daq.stop_acquisition();
        capture.join().unwrap();

        let data = std::fs::read(rig.dir.path().join("rpiData_slow.bin")).unwrap();
        assert_eq!(data.len(), FRAME_LEN, "stop must not truncate the frame");
    }

    #[test]
    fn tap_receives_every_captured_frame() {
        let mut rig = rig();
        let (tap, rx) = unbounded();
        rig.daq.start_acquisition("tapped", tap).unwrap();
        for _ in 0..3 {
            fire(&rig.handler);
        }
        rig.daq.stop_acquisition();
        let frames: Vec<SampleFrame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_bytes(), &[0x42; FRAME_LEN]);
    }

    #[test]
    fn register_transactions_leave_continuous_mode_first() {
        let rig = rig();
        rig.daq.write_register(REG_CONFIG1, 0x55).unwrap();
        let value = rig.daq.read_register(REG_CONFIG1).unwrap();
        assert_eq!(value, 0);

        let log = rig.log.lock().unwrap();
        assert_eq!(log[0], vec![CMD_SDATAC]);
        assert_eq!(log[1], vec![CMD_WREG | REG_CONFIG1, 0x00, 0x55]);
        assert_eq!(log[2], vec![CMD_SDATAC]);
        assert_eq!(log[3][0], CMD_RREG | REG_CONFIG1);
    }

    #[test]
    fn worker_drains_directives() {
        let rig = rig();
        let dir = rig.dir.path().to_path_buf();
        let handler = Arc::clone(&rig.handler);
        let (tx, rx) = unbounded();
        let worker = thread::spawn(move || acquisition_worker(rig.daq, rx));

        let (tap, _tap_rx) = unbounded();
        tx.send(Directive::Start {
            file_base: "worker".into(),
            tap,
        })
        .unwrap();
        while handler.lock().unwrap().is_none() {
            thread::sleep(Duration::from_millis(5));
        }
        fire(&handler);
        tx.send(Directive::Stop).unwrap();
        drop(tx);
        worker.join().unwrap();

        let data = std::fs::read(dir.join("rpiData_worker.bin")).unwrap();
        assert_eq!(data.len(), FRAME_LEN);
    }
}
