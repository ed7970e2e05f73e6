//! Lifecycle of a recording session: device open, workers up, workers down, device closed
//!
//! ```text
//! USB -> [pump] -> unpacked IF -> [packer] -> packed IF -> [IF writer] -> file
//!        [AGC poller] -> AGC -> [AGC writer] -> file
//! ```
//!
//! Workers only ever see their queues. Stopping wakes the poller and the pump,
//! everything downstream of them follows as their queues close, so every block
//! already captured reaches its file.

use std::{
    io::{Seek, Write},
    sync::Arc,
    thread::{self, JoinHandle},
};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::{
    capture::TransferPool,
    config::RecorderConfig,
    errors::{Error, Result},
    exfil::{create_output, output_path, write_agc, write_if, CircularWriter},
    mode::Mode,
    monitoring::AgcPoller,
    packing::pack_stream,
    protocol::{ControlTransport, Device, Frontend},
    sync::Semaphore,
    UnpackedBlock, AGC_QUEUE_DEPTH, PACKED_QUEUE_DEPTH, UNPACKED_QUEUE_DEPTH,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Opened,
    Recording,
}

/// The five workers of one recording
pub struct Session {
    poller_stop: Arc<Semaphore>,
    ingest_stop: Arc<Semaphore>,
    // In join order
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    /// Spawn the AGC poller and writer, the IF ingestion worker, the packer and the IF writer.
    ///
    /// `ingest` feeds the sending side of `unpacked` until the semaphore it is
    /// given hands out a permit, and drops that sender when it returns.
    pub fn start<T, F, A, W>(
        config: &RecorderConfig,
        frontend: Frontend<T>,
        ingest: F,
        unpacked: Receiver<UnpackedBlock>,
        agc_out: A,
        mut if_out: CircularWriter<W>,
        faults: &Sender<Error>,
    ) -> Result<Self>
    where
        T: ControlTransport + 'static,
        F: FnOnce(Arc<Semaphore>) -> Result<()> + Send + 'static,
        A: Write + Send + 'static,
        W: Write + Seek + Send + 'static,
    {
        let mut session = Self {
            poller_stop: Arc::new(Semaphore::new()),
            ingest_stop: Arc::new(Semaphore::new()),
            workers: Vec::with_capacity(5),
        };
        let mode = config.mode;
        let (agc_tx, agc_rx) = bounded(AGC_QUEUE_DEPTH);
        let (packed_tx, packed_rx) = bounded(PACKED_QUEUE_DEPTH);
        let poller = AgcPoller::new(frontend, agc_tx, config.skip_agc);

        // On an early return, dropping the session winds down whatever did start
        let stop = session.poller_stop.clone();
        session.spawn("agc-poller", faults, move || poller.run(&stop))?;
        session.spawn("agc-writer", faults, move || write_agc(agc_rx, agc_out))?;
        let stop = session.ingest_stop.clone();
        session.spawn("usb-pump", faults, move || ingest(stop))?;
        session.spawn("if-packer", faults, move || {
            pack_stream(unpacked, packed_tx, mode)
        })?;
        session.spawn("if-writer", faults, move || write_if(packed_rx, &mut if_out))?;
        Ok(session)
    }

    fn spawn<F>(&mut self, name: &'static str, faults: &Sender<Error>, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let faults = faults.clone();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                if let Err(e) = work() {
                    error!(worker = name, "{e}");
                    let _ = faults.send(e);
                }
            })?;
        self.workers.push((name, handle));
        Ok(())
    }

    /// Wake the poller and the pump, then join every worker in start order.
    /// Writers drain their queues before they return. Calling it again does nothing.
    pub fn stop(&mut self) -> Result<()> {
        self.poller_stop.notify();
        self.ingest_stop.notify();
        let mut result = Ok(());
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(worker = name, "Worker panicked");
                if result.is_ok() {
                    result = Err(Error::WorkerPanicked(name));
                }
            }
            debug!(worker = name, "Joined");
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Stopping session: {e}");
        }
    }
}

/// IF transfers in flight, waiting for a session to pump them
struct Ingestion {
    pool: TransferPool,
    rx: Receiver<UnpackedBlock>,
}

pub struct Recorder {
    config: RecorderConfig,
    device: Option<Arc<Device>>,
    ingestion: Option<Ingestion>,
    session: Option<Session>,
    faults_tx: Sender<Error>,
    faults_rx: Receiver<Error>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        let (faults_tx, faults_rx) = unbounded();
        Self {
            config,
            device: None,
            ingestion: None,
            session: None,
            faults_tx,
            faults_rx,
        }
    }

    pub fn state(&self) -> State {
        match (&self.session, &self.device) {
            (Some(_), _) => State::Recording,
            (None, Some(_)) => State::Opened,
            (None, None) => State::Closed,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Fatal errors raised by any worker while recording
    pub fn faults(&self) -> Receiver<Error> {
        self.faults_rx.clone()
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        if self.state() != State::Closed {
            return Err(Error::ModeLocked);
        }
        self.config.mode = mode;
        Ok(())
    }

    /// Claim the front-end and get the IF transfers in flight
    pub fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        self.device = Some(Arc::new(Device::open()?));
        if let Err(e) = self.submit_transfers() {
            if let Err(close) = self.close() {
                warn!("Closing after a failed open: {close}");
            }
            return Err(e);
        }
        info!(log_name = %self.config.log_name, "Device opened");
        Ok(())
    }

    fn submit_transfers(&mut self) -> Result<()> {
        let device = self.device.as_ref().ok_or(Error::NotOpen)?;
        let (tx, rx) = bounded(UNPACKED_QUEUE_DEPTH);
        let pool = TransferPool::submit(device.interface(), tx)?;
        self.ingestion = Some(Ingestion { pool, rx });
        Ok(())
    }

    /// Initialize the front-end and start all five workers. No-op while recording.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let device = self.device.clone().ok_or(Error::NotOpen)?;
        // A previous recording used its transfers up
        if self.ingestion.is_none() {
            self.submit_transfers()?;
        }
        let mode = self.config.mode;
        let start = Utc::now();
        let agc_file = create_output(&output_path(&self.config.log_name, "AGC", &start))?;
        let if_path = output_path(&self.config.log_name, "IF", &start);
        let if_out = CircularWriter::new(create_output(&if_path)?, self.config.if_ceiling);
        info!(path = %if_path.display(), "Opened IF file");

        Frontend::new(device.clone()).initialize(&mode)?;
        info!(
            mode = mode.number(),
            fw_mode = mode.firmware_mode(),
            sample_rate = mode.sample_rate_hz(),
            if_hz = mode.intermediate_freq_hz(),
            wideband = mode.is_wideband(),
            lookup_table = %self.config.lookup_table,
            "Front-end initialized"
        );

        let Ingestion { pool, rx } = self.ingestion.take().ok_or(Error::NotOpen)?;
        let session = Session::start(
            &self.config,
            Frontend::new(device),
            move |stop: Arc<Semaphore>| pool.run(&stop),
            rx,
            agc_file,
            if_out,
            &self.faults_tx,
        )?;
        self.session = Some(session);
        info!(log_name = %self.config.log_name, "Start recording");
        Ok(())
    }

    /// Stop every worker, letting the writers drain their queues first. No-op unless recording.
    pub fn stop_recording(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.stop();
        info!(log_name = %self.config.log_name, "Stop recording");
        result
    }

    /// Give the front-end back. Only does anything while open.
    pub fn close(&mut self) -> Result<()> {
        // The device is released even if a worker died badly
        let stopped = self.stop_recording();
        self.ingestion = None;
        let Some(device) = self.device.take() else {
            return stopped;
        };
        match Arc::try_unwrap(device) {
            Ok(device) => device.close()?,
            Err(_) => warn!("Device still referenced, closing the handle without a reset"),
        }
        info!(log_name = %self.config.log_name, "Device closed");
        stopped
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Closing recorder: {e}");
        }
    }
}
