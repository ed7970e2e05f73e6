//! In this module, we implement the AGC and overrun monitoring of the front-end.
//! AGC doesn't need much resolution, so it is polled with plain blocking control
//! transfers every [`POLL_PERIOD`]. The same cycle checks the device's RX buffer
//! for overruns, which would mean IF samples were lost.

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::Sender;
use tracing::{debug, error};

use crate::{
    errors::{Error, Result},
    protocol::{ControlTransport, Frontend, StatusIndex, AGC_CAPACITY},
    sync::Semaphore,
    AgcBatch,
};

pub const POLL_PERIOD: Duration = Duration::from_millis(200);

pub struct AgcPoller<T> {
    frontend: Frontend<T>,
    tx: Sender<AgcBatch>,
    skip_agc: bool,
    period: Duration,
}

impl<T: ControlTransport> AgcPoller<T> {
    pub fn new(frontend: Frontend<T>, tx: Sender<AgcBatch>, skip_agc: bool) -> Self {
        Self {
            frontend,
            tx,
            skip_agc,
            period: POLL_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Poll until `stop` hands out a permit. The AGC queue closes when this returns.
    pub fn run(self, stop: &Semaphore) -> Result<()> {
        if self.frontend.read_status(StatusIndex::RxOverrun)? {
            error!("Buffer overrun at start, please restart the front-end");
            return Err(Error::OverrunAtStart);
        }
        let mut batches = 0usize;
        loop {
            self.poll_once()?;
            batches += 1;
            if stop.wait_timeout(self.period) {
                break;
            }
        }
        debug!(batches, "AGC poller stopped");
        Ok(())
    }

    fn poll_once(&self) -> Result<()> {
        let samples = self.frontend.read_agc(AGC_CAPACITY)?;
        let timestamp = Utc::now().timestamp();
        if !self.skip_agc {
            self.tx
                .send(AgcBatch::stamped(samples, timestamp))
                .map_err(|_| Error::QueueClosed("AGC"))?;
        }
        if self.frontend.read_status(StatusIndex::RxOverrun)? {
            error!("Overrun detected");
            return Err(Error::Overrun);
        }
        Ok(())
    }
}
