//! This module contains all the capture logic

// The pump thread will do one thing, as fast as possible: wait for bulk
// transfers on the IF endpoint to complete, copy each buffer into a channel to
// be packed in another thread, and hand the buffer straight back to the device.

use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use nusb::{
    transfer::{Buffer, Bulk, Completion, In, TransferError},
    Endpoint, Interface,
};
use tracing::{debug, info, warn};

use crate::{
    errors::{Error, Result},
    protocol::IF_ENDPOINT,
    sync::Semaphore,
    UnpackedBlock, NUM_TRANSFERS, TRANSFER_SIZE,
};

/// Upper bound on a single wait for completions, so a stop request is seen promptly
pub const PUMP_TIMEOUT: Duration = Duration::from_millis(1000);
// How long to wait for cancelled transfers to come back before giving up on them
const CANCEL_DEADLINE: Duration = Duration::from_secs(5);

/// What to do with a transfer's buffer once its completion has been handled
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    Resubmit,
    Retire,
}

/// Checks every finished transfer and forwards its samples to the unpacked IF queue
pub struct Ingest {
    tx: Sender<UnpackedBlock>,
    stopping: bool,
    faulted: bool,
    blocks: usize,
}

impl Ingest {
    pub fn new(tx: Sender<UnpackedBlock>) -> Self {
        Self {
            tx,
            stopping: false,
            faulted: false,
            blocks: 0,
        }
    }

    /// From now on, cancelled transfers are expected and nothing is resubmitted
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    /// Handle one finished transfer. A completed, full-length buffer is copied
    /// into the unpacked IF queue; anything else is fatal. Only the first
    /// failure is returned, the ones after it just retire their transfer.
    pub fn complete(
        &mut self,
        status: std::result::Result<(), TransferError>,
        data: &[u8],
    ) -> Result<Disposition> {
        match self.check(status, data) {
            Err(e) if self.faulted => {
                debug!("Further IF ingestion failure: {e}");
                Ok(Disposition::Retire)
            }
            Err(e) => {
                self.faulted = true;
                Err(e)
            }
            ok => ok,
        }
    }

    fn check(
        &mut self,
        status: std::result::Result<(), TransferError>,
        data: &[u8],
    ) -> Result<Disposition> {
        match status {
            Ok(()) => {}
            Err(TransferError::Cancelled) if self.stopping => return Ok(Disposition::Retire),
            Err(e) => return Err(Error::TransferFailed(e)),
        }
        if data.len() != TRANSFER_SIZE {
            return Err(Error::ShortTransfer {
                expected: TRANSFER_SIZE,
                actual: data.len(),
            });
        }
        match self.tx.try_send(data.to_vec()) {
            Ok(()) => {
                self.blocks += 1;
                if self.stopping || self.faulted {
                    Ok(Disposition::Retire)
                } else {
                    Ok(Disposition::Resubmit)
                }
            }
            Err(TrySendError::Full(_)) => Err(Error::QueueFull("unpacked IF")),
            // Nobody listening means the session is already being torn down
            Err(TrySendError::Disconnected(_)) if self.stopping => Ok(Disposition::Retire),
            Err(TrySendError::Disconnected(_)) => Err(Error::QueueClosed("unpacked IF")),
        }
    }

    /// Blocks forwarded so far
    pub fn blocks(&self) -> usize {
        self.blocks
    }
}

/// A fixed pool of bulk transfers kept in flight against the IF endpoint.
/// Dropping the pool closes the unpacked IF queue.
pub struct TransferPool {
    endpoint: Endpoint<Bulk, In>,
    ingest: Ingest,
}

impl TransferPool {
    /// Submit [`NUM_TRANSFERS`] transfers of [`TRANSFER_SIZE`] bytes each.
    /// This has to happen before the front-end starts streaming.
    pub fn submit(interface: &Interface, tx: Sender<UnpackedBlock>) -> Result<Self> {
        let mut endpoint = interface
            .endpoint::<Bulk, In>(IF_ENDPOINT)
            .map_err(|source| Error::Usb {
                op: "open IF endpoint",
                source,
            })?;
        for _ in 0..NUM_TRANSFERS {
            endpoint.submit(Buffer::new(TRANSFER_SIZE));
        }
        info!(
            transfers = endpoint.pending(),
            size = TRANSFER_SIZE,
            "IF transfers submitted"
        );
        Ok(Self {
            endpoint,
            ingest: Ingest::new(tx),
        })
    }

    /// Pump completions until `stop` hands out a permit or a transfer fails,
    /// then cancel and collect every transfer still in flight
    pub fn run(mut self, stop: &Semaphore) -> Result<()> {
        let mut result = Ok(());
        while result.is_ok() && !stop.try_wait() {
            if let Some(completion) = self.endpoint.wait_next_complete(PUMP_TIMEOUT) {
                result = self.settle(completion);
            }
        }
        let drained = self.cancel_all();
        debug!(blocks = self.ingest.blocks(), "Event pump stopped");
        result.and(drained)
    }

    fn settle(&mut self, completion: Completion) -> Result<()> {
        let Completion { status, buffer, .. } = completion;
        if self.ingest.complete(status, &buffer)? == Disposition::Resubmit {
            self.endpoint.submit(buffer);
        }
        Ok(())
    }

    fn cancel_all(&mut self) -> Result<()> {
        self.ingest.stop();
        self.endpoint.cancel_all();
        let mut result = Ok(());
        while self.endpoint.pending() > 0 {
            let Some(completion) = self.endpoint.wait_next_complete(CANCEL_DEADLINE) else {
                // The endpoint cleans these up when it is dropped
                warn!(
                    outstanding = self.endpoint.pending(),
                    "IF transfers did not come back"
                );
                break;
            };
            if let Err(e) = self.settle(completion) {
                result = result.and(Err(e));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_complete_enqueues_copy() {
        let (tx, rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        let data = vec![3u8; TRANSFER_SIZE];
        assert_eq!(ingest.complete(Ok(()), &data).unwrap(), Disposition::Resubmit);
        assert_eq!(rx.try_recv().unwrap(), data);
        assert_eq!(ingest.blocks(), 1);
    }

    #[test]
    fn test_partial_transfer_is_fatal() {
        let (tx, rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        let data = vec![0u8; TRANSFER_SIZE - 1];
        assert!(matches!(
            ingest.complete(Ok(()), &data),
            Err(Error::ShortTransfer { actual, .. }) if actual == TRANSFER_SIZE - 1
        ));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_failed_status_is_fatal() {
        let (tx, _rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        assert!(matches!(
            ingest.complete(Err(TransferError::Stall), &[]),
            Err(Error::TransferFailed(TransferError::Stall))
        ));
    }

    #[test]
    fn test_only_first_failure_is_reported() {
        // Unplugging the device fails every transfer in the pool at once
        let (tx, rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        let gone = || Err(TransferError::Disconnected);
        assert!(matches!(
            ingest.complete(gone(), &[]),
            Err(Error::TransferFailed(TransferError::Disconnected))
        ));
        for _ in 0..NUM_TRANSFERS - 1 {
            assert_eq!(ingest.complete(gone(), &[]).unwrap(), Disposition::Retire);
        }
        // Data that still arrives is kept, but the transfer isn't resubmitted
        let data = vec![1u8; TRANSFER_SIZE];
        assert_eq!(ingest.complete(Ok(()), &data).unwrap(), Disposition::Retire);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_full_queue_is_fatal() {
        let (tx, _rx) = bounded(1);
        let mut ingest = Ingest::new(tx);
        let data = vec![0u8; TRANSFER_SIZE];
        assert_eq!(ingest.complete(Ok(()), &data).unwrap(), Disposition::Resubmit);
        assert!(matches!(
            ingest.complete(Ok(()), &data),
            Err(Error::QueueFull(_))
        ));
    }

    #[test]
    fn test_cancellation_while_stopping_is_quiet() {
        let (tx, rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        ingest.stop();
        assert_eq!(
            ingest.complete(Err(TransferError::Cancelled), &[]).unwrap(),
            Disposition::Retire
        );
        // A buffer that made it in before the cancel is kept, but not resubmitted
        let data = vec![1u8; TRANSFER_SIZE];
        assert_eq!(ingest.complete(Ok(()), &data).unwrap(), Disposition::Retire);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_cancellation_while_running_is_fatal() {
        let (tx, _rx) = bounded(4);
        let mut ingest = Ingest::new(tx);
        assert!(matches!(
            ingest.complete(Err(TransferError::Cancelled), &[]),
            Err(Error::TransferFailed(TransferError::Cancelled))
        ));
    }

    #[test]
    fn test_closed_queue_while_stopping_is_quiet() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let mut ingest = Ingest::new(tx);
        let data = vec![0u8; TRANSFER_SIZE];
        assert!(matches!(
            ingest.complete(Ok(()), &data),
            Err(Error::QueueClosed(_))
        ));
        let (tx, rx) = bounded(4);
        drop(rx);
        let mut ingest = Ingest::new(tx);
        ingest.stop();
        assert_eq!(ingest.complete(Ok(()), &data).unwrap(), Disposition::Retire);
    }
}
