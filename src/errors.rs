//! Everything that can end an acquisition session

use std::path::PathBuf;

use nusb::transfer::TransferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no device with id {vendor_id:04x}:{product_id:04x} found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("USB {op} failed: {source}")]
    Usb {
        op: &'static str,
        #[source]
        source: nusb::Error,
    },

    #[error("control request 0x{request:02x} failed: {source}")]
    Control {
        request: u8,
        #[source]
        source: TransferError,
    },

    #[error("IF transfer not completed: {0}")]
    TransferFailed(#[source] TransferError),

    #[error("IF transfer error, got {actual} instead of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("{0} queue is full, samples would be lost")]
    QueueFull(&'static str),

    #[error("{0} queue closed unexpectedly")]
    QueueClosed(&'static str),

    #[error("buffer overrun at start, restart the device")]
    OverrunAtStart,

    #[error("overrun detected")]
    Overrun,

    #[error("AGC samples probably lost")]
    AgcSamplesLost,

    #[error("invalid device mode {0}, expected 1 through 8")]
    InvalidMode(u8),

    #[error("incompatible settings for pack mode {pack_factor} and complex data {complex}")]
    IncompatiblePacking { pack_factor: u8, complex: bool },

    #[error("block of {len} bytes does not divide into groups of {pack_factor}")]
    RaggedBlock { len: usize, pack_factor: u8 },

    #[error("lookup table must include numbers -3, -1, 1 and 3 once each, got {0:?}")]
    InvalidLookupTable(String),

    #[error("couldn't open {}: {source}", .path.display())]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("device mode can only change while the device is closed")]
    ModeLocked,

    #[error("device is not open")]
    NotOpen,

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}
