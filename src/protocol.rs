//! Vendor control protocol of the SiGe GNSS front-end
//!
//! Every request here is a synchronous control transfer on endpoint zero. Any
//! failing transfer is fatal for the session, nothing is retried.

use std::{sync::Arc, time::Duration};

use nusb::{
    transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError},
    Interface, MaybeFuture,
};
use tracing::{debug, warn};

use crate::{
    errors::{Error, Result},
    mode::{Mode, CALIBRATION_FW_MODE},
};

pub const VENDOR_ID: u16 = 0x1781;
pub const PRODUCT_ID: u16 = 0x0b3f;

const CONFIGURATION: u8 = 1;
const CONFIGURATION_ZERO: u8 = 0;
const RECEIVE_INTERFACE: u8 = 2;
const ALTERNATE_SETTING: u8 = 0;

/// Bulk endpoint the IF samples arrive on
pub const IF_ENDPOINT: u8 = 0x86;
/// Transmit endpoint, nothing is sent on it
pub const TRANSMIT_ENDPOINT: u8 = 0x02;

pub const REQUEST_FLAGS: u8 = 0x90;
pub const REQUEST_STATUS: u8 = 0x80;
pub const REQUEST_AGC_READ: u8 = 0x88;
pub const REQUEST_IN_TRANSFER: u8 = 0x01;
pub const REQUEST_OUT_TRANSFER: u8 = 0x02;
pub const REQUEST_MODE: u8 = 0x04;
pub const REQUEST_AGC_MODE: u8 = 0x08;
pub const REQUEST_CALIBRATION_MODE: u8 = 0x0F;

pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
pub const AGC_TIMEOUT: Duration = Duration::from_millis(200);

/// Samples the device can buffer between two AGC reads
pub const AGC_CAPACITY: usize = 32;
const FLAGS_LEN: usize = 5;
const FLAGS_AGC_COUNT: usize = 2;
const AGC_MASK: u16 = 0x0FFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusIndex {
    TxOverrun = 0,
    RxOverrun = 1,
}

pub type TransportResult<T> = std::result::Result<T, TransferError>;

/// Raw vendor control transfers to the device (request type 0xC0 in, 0x40
/// out), implemented by the real device and by test doubles
pub trait ControlTransport: Send + Sync {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize>;
}

impl<T: ControlTransport + ?Sized> ControlTransport for Arc<T> {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        (**self).control_in(request, value, index, buf, timeout)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        (**self).control_out(request, value, index, data, timeout)
    }
}

fn usb(op: &'static str) -> impl FnOnce(nusb::Error) -> Error {
    move |source| Error::Usb { op, source }
}

/// An open, configured front-end with its receive interface claimed
pub struct Device {
    device: nusb::Device,
    interface: Interface,
}

impl Device {
    pub fn open() -> Result<Self> {
        let info = nusb::list_devices()
            .wait()
            .map_err(usb("list devices"))?
            .find(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID)
            .ok_or(Error::DeviceNotFound {
                vendor_id: VENDOR_ID,
                product_id: PRODUCT_ID,
            })?;
        let device = info.open().wait().map_err(usb("open device"))?;
        device
            .set_configuration(CONFIGURATION)
            .wait()
            .map_err(usb("set configuration"))?;
        let interface = device
            .detach_and_claim_interface(RECEIVE_INTERFACE)
            .wait()
            .map_err(usb("claim interface"))?;
        interface
            .set_alt_setting(ALTERNATE_SETTING)
            .wait()
            .map_err(usb("set alternate setting"))?;
        debug!(
            product = info.product_string().unwrap_or_default(),
            "Front-end opened and receive interface claimed"
        );
        Ok(Self { device, interface })
    }

    /// The claimed receive interface, home of the IF endpoint
    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Give the interface back, drop to configuration zero and reset
    pub fn close(self) -> Result<()> {
        let Self { device, interface } = self;
        drop(interface);
        device
            .set_configuration(CONFIGURATION_ZERO)
            .wait()
            .map_err(usb("set configuration zero"))?;
        device.reset().wait().map_err(usb("reset device"))?;
        debug!("Front-end released and reset");
        Ok(())
    }
}

impl ControlTransport for Device {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length: buf.len() as u16,
                },
                timeout,
            )
            .wait()?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                timeout,
            )
            .wait()?;
        Ok(data.len())
    }
}

/// The firmware's command set on top of a [`ControlTransport`]
pub struct Frontend<T> {
    transport: T,
}

impl<T: ControlTransport> Frontend<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Issue `request`, picking the direction from bit 7 of the request code.
    /// Returns the number of bytes transferred.
    pub fn write_command(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.transfer(request, value, index, buf, CONTROL_TIMEOUT)
    }

    fn transfer(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let res = if request & 0x80 != 0 {
            self.transport.control_in(request, value, index, buf, timeout)
        } else {
            self.transport.control_out(request, value, index, buf, timeout)
        };
        res.map_err(|source| {
            warn!(request, value, index, "Control transfer failed: {source}");
            Error::Control { request, source }
        })
    }

    /// Data-less command carrying only `value`
    pub fn command(&self, request: u8, value: u16) -> Result<()> {
        self.write_command(request, value, 0, &mut []).map(|_| ())
    }

    pub fn read_flags(&self) -> Result<[u8; FLAGS_LEN]> {
        let mut flags = [0u8; FLAGS_LEN];
        self.write_command(REQUEST_FLAGS, 0, 0, &mut flags)?;
        Ok(flags)
    }

    /// True means trouble: the selected buffer overran
    pub fn read_status(&self, which: StatusIndex) -> Result<bool> {
        let mut status = [0u8; 1];
        self.write_command(REQUEST_STATUS, 0, which as u16, &mut status)?;
        Ok(status[0] != 0)
    }

    /// Read up to `capacity` AGC samples. Empty (zero) samples are dropped.
    pub fn read_agc(&self, capacity: usize) -> Result<Vec<u16>> {
        let flags = self.read_flags()?;
        let mut raw = vec![0u8; capacity * 2];
        self.transfer(REQUEST_AGC_READ, 0, 0, &mut raw, AGC_TIMEOUT)?;

        let reported = flags[FLAGS_AGC_COUNT] as usize;
        let count = if reported > capacity {
            capacity
        } else if reported == AGC_CAPACITY {
            // The device's AGC buffer filled up between reads
            return Err(Error::AgcSamplesLost);
        } else {
            reported
        };
        Ok(extract_agc(&raw[..count * 2]))
    }

    /// Bring the front-end up in `mode` with IN transfers and AGC running
    pub fn initialize(&self, mode: &Mode) -> Result<()> {
        self.command(REQUEST_AGC_MODE, 1)?;
        self.command(REQUEST_CALIBRATION_MODE, CALIBRATION_FW_MODE as u16)?;
        self.command(REQUEST_IN_TRANSFER, 0)?;
        self.command(REQUEST_IN_TRANSFER, 1)?;
        self.read_flags()?;
        self.command(REQUEST_IN_TRANSFER, 0)?;
        self.command(REQUEST_CALIBRATION_MODE, mode.firmware_mode() as u16)?;
        self.command(REQUEST_IN_TRANSFER, 1)?;
        self.command(REQUEST_AGC_MODE, 2)?;

        self.command(REQUEST_AGC_MODE, 1)?;
        self.command(REQUEST_AGC_MODE, 2)?;
        self.read_flags()?;
        self.command(REQUEST_AGC_MODE, 2)?;
        Ok(())
    }
}

/// Little-endian 16 bit words, masked to 12 bits, zeros dropped
pub fn extract_agc(raw: &[u8]) -> Vec<u16> {
    raw.chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]) & AGC_MASK)
        .filter(|&v| v > 0)
        .collect()
}
