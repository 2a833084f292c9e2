//! nusb-backed transport for the Contour Next Link stick.

use std::io;
use std::time::Duration;

use cnl24_lib::constants::{USB_BLOCKSIZE, USB_PID, USB_VID};
use cnl24_lib::error::CnlError;
use cnl24_lib::transport::UsbHidDevice;
use nusb::{Interface, transfer::RequestBuffer};
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tracing::info;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// A blocking HID report transport over nusb interrupt transfers. The
/// library's driver is synchronous; the runtime lives here and drives one
/// transfer at a time.
pub struct CnlUsbTransport {
    runtime: Runtime,
    interface: Interface,
}

impl CnlUsbTransport {
    pub fn open() -> anyhow::Result<Self> {
        info!("searching for Contour Next Link...");
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == USB_VID && d.product_id() == USB_PID)
            .ok_or_else(|| anyhow::anyhow!("no Contour Next Link stick found"))?;
        info!(
            bus = device_info.bus_number(),
            address = device_info.device_address(),
            "found stick"
        );

        let device = device_info.open()?;
        let interface = device.detach_and_claim_interface(0)?;
        info!("interface claimed");

        Ok(Self {
            runtime: Runtime::new()?,
            interface,
        })
    }
}

fn transfer_error(err: nusb::transfer::TransferError) -> CnlError {
    CnlError::Io(io::Error::other(err))
}

impl UsbHidDevice for CnlUsbTransport {
    fn read_report(&mut self, read_timeout: Duration) -> Result<Vec<u8>, CnlError> {
        let transfer = self
            .interface
            .interrupt_in(ENDPOINT_IN, RequestBuffer::new(USB_BLOCKSIZE));
        match self.runtime.block_on(timeout(read_timeout, transfer)) {
            Ok(completion) => completion.into_result().map_err(transfer_error),
            Err(_) => Err(CnlError::TransportTimeout("usb report")),
        }
    }

    fn write_report(&mut self, report: &[u8]) -> Result<(), CnlError> {
        let transfer = self.interface.interrupt_out(ENDPOINT_OUT, report.to_vec());
        let completion = self
            .runtime
            .block_on(timeout(WRITE_TIMEOUT, transfer))
            .map_err(|_| CnlError::TransportTimeout("usb write"))?;
        completion.into_result().map_err(transfer_error)?;
        Ok(())
    }
}
