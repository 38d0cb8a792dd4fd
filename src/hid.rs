//! `hidapi`-backed transport and WinWing device enumeration.

use std::time::Duration;

use hidapi::{
    HidApi,
    HidDevice,
};

use crate::device::{
    Transport,
    TransportError,
};

/// WinWing's USB vendor id.
pub const WINWING_VENDOR_ID: u16 = 0x4098;

/// Known MCDU units of the WinWing family.
const WINWING_MCDU_DEVICES: [(u16, &str, u8); 3] = [
    (0xBB36, "MCDU - Captain", 1),
    (0xBB3E, "MCDU - First Officer", 2),
    (0xBB3A, "MCDU - Observer", 3),
];

/// An attached, recognized MCDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    /// The MCDU unit this hardware serves by default (1 = captain,
    /// 2 = first officer, 3 = observer).
    pub default_unit: u8,
}

/// Enumerate attached WinWing MCDUs.
pub fn devices() -> Result<Vec<DeviceInfo>, TransportError> {
    let api = HidApi::new().map_err(|error| TransportError::Open(error.to_string()))?;
    let mut found = Vec::new();
    for info in api.device_list() {
        if info.vendor_id() != WINWING_VENDOR_ID {
            continue;
        }
        let Some((product_id, name, default_unit)) = WINWING_MCDU_DEVICES
            .iter()
            .find(|(pid, _, _)| *pid == info.product_id())
            .copied()
        else {
            tracing::debug!(product_id = info.product_id(), "unrecognized WinWing product");
            continue;
        };
        found.push(DeviceInfo {
            vendor_id: WINWING_VENDOR_ID,
            product_id,
            name,
            default_unit,
        });
    }
    Ok(found)
}

/// HID endpoint for one MCDU.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Open the device by vendor/product id.
    ///
    /// Failure here is fatal to a bridge session: nothing works without
    /// the physical device.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, TransportError> {
        let api = HidApi::new().map_err(|error| TransportError::Open(error.to_string()))?;
        if !api
            .device_list()
            .any(|info| info.vendor_id() == vendor_id && info.product_id() == product_id)
        {
            return Err(TransportError::NotFound {
                vendor_id,
                product_id,
            });
        }
        let device = api
            .open(vendor_id, product_id)
            .map_err(|error| TransportError::Open(error.to_string()))?;
        tracing::info!(vendor_id, product_id, "device connected");
        Ok(Self { device })
    }
}

impl Transport for HidTransport {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.device
            .write(frame)
            .map_err(|error| TransportError::Write(error.to_string()))?;
        Ok(())
    }

    fn read_report(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.device
            .read_timeout(buffer, timeout.as_millis() as i32)
            .map_err(|error| TransportError::Read(error.to_string()))
    }

    fn close(&self) {
        // the underlying handle is released when the transport drops
    }
}
