//! Device-side transport seam, wire framing and the shared device handle.
//!
//! The MCDU speaks fixed-size frames in both directions:
//!
//! * outbound display data is chunked into 64-byte frames: a `0xF2`
//!   marker byte followed by up to 63 payload bytes, zero-padded;
//! * outbound control messages (LEDs, backlights) are single 14-byte
//!   frames addressing a numbered target;
//! * inbound input reports are 25 bytes (see [`crate::input`]).

use std::{
    fmt::Debug,
    sync::Arc,
    thread,
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::page::Page;

/// Length of every frame written to the device.
pub const FRAME_LENGTH: usize = 64;

/// Display payload bytes per frame.
pub const FRAME_PAYLOAD: usize = 63;

/// Marker byte of a display-data frame.
pub const DISPLAY_FRAME_MARKER: u8 = 0xF2;

/// Length of an input report carrying button and sensor state.
pub const INPUT_REPORT_LENGTH: usize = 25;

/// How long a single device read waits before returning empty.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Queued input reports between the reader thread and the input task.
const REPORT_QUEUE_SIZE: usize = 64;

/// Backlight levels programmed at initialization.
const DEFAULT_BRIGHTNESS: u8 = 0x80;

/// Errors from the device transport.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no device endpoint found (vendor {vendor_id:#06x}, product {product_id:#06x})")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("failed to open device: {0}")]
    Open(String),

    #[error("device write failed: {0}")]
    Write(String),

    #[error("device read failed: {0}")]
    Read(String),
}

/// Raw device endpoint.
///
/// One frame per [`write_frame`][Transport::write_frame] call; reads may
/// return short reports, which the input decoder detects and skips.
pub trait Transport: Send + Sync + 'static {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read one report into `buffer`; returns the number of bytes read, 0
    /// on timeout.
    fn read_report(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn close(&self);
}

/// Annunciator LEDs on the device face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Led {
    Fail,
    Fm,
    Mcdu,
    Menu,
    Fm1,
    Ind,
    Rdy,
    Status,
    Fm2,
}

impl Led {
    pub const ALL: [Led; 9] = [
        Led::Fail,
        Led::Fm,
        Led::Mcdu,
        Led::Menu,
        Led::Fm1,
        Led::Ind,
        Led::Rdy,
        Led::Status,
        Led::Fm2,
    ];

    /// Control-frame target number.
    pub fn target(self) -> u8 {
        match self {
            Led::Fail => 8,
            Led::Fm => 9,
            Led::Mcdu => 10,
            Led::Menu => 11,
            Led::Fm1 => 12,
            Led::Ind => 13,
            Led::Rdy => 14,
            Led::Status => 15,
            Led::Fm2 => 16,
        }
    }
}

/// Dimmable backlights on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrightnessTarget {
    Backlight,
    ScreenBacklight,
    LedBrightness,
}

impl BrightnessTarget {
    pub fn target(self) -> u8 {
        match self {
            BrightnessTarget::Backlight => 0,
            BrightnessTarget::ScreenBacklight => 1,
            BrightnessTarget::LedBrightness => 2,
        }
    }
}

/// Chunk a display payload into zero-padded 64-byte frames.
pub fn display_frames(payload: &[u8]) -> Vec<[u8; FRAME_LENGTH]> {
    payload
        .chunks(FRAME_PAYLOAD)
        .map(|chunk| {
            let mut frame = [0u8; FRAME_LENGTH];
            frame[0] = DISPLAY_FRAME_MARKER;
            frame[1..=chunk.len()].copy_from_slice(chunk);
            frame
        })
        .collect()
}

/// Build a 14-byte control frame for a LED or backlight target.
pub fn control_frame(target: u8, value: u8) -> [u8; 14] {
    [
        0x02, 0x32, 0xBB, 0x00, 0x00, 0x03, 0x49, target, value, 0x00, 0x00, 0x00, 0x00, 0x00,
    ]
}

/// Shared handle onto one device.
///
/// Cheaply cloneable; all clones write through the same transport, and the
/// write path is serialized so a page is never torn by a concurrent
/// control frame. A page write that has started always completes.
#[derive(Clone)]
pub struct DeviceHandle {
    transport: Arc<dyn Transport>,
    writing: Arc<Mutex<()>>,
}

impl Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle").finish_non_exhaustive()
    }
}

impl DeviceHandle {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            writing: Arc::new(Mutex::new(())),
        }
    }

    /// Clear the screen and program default backlight levels.
    pub fn init(&self) -> Result<(), TransportError> {
        self.clear_screen()?;
        self.set_brightness(BrightnessTarget::Backlight, DEFAULT_BRIGHTNESS)?;
        self.set_brightness(BrightnessTarget::ScreenBacklight, DEFAULT_BRIGHTNESS)?;
        self.set_brightness(BrightnessTarget::LedBrightness, DEFAULT_BRIGHTNESS)?;
        Ok(())
    }

    /// Serialize `page` and write it out as chunked frames.
    pub fn display_page(&self, page: &Page) -> Result<(), TransportError> {
        let mut payload = BytesMut::new();
        page.encode(&mut payload);

        let _guard = self.writing.lock();
        for frame in display_frames(&payload) {
            self.transport.write_frame(&frame)?;
        }
        Ok(())
    }

    pub fn clear_screen(&self) -> Result<(), TransportError> {
        self.display_page(&Page::new())
    }

    pub fn set_led(&self, led: Led, on: bool) -> Result<(), TransportError> {
        let _guard = self.writing.lock();
        self.transport
            .write_frame(&control_frame(led.target(), on as u8))
    }

    pub fn set_brightness(
        &self,
        target: BrightnessTarget,
        level: u8,
    ) -> Result<(), TransportError> {
        let _guard = self.writing.lock();
        self.transport
            .write_frame(&control_frame(target.target(), level))
    }

    /// Light the indicator of the MCDU unit currently served.
    pub fn set_unit_indicator(&self, unit: u8, on: bool) -> Result<(), TransportError> {
        let led = if unit == 2 { Led::Fm2 } else { Led::Fm1 };
        self.set_led(led, on)
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}

/// Spawn the blocking read loop feeding raw input reports into a channel.
///
/// The thread exits when the token is cancelled or the receiver is
/// dropped. Reads are inherently serialized per device, so no lock is
/// involved on this path.
pub fn spawn_reader_thread(
    device: &DeviceHandle,
    cancel: CancellationToken,
) -> mpsc::Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel(REPORT_QUEUE_SIZE);
    let transport = device.transport();

    thread::spawn(move || {
        reader_thread(transport, sender, cancel);
    });

    receiver
}

fn reader_thread(
    transport: Arc<dyn Transport>,
    sender: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let _guard = tracing::debug_span!("device reader").entered();
    tracing::debug!("reader thread spawned");

    while !cancel.is_cancelled() {
        let mut buffer = vec![0u8; INPUT_REPORT_LENGTH];
        match transport.read_report(&mut buffer, READ_TIMEOUT) {
            Ok(0) => {}
            Ok(n_read) => {
                buffer.truncate(n_read);
                if sender.blocking_send(buffer).is_err() {
                    tracing::debug!("report receiver dropped. exiting");
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(?error, "device read error");
                thread::sleep(Duration::from_millis(500));
            }
        }
    }

    tracing::debug!("reader thread terminating");
}
