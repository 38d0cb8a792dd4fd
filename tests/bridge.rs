//! End-to-end session tests against a mock device and a mock simulator.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};

use mcdu_bridge::{
    AircraftLibrary,
    DeviceHandle,
    Session,
    SessionOptions,
    Status,
    Transport,
    aggregator::{
        AUTHOR_VARIABLE,
        ICAO_VARIABLE,
    },
    codec,
    device::{
        DISPLAY_FRAME_MARKER,
        INPUT_REPORT_LENGTH,
        TransportError,
    },
    page::PAGE_CHARS_PER_LINE,
    simulator::{
        SimulatorClient,
        SimulatorError,
        SimulatorEvent,
        Value,
    },
};
use parking_lot::Mutex;
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    reports: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn push_report(&self, report: Vec<u8>) {
        self.reports.lock().push_back(report);
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// (target, value) pairs of every control frame written so far.
    fn control_writes(&self) -> Vec<(u8, u8)> {
        self.frames()
            .iter()
            .filter(|frame| frame.len() == 14 && frame[0] == 0x02)
            .map(|frame| (frame[7], frame[8]))
            .collect()
    }

    /// Text of line 0 of the most recently transmitted page.
    fn last_page_title(&self) -> Option<String> {
        let frames = self.frames();
        let pages: Vec<&[u8]> = frames
            .iter()
            .filter(|frame| frame.first() == Some(&DISPLAY_FRAME_MARKER))
            .map(|frame| &frame[1..])
            .collect();
        // every page in these tests is ASCII-only: exactly 16 frames
        if pages.len() < 16 || pages.len() % 16 != 0 {
            return None;
        }
        let payload: Vec<u8> = pages[pages.len() - 16..].concat();

        let mut cursor = &payload[..];
        let mut title = String::new();
        for _ in 0..PAGE_CHARS_PER_LINE {
            title.push(codec::decode_cell(&mut cursor)?.ch);
        }
        Some(title)
    }
}

impl Transport for MockTransport {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    fn read_report(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if let Some(report) = self.reports.lock().pop_front() {
            let length = report.len().min(buffer.len());
            buffer[..length].copy_from_slice(&report[..length]);
            return Ok(length);
        }
        std::thread::sleep(timeout);
        Ok(0)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockSimulatorState {
    connected: AtomicBool,
    has_data: AtomicBool,
    monitored: Mutex<Vec<String>>,
    unmonitored: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    values: Mutex<HashMap<String, Value>>,
}

#[derive(Clone, Default)]
struct MockSimulator {
    state: Arc<MockSimulatorState>,
}

impl MockSimulator {
    fn online() -> Self {
        let mock = Self::default();
        mock.state.connected.store(true, Ordering::SeqCst);
        mock.state.has_data.store(true, Ordering::SeqCst);
        mock
    }

    fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    fn monitored(&self) -> Vec<String> {
        self.state.monitored.lock().clone()
    }
}

impl SimulatorClient for MockSimulator {
    async fn connect(&self) -> Result<(), SimulatorError> {
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SimulatorError> {
        Ok(())
    }

    fn connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn monitor(&self, names: &[String], _reason: &str) -> Result<(), SimulatorError> {
        self.state.monitored.lock().extend(names.iter().cloned());
        Ok(())
    }

    async fn unmonitor(&self, names: &[String], _reason: &str) -> Result<(), SimulatorError> {
        self.state.unmonitored.lock().extend(names.iter().cloned());
        Ok(())
    }

    async fn get_value(&self, name: &str) -> Result<Option<Value>, SimulatorError> {
        Ok(self.state.values.lock().get(name).cloned())
    }

    async fn set_value(&self, name: &str, value: Value) -> Result<(), SimulatorError> {
        self.state.values.lock().insert(name.to_owned(), value);
        Ok(())
    }

    async fn execute_command(&self, name: &str) -> Result<(), SimulatorError> {
        self.state.commands.lock().push(name.to_owned());
        Ok(())
    }

    async fn reload_caches(&self, _force: bool) -> Result<(), SimulatorError> {
        Ok(())
    }

    fn has_data(&self) -> bool {
        self.state.has_data.load(Ordering::SeqCst)
    }
}

fn test_library() -> AircraftLibrary {
    let profile = serde_json::from_value(serde_json::json!({
        "name": "Test Airbus",
        "aircraft": [{"author": "Test Author", "icao": "A339"}],
        "units": [1, 2],
        "encoding": "ascii",
        "display": [
            {"variable": "tst/MCDU{unit}/title", "region": "title", "color": "white"},
            {"variable": "tst/MCDU{unit}/label1", "region": "label", "line": 1, "small": true},
            {"variable": "tst/MCDU{unit}/cont1", "region": "content", "line": 1, "color": "green"},
            {"variable": "tst/MCDU{unit}/cont2", "region": "content", "line": 2, "color": "green"},
            {"variable": "tst/MCDU{unit}/sp", "region": "status-line", "color": "amber"}
        ],
        "keys": [
            {"key": 0, "action": {"type": "execute-command", "command": "tst/MCDU{unit}/lsk1l"}},
            {"key": 9, "action": {"type": "change-unit"}}
        ]
    }))
    .expect("profile json");
    let mut library = AircraftLibrary::new();
    library.register(profile);
    library
}

fn fast_options(shutdown: CancellationToken) -> SessionOptions {
    SessionOptions {
        forced_profile: None,
        retry_interval: Duration::from_millis(20),
        data_grace: Duration::from_millis(10),
        ready_light: Duration::from_millis(50),
        auto_brightness: false,
        shutdown,
    }
}

fn send_value(
    events: &mpsc::UnboundedSender<SimulatorEvent>,
    name: &str,
    value: impl Into<Value>,
) {
    events
        .send(SimulatorEvent::ValueUpdated {
            name: name.to_owned(),
            value: value.into(),
        })
        .expect("event channel open");
}

fn send_unit_values(events: &mpsc::UnboundedSender<SimulatorEvent>, unit: u8, title: &str) {
    send_value(events, &format!("tst/MCDU{unit}/title"), title);
    send_value(events, &format!("tst/MCDU{unit}/label1"), " FROM/TO");
    send_value(events, &format!("tst/MCDU{unit}/cont1"), "EDDF/KJFK");
    send_value(events, &format!("tst/MCDU{unit}/cont2"), "FL350");
    send_value(events, &format!("tst/MCDU{unit}/sp"), "READY");
}

async fn wait_for_status(receiver: &mut watch::Receiver<Status>, wanted: Status) {
    timeout(
        Duration::from_secs(5),
        receiver.wait_for(|status| *status == wanted),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted}"))
    .expect("status channel open");
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn key_report(mask: u128) -> Vec<u8> {
    let mut report = vec![0u8; INPUT_REPORT_LENGTH];
    for i in 0..12 {
        report[1 + i] = (mask >> (8 * i)) as u8;
    }
    report
}

#[tokio::test(flavor = "multi_thread")]
async fn session_brings_up_the_display_and_dispatches_keys() {
    let transport = Arc::new(MockTransport::default());
    let device = DeviceHandle::new(transport.clone());
    let client = MockSimulator::online();
    let shutdown = CancellationToken::new();

    let session = Session::new(
        device,
        client.clone(),
        test_library(),
        1,
        fast_options(shutdown.clone()),
    );
    let mut status = session.subscribe_status();

    let (events, events_rx) = mpsc::unbounded_channel();
    let session_handle = tokio::spawn(session.run(events_rx));

    // identity arrives -> the aircraft is detected and its variables
    // registered; the session parks in the data wait
    send_value(&events, AUTHOR_VARIABLE, "Test Author");
    send_value(&events, ICAO_VARIABLE, "A339");
    wait_for_status(&mut status, Status::WaitingForData).await;

    // the five required variables arrive -> running
    send_unit_values(&events, 1, "INIT");
    wait_for_status(&mut status, Status::Running).await;

    // the title reached line 0 of the transmitted page
    wait_until(
        || {
            transport
                .last_page_title()
                .is_some_and(|title| title.contains("INIT"))
        },
        "the title on the glass",
    )
    .await;
    // RDY was toggled on, then off again by the timer
    wait_until(
        || {
            let controls = transport.control_writes();
            controls
                .iter()
                .position(|write| *write == (14, 1))
                .is_some_and(|on| controls[on..].contains(&(14, 0)))
        },
        "the RDY annunciator cycle",
    )
    .await;

    // key 0 press/release -> the bound command fires, addressed to unit 1
    transport.push_report(key_report(0b1));
    transport.push_report(key_report(0));
    wait_until(
        || client.commands().contains(&"tst/MCDU1/lsk1l".to_owned()),
        "the key command",
    )
    .await;
    assert_eq!(client.commands().len(), 1, "release must not re-fire");

    // key 9 switches to the first-officer unit: the data stage replays
    // in place without dropping the connection
    transport.push_report(key_report(1 << 9));
    transport.push_report(key_report(0));
    wait_for_status(&mut status, Status::WaitingForData).await;
    assert!(
        client
            .monitored()
            .contains(&"tst/MCDU2/title".to_owned()),
        "unit-2 variables must be registered"
    );
    send_unit_values(&events, 2, "F-PLN");
    wait_for_status(&mut status, Status::Running).await;
    wait_until(
        || {
            transport
                .last_page_title()
                .is_some_and(|title| title.contains("F-PLN"))
        },
        "the unit-2 title on the glass",
    )
    .await;

    transport.push_report(key_report(0b1));
    transport.push_report(key_report(0));
    wait_until(
        || client.commands().contains(&"tst/MCDU2/lsk1l".to_owned()),
        "the unit-2 key command",
    )
    .await;

    shutdown.cancel();
    timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session exits")
        .expect("session task")
        .expect("session result");

    // orderly teardown: screen cleared, annunciators off, endpoint closed
    assert!(transport.closed.load(Ordering::SeqCst));
    let title = transport.last_page_title().expect("final page");
    assert_eq!(title, " ".repeat(PAGE_CHARS_PER_LINE));
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_forces_a_full_resynchronization() {
    let transport = Arc::new(MockTransport::default());
    let device = DeviceHandle::new(transport.clone());
    let client = MockSimulator::online();
    let shutdown = CancellationToken::new();

    let session = Session::new(
        device,
        client.clone(),
        test_library(),
        1,
        fast_options(shutdown.clone()),
    );
    let mut status = session.subscribe_status();

    let (events, events_rx) = mpsc::unbounded_channel();
    let session_handle = tokio::spawn(session.run(events_rx));

    send_value(&events, AUTHOR_VARIABLE, "Test Author");
    send_value(&events, ICAO_VARIABLE, "A339");
    wait_for_status(&mut status, Status::WaitingForData).await;
    send_unit_values(&events, 1, "INIT");
    wait_for_status(&mut status, Status::Running).await;

    // connection drops: back to the top of the sequence; the identity
    // variables get monitored a second time
    events
        .send(SimulatorEvent::ConnectionClosed)
        .expect("event channel open");
    let identity_monitors = || {
        client
            .monitored()
            .iter()
            .filter(|name| *name == AUTHOR_VARIABLE)
            .count()
    };
    wait_until(|| identity_monitors() >= 2, "identity re-registration").await;

    // stale values are not trusted: everything must be re-delivered
    send_value(&events, AUTHOR_VARIABLE, "Test Author");
    send_value(&events, ICAO_VARIABLE, "A339");
    let title_monitors = || {
        client
            .monitored()
            .iter()
            .filter(|name| *name == "tst/MCDU1/title")
            .count()
    };
    wait_until(|| title_monitors() >= 2, "display re-registration").await;
    send_unit_values(&events, 1, "INIT");
    wait_for_status(&mut status, Status::Running).await;

    shutdown.cancel();
    timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session exits")
        .expect("session task")
        .expect("session result");
}

#[tokio::test(flavor = "multi_thread")]
async fn ambient_light_drives_the_backlights() {
    let transport = Arc::new(MockTransport::default());
    let device = DeviceHandle::new(transport.clone());
    let client = MockSimulator::online();
    let shutdown = CancellationToken::new();

    let mut options = fast_options(shutdown.clone());
    options.auto_brightness = true;

    let session = Session::new(device, client.clone(), test_library(), 1, options);
    let mut status = session.subscribe_status();

    let (events, events_rx) = mpsc::unbounded_channel();
    let session_handle = tokio::spawn(session.run(events_rx));

    send_value(&events, AUTHOR_VARIABLE, "Test Author");
    send_value(&events, ICAO_VARIABLE, "A339");
    wait_for_status(&mut status, Status::WaitingForData).await;
    send_unit_values(&events, 1, "INIT");
    wait_for_status(&mut status, Status::Running).await;

    // a bright-daylight sensor reading on the sampling cadence
    let mut report = key_report(0);
    report[17..19].copy_from_slice(&3000u16.to_le_bytes());
    report[19..21].copy_from_slice(&3000u16.to_le_bytes());
    transport.push_report(report);

    wait_until(
        || {
            let controls = transport.control_writes();
            controls.contains(&(0, 0xE6))
                && controls.contains(&(1, 0xDC))
                && controls.contains(&(2, 0xFF))
        },
        "the daylight backlight levels",
    )
    .await;

    shutdown.cancel();
    timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session exits")
        .expect("session task")
        .expect("session result");
}
