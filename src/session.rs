//! The bridge session: readiness state machine and composition root.
//!
//! A session wires the device handle, the report aggregator and the
//! simulator client together and runs three cooperating contexts:
//!
//! 1. an input pump decoding device reports into simulator actions,
//! 2. a simulator update pump feeding the aggregator,
//! 3. a display refresh loop waiting on a single coalescing redraw signal.
//!
//! Above them, the readiness sequence gates interaction: wait until the
//! simulator is reachable, wait until the aircraft is one we have a
//! profile for, wait until every variable a full redraw needs has a
//! value; only then is input armed. All waits are unbounded with
//! throttled warnings; the operator starting the simulator or loading an
//! aircraft is outside this system's control. The device itself is the
//! status UI: every stage renders a message on the screen and drives the
//! annunciator LEDs.

use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::{
        Notify,
        mpsc,
        watch,
    },
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    aggregator::{
        AUTHOR_VARIABLE,
        Directive,
        ICAO_VARIABLE,
        ReportAggregator,
    },
    codec::Color,
    config::{
        AircraftLibrary,
        AircraftProfile,
    },
    device::{
        BrightnessTarget,
        DeviceHandle,
        Led,
        spawn_reader_thread,
    },
    input::{
        InputDecoder,
        InputEvent,
    },
    page::Page,
    simulator::{
        SimulatorClient,
        SimulatorEvent,
        SimulatorEventReceiver,
        Value,
    },
};

/// Poll interval of the readiness waits.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Grace sleep before the first data poll, so the initial burst of
/// updates can land without a warning storm.
pub const DATA_GRACE: Duration = Duration::from_secs(2);

/// How long the RDY annunciator stays lit after data completeness.
pub const READY_LIGHT_TIME: Duration = Duration::from_secs(1);

/// Warnings per wait before throttling kicks in.
const MAX_WARNING_COUNT: u32 = 3;

/// Once throttled, warn only every Nth poll.
const THROTTLED_WARNING_EVERY: u32 = 30;

/// Ambient-light thresholds -> keyboard/screen/LED backlight levels.
const AUTO_BRIGHTNESS_STEPS: [(u16, u8, u8, u8, &str); 3] = [
    (2600, 0xE6, 0xDC, 0xFF, "day"),
    (900, 0x96, 0xB4, 0xA0, "dusk"),
    (0, 0x50, 0x78, 0x50, "night"),
];

/// Session lifecycle stage.
///
/// Progression is monotonic within one connection cycle and resets when
/// the simulator connection is lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    NotRunning,
    Connected,
    AircraftDetected,
    WaitingForData,
    Running,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::NotRunning => "NOT_RUNNING",
            Status::Connected => "CONNECTED",
            Status::AircraftDetected => "AIRCRAFT_DETECTED",
            Status::WaitingForData => "WAITING_FOR_DATA",
            Status::Running => "RUNNING",
        })
    }
}

/// Tunables of a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Skip aircraft detection and use this profile unconditionally.
    pub forced_profile: Option<Arc<AircraftProfile>>,
    pub retry_interval: Duration,
    pub data_grace: Duration,
    pub ready_light: Duration,
    /// Follow the ambient-light sensors with the backlights.
    pub auto_brightness: bool,
    /// Cancelling this token ends the session.
    pub shutdown: CancellationToken,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            forced_profile: None,
            retry_interval: RETRY_INTERVAL,
            data_grace: DATA_GRACE,
            ready_light: READY_LIGHT_TIME,
            auto_brightness: true,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Reactions routed back to the state machine from the pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reaction {
    ChangeAircraft,
    ChangeUnit,
    ConnectionLost,
}

/// One bridge session between a device and a simulator.
pub struct Session<S> {
    device: DeviceHandle,
    client: S,
    library: AircraftLibrary,
    options: SessionOptions,

    aggregator: Arc<Mutex<ReportAggregator>>,
    redraw: Arc<Notify>,
    status: watch::Sender<Status>,

    author: String,
    icao: String,
}

impl<S> Session<S>
where
    S: SimulatorClient,
{
    pub fn new(
        device: DeviceHandle,
        client: S,
        library: AircraftLibrary,
        default_unit: u8,
        options: SessionOptions,
    ) -> Self {
        let (status, _) = watch::channel(Status::NotRunning);
        Self {
            device,
            client,
            library,
            options,
            aggregator: Arc::new(Mutex::new(ReportAggregator::new(default_unit))),
            redraw: Arc::new(Notify::new()),
            status,
            author: String::new(),
            icao: String::new(),
        }
    }

    /// Observe lifecycle stage changes.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Run the session until the shutdown token is cancelled.
    ///
    /// `events` is the simulator's update stream, wired by the caller to
    /// the client's callback mechanism.
    pub async fn run(mut self, events: SimulatorEventReceiver) -> Result<(), Error> {
        let shutdown = self.options.shutdown.clone();
        let (reaction_sender, mut reaction_receiver) = mpsc::channel(16);

        let reports = spawn_reader_thread(&self.device, shutdown.clone());

        tokio::spawn(display_task(
            self.aggregator.clone(),
            self.redraw.clone(),
            self.device.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(simulator_task(
            events,
            self.aggregator.clone(),
            self.redraw.clone(),
            self.device.clone(),
            self.client.clone(),
            reaction_sender.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(input_task(
            reports,
            self.aggregator.clone(),
            self.client.clone(),
            self.device.clone(),
            self.redraw.clone(),
            reaction_sender,
            self.status.subscribe(),
            self.options.auto_brightness,
            shutdown.clone(),
        ));

        // without the physical device nothing works; failing init is the
        // one fatal startup condition
        if let Err(error) = self.device.init() {
            shutdown.cancel();
            return Err(error.into());
        }
        self.waiting_screen("WELCOME");

        if let Err(error) = self.client.connect().await {
            tracing::debug!(%error, "initial connect attempt failed");
        }
        self.wait_for_resources().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                reaction = reaction_receiver.recv() => {
                    match reaction {
                        None => break,
                        Some(Reaction::ChangeUnit) => self.change_unit().await,
                        Some(Reaction::ChangeAircraft) => self.change_aircraft().await,
                        Some(Reaction::ConnectionLost) => self.resynchronize().await,
                    }
                }
            }
        }

        self.terminate().await;
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.options.shutdown.is_cancelled()
    }

    async fn pause(&self) {
        self.pause_for(self.options.retry_interval).await;
    }

    async fn pause_for(&self, duration: Duration) {
        tokio::select! {
            _ = self.options.shutdown.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    fn set_status(&self, status: Status) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            tracing::info!(%status, "MCDU status");
            true
        });
    }

    fn indicator(&self, led: Led, on: bool) {
        if let Err(error) = self.device.set_led(led, on) {
            tracing::warn!(%error, ?led, "cannot set annunciator");
        }
    }

    fn unit_indicator(&self, unit: u8, on: bool) {
        if let Err(error) = self.device.set_unit_indicator(unit, on) {
            tracing::warn!(%error, unit, "cannot set unit indicator");
        }
    }

    /// Render a status message on the device; the screen is the user
    /// interface while waiting.
    fn waiting_screen(&self, message: &str) {
        let mut page = Page::new();
        page.write_centered(0, "MCDU", Color::White, false);
        page.write_centered(
            1,
            concat!("VERSION ", env!("CARGO_PKG_VERSION")),
            Color::Cyan,
            true,
        );
        page.write_centered(8, message, Color::Amber, false);
        if let Err(error) = self.device.display_page(&page) {
            tracing::warn!(%error, "cannot render status screen");
        }
    }

    /// Run the full readiness sequence up to RUNNING.
    async fn wait_for_resources(&mut self) {
        loop {
            if self.cancelled() {
                return;
            }
            self.wait_for_simulator().await;
            self.wait_for_aircraft().await;
            if !self.client.connected() {
                continue;
            }
            if self.wait_for_data().await {
                break;
            }
            if self.cancelled() {
                return;
            }
            self.pause().await;
        }
        self.set_status(Status::Running);
    }

    /// Block until the simulator transport reports connected.
    async fn wait_for_simulator(&self) {
        for led in [Led::Fail, Led::Rdy, Led::Status] {
            self.indicator(led, false);
        }

        if !self.client.connected() {
            self.indicator(Led::Fail, true);
            self.waiting_screen("WAITING FOR SIMULATOR");
            let mut warning_count = 0u32;
            while !self.client.connected() && !self.cancelled() {
                if should_warn(warning_count) {
                    tracing::warn!("waiting for the simulator");
                }
                warning_count += 1;
                self.pause().await;
                if let Err(error) = self.client.connect().await {
                    tracing::debug!(%error, "connect attempt failed");
                }
            }
            if self.cancelled() {
                return;
            }
            tracing::info!("connected to the simulator");
        }

        self.indicator(Led::Fail, false);
        self.indicator(Led::Status, true);
        self.set_status(Status::Connected);
    }

    /// Poll the identity variables until they match a known aircraft.
    async fn wait_for_aircraft(&mut self) {
        if let Some(profile) = &self.options.forced_profile {
            if let Some(key) = profile.aircraft.first() {
                self.author = key.author.clone();
                self.icao = key.icao.clone();
            }
            tracing::info!(profile = %profile.name, "aircraft from supplied configuration");
            self.set_status(Status::AircraftDetected);
            return;
        }

        let identity = vec![AUTHOR_VARIABLE.to_owned(), ICAO_VARIABLE.to_owned()];
        if let Err(error) = self.client.monitor(&identity, "aircraft identity").await {
            tracing::warn!(%error, "cannot monitor the identity variables");
        }
        self.waiting_screen("WAITING FOR AIRCRAFT");

        let mut warning_count = 0u32;
        loop {
            if self.cancelled() || !self.client.connected() {
                return;
            }
            let (author, icao) = {
                let aggregator = self.aggregator.lock();
                (
                    aggregator.text_of(AUTHOR_VARIABLE),
                    aggregator.text_of(ICAO_VARIABLE),
                )
            };
            if let (Some(author), Some(icao)) = (author, icao) {
                if self.library.find(&author, &icao).is_some() {
                    self.author = author;
                    self.icao = icao;
                    break;
                }
                if should_warn(warning_count) {
                    let known: Vec<&str> = self.library.keys().collect();
                    tracing::warn!(%author, %icao, ?known, "waiting for a known aircraft");
                }
            }
            else if should_warn(warning_count) {
                tracing::warn!("waiting for the aircraft identity");
            }
            warning_count += 1;
            self.pause().await;
        }

        tracing::info!(author = %self.author, icao = %self.icao, "aircraft detected");
        self.set_status(Status::AircraftDetected);
    }

    async fn wait_for_metadata(&self) {
        let mut warning_count = 0u32;
        while !self.client.has_data() && !self.cancelled() && self.client.connected() {
            if let Err(error) = self.client.reload_caches(true).await {
                tracing::debug!(%error, "cache reload failed");
            }
            if self.client.has_data() {
                break;
            }
            if should_warn(warning_count) {
                tracing::warn!("waiting for simulator metadata");
            }
            warning_count += 1;
            self.pause().await;
        }
        tracing::info!("simulator metadata cached");
    }

    /// Load the aircraft's bindings and block until every required
    /// variable has a value. Returns whether the aircraft was loaded.
    async fn wait_for_data(&mut self) -> bool {
        self.wait_for_metadata().await;
        if self.cancelled() {
            return false;
        }

        let profile = match &self.options.forced_profile {
            Some(profile) => Some(profile.clone()),
            None => self.library.find(&self.author, &self.icao),
        };
        let Some(profile) = profile else {
            tracing::error!(author = %self.author, icao = %self.icao, "no aircraft profile");
            self.waiting_screen("NO AIRCRAFT");
            self.indicator(Led::Fail, true);
            return false;
        };

        let (unit, monitor) = {
            let mut aggregator = self.aggregator.lock();
            let requested = aggregator.active_unit();
            let monitor = aggregator.load(profile.clone(), requested);
            (aggregator.active_unit(), monitor)
        };
        tracing::debug!(
            profile = %profile.name,
            unit,
            count = monitor.len(),
            "monitoring aircraft variables"
        );
        if let Err(error) = self.client.monitor(&monitor, "aircraft display").await {
            tracing::warn!(%error, "cannot monitor the aircraft variables");
        }

        self.waiting_screen("WAITING FOR DATA");
        self.set_status(Status::WaitingForData);
        self.indicator(Led::Status, false);
        self.unit_indicator(unit, true);

        self.pause_for(self.options.data_grace).await;

        let expected = self.aggregator.lock().required_len();
        let mut warning_count = 0u32;
        loop {
            if self.cancelled() || !self.client.connected() {
                return false;
            }
            let missing = self.aggregator.lock().missing_count();
            if missing == 0 {
                break;
            }
            if should_warn(warning_count) {
                tracing::warn!(
                    received = expected - missing,
                    expected,
                    "waiting for display data"
                );
            }
            warning_count += 1;
            self.pause().await;
        }
        tracing::info!(expected, "display data complete");

        self.unit_indicator(unit, false);
        self.indicator(Led::Rdy, true);
        // RDY is a device-protocol convention, not a user control; it
        // goes dark again shortly after
        let device = self.device.clone();
        let ready_light = self.options.ready_light;
        tokio::spawn(async move {
            sleep(ready_light).await;
            if let Err(error) = device.set_led(Led::Rdy, false) {
                tracing::warn!(%error, "cannot reset the RDY annunciator");
            }
        });

        self.redraw.notify_one();
        true
    }

    /// Switch to the next declared MCDU unit, replaying the data stage in
    /// place. The simulator connection stays up.
    async fn change_unit(&mut self) {
        let (previous, swap) = {
            let mut aggregator = self.aggregator.lock();
            let previous = aggregator.active_unit();
            let Some(next) = aggregator.next_unit() else {
                tracing::debug!("single-unit aircraft, nothing to switch to");
                return;
            };
            match aggregator.change_unit(next) {
                Ok(swap) => (previous, swap),
                Err(error) => {
                    tracing::warn!(%error, "cannot change unit");
                    return;
                }
            }
        };

        self.unit_indicator(previous, false);
        if let Err(error) = self.client.unmonitor(&swap.unmonitor, "unit change").await {
            tracing::warn!(%error, "cannot unmonitor the previous unit");
        }

        if self.wait_for_data().await {
            self.set_status(Status::Running);
            tracing::info!(unit = self.aggregator.lock().active_unit(), "MCDU unit switched");
        }
    }

    /// The simulator switched aircraft models: reload bindings for the
    /// new one, replaying detection and data stages in place.
    async fn change_aircraft(&mut self) {
        let (author, icao) = {
            let aggregator = self.aggregator.lock();
            (
                aggregator.text_of(AUTHOR_VARIABLE),
                aggregator.text_of(ICAO_VARIABLE),
            )
        };
        let (Some(author), Some(icao)) = (author, icao) else {
            return;
        };
        if author == self.author && icao == self.icao {
            tracing::debug!("same aircraft, no change needed");
            return;
        }
        if self.options.forced_profile.is_some() {
            tracing::warn!(
                %author,
                %icao,
                current = %self.icao,
                "aircraft changed but a supplied configuration is in use; restart to follow the simulator"
            );
            return;
        }
        if self.library.find(&author, &icao).is_none() {
            tracing::warn!(%author, %icao, current = %self.icao, "simulator aircraft has no profile");
            return;
        }

        tracing::info!(%author, %icao, "aircraft changed");
        self.indicator(Led::Status, true);
        let unmonitor = self.aggregator.lock().unload();
        if let Err(error) = self.client.unmonitor(&unmonitor, "aircraft change").await {
            tracing::warn!(%error, "cannot unmonitor the previous aircraft");
        }
        self.author = author;
        self.icao = icao;
        self.set_status(Status::AircraftDetected);

        if self.wait_for_data().await {
            self.set_status(Status::Running);
        }
    }

    /// Full forced resynchronization after a lost connection; partial
    /// simulator state cannot be trusted after a reconnect.
    async fn resynchronize(&mut self) {
        tracing::warn!("simulator connection lost, resynchronizing");
        self.set_status(Status::NotRunning);
        self.waiting_screen("WAITING FOR SIMULATOR");
        self.aggregator.lock().reset_values();

        if let Err(error) = self.client.disconnect().await {
            tracing::debug!(%error, "disconnect cleanup failed");
        }
        if let Err(error) = self.client.connect().await {
            tracing::debug!(%error, "reconnect attempt failed");
        }
        self.wait_for_resources().await;
    }

    async fn terminate(&mut self) {
        tracing::debug!("terminating..");

        // the reader thread and the pumps stop on the cancelled token
        self.options.shutdown.cancel();
        let monitored = {
            let mut aggregator = self.aggregator.lock();
            let mut names = aggregator.unload();
            names.push(AUTHOR_VARIABLE.to_owned());
            names.push(ICAO_VARIABLE.to_owned());
            names
        };
        if let Err(error) = self.client.unmonitor(&monitored, "bridge terminates").await {
            tracing::debug!(%error, "cannot unmonitor");
        }
        if let Err(error) = self.client.disconnect().await {
            tracing::debug!(%error, "disconnect failed");
        }

        if let Err(error) = self.device.clear_screen() {
            tracing::warn!(%error, "cannot clear the screen");
        }
        for led in Led::ALL {
            let _ = self.device.set_led(led, false);
        }
        self.device.close();

        tracing::debug!("..terminated");
    }
}

fn should_warn(count: u32) -> bool {
    count <= MAX_WARNING_COUNT || count % THROTTLED_WARNING_EVERY == 0
}

/// Display refresh loop.
///
/// Multiple redraw requests between renders coalesce into one; once
/// signalled, at least one render reflects every update applied before
/// the signal was consumed. Partial pages never reach the glass.
async fn display_task(
    aggregator: Arc<Mutex<ReportAggregator>>,
    redraw: Arc<Notify>,
    device: DeviceHandle,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = redraw.notified() => {
                let page = {
                    let aggregator = aggregator.lock();
                    if !aggregator.all_required() {
                        continue;
                    }
                    aggregator.page_snapshot()
                };
                if let Err(error) = device.display_page(&page) {
                    tracing::warn!(%error, "page write failed");
                }
            }
        }
    }
    tracing::debug!("display refresh loop terminated");
}

/// Simulator update pump.
async fn simulator_task<S>(
    mut events: SimulatorEventReceiver,
    aggregator: Arc<Mutex<ReportAggregator>>,
    redraw: Arc<Notify>,
    device: DeviceHandle,
    client: S,
    reactions: mpsc::Sender<Reaction>,
    shutdown: CancellationToken,
) where
    S: SimulatorClient,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                match event {
                    None => break,
                    Some(SimulatorEvent::ValueUpdated { name, value }) => {
                        let outcome = aggregator.lock().apply(&name, value);
                        if outcome.redraw {
                            redraw.notify_one();
                        }
                        if let Some(directive) = outcome.directive {
                            dispatch(directive, &device, &client, &redraw, &reactions).await;
                        }
                    }
                    Some(SimulatorEvent::ConnectionClosed) => {
                        if reactions.send(Reaction::ConnectionLost).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!("simulator update pump terminated");
}

/// Input pump: decodes reports and dispatches the bound actions.
#[allow(clippy::too_many_arguments)]
async fn input_task<S>(
    mut reports: mpsc::Receiver<Vec<u8>>,
    aggregator: Arc<Mutex<ReportAggregator>>,
    client: S,
    device: DeviceHandle,
    redraw: Arc<Notify>,
    reactions: mpsc::Sender<Reaction>,
    mut status: watch::Receiver<Status>,
    auto_brightness: bool,
    shutdown: CancellationToken,
) where
    S: SimulatorClient,
{
    let mut decoder = InputDecoder::new();
    let mut brightness_step: Option<&'static str> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if *status.borrow_and_update() == Status::Running {
                    // keys held across a stage change must not fire now
                    decoder.reset();
                }
            }
            report = reports.recv() => {
                let Some(report) = report else { break };
                if *status.borrow() != Status::Running {
                    // input is armed only while running; the device also
                    // chats during initialization
                    continue;
                }
                for event in decoder.decode(&report) {
                    match event {
                        InputEvent::KeyPressed(key) | InputEvent::KeyReleased(key) => {
                            let pressed = matches!(event, InputEvent::KeyPressed(_));
                            let directive = aggregator.lock().key_directive(key, pressed);
                            match directive {
                                Some(directive) => {
                                    dispatch(directive, &device, &client, &redraw, &reactions)
                                        .await;
                                }
                                None => {
                                    if pressed {
                                        tracing::debug!(key, "no binding for key");
                                    }
                                }
                            }
                        }
                        InputEvent::SensorsChanged { left, right } => {
                            tracing::debug!(left, right, "ambient light sensors");
                            if auto_brightness {
                                adjust_brightness(&device, &mut brightness_step, left, right);
                            }
                        }
                    }
                }
            }
        }
    }
    tracing::debug!("input dispatch loop terminated");
}

/// Apply one resolved directive.
async fn dispatch<S>(
    directive: Directive,
    device: &DeviceHandle,
    client: &S,
    redraw: &Notify,
    reactions: &mpsc::Sender<Reaction>,
) where
    S: SimulatorClient,
{
    match directive {
        Directive::ExecuteCommand { name } => {
            if let Err(error) = client.execute_command(&name).await {
                tracing::warn!(%error, name = %name, "command failed");
            }
        }
        Directive::SetValue { name, value } => {
            if let Err(error) = client.set_value(&name, value).await {
                tracing::warn!(%error, name = %name, "value write failed");
            }
        }
        Directive::ToggleValue { name } => {
            match client.get_value(&name).await {
                Ok(current) => {
                    let on = current.map(|value| value.is_on()).unwrap_or(false);
                    let flipped = Value::Number(if on { 0.0 } else { 1.0 });
                    if let Err(error) = client.set_value(&name, flipped).await {
                        tracing::warn!(%error, name = %name, "toggle write failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, name = %name, "toggle read failed");
                }
            }
        }
        Directive::RefreshDisplay => redraw.notify_one(),
        Directive::SetLed { led, on } => {
            if let Err(error) = device.set_led(led, on) {
                tracing::warn!(%error, ?led, "annunciator write failed");
            }
        }
        Directive::SetBrightness { target, level } => {
            if let Err(error) = device.set_brightness(target, level) {
                tracing::warn!(%error, ?target, "brightness write failed");
            }
        }
        Directive::ChangeAircraft => {
            let _ = reactions.send(Reaction::ChangeAircraft).await;
        }
        Directive::ChangeUnit => {
            let _ = reactions.send(Reaction::ChangeUnit).await;
        }
    }
}

/// Map the averaged ambient light onto backlight levels, skipping writes
/// while the reading stays inside the current step.
fn adjust_brightness(
    device: &DeviceHandle,
    current: &mut Option<&'static str>,
    left: u16,
    right: u16,
) {
    let average = (left as u32 + right as u32) / 2;
    let Some((_, keyboard, screen, leds, label)) = AUTO_BRIGHTNESS_STEPS
        .iter()
        .find(|(threshold, ..)| average >= *threshold as u32)
        .copied()
    else {
        return;
    };
    if *current == Some(label) {
        return;
    }
    *current = Some(label);
    tracing::info!(label, average, "auto-adjusting brightness");

    for (target, level) in [
        (BrightnessTarget::Backlight, keyboard),
        (BrightnessTarget::ScreenBacklight, screen),
        (BrightnessTarget::LedBrightness, leds),
    ] {
        if let Err(error) = device.set_brightness(target, level) {
            tracing::warn!(%error, "brightness write failed");
            return;
        }
    }
}
