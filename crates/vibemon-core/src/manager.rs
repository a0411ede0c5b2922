//! Connection manager: one owner task driving the whole lifecycle.
//!
//! All link state lives inside a single tokio task. Consumers talk to it
//! through a command channel and observe it through the event broadcast
//! and the snapshot watch channel. Because the task owns the link and its
//! notification stream exclusively, events from a torn-down session cannot
//! leak into the next one: the old stream is dropped with the session.
//!
//! Setup stages run in order (scan, connect, MTU, discovery, subscribes)
//! and at most one link is ever in flight. Notification subscribes are
//! awaited one at a time, status before data.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vibemon_types::{codec, CharacteristicRole, ControlFrame, ProtocolRevision};

use crate::error::{Error, LinkFailureReason, LinkStage, Result};
use crate::events::{ConnectionState, EventDispatcher, EventReceiver, SensorEvent};
use crate::link::{LinkEvent, LinkEventStream, PeripheralFilter, SensorLink, SensorTransport};
use crate::model::{SensorModel, SensorSnapshot};
use crate::reconnect::ReconnectPolicy;
use crate::sink::DataSink;

/// Configuration for [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Protocol revision the sensor speaks.
    pub revision: ProtocolRevision,
    /// Which peripheral to connect to.
    pub filter: PeripheralFilter,
    /// How long each scan attempt runs before giving up.
    pub scan_window: Duration,
    /// ATT payload size requested after connect.
    pub requested_mtu: u16,
    /// Timeout applied to each setup stage.
    pub stage_timeout: Duration,
    /// How often RSSI is polled while active.
    pub rssi_interval: Duration,
    /// Backoff policy between failed attempts.
    pub reconnect: ReconnectPolicy,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            revision: ProtocolRevision::default(),
            filter: PeripheralFilter::any(),
            scan_window: Duration::from_secs(10),
            requested_mtu: 517,
            stage_timeout: Duration::from_secs(10),
            rssi_interval: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl ManagerConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol revision.
    pub fn revision(mut self, revision: ProtocolRevision) -> Self {
        self.revision = revision;
        self
    }

    /// Set the peripheral filter.
    pub fn filter(mut self, filter: PeripheralFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the scan window.
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the RSSI poll interval.
    pub fn rssi_interval(mut self, interval: Duration) -> Self {
        self.rssi_interval = interval;
        self
    }

    /// Set the per-stage timeout.
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Set the reconnect backoff policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scan_window.is_zero() {
            return Err(Error::invalid_config("scan_window must be > 0"));
        }
        if self.stage_timeout.is_zero() {
            return Err(Error::invalid_config("stage_timeout must be > 0"));
        }
        if self.rssi_interval.is_zero() {
            return Err(Error::invalid_config("rssi_interval must be > 0"));
        }
        if self.requested_mtu < 23 {
            return Err(Error::invalid_config("requested_mtu must be >= 23"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        self.reconnect.validate()
    }
}

enum Command {
    Start,
    Stop,
    SetControl {
        frame: ControlFrame,
        reply: oneshot::Sender<Result<()>>,
    },
    AddSink(Box<dyn DataSink>),
}

/// Handle to the manager task.
///
/// Cloneable observation is offered through [`events`](Self::events) and
/// [`watch`](Self::watch); commands go through the async methods. Dropping
/// the handle without [`shutdown`](Self::shutdown) leaves the task running
/// until its command channel closes.
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    dispatcher: EventDispatcher,
    snapshot: watch::Receiver<SensorSnapshot>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionManager {
    /// Validate `config` and spawn the manager task in the Idle state.
    pub fn new(transport: Arc<dyn SensorTransport>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let model = SensorModel::new();
        let snapshot = model.watch();
        let cancel = CancellationToken::new();
        let (commands, rx) = mpsc::channel(32);
        let task = tokio::spawn(
            ManagerTask {
                transport,
                config,
                model,
                dispatcher: dispatcher.clone(),
                commands: rx,
                cancel: cancel.clone(),
                sinks: Vec::new(),
                generation: 0,
            }
            .run(),
        );
        Ok(Self {
            commands,
            dispatcher,
            snapshot,
            cancel,
            task,
        })
    }

    /// Open a receiver on the event broadcast.
    pub fn events(&self) -> EventReceiver {
        self.dispatcher.subscribe()
    }

    /// Open a receiver on the snapshot watch channel.
    pub fn watch(&self) -> watch::Receiver<SensorSnapshot> {
        self.snapshot.clone()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Begin scanning and keep the connection up until [`stop`](Self::stop).
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    /// Tear the connection down and return to Idle. Cancels any pending
    /// reconnect delay.
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Write a control frame to the sensor.
    ///
    /// Fails with [`Error::NotConnected`] in every state but Active.
    pub async fn set_control(&self, frame: ControlFrame) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetControl { frame, reply }).await?;
        response.await.map_err(|_| Error::Cancelled)?
    }

    /// Register a sink for decoded frames.
    pub async fn add_sink(&self, sink: Box<dyn DataSink>) -> Result<()> {
        self.send(Command::AddSink(sink)).await
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.map_err(|_| Error::Cancelled)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Cancelled)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.snapshot.borrow().connection)
            .finish()
    }
}

enum StageOutcome<T> {
    Done(T),
    Stop,
    Shutdown,
}

enum SessionEnd {
    Stopped,
    Shutdown,
    Failed(Error),
}

#[derive(PartialEq)]
enum LoopEnd {
    Idle,
    Shutdown,
}

/// Drive `fut` while servicing commands that need no link.
///
/// Control writes are refused with [`Error::NotConnected`] because the
/// session is not active while a stage runs; Stop aborts the stage.
async fn drive_stage<T>(
    commands: &mut mpsc::Receiver<Command>,
    cancel: &CancellationToken,
    sinks: &mut Vec<Box<dyn DataSink>>,
    fut: impl Future<Output = T>,
) -> StageOutcome<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StageOutcome::Shutdown,
            command = commands.recv() => match command {
                None => return StageOutcome::Shutdown,
                Some(Command::Stop) => return StageOutcome::Stop,
                Some(Command::Start) => {}
                Some(Command::SetControl { reply, .. }) => {
                    let _ = reply.send(Err(Error::NotConnected));
                }
                Some(Command::AddSink(sink)) => sinks.push(sink),
            },
            value = &mut fut => return StageOutcome::Done(value),
        }
    }
}

/// Decode one notification and fan it out to the model, events, and sinks.
///
/// A malformed payload is reported and dropped; the model keeps its last
/// good values and the link stays up.
async fn handle_notification(
    revision: ProtocolRevision,
    model: &SensorModel,
    dispatcher: &EventDispatcher,
    sinks: &mut [Box<dyn DataSink>],
    role: CharacteristicRole,
    payload: &[u8],
) {
    match role {
        CharacteristicRole::Status => match codec::decode_status(revision, payload) {
            Ok(status) => {
                model.apply_status(&status);
                dispatcher.emit(SensorEvent::StatusUpdate { status });
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.record_status(&status).await {
                        dispatcher.log(format!("sink '{}' failed: {}", sink.name(), e));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, len = payload.len(), "dropping status frame");
                dispatcher.log(format!("dropped status frame: {}", e));
            }
        },
        CharacteristicRole::Data => match codec::decode_data(revision, payload) {
            Ok(data) => {
                model.apply_data(&data);
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.record_data(&data).await {
                        dispatcher.log(format!("sink '{}' failed: {}", sink.name(), e));
                    }
                }
                dispatcher.emit(SensorEvent::DataUpdate { data });
            }
            Err(e) => {
                warn!(error = %e, len = payload.len(), "dropping data frame");
                dispatcher.log(format!("dropped data frame: {}", e));
            }
        },
        CharacteristicRole::Control => {
            debug!(len = payload.len(), "unexpected notification on control");
        }
    }
}

struct ManagerTask {
    transport: Arc<dyn SensorTransport>,
    config: ManagerConfig,
    model: SensorModel,
    dispatcher: EventDispatcher,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    sinks: Vec<Box<dyn DataSink>>,
    generation: u64,
}

impl ManagerTask {
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => None,
                command = self.commands.recv() => command,
            };
            match command {
                None => break,
                Some(Command::Start) => {
                    if self.run_reconnect_loop().await == LoopEnd::Shutdown {
                        break;
                    }
                }
                Some(Command::Stop) => {}
                Some(Command::SetControl { reply, .. }) => {
                    let _ = reply.send(Err(Error::NotConnected));
                }
                Some(Command::AddSink(sink)) => self.sinks.push(sink),
            }
        }
        debug!("manager task exiting");
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "connection state");
        self.model.set_connection(state.clone());
        self.dispatcher
            .emit(SensorEvent::ConnectionStateChanged { state });
    }

    async fn run_reconnect_loop(&mut self) -> LoopEnd {
        let mut attempt: u32 = 0;
        loop {
            match self.run_session(&mut attempt).await {
                SessionEnd::Stopped => {
                    self.set_state(ConnectionState::Idle);
                    return LoopEnd::Idle;
                }
                SessionEnd::Shutdown => return LoopEnd::Shutdown,
                SessionEnd::Failed(error) => {
                    self.dispatcher.log(format!("session failed: {}", error));
                    if !error.is_recoverable() {
                        warn!(error = %error, "giving up, returning to idle");
                        self.set_state(ConnectionState::Idle);
                        return LoopEnd::Idle;
                    }
                    let delay = self.config.reconnect.delay_for_attempt(attempt);
                    warn!(error = %error, attempt, ?delay, "reconnecting after delay");
                    self.set_state(ConnectionState::AwaitingReconnect {
                        attempt,
                        retry_in: delay,
                    });
                    let cancel = self.cancel.clone();
                    match drive_stage(
                        &mut self.commands,
                        &cancel,
                        &mut self.sinks,
                        tokio::time::sleep(delay),
                    )
                    .await
                    {
                        StageOutcome::Done(()) => attempt = attempt.saturating_add(1),
                        StageOutcome::Stop => {
                            self.set_state(ConnectionState::Idle);
                            return LoopEnd::Idle;
                        }
                        StageOutcome::Shutdown => return LoopEnd::Shutdown,
                    }
                }
            }
        }
    }

    /// One pass through the session lifecycle: scan through teardown.
    async fn run_session(&mut self, attempt: &mut u32) -> SessionEnd {
        self.generation += 1;
        let generation = self.generation;
        let cancel = self.cancel.clone();
        let transport = Arc::clone(&self.transport);
        let filter = self.config.filter.clone();
        let scan_window = self.config.scan_window;
        let stage_timeout = self.config.stage_timeout;
        info!(generation, "session starting");

        self.set_state(ConnectionState::Scanning);
        let mut link = match drive_stage(
            &mut self.commands,
            &cancel,
            &mut self.sinks,
            transport.scan(&filter, scan_window),
        )
        .await
        {
            StageOutcome::Done(Ok(link)) => link,
            StageOutcome::Done(Err(e)) => return SessionEnd::Failed(e),
            StageOutcome::Stop => return SessionEnd::Stopped,
            StageOutcome::Shutdown => return SessionEnd::Shutdown,
        };
        info!(generation, address = link.address(), name = ?link.name(), "peripheral selected");

        self.set_state(ConnectionState::Connecting);
        match drive_stage(&mut self.commands, &cancel, &mut self.sinks, async {
            match timeout(stage_timeout, link.connect()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout("connect", stage_timeout)),
            }
        })
        .await
        {
            StageOutcome::Done(Ok(())) => {}
            StageOutcome::Done(Err(e)) => return self.fail_session(link, e).await,
            StageOutcome::Stop => return self.stop_session(link).await,
            StageOutcome::Shutdown => return self.shutdown_session(link).await,
        }

        // MTU refusal is not fatal; frames just arrive fragmented less
        // favorably on stacks that stay at the default.
        self.set_state(ConnectionState::NegotiatingMtu);
        let requested_mtu = self.config.requested_mtu;
        match drive_stage(&mut self.commands, &cancel, &mut self.sinks, async {
            timeout(stage_timeout, link.negotiate_mtu(requested_mtu)).await
        })
        .await
        {
            StageOutcome::Done(Ok(Ok(granted))) => {
                debug!(generation, requested = requested_mtu, granted, "MTU negotiated");
            }
            StageOutcome::Done(Ok(Err(e))) => {
                warn!(generation, error = %e, "MTU negotiation failed, continuing");
                self.dispatcher
                    .log(format!("MTU negotiation failed: {}", e));
            }
            StageOutcome::Done(Err(_)) => {
                warn!(generation, "MTU negotiation timed out, continuing");
            }
            StageOutcome::Stop => return self.stop_session(link).await,
            StageOutcome::Shutdown => return self.shutdown_session(link).await,
        }

        self.set_state(ConnectionState::DiscoveringServices);
        match drive_stage(&mut self.commands, &cancel, &mut self.sinks, async {
            match timeout(stage_timeout, link.discover_services()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout("service discovery", stage_timeout)),
            }
        })
        .await
        {
            StageOutcome::Done(Ok(())) => {}
            StageOutcome::Done(Err(e)) => return self.fail_session(link, e).await,
            StageOutcome::Stop => return self.stop_session(link).await,
            StageOutcome::Shutdown => return self.shutdown_session(link).await,
        }

        // The stream is taken before subscribing so the first notification
        // cannot slip past.
        let mut events = match link.link_events().await {
            Ok(stream) => stream,
            Err(e) => return self.fail_session(link, e).await,
        };

        let roles = CharacteristicRole::notify_roles();
        for (index, role) in roles.iter().enumerate() {
            self.set_state(ConnectionState::SubscribingNotifications {
                remaining: roles.len() - index,
            });
            match drive_stage(&mut self.commands, &cancel, &mut self.sinks, async {
                match timeout(stage_timeout, link.subscribe(*role)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout("subscribe", stage_timeout)),
                }
            })
            .await
            {
                StageOutcome::Done(Ok(())) => {}
                StageOutcome::Done(Err(e)) => return self.fail_session(link, e).await,
                StageOutcome::Stop => return self.stop_session(link).await,
                StageOutcome::Shutdown => return self.shutdown_session(link).await,
            }
        }

        *attempt = 0;
        self.set_state(ConnectionState::Active);
        info!(generation, "session active");
        let end = self.run_active(&mut link, &mut events).await;
        drop(events);
        match end {
            SessionEnd::Stopped => self.stop_session(link).await,
            SessionEnd::Shutdown => self.shutdown_session(link).await,
            SessionEnd::Failed(e) => self.fail_session(link, e).await,
        }
    }

    /// Steady-state loop: notifications, RSSI polling, and commands.
    async fn run_active(
        &mut self,
        link: &mut Box<dyn SensorLink>,
        events: &mut LinkEventStream,
    ) -> SessionEnd {
        use futures::StreamExt;

        let revision = self.config.revision;
        let cancel = self.cancel.clone();
        let mut rssi_timer = tokio::time::interval(self.config.rssi_interval);
        rssi_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Shutdown,
                command = self.commands.recv() => match command {
                    None => return SessionEnd::Shutdown,
                    Some(Command::Stop) => return SessionEnd::Stopped,
                    Some(Command::Start) => {}
                    Some(Command::AddSink(sink)) => self.sinks.push(sink),
                    Some(Command::SetControl { frame, reply }) => {
                        let payload = codec::encode_control(revision, &frame);
                        match link.write_control(&payload).await {
                            Ok(()) => {
                                debug!(filter = frame.filter, axes = %frame.axes, "control written");
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                warn!(error = %e, "control write failed, dropping link");
                                let _ = reply.send(Err(e));
                                return SessionEnd::Failed(Error::link_failure(
                                    LinkStage::Active,
                                    LinkFailureReason::Other("control write failed".into()),
                                ));
                            }
                        }
                    }
                },
                event = events.next() => match event {
                    Some(LinkEvent::Notification { role, payload }) => {
                        handle_notification(
                            revision,
                            &self.model,
                            &self.dispatcher,
                            &mut self.sinks,
                            role,
                            &payload,
                        )
                        .await;
                    }
                    Some(LinkEvent::Disconnected) | None => {
                        return SessionEnd::Failed(Error::link_failure(
                            LinkStage::Active,
                            LinkFailureReason::Dropped,
                        ));
                    }
                },
                _ = rssi_timer.tick() => {
                    match link.read_rssi().await {
                        Ok(rssi) => {
                            self.model.apply_rssi(rssi);
                            self.dispatcher.emit(SensorEvent::SignalStrength { rssi });
                        }
                        Err(e) => debug!(error = %e, "RSSI read failed"),
                    }
                }
            }
        }
    }

    async fn teardown(&mut self, link: &mut Box<dyn SensorLink>) {
        self.set_state(ConnectionState::Disconnecting);
        if let Err(e) = link.disconnect().await {
            warn!(error = %e, "teardown disconnect failed");
        }
        self.model.clear_session();
    }

    async fn fail_session(&mut self, mut link: Box<dyn SensorLink>, error: Error) -> SessionEnd {
        self.teardown(&mut link).await;
        SessionEnd::Failed(error)
    }

    async fn stop_session(&mut self, mut link: Box<dyn SensorLink>) -> SessionEnd {
        self.teardown(&mut link).await;
        SessionEnd::Stopped
    }

    async fn shutdown_session(&mut self, mut link: Box<dyn SensorLink>) -> SessionEnd {
        self.teardown(&mut link).await;
        SessionEnd::Shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.scan_window, Duration::from_secs(10));
        assert_eq!(config.requested_mtu, 517);
        assert_eq!(config.rssi_interval, Duration::from_secs(2));
        assert_eq!(config.revision, ProtocolRevision::V2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(
            ManagerConfig::new()
                .scan_window(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ManagerConfig::new()
                .rssi_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        let mut config = ManagerConfig::new();
        config.requested_mtu = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ManagerConfig::new()
            .revision(ProtocolRevision::V1)
            .filter(PeripheralFilter::by_name("VibeSensor"))
            .scan_window(Duration::from_secs(5));
        assert_eq!(config.revision, ProtocolRevision::V1);
        assert_eq!(config.scan_window, Duration::from_secs(5));
        assert_eq!(config.filter.name.as_deref(), Some("VibeSensor"));
    }
}
