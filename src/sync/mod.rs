// Transport sync - Binds the playback clock to an external shared transport
//
// Two roles, chosen by the transport settings:
// - Follower: the external position overwrites the tick counter,
//   external start/stop drive the run mode
// - Master: the clock publishes its position every pass
//
// Engagement (`init`) and release (`deinit`) are explicit and idempotent. Any failure
// leaves the sync unengaged so the performance keeps running on its internal clock.

pub mod shared;
pub mod status;

pub use shared::SharedTransport;
pub use status::{LinkStatus, SyncStatus};

use crate::config::{Settings, TransportSettings};
use crate::sequencer::timeline::Tempo;

/// Participant handle on the shared transport
pub type ClientId = u64;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport server unavailable")]
    Unavailable,

    #[error("Client {0} is not connected to the transport")]
    NotConnected(ClientId),

    #[error("Client {0} is not the transport master")]
    NotMaster(ClientId),
}

/// Position as seen on the shared transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPosition {
    pub rolling: bool,
    pub frame: u64,
    pub frame_rate: u32,
    pub bpm: f64,
}

impl TransportPosition {
    /// Tick at `ppqn`, converted with the transport's own tempo
    pub fn to_ticks(&self, ppqn: u32, fallback: Tempo) -> u64 {
        let tempo = Tempo::new(self.bpm).unwrap_or(fallback);
        tempo.frames_to_ticks(self.frame, self.frame_rate, ppqn)
    }
}

/// Boundary to a machine-wide transport shared with other applications
pub trait ExternalTransport: Send {
    fn connect(&mut self, client_name: &str) -> Result<ClientId, TransportError>;
    fn disconnect(&mut self, client: ClientId) -> Result<(), TransportError>;
    fn query(&self) -> Result<TransportPosition, TransportError>;
    fn current_master(&self) -> Result<Option<ClientId>, TransportError>;

    /// Request the master role. With `conditional`, fail (Ok(false)) if another client holds it
    fn acquire_master(
        &mut self,
        client: ClientId,
        conditional: bool,
    ) -> Result<bool, TransportError>;
    fn release_master(&mut self, client: ClientId) -> Result<(), TransportError>;

    /// Publish the master's position
    fn publish(
        &mut self,
        client: ClientId,
        position: TransportPosition,
    ) -> Result<(), TransportError>;
    fn start(&mut self) -> Result<(), TransportError>;
    fn stop(&mut self) -> Result<(), TransportError>;
    fn locate(&mut self, frame: u64) -> Result<(), TransportError>;
}

/// Effective role of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncRole {
    /// Not engaged: internal clock only
    #[default]
    Unsynced,
    Follower,
    Master,
}

/// What the follower saw on the transport during one poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowUpdate {
    pub rolling: bool,
    pub tick: u64,
}

/// Transport sync state owned by the performance engine
pub struct TransportSync {
    transport: Option<Box<dyn ExternalTransport>>,
    client_name: String,
    settings: TransportSettings,
    client: Option<ClientId>,
    status: SyncStatus,
    frame_rate: u32,
}

impl TransportSync {
    pub fn new(settings: &Settings, client_name: impl Into<String>) -> Self {
        Self {
            transport: None,
            client_name: client_name.into(),
            settings: settings.transport,
            client: None,
            status: SyncStatus::default(),
            frame_rate: 48_000,
        }
    }

    /// Attach the transport used by the next `init`
    pub fn set_transport(&mut self, transport: Box<dyn ExternalTransport>) {
        if let Err(e) = self.deinit() {
            log::warn!("Previous transport did not release cleanly: {}", e);
        }
        self.transport = Some(transport);
    }

    /// New preferences take effect on the next `init`
    pub fn update_settings(&mut self, settings: &TransportSettings) {
        self.settings = *settings;
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn role(&self) -> SyncRole {
        self.status.role()
    }

    pub fn is_engaged(&self) -> bool {
        self.client.is_some()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.clone()
    }

    /// Engage. Idempotent: an engaged sync returns its current role
    pub fn init(&mut self) -> Result<SyncRole, TransportError> {
        if self.is_engaged() {
            return Ok(self.role());
        }
        if !self.settings.enabled {
            log::info!("Transport sync disabled in settings");
            return Ok(SyncRole::Unsynced);
        }
        let Some(transport) = self.transport.as_mut() else {
            self.status.set(LinkStatus::Error, SyncRole::Unsynced);
            return Err(TransportError::Unavailable);
        };

        self.status.set(LinkStatus::Connecting, SyncRole::Unsynced);
        let result = Self::engage(transport.as_mut(), &self.client_name, &self.settings);

        match result {
            Ok((client, role, frame_rate)) => {
                self.client = Some(client);
                self.frame_rate = frame_rate;
                self.status.set(LinkStatus::Connected, role);
                log::info!("Transport engaged as {:?} (client {})", role, client);
                Ok(role)
            }
            Err(e) => {
                self.status.set(LinkStatus::Error, SyncRole::Unsynced);
                log::warn!("Transport engagement failed: {}", e);
                Err(e)
            }
        }
    }

    fn engage(
        transport: &mut dyn ExternalTransport,
        client_name: &str,
        settings: &TransportSettings,
    ) -> Result<(ClientId, SyncRole, u32), TransportError> {
        let client = transport.connect(client_name)?;

        let role = if settings.master {
            match transport.acquire_master(client, settings.conditional_master) {
                Ok(true) => SyncRole::Master,
                Ok(false) => {
                    log::info!("Another transport master is registered, following instead");
                    SyncRole::Follower
                }
                Err(e) => {
                    Self::release(transport, client, false);
                    return Err(e);
                }
            }
        } else {
            SyncRole::Follower
        };

        let frame_rate = match transport.query() {
            Ok(position) => position.frame_rate,
            Err(e) => {
                Self::release(transport, client, role == SyncRole::Master);
                return Err(e);
            }
        };

        Ok((client, role, frame_rate))
    }

    /// Best-effort release of a client that is being dropped
    fn release(transport: &mut dyn ExternalTransport, client: ClientId, master: bool) {
        if master {
            if let Err(e) = transport.release_master(client) {
                log::warn!("Could not release master role of client {}: {}", client, e);
            }
        }
        if let Err(e) = transport.disconnect(client) {
            log::warn!("Could not disconnect client {}: {}", client, e);
        }
    }

    /// Release. Idempotent. The sync is unengaged afterwards even if the transport fails
    pub fn deinit(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let was_master = self.role() == SyncRole::Master;
        self.status.set(LinkStatus::Disconnected, SyncRole::Unsynced);

        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        if was_master {
            if let Err(e) = transport.release_master(client) {
                log::warn!("Could not release master role of client {}: {}", client, e);
            }
        }
        log::info!("Transport released (client {})", client);
        transport.disconnect(client)
    }

    /// Drop the engagement after a failure
    /// The transport may survive the error, so the client is released if it still answers
    pub fn degrade(&mut self, error: &TransportError) {
        log::warn!("Transport lost ({}), continuing on internal clock", error);
        let was_master = self.role() == SyncRole::Master;
        self.status.set(LinkStatus::Error, SyncRole::Unsynced);

        let Some(client) = self.client.take() else {
            return;
        };
        if let Some(transport) = self.transport.as_mut() {
            Self::release(transport.as_mut(), client, was_master);
        }
    }

    fn engaged_transport(&mut self) -> Option<(&mut dyn ExternalTransport, ClientId)> {
        let client = self.client?;
        let transport = self.transport.as_mut()?;
        Some((transport.as_mut(), client))
    }

    /// Transport position in ticks, None when not engaged
    pub fn position_ticks(
        &mut self,
        ppqn: u32,
        tempo: Tempo,
    ) -> Result<Option<u64>, TransportError> {
        match self.engaged_transport() {
            Some((transport, _)) => Ok(Some(transport.query()?.to_ticks(ppqn, tempo))),
            None => Ok(None),
        }
    }

    /// Follower poll
    pub fn follow(
        &mut self,
        ppqn: u32,
        tempo: Tempo,
    ) -> Result<Option<FollowUpdate>, TransportError> {
        if self.role() != SyncRole::Follower {
            return Ok(None);
        }
        let Some((transport, _)) = self.engaged_transport() else {
            return Ok(None);
        };
        let position = transport.query()?;
        Ok(Some(FollowUpdate {
            rolling: position.rolling,
            tick: position.to_ticks(ppqn, tempo),
        }))
    }

    /// Master check: yield to follower if another client took the role
    pub fn check_master(&mut self) -> Result<SyncRole, TransportError> {
        let role = self.role();
        if role != SyncRole::Master {
            return Ok(role);
        }
        let Some((transport, client)) = self.engaged_transport() else {
            return Ok(role);
        };
        let master = transport.current_master()?;
        if master != Some(client) {
            log::info!("Transport master taken by another client, yielding");
            self.status.set_role(SyncRole::Follower);
        }
        Ok(self.role())
    }

    /// Master publish of the clock position
    pub fn publish(
        &mut self,
        tick: u64,
        tempo: Tempo,
        ppqn: u32,
        rolling: bool,
    ) -> Result<(), TransportError> {
        if self.role() != SyncRole::Master {
            return Ok(());
        }
        let frame_rate = self.frame_rate;
        let Some((transport, client)) = self.engaged_transport() else {
            return Ok(());
        };
        transport.publish(
            client,
            TransportPosition {
                rolling,
                frame: tempo.ticks_to_frames(tick, frame_rate, ppqn),
                frame_rate,
                bpm: tempo.bpm(),
            },
        )
    }

    /// Start the shared transport (no-op when not engaged)
    pub fn start(&mut self) -> Result<(), TransportError> {
        match self.engaged_transport() {
            Some((transport, _)) => transport.start(),
            None => Ok(()),
        }
    }

    /// Stop the shared transport (no-op when not engaged)
    pub fn stop(&mut self) -> Result<(), TransportError> {
        match self.engaged_transport() {
            Some((transport, _)) => transport.stop(),
            None => Ok(()),
        }
    }

    /// Move the shared transport to a tick (no-op when not engaged)
    pub fn locate(&mut self, tick: u64, tempo: Tempo, ppqn: u32) -> Result<(), TransportError> {
        let frame = tempo.ticks_to_frames(tick, self.frame_rate, ppqn);
        match self.engaged_transport() {
            Some((transport, _)) => transport.locate(frame),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TransportSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSync")
            .field("client", &self.client)
            .field("status", &self.status.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(master: bool, conditional: bool) -> Settings {
        let mut settings = Settings::default();
        settings.transport = TransportSettings {
            enabled: true,
            master,
            conditional_master: conditional,
        };
        settings
    }

    fn sync_on(transport: &SharedTransport, settings: &Settings) -> TransportSync {
        let mut sync = TransportSync::new(settings, "test");
        sync.set_transport(Box::new(transport.clone()));
        sync
    }

    #[test]
    fn test_init_is_idempotent() {
        let transport = SharedTransport::new(48_000);
        let mut sync = sync_on(&transport, &settings(false, false));

        assert_eq!(sync.init(), Ok(SyncRole::Follower));
        assert_eq!(sync.init(), Ok(SyncRole::Follower));
        assert_eq!(transport.client_count(), 1);
        assert_eq!(sync.status().link(), LinkStatus::Connected);

        assert_eq!(sync.deinit(), Ok(()));
        assert_eq!(sync.deinit(), Ok(()));
        assert_eq!(transport.client_count(), 0);
        assert_eq!(sync.role(), SyncRole::Unsynced);
    }

    #[test]
    fn test_disabled_settings_do_not_engage() {
        let transport = SharedTransport::new(48_000);
        let mut sync = sync_on(&transport, &Settings::default());

        assert_eq!(sync.init(), Ok(SyncRole::Unsynced));
        assert!(!sync.is_engaged());
    }

    #[test]
    fn test_conditional_master_yields() {
        let transport = SharedTransport::new(48_000);
        let mut first = sync_on(&transport, &settings(true, true));
        let mut second = sync_on(&transport, &settings(true, true));

        assert_eq!(first.init(), Ok(SyncRole::Master));
        assert_eq!(second.init(), Ok(SyncRole::Follower));
    }

    #[test]
    fn test_master_yields_when_taken_over() {
        let transport = SharedTransport::new(48_000);
        let mut first = sync_on(&transport, &settings(true, true));
        let mut second = sync_on(&transport, &settings(true, false));

        first.init().unwrap();
        assert_eq!(second.init(), Ok(SyncRole::Master));
        assert_eq!(first.check_master(), Ok(SyncRole::Follower));
    }

    #[test]
    fn test_unavailable_transport_reports_error() {
        let transport = SharedTransport::new(48_000);
        transport.set_available(false);
        let mut sync = sync_on(&transport, &settings(false, false));

        assert_eq!(sync.init(), Err(TransportError::Unavailable));
        assert!(!sync.is_engaged());
        assert_eq!(sync.status().link(), LinkStatus::Error);
    }

    #[test]
    fn test_missing_transport_reports_error() {
        let mut sync = TransportSync::new(&settings(false, false), "test");
        assert_eq!(sync.init(), Err(TransportError::Unavailable));
    }

    #[test]
    fn test_follow_converts_frames_to_ticks() {
        let mut transport = SharedTransport::new(48_000);
        let mut sync = sync_on(&transport, &settings(false, false));
        sync.init().unwrap();

        transport.start().unwrap();
        transport.advance_frames(48_000);

        let tempo = Tempo::default();
        let update = sync.follow(192, tempo).unwrap().unwrap();
        assert!(update.rolling);
        assert_eq!(update.tick, 384);
        assert_eq!(sync.position_ticks(192, tempo), Ok(Some(384)));
    }

    #[test]
    fn test_master_publishes_position() {
        let transport = SharedTransport::new(48_000);
        let mut sync = sync_on(&transport, &settings(true, false));
        sync.init().unwrap();

        let tempo = Tempo::new(60.0).unwrap();
        sync.publish(192, tempo, 192, true).unwrap();
        assert_eq!(transport.position().frame, 48_000);
        assert_eq!(transport.position().bpm, 60.0);
    }

    #[test]
    fn test_degrade_drops_engagement() {
        let transport = SharedTransport::new(48_000);
        let mut sync = sync_on(&transport, &settings(false, false));
        sync.init().unwrap();

        sync.degrade(&TransportError::Unavailable);
        assert!(!sync.is_engaged());
        assert_eq!(sync.role(), SyncRole::Unsynced);
        assert_eq!(sync.position_ticks(192, Tempo::default()), Ok(None));
    }

    /// Shared transport whose next `query` calls fail
    struct FlakyTransport {
        inner: SharedTransport,
        query_failures: Arc<AtomicU32>,
    }

    impl ExternalTransport for FlakyTransport {
        fn connect(&mut self, client_name: &str) -> Result<ClientId, TransportError> {
            self.inner.connect(client_name)
        }
        fn disconnect(&mut self, client: ClientId) -> Result<(), TransportError> {
            self.inner.disconnect(client)
        }
        fn query(&self) -> Result<TransportPosition, TransportError> {
            let failing = self
                .query_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TransportError::Unavailable);
            }
            self.inner.query()
        }
        fn current_master(&self) -> Result<Option<ClientId>, TransportError> {
            self.inner.current_master()
        }
        fn acquire_master(
            &mut self,
            client: ClientId,
            conditional: bool,
        ) -> Result<bool, TransportError> {
            self.inner.acquire_master(client, conditional)
        }
        fn release_master(&mut self, client: ClientId) -> Result<(), TransportError> {
            self.inner.release_master(client)
        }
        fn publish(
            &mut self,
            client: ClientId,
            position: TransportPosition,
        ) -> Result<(), TransportError> {
            self.inner.publish(client, position)
        }
        fn start(&mut self) -> Result<(), TransportError> {
            self.inner.start()
        }
        fn stop(&mut self) -> Result<(), TransportError> {
            self.inner.stop()
        }
        fn locate(&mut self, frame: u64) -> Result<(), TransportError> {
            self.inner.locate(frame)
        }
    }

    #[test]
    fn test_degrade_releases_master_on_surviving_transport() {
        let transport = SharedTransport::new(48_000);
        let query_failures = Arc::new(AtomicU32::new(0));
        let mut sync = TransportSync::new(&settings(true, true), "flaky");
        sync.set_transport(Box::new(FlakyTransport {
            inner: transport.clone(),
            query_failures: Arc::clone(&query_failures),
        }));
        assert_eq!(sync.init(), Ok(SyncRole::Master));

        query_failures.store(1, Ordering::SeqCst);
        let error = sync.position_ticks(192, Tempo::default()).unwrap_err();
        sync.degrade(&error);

        assert_eq!(transport.client_count(), 0);
        assert_eq!(transport.current_master(), Ok(None));
        assert_eq!(sync.status().get(), (LinkStatus::Error, SyncRole::Unsynced));

        // A conditional master finds the role free
        let mut next = sync_on(&transport, &settings(true, true));
        assert_eq!(next.init(), Ok(SyncRole::Master));
    }
}
