// In-process shared transport
// Every participant holds a clone of the same handle, like clients of a transport server
// It has no clock of its own: the position only moves through a master publish,
// a locate or advance_frames. Followers of a transport without a master stand still.

use super::{ClientId, ExternalTransport, TransportError, TransportPosition};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct TransportInner {
    available: bool,
    next_client: ClientId,
    clients: Vec<(ClientId, String)>,
    master: Option<ClientId>,
    position: TransportPosition,
}

/// Transport shared by the participants of one process
#[derive(Debug, Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl SharedTransport {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransportInner {
                available: true,
                next_client: 1,
                clients: Vec::new(),
                master: None,
                position: TransportPosition {
                    rolling: false,
                    frame: 0,
                    frame_rate,
                    bpm: 120.0,
                },
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_available(&self) -> Result<MutexGuard<'_, TransportInner>, TransportError> {
        let inner = self.lock();
        if inner.available {
            Ok(inner)
        } else {
            Err(TransportError::Unavailable)
        }
    }

    /// Simulate the server going away (or coming back)
    /// Going away drops every client and the master
    pub fn set_available(&self, available: bool) {
        let mut inner = self.lock();
        inner.available = available;
        if !available {
            inner.clients.clear();
            inner.master = None;
            inner.position.rolling = false;
        }
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Current position regardless of availability
    pub fn position(&self) -> TransportPosition {
        self.lock().position
    }

    /// Move a rolling transport forward (stands in for the server's own clock)
    pub fn advance_frames(&self, frames: u64) {
        let mut inner = self.lock();
        if inner.position.rolling {
            inner.position.frame += frames;
        }
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.lock().position.bpm = bpm;
    }
}

fn check_client(inner: &TransportInner, client: ClientId) -> Result<(), TransportError> {
    if inner.clients.iter().any(|(id, _)| *id == client) {
        Ok(())
    } else {
        Err(TransportError::NotConnected(client))
    }
}

impl ExternalTransport for SharedTransport {
    fn connect(&mut self, client_name: &str) -> Result<ClientId, TransportError> {
        let mut inner = self.lock_available()?;
        let id = inner.next_client;
        inner.next_client += 1;
        inner.clients.push((id, client_name.to_string()));
        Ok(id)
    }

    fn disconnect(&mut self, client: ClientId) -> Result<(), TransportError> {
        let mut inner = self.lock_available()?;
        check_client(&inner, client)?;
        inner.clients.retain(|(id, _)| *id != client);
        if inner.master == Some(client) {
            inner.master = None;
        }
        Ok(())
    }

    fn query(&self) -> Result<TransportPosition, TransportError> {
        Ok(self.lock_available()?.position)
    }

    fn current_master(&self) -> Result<Option<ClientId>, TransportError> {
        Ok(self.lock_available()?.master)
    }

    fn acquire_master(
        &mut self,
        client: ClientId,
        conditional: bool,
    ) -> Result<bool, TransportError> {
        let mut inner = self.lock_available()?;
        check_client(&inner, client)?;
        match inner.master {
            Some(other) if other != client && conditional => Ok(false),
            _ => {
                inner.master = Some(client);
                Ok(true)
            }
        }
    }

    fn release_master(&mut self, client: ClientId) -> Result<(), TransportError> {
        let mut inner = self.lock_available()?;
        if inner.master == Some(client) {
            inner.master = None;
        }
        Ok(())
    }

    fn publish(
        &mut self,
        client: ClientId,
        position: TransportPosition,
    ) -> Result<(), TransportError> {
        let mut inner = self.lock_available()?;
        if inner.master != Some(client) {
            return Err(TransportError::NotMaster(client));
        }
        inner.position.frame = position.frame;
        inner.position.bpm = position.bpm;
        Ok(())
    }

    fn start(&mut self) -> Result<(), TransportError> {
        self.lock_available()?.position.rolling = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.lock_available()?.position.rolling = false;
        Ok(())
    }

    fn locate(&mut self, frame: u64) -> Result<(), TransportError> {
        self.lock_available()?.position.frame = frame;
        Ok(())
    }
}
