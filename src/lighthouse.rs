use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use btleplug::api::BDAddr;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::power::{PowerState, ProtocolVersion};
use crate::transport::{Connection, Device, TransportError};

/// Attempts made by [`Lighthouse::read`] and [`Lighthouse::write`] unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 10;

const UNKNOWN: u8 = 0;
const OFF: u8 = 1;
const ON: u8 = 2;

/// A discovered base station.
///
/// Operations on one lighthouse are serialized, since a base station cannot
/// serve two GATT sessions at once. Different lighthouses do not share any lock.
/// Identity is the BLE address alone.
pub struct Lighthouse<D> {
    device: D,
    address: BDAddr,
    name: String,
    rssi: Option<i16>,
    version: ProtocolVersion,
    is_on: AtomicU8,
    power_lock: Mutex<()>,
    attempt_timeout: Option<Duration>,
}

impl<D> Lighthouse<D> {
    pub fn address(&self) -> BDAddr {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Last power state a transaction confirmed, `None` until one has.
    pub fn is_on(&self) -> Option<bool> {
        match self.is_on.load(Ordering::Acquire) {
            ON => Some(true),
            OFF => Some(false),
            _ => None,
        }
    }

    fn confirm(&self, state: PowerState) -> bool {
        let is_on = state.is_on();
        self.is_on
            .store(if is_on { ON } else { OFF }, Ordering::Release);
        is_on
    }
}

impl<D: Device> Lighthouse<D> {
    pub fn new(device: D, name: String, version: ProtocolVersion, rssi: Option<i16>) -> Self {
        Lighthouse {
            address: device.address(),
            device,
            name,
            rssi,
            version,
            is_on: AtomicU8::new(UNKNOWN),
            power_lock: Mutex::new(()),
            attempt_timeout: None,
        }
    }

    /// Abandon any attempt that takes longer than `timeout` and count it as a failed attempt.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Reads the power state from the device.
    ///
    /// Returns `Ok(None)` when every attempt failed on the link, in which case
    /// the cached state is left alone. A payload the protocol does not know
    /// aborts immediately with [`Error::ProtocolViolation`].
    pub async fn read(&self, retries: u32) -> Result<Option<bool>> {
        let _guard = self.power_lock.lock().await;
        for attempt in 1..=retries {
            match self.read_attempt().await {
                Ok(state) => {
                    debug!("{}: power state is {state}", self.address);
                    return Ok(Some(self.confirm(state)));
                }
                Err(Error::Transport(err)) => {
                    warn!("{}: {err}. Retry ({attempt}/{retries}).", self.address)
                }
                Err(err) => return Err(err),
            }
        }
        warn!(
            "{}: power state unknown after {retries} attempts",
            self.address
        );
        Ok(None)
    }

    /// Drives the device towards `is_on`.
    ///
    /// Each attempt reads the current state first and only writes when it
    /// differs, so the read of the following attempt doubles as confirmation
    /// of the fire-and-forget write. Returns `Ok(Some(is_on))` once the device
    /// has been seen in the desired state and `Ok(None)` when the retries ran out.
    pub async fn write(&self, is_on: bool, retries: u32) -> Result<Option<bool>> {
        if self.is_on() == Some(is_on) {
            return Ok(Some(is_on));
        }

        let _guard = self.power_lock.lock().await;
        let desired = PowerState::from_is_on(is_on);
        for attempt in 1..=retries {
            match self.write_attempt(desired).await {
                Ok(Some(state)) => {
                    info!("{}: turned {desired}", self.address);
                    return Ok(Some(self.confirm(state)));
                }
                Ok(None) => debug!(
                    "{}: wrote {desired} ({attempt}/{retries}), awaiting confirmation",
                    self.address
                ),
                Err(Error::Transport(err)) => {
                    warn!("{}: {err}. Retry ({attempt}/{retries}).", self.address)
                }
                Err(err) => return Err(err),
            }
        }
        warn!(
            "{}: could not confirm {desired} after {retries} attempts",
            self.address
        );
        Ok(None)
    }

    async fn read_attempt(&self) -> Result<PowerState> {
        let deadline = self.deadline();
        let mut connection = self.step(deadline, self.device.connect()).await?;
        let payload = self
            .step(deadline, connection.read(self.version.characteristic()))
            .await;
        self.close(connection).await;
        Ok(self.version.decode(&payload?)?)
    }

    /// `Some(state)` when the device already reports `desired`, otherwise the
    /// write has been issued and `None` is returned.
    async fn write_attempt(&self, desired: PowerState) -> Result<Option<PowerState>> {
        let deadline = self.deadline();
        let characteristic = self.version.characteristic();
        let mut connection = self.step(deadline, self.device.connect()).await?;

        let current = match self.step(deadline, connection.read(characteristic)).await {
            Ok(payload) => self.version.decode(&payload),
            Err(err) => {
                self.close(connection).await;
                return Err(err.into());
            }
        };
        let current = match current {
            Ok(state) => state,
            Err(violation) => {
                self.close(connection).await;
                return Err(violation.into());
            }
        };

        if current.is_on() == desired.is_on() {
            self.close(connection).await;
            return Ok(Some(current));
        }

        let payload = self.version.encode(desired);
        let written = self
            .step(
                deadline,
                connection.write_without_response(characteristic, &payload),
            )
            .await;
        self.close(connection).await;
        written?;
        Ok(None)
    }

    fn deadline(&self) -> Option<Instant> {
        self.attempt_timeout.map(|limit| Instant::now() + limit)
    }

    /// Runs one I/O step of an attempt, giving up at `deadline`. The caller
    /// keeps the connection, so it can still be closed after a timeout.
    async fn step<T>(
        &self,
        deadline: Option<Instant>,
        io: impl Future<Output = std::result::Result<T, TransportError>>,
    ) -> std::result::Result<T, TransportError> {
        match (deadline, self.attempt_timeout) {
            (Some(deadline), Some(limit)) => tokio::time::timeout_at(deadline, io)
                .await
                .unwrap_or_else(|_| Err(TransportError::TimedOut(limit))),
            _ => io.await,
        }
    }

    /// Disconnects, spending at most one more attempt timeout on it.
    async fn close(&self, connection: D::Connection) {
        let deadline = self.deadline();
        if let Err(err) = self.step(deadline, connection.disconnect()).await {
            debug!("{}: disconnect failed: {err}", self.address);
        }
    }
}

impl<D> PartialEq for Lighthouse<D> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<D> Eq for Lighthouse<D> {}

impl<D> Hash for Lighthouse<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl<D> fmt::Debug for Lighthouse<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lighthouse")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("rssi", &self.rssi)
            .field("version", &self.version)
            .field("is_on", &self.is_on())
            .finish()
    }
}
