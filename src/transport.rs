//! The boundary between the lighthouse logic and whatever BLE stack carries it.
//!
//! [`crate::btle`] implements these traits over btleplug; tests use a scripted
//! in-memory transport.

use std::future::Future;
use std::time::Duration;

use btleplug::api::BDAddr;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::power::CharacteristicRef;

/// A failure of the radio link. Always worth another attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Ble(#[from] btleplug::Error),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(CharacteristicRef),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct Advertisement<D> {
    pub device: D,
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

pub trait Scanner {
    type Device: Device;

    /// Starts scanning. Scanning stops once the returned stream is dropped.
    fn advertisements(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, Advertisement<Self::Device>>, TransportError>>
    + Send;
}

pub trait Device: Clone + Send + Sync + 'static {
    type Connection: Connection;

    fn address(&self) -> BDAddr;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An open link to one device. Implementations should release the link when
/// dropped without [`Connection::disconnect`].
pub trait Connection: Send {
    fn read(
        &mut self,
        characteristic: CharacteristicRef,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Write without waiting for the device to acknowledge.
    fn write_without_response(
        &mut self,
        characteristic: CharacteristicRef,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
