//! Transport over the platform Bluetooth stack via btleplug.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt as _;
use futures::stream::BoxStream;
use log::{debug, error};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::power::{CharacteristicRef, V2_POWER_CHARACTERISTIC, V2_POWER_HANDLE};
use crate::transport::{Advertisement, Connection, Device, Scanner, TransportError};

/// btleplug addresses characteristics by UUID only.
fn resolve(characteristic: CharacteristicRef) -> Option<Uuid> {
    match characteristic {
        CharacteristicRef::Uuid(uuid) => Some(uuid),
        CharacteristicRef::Handle(V2_POWER_HANDLE) => Some(V2_POWER_CHARACTERISTIC),
        CharacteristicRef::Handle(_) => None,
    }
}

/// Get the first Bluetooth adapter
pub async fn default_adapter() -> Result<BtleScanner> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or(Error::NoAdapter)?;
    debug!("Using adapter {}", adapter.adapter_info().await?);
    Ok(BtleScanner {
        adapter,
        scans: ActiveScans::default(),
    })
}

/// Number of advertisement streams sharing the adapter's scan.
#[derive(Clone, Debug, Default)]
struct ActiveScans(Arc<AtomicUsize>);

impl ActiveScans {
    fn begin(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// `true` when the last stream has ended.
    fn end(&self) -> bool {
        self.0.fetch_sub(1, Ordering::SeqCst) == 1
    }

    fn idle(&self) -> bool {
        self.0.load(Ordering::SeqCst) == 0
    }
}

#[derive(Clone)]
pub struct BtleScanner {
    adapter: Adapter,
    scans: ActiveScans,
}

async fn advertisement(
    adapter: &Adapter,
    event: CentralEvent,
) -> Option<Advertisement<BtleDevice>> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
        _ => return None,
    };
    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            debug!("Lost track of {id:?}: {err}");
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(properties) => properties?,
        Err(err) => {
            debug!("No properties for {id:?}: {err}");
            return None;
        }
    };
    Some(Advertisement {
        address: peripheral.address(),
        name: properties.local_name,
        rssi: properties.rssi,
        device: BtleDevice { peripheral },
    })
}

/// Stops the scan once the last advertisement stream goes away.
struct ScanGuard {
    adapter: Adapter,
    scans: ActiveScans,
}

impl ScanGuard {
    fn new(adapter: Adapter, scans: ActiveScans) -> Self {
        scans.begin();
        ScanGuard { adapter, scans }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if !self.scans.end() {
            return;
        }
        let adapter = self.adapter.clone();
        let scans = self.scans.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                // Another scan may have started meanwhile.
                if !scans.idle() {
                    return;
                }
                if let Err(err) = adapter.stop_scan().await {
                    error!("Error stopping scan: {err}");
                }
            });
        }
    }
}

impl Scanner for BtleScanner {
    type Device = BtleDevice;

    async fn advertisements(
        &self,
    ) -> std::result::Result<BoxStream<'static, Advertisement<BtleDevice>>, TransportError> {
        let events = self.adapter.events().await?;
        let guard = ScanGuard::new(self.adapter.clone(), self.scans.clone());
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move { advertisement(&adapter, event).await }
            })
            .map(move |advertisement| {
                let _guard = &guard;
                advertisement
            })
            .boxed())
    }
}

#[derive(Clone)]
pub struct BtleDevice {
    peripheral: Peripheral,
}

impl Device for BtleDevice {
    type Connection = BtleConnection;

    fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    async fn connect(&self) -> std::result::Result<BtleConnection, TransportError> {
        self.peripheral.connect().await?;
        let connection = BtleConnection {
            peripheral: self.peripheral.clone(),
            disconnected: false,
        };
        if let Err(err) = self.peripheral.discover_services().await {
            if let Err(disconnect_err) = connection.disconnect().await {
                debug!(
                    "{}: disconnect after failed service discovery: {disconnect_err}",
                    self.peripheral.address()
                );
            }
            return Err(err.into());
        }
        Ok(connection)
    }
}

/// An open GATT connection. Dropped without [`Connection::disconnect`], for
/// instance when an attempt is cancelled, it disconnects in the background.
pub struct BtleConnection {
    peripheral: Peripheral,
    disconnected: bool,
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        if self.disconnected {
            return;
        }
        let peripheral = self.peripheral.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = peripheral.disconnect().await {
                    debug!("{}: disconnect failed: {err}", peripheral.address());
                }
            });
        }
    }
}

impl BtleConnection {
    fn characteristic(
        &self,
        characteristic: CharacteristicRef,
    ) -> std::result::Result<Characteristic, TransportError> {
        let uuid = resolve(characteristic)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }
}

impl Connection for BtleConnection {
    async fn read(
        &mut self,
        characteristic: CharacteristicRef,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write_without_response(
        &mut self,
        characteristic: CharacteristicRef,
        payload: &[u8],
    ) -> std::result::Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(mut self) -> std::result::Result<(), TransportError> {
        self.disconnected = true;
        Ok(self.peripheral.disconnect().await?)
    }
}
