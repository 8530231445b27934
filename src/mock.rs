//! Scripted in-memory transport for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::BDAddr;
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};

use crate::power::{CharacteristicRef, PowerState, ProtocolVersion};
use crate::transport::{Advertisement, Connection, Device, Scanner, TransportError};

pub fn addr(last: u8) -> BDAddr {
    BDAddr::from([0xC4, 0x3B, 0x8F, 0x00, 0x00, last])
}

fn link_lost() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionAborted,
        "link lost",
    ))
}

/// Counts down a scripted failure, `true` while any are left.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Tracks how many connections are open at once, possibly across devices.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicU32,
    max: AtomicU32,
}

impl InFlight {
    pub fn max(&self) -> u32 {
        self.max.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet disconnected.
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct DeviceState {
    version: ProtocolVersion,
    payload: Mutex<Vec<u8>>,
    failing_connects: AtomicU32,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    always_fail: AtomicBool,
    ignore_writes: AtomicBool,
    hang_connects: AtomicBool,
    hang_reads: AtomicBool,
    latency: Mutex<Option<Duration>>,
    connects: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
    in_flight: Mutex<Arc<InFlight>>,
}

#[derive(Clone, Debug)]
pub struct MockDevice {
    address: BDAddr,
    state: Arc<DeviceState>,
}

impl MockDevice {
    pub fn new(address: BDAddr, version: ProtocolVersion, reported: PowerState) -> Self {
        Self::with_payload(address, version, version.encode(reported))
    }

    pub fn with_payload(address: BDAddr, version: ProtocolVersion, payload: Vec<u8>) -> Self {
        MockDevice {
            address,
            state: Arc::new(DeviceState {
                version,
                payload: Mutex::new(payload),
                failing_connects: AtomicU32::new(0),
                failing_reads: AtomicU32::new(0),
                failing_writes: AtomicU32::new(0),
                always_fail: AtomicBool::new(false),
                ignore_writes: AtomicBool::new(false),
                hang_connects: AtomicBool::new(false),
                hang_reads: AtomicBool::new(false),
                latency: Mutex::new(None),
                connects: AtomicU32::new(0),
                reads: AtomicU32::new(0),
                writes: AtomicU32::new(0),
                in_flight: Mutex::new(Arc::default()),
            }),
        }
    }

    /// The next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) -> &Self {
        self.state.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` reads fail after connecting.
    pub fn fail_next_reads(&self, count: u32) -> &Self {
        self.state.failing_reads.store(count, Ordering::SeqCst);
        self
    }

    pub fn fail_next_writes(&self, count: u32) -> &Self {
        self.state.failing_writes.store(count, Ordering::SeqCst);
        self
    }

    pub fn always_fail(&self) -> &Self {
        self.state.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn ignore_writes(&self) -> &Self {
        self.state.ignore_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn hang_connects(&self) -> &Self {
        self.state.hang_connects.store(true, Ordering::SeqCst);
        self
    }

    pub fn hang_reads(&self) -> &Self {
        self.state.hang_reads.store(true, Ordering::SeqCst);
        self
    }

    /// Every connection stays open at least this long.
    pub fn latency(&self, latency: Duration) -> &Self {
        *self.state.latency.lock().unwrap() = Some(latency);
        self
    }

    pub fn track(&self, in_flight: Arc<InFlight>) -> &Self {
        *self.state.in_flight.lock().unwrap() = in_flight;
        self
    }

    pub fn connects(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u32 {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u32 {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn payload(&self) -> Vec<u8> {
        self.state.payload.lock().unwrap().clone()
    }

    pub fn advertise(&self, name: &str) -> Advertisement<MockDevice> {
        Advertisement {
            device: self.clone(),
            address: self.address,
            name: Some(name.to_string()),
            rssi: Some(-60),
        }
    }
}

impl Device for MockDevice {
    type Connection = MockConnection;

    fn address(&self) -> BDAddr {
        self.address
    }

    async fn connect(&self) -> Result<MockConnection, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_connects.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.state.always_fail.load(Ordering::SeqCst) {
            return Err(link_lost());
        }
        if take_failure(&self.state.failing_connects) {
            return Err(link_lost());
        }

        let in_flight = self.state.in_flight.lock().unwrap().clone();
        in_flight.enter();
        Ok(MockConnection {
            state: self.state.clone(),
            in_flight,
        })
    }
}

pub struct MockConnection {
    state: Arc<DeviceState>,
    in_flight: Arc<InFlight>,
}

impl Connection for MockConnection {
    async fn read(&mut self, characteristic: CharacteristicRef) -> Result<Vec<u8>, TransportError> {
        assert_eq!(characteristic, self.state.version.characteristic());
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_reads.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if take_failure(&self.state.failing_reads) {
            return Err(link_lost());
        }
        Ok(self.state.payload.lock().unwrap().clone())
    }

    async fn write_without_response(
        &mut self,
        characteristic: CharacteristicRef,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        assert_eq!(characteristic, self.state.version.characteristic());
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.failing_writes) {
            return Err(link_lost());
        }
        if !self.state.ignore_writes.load(Ordering::SeqCst) {
            *self.state.payload.lock().unwrap() = payload.to_vec();
        }
        Ok(())
    }

    async fn disconnect(self) -> Result<(), TransportError> {
        let latency = *self.state.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.exit();
        Ok(())
    }
}

/// Replays a fixed list of advertisements, then stays silent.
pub struct MockScanner {
    advertisements: Vec<Advertisement<MockDevice>>,
    pub released: Arc<AtomicBool>,
}

impl MockScanner {
    pub fn new(advertisements: Vec<Advertisement<MockDevice>>) -> Self {
        MockScanner {
            advertisements,
            released: Arc::default(),
        }
    }
}

struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Scanner for MockScanner {
    type Device = MockDevice;

    async fn advertisements(
        &self,
    ) -> Result<BoxStream<'static, Advertisement<MockDevice>>, TransportError> {
        let release = ReleaseOnDrop(self.released.clone());
        Ok(stream::iter(self.advertisements.clone())
            .chain(stream::pending())
            .map(move |advertisement| {
                let _release = &release;
                advertisement
            })
            .boxed())
    }
}
