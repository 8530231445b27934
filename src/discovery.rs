use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt as _;
use futures::future;
use futures::stream::BoxStream;
use log::{debug, info};

use crate::classifier::classify;
use crate::error::Result;
use crate::lighthouse::Lighthouse;
use crate::transport::{Advertisement, Device, Scanner};

/// How long a scan runs unless told otherwise.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Scans for lighthouses until `timeout` has elapsed.
///
/// Each address is yielded at most once per call, however often it advertises.
/// Devices that are not lighthouses are skipped. The stream simply ends at the
/// deadline; dropping it earlier stops the scan.
pub async fn discover<S: Scanner>(
    scanner: &S,
    timeout: Duration,
) -> Result<BoxStream<'static, Lighthouse<S::Device>>> {
    let deadline = tokio::time::sleep(timeout);
    info!("Scanning for lighthouses for up to {}s", timeout.as_secs());
    let advertisements = scanner.advertisements().await?;

    let mut seen = HashSet::new();
    Ok(advertisements
        .filter_map(move |advertisement| future::ready(first_sighting(&mut seen, advertisement)))
        .take_until(deadline)
        .boxed())
}

fn first_sighting<D: Device>(
    seen: &mut HashSet<btleplug::api::BDAddr>,
    advertisement: Advertisement<D>,
) -> Option<Lighthouse<D>> {
    let version = classify(advertisement.name.as_deref())?;
    if !seen.insert(advertisement.address) {
        return None;
    }
    let name = advertisement.name.unwrap_or_default();
    debug!(
        "Found {version} lighthouse {name} ({}, RSSI {:?})",
        advertisement.address, advertisement.rssi
    );
    Some(Lighthouse::new(
        advertisement.device,
        name,
        version,
        advertisement.rssi,
    ))
}
