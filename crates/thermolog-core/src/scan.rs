//! Adapter selection and address-targeted scanning.
//!
//! Unlike a general discovery scan, the engine only ever looks for one
//! address, so scanning runs until that address shows up or the connect
//! timeout expires.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use thermolog_types::MacAddress;

/// How often the adapter's peripheral list is checked while scanning.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Scan until a peripheral with `address` is seen, or `limit` elapses.
///
/// Peripherals already known to the adapter (from an earlier scan) are
/// returned without scanning. The scan is stopped on every exit path.
///
/// # Errors
///
/// Returns [`Error::ConnectTimeout`] if the device is not seen in time, or
/// [`Error::Bluetooth`] if the adapter refuses to scan.
pub async fn find_device(
    adapter: &Adapter,
    address: MacAddress,
    limit: Duration,
) -> Result<Peripheral> {
    if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
        debug!("Found {} in adapter cache (no scan needed)", address);
        return Ok(peripheral);
    }

    info!("Scanning for {} (up to {:?})...", address, limit);
    adapter.start_scan(ScanFilter::default()).await?;

    let found = timeout(limit, async {
        loop {
            sleep(SCAN_POLL_INTERVAL).await;
            if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
                return Ok::<_, Error>(peripheral);
            }
        }
    })
    .await;

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    match found {
        Ok(result) => result,
        Err(_) => Err(Error::connect_timeout(address, limit)),
    }
}

/// Search the adapter's known peripherals for one with a matching address.
async fn find_known_peripheral(
    adapter: &Adapter,
    address: MacAddress,
) -> Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };

        let matches = props
            .address
            .to_string()
            .parse::<MacAddress>()
            .is_ok_and(|seen| seen == address);

        if matches {
            info!(
                "Device {} found: {}",
                address,
                props.local_name.as_deref().unwrap_or("<unnamed>")
            );
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}
