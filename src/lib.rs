//! Discover SteamVR base stations ("lighthouses") over Bluetooth LE and switch
//! them on and off.
//!
//! Both hardware generations are supported: 1.0 stations advertise as
//! `HTC BS ...` and 2.0 stations as `LHB-...`.
//!
//! ```ignore
//! use futures::StreamExt as _;
//! use lighthouse::{btle, discover, DEFAULT_RETRIES, SCAN_TIMEOUT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = btle::default_adapter().await?;
//!     let mut lighthouses = discover(&scanner, SCAN_TIMEOUT).await?;
//!     while let Some(lh) = lighthouses.next().await {
//!         match lh.write(true, DEFAULT_RETRIES).await? {
//!             Some(_) => println!("{} is on", lh.address()),
//!             None => println!("{} did not answer", lh.address()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lighthouse;
pub mod power;
pub mod transport;

#[cfg(test)]
mod mock;

pub use discovery::{SCAN_TIMEOUT, discover};
pub use error::{Error, Result};
pub use lighthouse::{DEFAULT_RETRIES, Lighthouse};
pub use power::{CharacteristicRef, PowerState, ProtocolVersion, ProtocolViolation};
