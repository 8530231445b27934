use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use btleplug::api::BDAddr;
use clap::{Parser, ValueEnum};
use futures::StreamExt as _;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use log::debug;
use mac_address::MacAddress;

use lighthouse::btle::{self, BtleDevice, BtleScanner};
use lighthouse::config::{AppConfig, DEFAULT_CONFIG_FILE};
use lighthouse::{Error, Lighthouse, discover};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum State {
    On,
    Off,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            State::On => "on",
            State::Off => "off",
        }
    }
}

/// Turn SteamVR base stations on and off over Bluetooth.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Power state to set
    #[arg(value_enum, default_value_t = State::On)]
    state: State,

    /// MAC addresses of the lighthouses to switch (default: the devices in the config file)
    #[arg(value_parser = parse_address)]
    addresses: Vec<BDAddr>,

    /// Scan and report all lighthouses found
    #[arg(short, long)]
    scan: bool,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum scan time in seconds
    #[arg(short, long)]
    timeout: Option<u64>,
}

fn parse_address(s: &str) -> Result<BDAddr, String> {
    s.parse::<MacAddress>()
        .map(|mac| BDAddr::from(mac.bytes()))
        .map_err(|err| err.to_string())
}

struct Settings {
    timeout: Duration,
    retries: u32,
    attempt_timeout: Option<Duration>,
}

fn print_found(lh: &Lighthouse<BtleDevice>) {
    let rssi = lh
        .rssi()
        .map(|rssi| rssi.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "Found Name({}) - MAC({}) - RSSI({} dBm)",
        lh.name(),
        lh.address(),
        rssi
    );
}

async fn scan(scanner: &BtleScanner, settings: &Settings) -> anyhow::Result<()> {
    println!(
        "Scanning for lighthouses for maximum of {} seconds...",
        settings.timeout.as_secs()
    );
    let mut stream = discover(scanner, settings.timeout).await?;
    let mut lighthouses = Vec::new();
    while let Some(lh) = stream.next().await {
        print_found(&lh);
        lighthouses.push(lh.with_attempt_timeout(settings.attempt_timeout));
    }
    drop(stream);

    let states = join_all(lighthouses.iter().map(|lh| lh.read(settings.retries))).await;
    for (lh, state) in lighthouses.iter().zip(states) {
        match state {
            Ok(Some(true)) => println!("{}: on", lh.address()),
            Ok(Some(false)) => println!("{}: off", lh.address()),
            Ok(None) => println!("{}: unknown (no answer)", lh.address()),
            Err(err) => println!("{}: {err}", lh.address()),
        }
    }

    let addresses: Vec<String> = lighthouses.iter().map(|lh| lh.address().to_string()).collect();
    println!("{}", addresses.join(" "));
    Ok(())
}

async fn switch(
    scanner: &BtleScanner,
    settings: &Settings,
    state: State,
    addresses: Vec<BDAddr>,
) -> anyhow::Result<()> {
    let wanted: HashSet<BDAddr> = addresses.into_iter().collect();
    let is_on = state == State::On;

    println!(
        "Scanning for lighthouses for maximum of {} seconds...",
        settings.timeout.as_secs()
    );
    let mut stream = discover(scanner, settings.timeout).await?;
    let mut lighthouses = Vec::new();
    while let Some(lh) = stream.next().await {
        print_found(&lh);
        if wanted.contains(&lh.address()) {
            lighthouses.push(lh.with_attempt_timeout(settings.attempt_timeout));
            if lighthouses.len() == wanted.len() {
                break;
            }
        }
    }
    drop(stream);

    let mut writes: FuturesUnordered<_> = lighthouses
        .iter()
        .map(|lh| async move {
            println!("{}: turning {}", lh.address(), state.as_str());
            (lh, lh.write(is_on, settings.retries).await)
        })
        .collect();

    let mut failed = 0;
    while let Some((lh, result)) = writes.next().await {
        match result {
            Ok(Some(_)) => println!("{}: Done.", lh.address()),
            Ok(None) => {
                failed += 1;
                println!(
                    "WARNING: {} wasn't turned {}; its state is unknown.",
                    lh.address(),
                    state.as_str()
                );
            }
            Err(Error::ProtocolViolation(violation)) => {
                failed += 1;
                println!("ERROR: {} answered with nonsense: {violation}", lh.address());
            }
            Err(err) => {
                failed += 1;
                println!("ERROR: {}: {err}", lh.address());
            }
        }
    }

    let found: HashSet<BDAddr> = lighthouses.iter().map(|lh| lh.address()).collect();
    for address in wanted.difference(&found) {
        failed += 1;
        println!("WARNING: {address} was not found.");
    }

    if failed > 0 {
        bail!(
            "{failed} of {} lighthouses were not turned {}",
            wanted.len(),
            state.as_str()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "lighthouse=info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path, true)?,
        None => AppConfig::load(Path::new(DEFAULT_CONFIG_FILE), false)?,
    };
    debug!("Config: {:?}", config);

    let settings = Settings {
        timeout: cli
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.scan_timeout()),
        retries: config.retries(),
        attempt_timeout: config.attempt_timeout(),
    };

    let addresses = if cli.addresses.is_empty() {
        config.known_addresses()
    } else {
        cli.addresses
    };
    if !cli.scan && addresses.is_empty() {
        bail!("Give the MAC addresses of the lighthouses to switch, or use --scan.");
    }

    let scanner = btle::default_adapter().await?;

    if cli.scan {
        scan(&scanner, &settings).await
    } else {
        switch(&scanner, &settings, cli.state, addresses).await
    }
}
