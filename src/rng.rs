// CLASSIFICATION: COMMUNITY
// Filename: rng.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Kernel entropy seeding from a hardware RNG.
//!
//! Early boot rarely has enough entropy for key generation or TLS. When
//! a trusted hardware RNG is available it is selected as the kernel's
//! `hw_random` source and `/dev/hwrng` is fed into `/dev/random` until
//! the pool reaches the configured threshold. Seeding is best effort.

use log::{debug, info, warn};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::config::EntropyConfig;

/// Trusted RNG drivers, best first.
pub const TRUSTED_RNGS: &[(&str, u8)] = &[
    ("tpm-rng", 0),
    ("intel-rng", 1),
    ("amd-rng", 1),
    ("timeriomem-rng", 2),
];

#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no trusted hardware RNG available")]
    NoTrustedRng,
}

fn io_err(path: &PathBuf) -> impl FnOnce(io::Error) -> EntropyError + '_ {
    move |source| EntropyError::Io {
        path: path.clone(),
        source,
    }
}

fn priority(name: &str) -> Option<u8> {
    TRUSTED_RNGS
        .iter()
        .find(|(rng, _)| *rng == name)
        .map(|(_, prio)| *prio)
}

/// Pick the best trusted RNG from `available`, unless `current` already
/// is the best possible one.
pub fn choose_rng(current: &str, available: &str) -> Option<String> {
    let current = current.trim();
    if priority(current) == Some(0) {
        return Some(current.to_string());
    }
    available
        .split_whitespace()
        .filter_map(|rng| priority(rng).map(|p| (p, rng)))
        .min_by_key(|(p, _)| *p)
        .map(|(_, rng)| rng.to_string())
}

/// Select a trusted RNG as the kernel's `hw_random` source.
pub fn select_trusted_rng(config: &EntropyConfig) -> Result<String, EntropyError> {
    let current =
        fs::read_to_string(&config.hw_random_current).map_err(io_err(&config.hw_random_current))?;
    let available = fs::read_to_string(&config.hw_random_available)
        .map_err(io_err(&config.hw_random_available))?;
    let chosen = choose_rng(&current, &available).ok_or(EntropyError::NoTrustedRng)?;
    if chosen != current.trim() {
        fs::write(&config.hw_random_current, &chosen)
            .map_err(io_err(&config.hw_random_current))?;
    }
    info!("Using hardware RNG {}", chosen);
    Ok(chosen)
}

fn entropy_available(config: &EntropyConfig) -> Option<u64> {
    fs::read_to_string(&config.entropy_avail)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Start the detached seeding thread. Setup errors are returned; errors
/// inside the loop end the thread with a warning.
pub fn spawn_seeder(config: &EntropyConfig) -> Result<JoinHandle<()>, EntropyError> {
    select_trusted_rng(config)?;
    let mut hwrng = fs::File::open(&config.hw_random_device)
        .map_err(io_err(&config.hw_random_device))?;
    let mut random = OpenOptions::new()
        .append(true)
        .open(&config.random_device)
        .map_err(io_err(&config.random_device))?;
    let random_path = config.random_device.clone();
    let config = config.clone();
    let interval = Duration::from_secs(config.feed_interval_secs);

    let handle = thread::Builder::new()
        .name("entropy-seeder".into())
        .spawn(move || {
            let mut block = vec![0u8; config.block_size.max(1)];
            loop {
                let needs_seed = entropy_available(&config).map_or(true, |a| a < config.threshold);
                if needs_seed {
                    let fed = hwrng
                        .read(&mut block)
                        .and_then(|n| random.write_all(&block[..n]).map(|_| n));
                    match fed {
                        Ok(0) => {
                            warn!("Hardware RNG returned no data, entropy seeding stopped");
                            return;
                        }
                        Ok(n) => debug!("Fed {n} bytes of hardware entropy"),
                        Err(e) => {
                            warn!("Entropy seeding stopped: {e}");
                            return;
                        }
                    }
                }
                thread::sleep(interval);
            }
        })
        .map_err(io_err(&random_path))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn keeps_best_current_rng() {
        assert_eq!(choose_rng("tpm-rng\n", "intel-rng tpm-rng").as_deref(), Some("tpm-rng"));
    }

    #[test]
    fn picks_highest_priority_available() {
        assert_eq!(
            choose_rng("virtio_rng.0", "virtio_rng.0 timeriomem-rng intel-rng\n").as_deref(),
            Some("intel-rng")
        );
        assert_eq!(choose_rng("none", "virtio_rng.0"), None);
    }

    #[test]
    fn selection_writes_sysfs() {
        let dir = TempDir::new().unwrap();
        let config = EntropyConfig {
            hw_random_current: dir.path().join("rng_current"),
            hw_random_available: dir.path().join("rng_available"),
            ..EntropyConfig::default()
        };
        fs::write(&config.hw_random_current, "none\n").unwrap();
        fs::write(&config.hw_random_available, "amd-rng\n").unwrap();
        assert_eq!(select_trusted_rng(&config).unwrap(), "amd-rng");
        assert_eq!(fs::read_to_string(&config.hw_random_current).unwrap(), "amd-rng");
    }

    #[test]
    fn seeder_feeds_random_device() {
        let dir = TempDir::new().unwrap();
        let config = EntropyConfig {
            enabled: true,
            hw_random_current: dir.path().join("rng_current"),
            hw_random_available: dir.path().join("rng_available"),
            entropy_avail: dir.path().join("entropy_avail"),
            random_device: dir.path().join("random"),
            hw_random_device: dir.path().join("hwrng"),
            block_size: 4,
            threshold: 3000,
            feed_interval_secs: 0,
        };
        fs::write(&config.hw_random_current, "tpm-rng").unwrap();
        fs::write(&config.hw_random_available, "tpm-rng").unwrap();
        fs::write(&config.entropy_avail, "10\n").unwrap();
        fs::write(&config.hw_random_device, b"abcdefgh").unwrap();
        fs::write(&config.random_device, b"").unwrap();

        // The backing file runs dry after two blocks and the thread exits.
        let handle = spawn_seeder(&config).unwrap();
        handle.join().unwrap();
        assert_eq!(fs::read(&config.random_device).unwrap(), b"abcdefgh");
    }

    #[test]
    fn missing_sysfs_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = EntropyConfig {
            hw_random_current: dir.path().join("absent"),
            ..EntropyConfig::default()
        };
        assert!(matches!(spawn_seeder(&config), Err(EntropyError::Io { .. })));
    }
}
