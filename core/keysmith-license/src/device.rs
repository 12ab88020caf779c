//! Device fingerprinting for code binding.
//!
//! A fingerprint is a hex SHA-256 over identifiers that are stable for one
//! device. Two sources are provided:
//! - [`HostFingerprint`] for the machine the process runs on
//! - [`RequestSignals`] for a remote client identified by request headers

use crate::code::DeviceBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// A device presented for activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device fingerprint.
    pub fingerprint: String,
    /// Human-readable device name.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form details (OS, architecture, client version).
    #[serde(default)]
    pub info: serde_json::Value,
}

impl DeviceInfo {
    /// Creates a device with only a fingerprint.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            name: None,
            info: serde_json::Value::Null,
        }
    }

    /// Sets the device name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the binding recorded when this device activates a code.
    #[must_use]
    pub fn bind(&self, now: DateTime<Utc>) -> DeviceBinding {
        DeviceBinding {
            fingerprint: self.fingerprint.clone(),
            name: self.name.clone(),
            info: self.info.clone(),
            bound_at: now,
        }
    }
}

/// Source of the fingerprint of the device making a request.
pub trait FingerprintProvider: Send + Sync {
    /// Returns the hex fingerprint.
    fn fingerprint(&self) -> String;

    /// Returns the full device description.
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(self.fingerprint())
    }
}

/// Fingerprint of the local machine.
#[derive(Debug, Clone, Default)]
pub struct HostFingerprint;

impl FingerprintProvider for HostFingerprint {
    fn fingerprint(&self) -> String {
        hash_components(&collect_hardware_ids())
    }

    fn device_info(&self) -> DeviceInfo {
        let hostname = get_hostname();
        DeviceInfo {
            fingerprint: self.fingerprint(),
            name: Some(hostname.clone()),
            info: serde_json::json!({
                "os": env::consts::OS,
                "arch": env::consts::ARCH,
                "hostname": hostname,
            }),
        }
    }
}

/// Fingerprint derived from the signals of an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignals {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub accept_language: String,
    #[serde(default)]
    pub remote_addr: String,
}

impl FingerprintProvider for RequestSignals {
    fn fingerprint(&self) -> String {
        hash_components(&[
            self.user_agent.as_str(),
            self.accept_language.as_str(),
            self.remote_addr.as_str(),
        ])
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            fingerprint: self.fingerprint(),
            name: None,
            info: serde_json::json!({ "user_agent": self.user_agent }),
        }
    }
}

fn hash_components<S: AsRef<str>>(components: &[S]) -> String {
    let combined = components
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("|");
    hex::encode(Sha256::digest(combined.as_bytes()))
}

/// Collects hardware identifiers for fingerprinting.
fn collect_hardware_ids() -> Vec<String> {
    let mut ids = vec![env::consts::OS.to_string(), env::consts::ARCH.to_string()];

    // Hostname (can change but usually stable)
    ids.push(get_hostname());

    if let Some(machine_id) = get_machine_id() {
        ids.push(machine_id);
    }

    ids
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Platform machine identifier, where one is readable without privileges.
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
