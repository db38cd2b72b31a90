// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Certificate pinning and CSP nonce generation.
//!
//! Pins are SHA-256 fingerprints of the backend's DER certificate, written
//! as hex with or without `:` separators (the format `openssl x509
//! -fingerprint -sha256` prints). An empty pin set disables pinning.

use crate::error::SecurityError;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificatePinner {
    pins: Vec<[u8; 32]>,
}

impl CertificatePinner {
    pub fn from_fingerprints(fingerprints: &[String]) -> Result<Self, SecurityError> {
        let pins = fingerprints
            .iter()
            .map(|fp| parse_fingerprint(fp))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pins })
    }

    pub fn is_enabled(&self) -> bool {
        !self.pins.is_empty()
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Whether the DER-encoded certificate matches one of the pins.
    pub fn verify(&self, der: &[u8]) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let digest: [u8; 32] = Sha256::digest(der).into();
        // Check every pin so timing does not reveal which one matched.
        self.pins
            .iter()
            .fold(subtle::Choice::from(0u8), |acc, pin| acc | pin[..].ct_eq(&digest[..]))
            .into()
    }
}

/// SHA-256 fingerprint of `der` as colon-separated uppercase hex.
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_fingerprint(raw: &str) -> Result<[u8; 32], SecurityError> {
    let cleaned: String = raw.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned)
        .map_err(|e| SecurityError::Config(format!("invalid certificate fingerprint '{}': {}", raw, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        SecurityError::Config(format!(
            "certificate fingerprint '{}' is {} bytes, expected 32",
            raw,
            b.len()
        ))
    })
}

/// 128 random bits, hex encoded, for the `nonce-` source of a CSP header.
pub fn generate_csp_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &[u8] = b"fake der certificate bytes";

    #[test]
    fn test_verify_matches_pinned_fingerprint() {
        let pin = fingerprint(CERT);
        let pinner = CertificatePinner::from_fingerprints(&[pin]).unwrap();
        assert!(pinner.is_enabled());
        assert!(pinner.verify(CERT));
        assert!(!pinner.verify(b"some other certificate"));
    }

    #[test]
    fn test_plain_hex_fingerprints_accepted() {
        let pin = fingerprint(CERT).replace(':', "").to_lowercase();
        let pinner = CertificatePinner::from_fingerprints(&[pin]).unwrap();
        assert!(pinner.verify(CERT));
    }

    #[test]
    fn test_empty_pin_set_accepts_everything() {
        let pinner = CertificatePinner::default();
        assert!(!pinner.is_enabled());
        assert!(pinner.verify(b"anything"));
    }

    #[test]
    fn test_bad_fingerprints_rejected() {
        assert!(CertificatePinner::from_fingerprints(&["zz".to_string()]).is_err());
        assert!(CertificatePinner::from_fingerprints(&["AA:BB".to_string()]).is_err());
    }

    #[test]
    fn test_csp_nonce_is_unique_hex() {
        let a = generate_csp_nonce();
        let b = generate_csp_nonce();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
