//! Subresource-integrity verification of fetched module bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::error::{LoadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(bytes).to_vec(),
            Self::Sha384 => Sha384::digest(bytes).to_vec(),
            Self::Sha512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

/// One `<algorithm>-<base64 digest>` token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IntegrityToken {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

fn parse_tokens(hash: &str) -> Vec<IntegrityToken> {
    hash.split_whitespace()
        .filter_map(|token| {
            let (algo, encoded) = token.split_once('-')?;
            let algorithm = HashAlgorithm::parse(algo)?;
            // Options after `?` are reserved by the SRI format and ignored.
            let encoded = encoded.split('?').next().unwrap_or_default();
            let digest = STANDARD.decode(encoded).ok()?;
            Some(IntegrityToken { algorithm, digest })
        })
        .collect()
}

/// Verifies `bytes` against an SRI `hash` (`sha256-…`, `sha384-…` or
/// `sha512-…`, optionally several separated by whitespace). Only the
/// strongest algorithm present is checked, and any of its digests may match.
pub fn verify(address: &str, bytes: &[u8], hash: &str) -> Result<()> {
    let tokens = parse_tokens(hash);
    let Some(strongest) = tokens.iter().map(|t| t.algorithm).max() else {
        warn!(address = %address, "Integrity hash has no usable digest");
        return Err(LoadError::Integrity {
            address: address.to_string(),
            expected: hash.to_string(),
        });
    };
    let actual = strongest.digest(bytes);
    let matched = tokens
        .iter()
        .filter(|t| t.algorithm == strongest)
        .any(|t| t.digest == actual);
    if matched {
        debug!(address = %address, algorithm = ?strongest, "Integrity verified");
        Ok(())
    } else {
        warn!(
            address = %address,
            algorithm = ?strongest,
            actual = %hex::encode(&actual),
            "Integrity mismatch"
        );
        Err(LoadError::Integrity {
            address: address.to_string(),
            expected: hash.to_string(),
        })
    }
}

/// Computes an SRI string for `bytes`, e.g. for publishing plugin metadata.
pub fn compute(algorithm: HashAlgorithm, bytes: &[u8]) -> String {
    let name = match algorithm {
        HashAlgorithm::Sha256 => "sha256",
        HashAlgorithm::Sha384 => "sha384",
        HashAlgorithm::Sha512 => "sha512",
    };
    format!("{name}-{}", STANDARD.encode(algorithm.digest(bytes)))
}
