//! Magnet link parsing.
//!
//! Only the pieces the coordinator needs: the info-hash (hex or base32
//! `xt=urn:btih:` form) and the optional display name.

use super::InfoHash;

/// Fields extracted from a magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMagnet {
    /// Torrent identifier from the `xt` parameter.
    pub info_hash: InfoHash,
    /// Display name from the `dn` parameter, if present.
    pub display_name: Option<String>,
}

/// Errors from magnet link parsing.
#[derive(Debug, thiserror::Error)]
pub enum MagnetError {
    /// The URI is not a valid magnet link.
    #[error("invalid magnet link: {reason}")]
    InvalidLink {
        /// Description of the parse failure.
        reason: String,
    },

    /// No `xt=urn:btih:` parameter was found.
    #[error("magnet link carries no info hash")]
    MissingInfoHash,

    /// The `xt` parameter value could not be decoded.
    #[error("invalid info hash in magnet link: {reason}")]
    InvalidHash {
        /// Description of the decode failure.
        reason: String,
    },
}

/// Parses a magnet link into its info-hash and display name.
///
/// The `xt=urn:btih:` parameter is authoritative for the hash; the
/// `magnet_url` crate only contributes the decoded display name.
///
/// # Errors
/// - [`MagnetError::InvalidLink`] - not a magnet URI
/// - [`MagnetError::MissingInfoHash`] - no `xt=urn:btih:` parameter
/// - [`MagnetError::InvalidHash`] - hash is neither 40-char hex nor
///   32-char base32
pub fn parse(magnet_link: &str) -> Result<ParsedMagnet, MagnetError> {
    if !magnet_link.starts_with("magnet:") {
        return Err(MagnetError::InvalidLink {
            reason: "not a magnet URI".to_string(),
        });
    }

    let info_hash = extract_info_hash(magnet_link)?;
    let display_name = magnet_url::Magnet::new(magnet_link)
        .ok()
        .and_then(|magnet| magnet.dn);

    Ok(ParsedMagnet {
        info_hash,
        display_name,
    })
}

/// Pulls the `xt=urn:btih:` value out of the raw URI.
fn extract_info_hash(magnet_link: &str) -> Result<InfoHash, MagnetError> {
    for param in magnet_link.split(['?', '&']) {
        if let Some(value) = param.strip_prefix("xt=urn:btih:") {
            return decode_hash(value);
        }
    }
    Err(MagnetError::MissingInfoHash)
}

/// Decodes a 40-char hex or 32-char base32 info-hash string.
fn decode_hash(value: &str) -> Result<InfoHash, MagnetError> {
    let bytes = match value.len() {
        40 => data_encoding::HEXLOWER_PERMISSIVE
            .decode(value.to_ascii_lowercase().as_bytes())
            .map_err(|e| MagnetError::InvalidHash {
                reason: e.to_string(),
            })?,
        32 => data_encoding::BASE32
            .decode(value.to_ascii_uppercase().as_bytes())
            .map_err(|e| MagnetError::InvalidHash {
                reason: e.to_string(),
            })?,
        other => {
            return Err(MagnetError::InvalidHash {
                reason: format!("unexpected length {other} (want 40 hex or 32 base32 chars)"),
            });
        }
    };

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes);
    Ok(InfoHash::new(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn parses_hex_magnet() {
        let link = format!("magnet:?xt=urn:btih:{HEX_HASH}&dn=big+buck+bunny");
        let parsed = parse(&link).unwrap();

        assert_eq!(
            parsed.info_hash.to_string(),
            HEX_HASH.to_ascii_uppercase()
        );
        assert!(parsed.display_name.is_some());
    }

    #[test]
    fn hash_case_does_not_matter() {
        let upper = parse(&format!(
            "magnet:?xt=urn:btih:{}",
            HEX_HASH.to_ascii_uppercase()
        ))
        .unwrap();
        let lower = parse(&format!("magnet:?xt=urn:btih:{HEX_HASH}")).unwrap();
        assert_eq!(upper.info_hash, lower.info_hash);
    }

    #[test]
    fn parses_base32_magnet() {
        // 32 base32 chars decode to exactly 20 bytes.
        let b32 = data_encoding::BASE32.encode(&[0x42u8; 20]);
        assert_eq!(b32.len(), 32);

        let parsed = parse(&format!("magnet:?xt=urn:btih:{b32}")).unwrap();
        assert_eq!(parsed.info_hash, InfoHash::new([0x42u8; 20]));
    }

    #[test]
    fn rejects_magnet_without_info_hash() {
        let result = parse("magnet:?dn=nothing+to+see");
        assert!(matches!(result, Err(MagnetError::MissingInfoHash)));
    }

    #[test]
    fn rejects_non_magnet_uri() {
        assert!(parse("http://example.com/file.torrent").is_err());
    }

    #[test]
    fn rejects_odd_hash_length() {
        let result = parse("magnet:?xt=urn:btih:abcdef");
        assert!(matches!(result, Err(MagnetError::InvalidHash { .. })));
    }
}
