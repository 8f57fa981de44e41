use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::error::{CaError, Result};

static ARMOUR_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^-----(BEGIN|END) [A-Z0-9 ]+-----\s*$").ok());

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(&pem, pem::EncodeConfig::new())
}

/// Convert a PEM‑encoded string to DER‑encoded bytes.
pub fn pem_to_der(pem_str: &str) -> Result<Vec<u8>> {
    let pem = pem::parse(pem_str).map_err(|e| CaError::DecodingError(e.to_string()))?;
    Ok(pem.contents().to_vec())
}

/// Turns a request body into DER.
///
/// Accepts raw DER, a PEM `CERTIFICATE REQUEST` block or bare base64 with any
/// line breaks, as posted by EST `simpleenroll` clients.
pub fn decode_request_body(body: &[u8]) -> Result<Vec<u8>> {
    // DER always starts with a SEQUENCE tag.
    if body.first() == Some(&0x30) {
        return Ok(body.to_vec());
    }

    let text = std::str::from_utf8(body)
        .map_err(|_| CaError::InvalidCsr("request body is neither DER nor text".to_string()))?;

    if let Ok(pem) = pem::parse(text) {
        return Ok(pem.into_contents());
    }

    let stripped = match ARMOUR_LINE.as_ref() {
        Some(armour) => armour.replace_all(text, ""),
        None => text.into(),
    };
    let base64: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    if base64.is_empty() {
        return Err(CaError::InvalidCsr("request body is empty".to_string()));
    }
    STANDARD
        .decode(base64.as_bytes())
        .map_err(|e| CaError::InvalidCsr(format!("request body is not base64: {e}")))
}
