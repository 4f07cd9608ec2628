//! Payload codec fakes.

use async_trait::async_trait;
use lns_core::backend::PayloadCodec;
use lns_core::error::CodecError;
use lns_protocol::DevEui;

/// Codec that "decodes" any payload to `{ "hex": "<payload>" }`.
#[derive(Debug, Default)]
pub struct HexCodec;

#[async_trait]
impl PayloadCodec for HexCodec {
    async fn decode(
        &self,
        _dev_eui: DevEui,
        payload: &[u8],
        _f_port: Option<u8>,
        _decoder_id: Option<&str>,
    ) -> Result<serde_json::Value, CodecError> {
        Ok(serde_json::json!({
            "hex": payload.iter().map(|b| format!("{b:02x}")).collect::<String>(),
        }))
    }
}

/// Codec that always fails, to exercise the raw-payload fallback.
#[derive(Debug, Default)]
pub struct FailingCodec;

#[async_trait]
impl PayloadCodec for FailingCodec {
    async fn decode(
        &self,
        _dev_eui: DevEui,
        _payload: &[u8],
        _f_port: Option<u8>,
        decoder_id: Option<&str>,
    ) -> Result<serde_json::Value, CodecError> {
        Err(CodecError::UnknownDecoder(
            decoder_id.unwrap_or("<none>").to_string(),
        ))
    }
}
