//! JSON codec using `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::Result;

/// JSON codec. Larger on the wire than MsgPack but readable in a packet dump.
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    const NAME: &'static str = "json";

    #[inline]
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorKind, Request, Response};
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::new(
            7,
            "Calculator",
            "add",
            vec!["int".into(), "int".into()],
            vec![json!(2), json!(3)],
        );

        let encoded = JsonCodec::encode(&request).unwrap();
        let decoded: Request = JsonCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_wire_shape() {
        let encoded = JsonCodec::encode(&Response::error(2, ErrorKind::ServiceNotFound, "Unknown")).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(parsed["id"], 2);
        assert_eq!(parsed["outcome"]["error"]["kind"], "ServiceNotFound");
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Response> = JsonCodec::decode(b"{not json");
        assert!(result.is_err());
    }
}
