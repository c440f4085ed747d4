//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`, never `to_vec`: structs go on the wire as maps
//! keyed by field name, so clients in other languages can decode them without
//! knowing the field order.
//!
//! # Example
//!
//! ```
//! use netwire_server::codec::{MsgPackCodec, PayloadCodec};
//! use netwire_server::protocol::Request;
//! use serde_json::json;
//!
//! let request = Request::new(1, "Calculator", "add", vec!["int".into(), "int".into()], vec![json!(2), json!(3)]);
//! let encoded = MsgPackCodec::encode(&request).unwrap();
//! let decoded: Request = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, request);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    #[inline]
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorKind, Request, Response};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // fixmap with 3 entries; array format would be 0x93
        assert_eq!(encoded[0], 0x83, "Expected map format, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_request_with_mixed_values() {
        let request = Request::new(
            u64::MAX,
            "Store",
            "put",
            vec!["string".into(), "map".into(), "double".into(), "long".into()],
            vec![
                json!("key"),
                json!({ "nested": [1, 2, 3], "flag": true, "none": null }),
                json!(2.5),
                json!(-17),
            ],
        );

        let encoded = MsgPackCodec::encode(&request).unwrap();
        let decoded: Request = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn test_null_result_is_not_lost() {
        // A void method returns null; it must still decode as a result, not an error
        let response = Response::ok(9, json!(null));

        let encoded = MsgPackCodec::encode(&response).unwrap();
        let decoded: Response = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, response);
        assert!(decoded.is_ok());
    }

    #[test]
    fn test_error_response_roundtrip() {
        let response = Response::error(3, ErrorKind::MethodNotFound, "Calculator.mul(int,int)");

        let encoded = MsgPackCodec::encode(&response).unwrap();
        let decoded: Response = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, response);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Request> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_empty_payload() {
        let result: Result<Request> = MsgPackCodec::decode(&[]);
        assert!(result.is_err());
    }
}
