use std::fmt::{self, Write};

use leapwire_value::{Map, Value};

use crate::error::{ClientError, Result};

/// Correlation id meaning "not correlated".
pub const NO_CORRELATION: i32 = 0;

/// Longest pump name accepted from the host.
pub const MAX_PUMP_NAME_LEN: usize = 256;

/// The top-level map every LEAP message travels in.
///
/// Encodes as `{'pump':…,'data':…,'reqid':…}` followed by any `extra` fields,
/// which are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub pump: String,
    pub data: Value,
    pub reqid: Option<i32>,
    pub extra: Map,
}

impl Envelope {
    pub fn new(pump: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            pump: pump.into(),
            data: data.into(),
            reqid: None,
            extra: Map::new(),
        }
    }

    pub fn with_reqid(mut self, reqid: i32) -> Self {
        self.reqid = Some(reqid);
        self
    }

    /// The correlation id, unless absent or [`NO_CORRELATION`].
    pub fn correlation_id(&self) -> Option<i32> {
        self.reqid.filter(|id| *id != NO_CORRELATION)
    }

    /// Split a decoded message into its envelope fields.
    ///
    /// A missing `data` reads as undefined. `pump` must be a non-empty
    /// string and `reqid`, when present, an integer.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Map(map) => map,
            other => {
                return Err(ClientError::InvalidEnvelope(format!(
                    "expected a map, got {}",
                    other.type_name()
                )))
            }
        };

        let pump = match map.remove("pump") {
            Some(Value::String(pump)) if !pump.is_empty() => pump,
            Some(Value::String(_)) => {
                return Err(ClientError::InvalidEnvelope("empty pump name".to_string()))
            }
            Some(other) => {
                return Err(ClientError::InvalidEnvelope(format!(
                    "pump must be a string, got {}",
                    other.type_name()
                )))
            }
            None => return Err(ClientError::InvalidEnvelope("missing pump".to_string())),
        };

        let data = map.remove("data").unwrap_or_default();

        let reqid = match map.remove("reqid") {
            None | Some(Value::Undefined) => None,
            Some(Value::Integer(id)) => Some(id),
            Some(other) => {
                return Err(ClientError::InvalidEnvelope(format!(
                    "reqid must be an integer, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            pump,
            data,
            reqid,
            extra: map,
        })
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(3 + self.extra.len());
        map.insert("pump", self.pump);
        map.insert("data", self.data);
        if let Some(reqid) = self.reqid {
            map.insert("reqid", reqid);
        }
        for (key, value) in self.extra {
            if !map.contains_key(&key) {
                map.insert(key, value);
            }
        }
        Value::Map(map)
    }

    /// Encode to notation bytes, ready to frame. Same text as encoding
    /// [`into_value`](Envelope::into_value), without building the map.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        // fmt::Write for String is infallible.
        let _ = self.write_to(&mut out);
        out.into_bytes()
    }

    fn write_to(&self, out: &mut String) -> fmt::Result {
        out.write_str("{'pump':")?;
        leapwire_value::write_string(out, &self.pump)?;
        out.write_str(",'data':")?;
        leapwire_value::write_value(out, &self.data)?;
        if let Some(reqid) = self.reqid {
            write!(out, ",'reqid':i{reqid}")?;
        }
        for (key, value) in &self.extra {
            let shadowed = match key {
                "pump" | "data" => true,
                "reqid" => self.reqid.is_some(),
                _ => false,
            };
            if shadowed {
                continue;
            }
            out.write_char(',')?;
            leapwire_value::write_string(out, key)?;
            out.write_char(':')?;
            leapwire_value::write_value(out, value)?;
        }
        out.write_char('}')
    }
}

/// Best-effort correlation id of a message that failed envelope validation.
pub(crate) fn stray_reqid(value: &Value) -> Option<i32> {
    value
        .get("reqid")
        .and_then(Value::as_integer)
        .filter(|id| *id != NO_CORRELATION)
}

pub(crate) fn validate_pump_name(pump: &str) -> Result<()> {
    if pump.is_empty() || pump.len() > MAX_PUMP_NAME_LEN {
        return Err(ClientError::HandshakeFailed(format!(
            "invalid pump name length: {}",
            pump.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(envelope: &Envelope) -> String {
        String::from_utf8(envelope.encode()).unwrap()
    }

    #[test]
    fn request_layout() {
        let data: Map = [("key", "Foo")].into_iter().collect();
        let envelope = Envelope::new("set_value", data).with_reqid(1);

        let encoded = text(&envelope);
        assert_eq!(
            encoded,
            "{'pump':'set_value','data':{'key':'Foo'},'reqid':i1}"
        );
        assert_eq!(encoded.len(), 52);
    }

    #[test]
    fn post_layout_omits_reqid() {
        let envelope = Envelope::new("foo", Map::new());
        assert_eq!(text(&envelope), "{'pump':'foo','data':{}}");
    }

    #[test]
    fn extras_are_kept_after_known_fields() {
        let value: Value = "{'trace':'abc','data':i7,'pump':'reply','reqid':i1}"
            .parse()
            .unwrap();
        let envelope = Envelope::from_value(value).unwrap();

        assert_eq!(envelope.pump, "reply");
        assert_eq!(envelope.data, Value::Integer(7));
        assert_eq!(envelope.correlation_id(), Some(1));
        assert_eq!(envelope.extra.get("trace"), Some(&Value::from("abc")));
        assert_eq!(
            text(&envelope),
            "{'pump':'reply','data':i7,'reqid':i1,'trace':'abc'}"
        );
    }

    #[test]
    fn encode_matches_the_assembled_map() {
        let extra: Map = [
            ("pump", Value::from("shadowed")),
            ("trace", Value::from("a'b")),
            ("reqid", Value::Integer(4)),
        ]
        .into_iter()
        .collect();
        let cases = [
            Envelope::new("p", Value::Undefined),
            Envelope::new("it's", vec![Value::from(1), Value::from("x")]).with_reqid(-3),
            Envelope {
                extra: extra.clone(),
                ..Envelope::new("p", 1.5)
            },
            Envelope {
                extra,
                ..Envelope::new("p", Map::new()).with_reqid(9)
            },
        ];

        for envelope in cases {
            let assembled = leapwire_value::encode(&envelope.clone().into_value());
            assert_eq!(envelope.encode(), assembled, "{envelope:?}");
        }
    }

    #[test]
    fn missing_data_is_undefined_and_zero_reqid_is_uncorrelated() {
        let value: Value = "{'pump':'x','reqid':i0}".parse().unwrap();
        let envelope = Envelope::from_value(value).unwrap();
        assert!(envelope.data.is_undefined());
        assert_eq!(envelope.reqid, Some(NO_CORRELATION));
        assert_eq!(envelope.correlation_id(), None);
    }

    #[test]
    fn rejects_malformed_envelopes() {
        for text in [
            "[i1]",
            "{'data':i1}",
            "{'pump':i3,'data':i1}",
            "{'pump':'','data':i1}",
            "{'pump':'x','reqid':'one'}",
        ] {
            let value: Value = text.parse().unwrap();
            let err = Envelope::from_value(value).unwrap_err();
            assert!(matches!(err, ClientError::InvalidEnvelope(_)), "{text}");
        }
    }

    #[test]
    fn stray_reqid_reads_top_level_integer() {
        let value: Value = "{'pump':i3,'reqid':i9}".parse().unwrap();
        assert_eq!(stray_reqid(&value), Some(9));
        let value: Value = "{'reqid':i0}".parse().unwrap();
        assert_eq!(stray_reqid(&value), None);
        assert_eq!(stray_reqid(&Value::Integer(9)), None);
    }

    #[test]
    fn pump_name_limits() {
        assert!(validate_pump_name("LLWindow").is_ok());
        assert!(validate_pump_name("").is_err());
        assert!(validate_pump_name(&"p".repeat(MAX_PUMP_NAME_LEN + 1)).is_err());
    }
}
