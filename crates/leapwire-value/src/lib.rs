//! LLSD value model and notation codec for the LEAP protocol.
//!
//! Every LEAP message is a single [`Value`] serialized in LLSD *notation*, a
//! compact text format with one-character type tags:
//!
//! ```text
//! {'pump':'set_value','data':{'key':'Foo','count':i3,'ratio':r0.5},'reqid':i1}
//! ```
//!
//! [`encode`] always produces the canonical spelling; [`decode`] also accepts
//! the historical aliases other LLSD implementations emit (numeric booleans,
//! double-quoted strings, sized strings, hex binary).

pub mod decode;
pub mod encode;
pub mod error;
pub mod map;
pub mod value;

#[cfg(feature = "json")]
pub mod json;

pub use decode::{decode, decode_str, decode_with_max_depth, DEFAULT_MAX_DEPTH};
pub use encode::{encode, encode_to, write_map_entries, write_string, write_value};
pub use error::{DecodeError, DecodeErrorKind, Result};
pub use map::Map;
pub use value::Value;
