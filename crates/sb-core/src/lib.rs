pub mod error;
pub mod naming;
pub mod types;
pub mod value;

pub use error::{BridgeError, ErrorKind};
pub use naming::{capitalize, to_camel_case};
pub use types::*;
pub use value::*;
