//! Line-protocol wire format.
//!
//! Upstream producers publish metrics as newline separated records:
//!
//! ```text
//! environment,clientId=A Temperature=21.5,Humidity=40 1700000000000
//! ```
//!
//! [`decode`] turns a raw buffer into [`Point`]s without interpreting field
//! types or timestamp units; [`encode`] renders points back.

pub mod decode;
pub mod encode;
pub mod point;

pub use decode::decode;
pub use encode::encode;
pub use point::{FieldSet, FieldValue, Point, TagSet, TypedValue};
