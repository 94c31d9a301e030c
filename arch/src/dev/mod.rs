//! Device implementations.

mod null;

pub use self::null::Null;
