//! ReelChat shared library: ids, wire records, and realtime event schema
//! shared between the crypto core and the client session layer.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
