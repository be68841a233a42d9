#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

pub use tcp::*;
pub use udp::*;

pub use stack::*;

mod stack;
mod tcp;
mod udp;

/// Re-export of the IO error machinery that all transport traits build on.
pub mod io {
    pub use embedded_io_async::{Error, ErrorKind, ErrorType};
}
