#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

pub use boot_dns as dns;
pub use boot_http as http;
#[cfg(feature = "io")]
pub use boot_nal as nal;
pub use boot_tls as tls;
