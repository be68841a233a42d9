pub use dns::*;
pub use tcp::*;
pub use udp::*;

mod dns;
mod tcp;
mod udp;
