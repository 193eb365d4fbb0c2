//! UDP front ends feeding datagrams into a [`Bmc`](crate::Bmc).
//!
//! Both bind one socket per emulated BMC address, so the local address of each socket
//! selects the target.

/// Maximum UDP payload we accept.
///
/// IPMI v1.5 packets are small; 4 KiB is a conservative upper bound.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 4096;

#[cfg(feature = "blocking")]
pub mod blocking;

#[cfg(feature = "async")]
pub mod tokio;
