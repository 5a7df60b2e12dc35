//! ICMP echo wire format: Internet checksum plus request/reply codec.
//!
//! Everything here is pure; sockets live in `transport`.

pub mod checksum;
pub mod codec;

pub use codec::{
    decode, encode_echo_request, ip_header_len, IcmpMessage, MalformedPacket, ICMP_ECHO_REPLY,
    ICMP_ECHO_REQUEST, ICMP_HEADER_SIZE,
};
