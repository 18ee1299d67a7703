//! Wire layer: message types, fixed-point quantization and a bincode codec.
//!
//! Nothing here knows about transports. Hosts move the encoded bytes
//! however they like; [`codec::MessageChannel`] is the in-process version.

pub mod codec;
pub mod messages;
pub mod quantize;

pub use codec::{channel_pair, decode, encode, MessageChannel};
pub use messages::{ClientMessage, ClientMove, ServerMessage, FLAG_JUMP_PRESSED, FLAG_WANTS_TO_CROUCH};
pub use quantize::{pack_view, round_acceleration, unpack_view, NetQuantize10, NetQuantize100};
