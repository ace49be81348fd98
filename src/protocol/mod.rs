//! Wire protocol of the command and data characteristics.
//!
//! Command characteristic (client → device): `[opcode:1][reference:1][payload]`
//!
//! Data characteristic (device → client):
//! `[response type:1][reference:1][offset:4, little endian][payload]`

mod command;
mod error;
pub mod frame;

pub use command::{Command, Opcode, MAX_PATH_LEN};
pub use error::{CommandError, FrameError};
pub use frame::{Frame, Frames, ResponseType};
