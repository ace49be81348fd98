use super::error::CommandError;

/// Longest resource path a SUBSCRIBE fits into a single write.
pub const MAX_PATH_LEN: usize = 158;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    Hello = 0,
    Subscribe = 1,
    Unsubscribe = 2,
    FetchLog = 3,
}

impl TryFrom<u8> for Opcode {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Hello),
            1 => Ok(Opcode::Subscribe),
            2 => Ok(Opcode::Unsubscribe),
            3 => Ok(Opcode::FetchLog),
            other => Err(CommandError::UnknownOpcode(other)),
        }
    }
}

/// A decoded write to the command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command<'a> {
    Hello { reference: u8 },
    Subscribe { reference: u8, path: &'a str },
    Unsubscribe { reference: u8 },
    FetchLog { reference: u8, log_id: u32 },
}

impl<'a> Command<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CommandError> {
        let [opcode, reference, payload @ ..] = bytes else {
            return Err(CommandError::TooShort(bytes.len()));
        };
        let reference = *reference;

        match Opcode::try_from(*opcode)? {
            Opcode::Hello => Ok(Command::Hello { reference }),
            Opcode::Subscribe => {
                if reference == 0 {
                    return Err(CommandError::ZeroReference);
                }
                let path = parse_path(payload)?;
                Ok(Command::Subscribe { reference, path })
            }
            Opcode::Unsubscribe => Ok(Command::Unsubscribe { reference }),
            Opcode::FetchLog => {
                let log_id = payload
                    .try_into()
                    .map(u32::from_le_bytes)
                    .map_err(|_| CommandError::InvalidLogId(payload.len()))?;
                if log_id == 0 {
                    return Err(CommandError::InvalidLogId(payload.len()));
                }
                Ok(Command::FetchLog { reference, log_id })
            }
        }
    }

    pub fn reference(&self) -> u8 {
        match *self {
            Command::Hello { reference }
            | Command::Subscribe { reference, .. }
            | Command::Unsubscribe { reference }
            | Command::FetchLog { reference, .. } => reference,
        }
    }
}

fn parse_path(payload: &[u8]) -> Result<&str, CommandError> {
    // Some clients send the terminator along with the path
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let path = &payload[..end];

    if path.len() > MAX_PATH_LEN {
        return Err(CommandError::PathTooLong(path.len()));
    }
    if path.is_empty() || !path.iter().all(u8::is_ascii_graphic) {
        return Err(CommandError::InvalidPath);
    }

    core::str::from_utf8(path).map_err(|_| CommandError::InvalidPath)
}
