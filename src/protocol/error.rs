#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Fewer bytes than the opcode and reference need
    TooShort(usize),
    UnknownOpcode(u8),
    /// Subscriptions need a non-zero client reference
    ZeroReference,
    /// Resource path is empty or not printable ASCII
    InvalidPath,
    PathTooLong(usize),
    /// Log id payload must be exactly four bytes and non-zero
    InvalidLogId(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload does not fit into the two parts of a notification
    PayloadTooLarge(usize),
    /// Frame is shorter than its header
    Truncated(usize),
    UnknownResponseType(u8),
}
