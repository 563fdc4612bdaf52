//! N3DSXL capture board wire constants and handshake validation

/// USB product descriptions the board enumerates with
pub const PRODUCT_DESCRIPTIONS: [&str; 2] = ["N3DSXL", "N3DSXL.2"];

/// Bulk OUT pipe (host to board commands)
pub const BULK_OUT: u8 = 0x02;

/// Bulk IN pipe (board to host stream)
pub const BULK_IN: u8 = 0x82;

/// FIFO channel carrying the capture stream
pub const FIFO_CHANNEL: u8 = 0;

/// Puts the board into command mode before identification
pub const CMD_CONFIGURE: [u8; 4] = [0x40, 0x80, 0x00, 0x00];

/// Requests the identification word
pub const CMD_QUERY_ID: [u8; 4] = [0x98, 0x05, 0x9f, 0x00];

/// Switches the board to streaming
pub const CMD_STREAM: [u8; 4] = [0x40, 0x00, 0x00, 0x00];

/// Length of the identification reply
pub const ID_REPLY_LEN: usize = 16;

/// Bits of the identification word that are checked (vendor nibbles masked)
pub const ID_MASK: u32 = 0x00f0_f0ff;

/// Expected identification word after masking
pub const ID_EXPECTED: u32 = 0x00c0_b0a1;

/// Assemble the identification word from a reply (bytes 1..=4, little-endian)
pub fn parse_identification(reply: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = reply.get(1..5)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Whether an identification word belongs to a supported board
pub fn identification_valid(id: u32) -> bool {
    id & ID_MASK == ID_EXPECTED
}

/// A reply the simulated board sends for `id`
pub fn identification_reply(id: u32) -> [u8; ID_REPLY_LEN] {
    let mut reply = [0u8; ID_REPLY_LEN];
    reply[1..5].copy_from_slice(&id.to_le_bytes());
    reply
}
