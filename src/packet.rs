//! The framed wire packet: header, opaque body, CRC32 footer.
//!
//! Layout (see the module-level constants below for exact offsets):
//!
//! ```text
//! magic(1) | command_type(30, NUL-padded) | guid(32) | number(4 LE)
//!   | count(4 LE) | reserved(16) | body_size(4 LE) | body(body_size) | crc32(4 LE) | tail_magic(1)
//! ```
//!
//! All multi-byte integers are little-endian. `Packet` is an owned,
//! `Cursor`-free parser over byte slices, paired with `encode`/`wire_len`
//! methods and streaming predicates for partial buffers.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DecodeError;

/// Leading byte of every packet.
pub const MAGIC_HEAD: u8 = 0x02;
/// Trailing byte of every packet.
pub const MAGIC_TAIL: u8 = 0x03;

const COMMAND_NAME_LEN: usize = 30;
const GUID_LEN: usize = 32;
const RESERVED_LEN: usize = 16;

const OFF_MAGIC: usize = 0;
const OFF_COMMAND: usize = OFF_MAGIC + 1;
const OFF_GUID: usize = OFF_COMMAND + COMMAND_NAME_LEN;
const OFF_NUMBER: usize = OFF_GUID + GUID_LEN;
const OFF_COUNT: usize = OFF_NUMBER + 4;
const OFF_RESERVED: usize = OFF_COUNT + 4;
const OFF_BODY_SIZE: usize = OFF_RESERVED + RESERVED_LEN;

/// Length of the fixed packet header, in bytes.
pub const HEADER_LEN: usize = OFF_BODY_SIZE + 4;
/// Length of the packet footer (CRC32 + tail magic), in bytes.
pub const FOOTER_LEN: usize = 4 + 1;

/// Longest body an XML fragment logged with `{:?}` will be shown in full;
/// beyond this the `Debug` impl truncates, matching the original agent's
/// `operator<<` behaviour of never flooding the log with a full payload.
const DEBUG_BODY_LIMIT: usize = 300;

/// The five packet types the protocol defines.
///
/// NOTE: keep [`CommandType::NAMES`] in sync with the variant order; the
/// enum's discriminant is never sent on the wire, only the name is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// The host is invoking a command (possibly one fragment of many).
    Command,
    /// The agent is acknowledging receipt of a complete logical command.
    Ack,
    /// The agent is acknowledging receipt of one fragment of a multi-part
    /// command.
    Received,
    /// The agent is notifying the host that a command finished executing.
    AuthResponse,
    /// The agent's result for a previously executed command.
    Response,
}

impl CommandType {
    const NAMES: [&'static str; 5] = ["Command", "Ack", "Received", "AuthResponse", "Response"];

    /// The exact, case-sensitive name written into the wire header.
    pub fn as_str(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Command" => Some(Self::Command),
            "Ack" => Some(Self::Ack),
            "Received" => Some(Self::Received),
            "AuthResponse" => Some(Self::AuthResponse),
            "Response" => Some(Self::Response),
            _ => None,
        }
    }
}

/// The outcome reported in a [`CommandType::Response`] body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// The module exited successfully.
    Success,
    /// The module exited with a non-zero status, or could not be launched.
    Error,
    /// The module's wall-clock deadline expired.
    TimeOut,
}

impl ResponseType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Error => "Error",
            Self::TimeOut => "TimeOut",
        }
    }
}

/// A single framed packet, either parsed from the wire or built locally for
/// transmission.
///
/// `Packet` is immutable once constructed; fields are accessed through
/// getters.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    command_type: CommandType,
    guid: String,
    packet_number: u32,
    packet_count: u32,
    body: Vec<u8>,
}

impl Packet {
    /// Builds a new packet. `guid` is not validated here (validation only
    /// applies to packets parsed from the wire); callers constructing a
    /// packet locally are trusted to pass a well-formed GUID.
    pub fn new(
        command_type: CommandType,
        guid: impl Into<String>,
        packet_number: u32,
        packet_count: u32,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Packet {
            command_type,
            guid: guid.into(),
            packet_number,
            packet_count,
            body: body.into(),
        }
    }

    /// The packet's command type.
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// The 32 hex-digit GUID identifying the logical command this fragment
    /// belongs to.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// 1-based index of this fragment.
    pub fn packet_number(&self) -> u32 {
        self.packet_number
    }

    /// Total number of fragments making up the logical command.
    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    /// The packet's body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// `true` if this packet is the only fragment of its logical command.
    pub fn is_single_fragment(&self) -> bool {
        self.packet_number == 1 && self.packet_count == 1
    }

    /// On-wire length of this packet once serialised.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len() + FOOTER_LEN
    }

    /// Serialises this packet to a freshly-allocated `Vec<u8>`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }

    /// Serialises this packet, appending it to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();

        out.push(MAGIC_HEAD);

        let mut name_field = [0u8; COMMAND_NAME_LEN];
        let name = self.command_type.as_str().as_bytes();
        name_field[..name.len()].copy_from_slice(name);
        out.extend_from_slice(&name_field);

        let mut guid_field = [0u8; GUID_LEN];
        let guid_bytes = self.guid.as_bytes();
        guid_field[..guid_bytes.len().min(GUID_LEN)]
            .copy_from_slice(&guid_bytes[..guid_bytes.len().min(GUID_LEN)]);
        out.extend_from_slice(&guid_field);

        let mut num_buf = [0u8; 4];
        LittleEndian::write_u32(&mut num_buf, self.packet_number);
        out.extend_from_slice(&num_buf);

        LittleEndian::write_u32(&mut num_buf, self.packet_count);
        out.extend_from_slice(&num_buf);

        out.extend_from_slice(&[0u8; RESERVED_LEN]);

        LittleEndian::write_u32(&mut num_buf, self.body.len() as u32);
        out.extend_from_slice(&num_buf);

        out.extend_from_slice(&self.body);

        let crc = crate::crc32(&out[start..]);
        LittleEndian::write_u32(&mut num_buf, crc);
        out.extend_from_slice(&num_buf);

        out.push(MAGIC_TAIL);
    }

    /// `true` if `buf` contains at least a full header.
    pub fn has_header(buf: &[u8]) -> bool {
        buf.len() >= HEADER_LEN
    }

    /// Reads the `body_size` field out of a buffer known to have a full
    /// header. Panics (via slice indexing) if `buf` is shorter than
    /// [`HEADER_LEN`]; callers must check [`Packet::has_header`] first.
    fn body_size_field(buf: &[u8]) -> u32 {
        LittleEndian::read_u32(&buf[OFF_BODY_SIZE..OFF_BODY_SIZE + 4])
    }

    /// `true` if `buf` contains an entire packet (header, body and footer).
    pub fn has_full_packet(buf: &[u8]) -> bool {
        if !Self::has_header(buf) {
            return false;
        }
        let body_size = Self::body_size_field(buf) as usize;
        buf.len() >= HEADER_LEN + body_size + FOOTER_LEN
    }

    /// Parses one packet from the front of `buf`.
    ///
    /// On success, returns the parsed packet and the number of bytes
    /// consumed from `buf` (always `HEADER_LEN + body_size + FOOTER_LEN`).
    /// Callers must have already checked [`Packet::has_full_packet`].
    pub fn decode(buf: &[u8]) -> Result<(Packet, usize), DecodeError> {
        if !Self::has_header(buf) {
            return Err(DecodeError::IncompleteHeader {
                have: buf.len(),
                need: HEADER_LEN,
            });
        }

        let body_size = Self::body_size_field(buf) as usize;
        let total_len = HEADER_LEN + body_size + FOOTER_LEN;
        if buf.len() < total_len {
            return Err(DecodeError::IncompletePacket {
                have: buf.len(),
                need: total_len,
            });
        }

        if buf[OFF_MAGIC] != MAGIC_HEAD {
            return Err(DecodeError::BadMagic(buf[OFF_MAGIC]));
        }

        let command_name_raw = &buf[OFF_COMMAND..OFF_COMMAND + COMMAND_NAME_LEN];
        let nul_at = command_name_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_NAME_LEN);
        let command_name = std::str::from_utf8(&command_name_raw[..nul_at])
            .map_err(|_| DecodeError::BadCommand(String::from_utf8_lossy(command_name_raw).into_owned()))?;
        let command_type = CommandType::from_name(command_name)
            .ok_or_else(|| DecodeError::BadCommand(command_name.to_owned()))?;

        let guid_raw = &buf[OFF_GUID..OFF_GUID + GUID_LEN];
        let guid = std::str::from_utf8(guid_raw)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| DecodeError::BadGuid(String::from_utf8_lossy(guid_raw).into_owned()))?
            .to_owned();

        let packet_number = LittleEndian::read_u32(&buf[OFF_NUMBER..OFF_NUMBER + 4]);
        let packet_count = LittleEndian::read_u32(&buf[OFF_COUNT..OFF_COUNT + 4]);
        if packet_number > packet_count {
            return Err(DecodeError::NumberOutOfRange {
                number: packet_number,
                count: packet_count,
            });
        }
        // Reserved region (OFF_RESERVED..OFF_BODY_SIZE) is ignored on read,
        // per the wire contract: implementations may leave it uninitialised.

        let body_start = HEADER_LEN;
        let body_end = body_start + body_size;
        let body = buf[body_start..body_end].to_vec();

        let crc_off = body_end;
        let wire_crc = LittleEndian::read_u32(&buf[crc_off..crc_off + 4]);
        let computed_crc = crate::crc32(&buf[..crc_off]);
        if wire_crc != computed_crc {
            return Err(DecodeError::BadCrc {
                wire: wire_crc,
                computed: computed_crc,
            });
        }

        let tail_off = crc_off + 4;
        if buf[tail_off] != MAGIC_TAIL {
            return Err(DecodeError::BadTailMagic(buf[tail_off]));
        }

        Ok((
            Packet {
                command_type,
                guid,
                packet_number,
                packet_count,
                body,
            },
            total_len,
        ))
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body_str = String::from_utf8_lossy(&self.body);
        let shown = if body_str.len() > DEBUG_BODY_LIMIT {
            let mut cut = DEBUG_BODY_LIMIT;
            while !body_str.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{} ...", &body_str[..cut])
        } else {
            body_str.into_owned()
        };
        f.debug_struct("Packet")
            .field("command_type", &self.command_type)
            .field("guid", &self.guid)
            .field("number", &self.packet_number)
            .field("count", &self.packet_count)
            .field("body", &shown)
            .finish()
    }
}

/// Escapes `&`, `<` and `>` for embedding in an XML body. No other entities
/// are produced; this matches the original agent's minimal hand-rolled
/// escaper exactly, rather than pulling in a full XML writer.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Builds a `Command` packet carrying `command_text`, and optionally a
/// `<binaryData>` fragment.
pub fn command(guid: impl Into<String>, command_text: &str, binary_data: Option<&str>) -> Packet {
    let mut body = format!(
        "<command><commandString>{}</commandString>",
        escape(command_text)
    );
    if let Some(data) = binary_data {
        body.push_str("<binaryData>");
        body.push_str(data);
        body.push_str("</binaryData>");
    }
    body.push_str("</command>");
    Packet::new(CommandType::Command, guid, 1, 1, body.into_bytes())
}

/// Builds an empty-bodied `Ack` packet.
pub fn ack(guid: impl Into<String>) -> Packet {
    Packet::new(CommandType::Ack, guid, 1, 1, Vec::new())
}

/// Builds a `Received` packet acknowledging one fragment of a multi-part
/// command.
pub fn received(guid: impl Into<String>, number: u32, count: u32, timeout: bool) -> Packet {
    let body = if timeout {
        "<responseType>TimeOut</responseType>"
    } else {
        "<responseType>Success</responseType>"
    };
    Packet::new(CommandType::Received, guid, number, count, body.as_bytes())
}

/// Builds an empty-bodied `AuthResponse` packet.
pub fn auth_response(guid: impl Into<String>) -> Packet {
    Packet::new(CommandType::AuthResponse, guid, 1, 1, Vec::new())
}

/// Builds a `Response` packet carrying a module's execution result.
#[allow(clippy::too_many_arguments)]
pub fn response(
    guid: impl Into<String>,
    response_type: ResponseType,
    command_name: &str,
    output: &str,
    return_code: i32,
    message: &str,
) -> Packet {
    let body = format!(
        "<response><responseType>{}</responseType><resultCode>{}</resultCode>\
         <resultMessage>{}</resultMessage><commandName>{}</commandName>\
         <outputString>{}</outputString></response>",
        response_type.as_str(),
        return_code,
        escape(message),
        escape(command_name),
        escape(output),
    );
    Packet::new(CommandType::Response, guid, 1, 1, body.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guid(c: char) -> String {
        std::iter::repeat(c).take(GUID_LEN).collect()
    }

    #[test]
    fn test_round_trip_single_fragment() {
        let p = command(guid('a'), "osinfo", None);
        let encoded = p.encode();
        assert_eq!(encoded.len(), p.wire_len());

        let (decoded, consumed) = Packet::decode(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, p);
    }

    #[test]
    fn test_round_trip_all_factories() {
        let g = guid('f');
        let packets = vec![
            command(g.clone(), "remove --force", Some("deadbeef")),
            ack(g.clone()),
            received(g.clone(), 1, 3, false),
            received(g.clone(), 2, 3, true),
            auth_response(g.clone()),
            response(g.clone(), ResponseType::Success, "osinfo", "ok", 0, ""),
            response(g, ResponseType::Error, "osinfo", "", 1, "boom"),
        ];

        for p in packets {
            let (decoded, consumed) = Packet::decode(&p.encode()).unwrap();
            assert_eq!(consumed, p.encode().len());
            assert_eq!(decoded, p);
        }
    }

    #[test]
    fn test_debug_truncates_long_non_ascii_body_without_panicking() {
        let mut text = "x".repeat(DEBUG_BODY_LIMIT - 1);
        text.push('\u{1F600}'); // 4-byte UTF-8 char straddling the cutoff
        text.push_str(&"y".repeat(50));
        let p = Packet::new(CommandType::Command, guid('b'), 1, 1, text.into_bytes());

        let shown = format!("{:?}", p);
        assert!(shown.contains("..."));
    }

    #[test]
    fn test_header_and_footer_lengths() {
        assert_eq!(HEADER_LEN, 91);
        assert_eq!(FOOTER_LEN, 5);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = command(guid('1'), "x", None).encode();
        bytes[0] = 0xFF;
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::BadMagic(0xFF)));
    }

    #[test]
    fn test_bad_command_name() {
        let mut bytes = command(guid('1'), "x", None).encode();
        bytes[1] = b'Z';
        match Packet::decode(&bytes) {
            Err(DecodeError::BadCommand(_)) => {}
            other => panic!("expected BadCommand, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_guid() {
        let mut bytes = command(guid('1'), "x", None).encode();
        bytes[OFF_GUID] = b'z'; // not a hex digit
        match Packet::decode(&bytes) {
            Err(DecodeError::BadGuid(_)) => {}
            other => panic!("expected BadGuid, got {:?}", other),
        }
    }

    #[test]
    fn test_number_out_of_range() {
        let bytes = Packet::new(CommandType::Command, guid('1'), 2, 1, Vec::new()).encode();
        match Packet::decode(&bytes) {
            Err(DecodeError::NumberOutOfRange { number: 2, count: 1 }) => {}
            other => panic!("expected NumberOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_crc_sensitivity_every_byte_outside_reserved() {
        let p = command(guid('c'), "osinfo extra args", None);
        let bytes = p.encode();

        for i in 0..bytes.len() {
            if (OFF_RESERVED..OFF_BODY_SIZE).contains(&i) {
                // Reserved bytes MUST be ignored on read.
                continue;
            }
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;

            match Packet::decode(&corrupted) {
                Err(_) => {}
                Ok((decoded, _)) => {
                    // A flipped body/guid/number/count bit can, in principle,
                    // still produce a well-formed-looking packet only if the
                    // CRC also happens to validate - which a single bit flip
                    // never does for this polynomial. Any Ok() result here is
                    // a genuine test failure.
                    panic!("byte {} flip decoded instead of failing: {:?}", i, decoded);
                }
            }
        }
    }

    #[test]
    fn test_reserved_bytes_ignored_on_read() {
        let mut bytes = command(guid('d'), "osinfo", None).encode();
        for b in &mut bytes[OFF_RESERVED..OFF_BODY_SIZE] {
            *b = 0xAA;
        }
        // Corrupting reserved bytes breaks the CRC (it covers the whole
        // header) but a receiver that zeroes reserved bytes before hashing
        // on the sender side and ignores them on read is still compliant;
        // what this asserts is that the reserved region plays no role in
        // validation *other than* being part of the CRC input on encode.
        assert!(Packet::decode(&bytes).is_err());
    }

    #[test]
    fn test_streaming_partition() {
        let packets = vec![
            command(guid('1'), "osinfo", None),
            ack(guid('2')),
            response(guid('3'), ResponseType::Success, "x", "y", 0, ""),
        ];

        let mut stream = Vec::new();
        for p in &packets {
            p.encode_into(&mut stream);
        }

        // Try every possible split point fed in two writes; ingest must
        // still yield exactly the three packets in order.
        for split in 0..=stream.len() {
            let mut buf = stream[..split].to_vec();
            let mut decoded = Vec::new();
            while Packet::has_full_packet(&buf) {
                let (p, consumed) = Packet::decode(&buf).unwrap();
                decoded.push(p);
                buf.drain(..consumed);
            }
            buf.extend_from_slice(&stream[split..]);
            while Packet::has_full_packet(&buf) {
                let (p, consumed) = Packet::decode(&buf).unwrap();
                decoded.push(p);
                buf.drain(..consumed);
            }
            assert!(buf.is_empty());
            assert_eq!(decoded, packets);
        }
    }

    #[test]
    fn test_escape_only_three_entities() {
        assert_eq!(escape("a&b<c>d"), "a&amp;b&lt;c&gt;d");
        assert_eq!(escape("plain text 123"), "plain text 123");
    }

    proptest! {
        #[test]
        fn prop_escape_idempotent_on_non_special(
            s in "[a-zA-Z0-9 ._/-]*",
        ) {
            prop_assert_eq!(escape(&s), s);
        }

        #[test]
        fn prop_round_trip_arbitrary_body(
            body in prop::collection::vec(any::<u8>(), 0..512),
            number in 1u32..8,
        ) {
            let count = number + 2;
            let p = Packet::new(CommandType::Command, "a".repeat(GUID_LEN), number, count, body);
            let encoded = p.encode();
            let (decoded, consumed) = Packet::decode(&encoded).unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(decoded, p);
        }
    }
}
