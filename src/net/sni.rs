//! Server Name Indication extraction from a TLS ClientHello.
//!
//! Parses just enough of the first handshake record to read the
//! `server_name` extension. Nothing is decrypted and the input bytes are not
//! consumed; the caller forwards them to the upstream unchanged.
//!
//! ```text
//! record:     type(1)=0x16  version(2)  length(2)
//! handshake:  type(1)=0x01  length(3)
//! hello:      version(2)  random(32)
//!             session_id     len(1) + bytes
//!             cipher_suites  len(2) + bytes
//!             compression    len(1) + bytes
//!             extensions     len(2) + { type(2) len(2) data }*
//! server_name ext (type 0):  list_len(2) + { name_type(1) len(2) name }*
//! ```

const RECORD_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;

/// Outcome of inspecting a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniResult {
    /// A hostname was present.
    Found(String),
    /// The hello parsed but carries no hostname.
    NoSni,
    /// Not a ClientHello, or a length field ran past the buffer.
    Malformed,
}

impl SniResult {
    /// True if the bytes formed a parseable ClientHello.
    pub fn is_valid(&self) -> bool {
        !matches!(self, SniResult::Malformed)
    }

    /// The hostname, or `""` when there is none.
    pub fn server_name(&self) -> &str {
        match self {
            SniResult::Found(name) => name,
            _ => "",
        }
    }
}

/// Bounds-checked big-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.buf.len() {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.bytes(3)
            .map(|b| (usize::from(b[0]) << 16) | (usize::from(b[1]) << 8) | usize::from(b[2]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.bytes(n).map(|_| ())
    }

    /// Read a length-prefixed block whose length field is one byte.
    fn block8(&mut self) -> Option<&'a [u8]> {
        let n = self.u8()?;
        self.bytes(usize::from(n))
    }

    /// Read a length-prefixed block whose length field is two bytes.
    fn block16(&mut self) -> Option<&'a [u8]> {
        let n = self.u16()?;
        self.bytes(usize::from(n))
    }
}

/// Extract the server name from the first bytes of a TLS connection.
///
/// The extensions block may be cut short by the caller's read size; a
/// `server_name` entry that fits before the cut is still found, but a cut
/// hello without one is reported as [`SniResult::Malformed`].
pub fn parse_sni(data: &[u8]) -> SniResult {
    parse(data).unwrap_or(SniResult::Malformed)
}

/// `(server_name, ok)` form of [`parse_sni`].
pub fn read_server_name(data: &[u8]) -> (String, bool) {
    let result = parse_sni(data);
    (result.server_name().to_string(), result.is_valid())
}

fn parse(data: &[u8]) -> Option<SniResult> {
    let mut r = Reader::new(data);

    // Record header
    if r.u8()? != RECORD_HANDSHAKE {
        return None;
    }
    r.skip(2)?; // version
    r.skip(2)?; // record length

    // Handshake header
    if r.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    r.u24()?;

    r.skip(2)?; // client version
    r.skip(32)?; // random
    r.block8()?; // session id
    r.block16()?; // cipher suites
    r.block8()?; // compression methods

    if r.is_empty() {
        // No extensions section
        return None;
    }

    let declared = usize::from(r.u16()?);
    let truncated = declared > r.remaining();
    let mut extensions = Reader::new(r.bytes(declared.min(r.remaining()))?);

    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let ext_data = extensions.block16()?;
        if ext_type == EXT_SERVER_NAME {
            return parse_server_name_list(ext_data);
        }
    }

    if truncated {
        None
    } else {
        Some(SniResult::NoSni)
    }
}

fn parse_server_name_list(data: &[u8]) -> Option<SniResult> {
    let mut list = Reader::new(Reader::new(data).block16()?);
    while !list.is_empty() {
        let name_type = list.u8()?;
        let name = list.block16()?;
        if name_type == NAME_TYPE_HOST {
            let name = std::str::from_utf8(name).ok()?;
            if name.is_empty() {
                return Some(SniResult::NoSni);
            }
            return Some(SniResult::Found(name.to_string()));
        }
    }
    Some(SniResult::NoSni)
}
