//! Wire format shared by [`RemoteCommunicator`](super::RemoteCommunicator)
//! and [`Server`](super::Server).
//!
//! # Framing
//!
//! Every message is a `u32` little-endian length followed by that many
//! bytes. One request frame is answered by exactly one reply frame.
//!
//! # Request body
//!
//! ```text
//! +--------+------------------------------------------+
//! | opcode | fields, little endian, in declared order |
//! +--------+------------------------------------------+
//!   1 byte   chip/noc/x/y: u8, addresses: u64,
//!            sizes/values: u32, booleans: u8,
//!            blobs/strings: u32 length + bytes
//! ```
//!
//! # Reply body
//!
//! Interpreted per opcode: a 4-byte word, a blob or UTF-8 string (`u32`
//! length + bytes), a word list (`u32` count + words), or empty for
//! writes. The sentinels [`BAD_REQUEST`] and [`NOT_SUPPORTED`] replace the
//! payload on failure. Their leading four bytes read as a length far
//! larger than the rest of the sentinel, so no well-formed payload can
//! equal one.

use std::io::{self, Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::CommError;

pub const BAD_REQUEST: &[u8] = b"BAD_REQUEST";
pub const NOT_SUPPORTED: &[u8] = b"NOT_SUPPORTED";
pub const PONG: &[u8] = b"PONG";

/// Upper bound on a single frame, guards against reading garbage lengths.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

pub mod opcode {
    pub const PING: u8 = 1;
    pub const PCI_READ32: u8 = 10;
    pub const PCI_WRITE32: u8 = 11;
    pub const PCI_READ: u8 = 12;
    pub const PCI_WRITE: u8 = 13;
    pub const PCI_READ32_RAW: u8 = 14;
    pub const PCI_WRITE32_RAW: u8 = 15;
    pub const DMA_BUFFER_READ32: u8 = 16;
    pub const PCI_READ_TILE: u8 = 100;
    pub const GET_RUNTIME_DATA: u8 = 101;
    pub const GET_CLUSTER_DESCRIPTION: u8 = 102;
    pub const GET_HARVESTER_COORDINATE_TRANSLATION: u8 = 103;
    pub const GET_DEVICE_IDS: u8 = 104;
    pub const GET_DEVICE_ARCH: u8 = 105;
    pub const GET_DEVICE_SOC_DESCRIPTION: u8 = 106;
    pub const ARC_MSG: u8 = 200;
    pub const JTAG_READ32: u8 = 201;
    pub const JTAG_WRITE32: u8 = 202;
    pub const JTAG_READ32_AXI: u8 = 203;
    pub const JTAG_WRITE32_AXI: u8 = 204;
    pub const GET_FILE: u8 = 250;
    pub const GET_BINARY: u8 = 251;
    pub const GET_RUN_DIRPATH: u8 = 252;
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    PciRead32 { chip: u8, noc_id: u8, x: u8, y: u8, addr: u64 },
    PciWrite32 { chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: u32 },
    PciRead { chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, size: u32 },
    PciWrite { chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, data: Vec<u8> },
    PciRead32Raw { chip: u8, addr: u64 },
    PciWrite32Raw { chip: u8, addr: u64, data: u32 },
    DmaBufferRead32 { chip: u8, addr: u64, channel: u32 },
    PciReadTile { chip: u8, noc_id: u8, x: u8, y: u8, addr: u64, size: u32, data_format: u8 },
    GetRuntimeData,
    GetClusterDescription,
    GetHarvesterCoordinateTranslation { chip: u8 },
    GetDeviceIds,
    GetDeviceArch { chip: u8 },
    GetDeviceSocDescription { chip: u8 },
    ArcMsg { chip: u8, msg_code: u32, wait_for_done: bool, arg0: u32, arg1: u32, timeout_ms: u32 },
    JtagRead32 { chip: u8, x: u8, y: u8, addr: u64 },
    JtagWrite32 { chip: u8, x: u8, y: u8, addr: u64, data: u32 },
    JtagRead32Axi { chip: u8, addr: u64 },
    JtagWrite32Axi { chip: u8, addr: u64, data: u32 },
    GetFile { path: String },
    GetBinary { path: String },
    GetRunDirpath,
}

/// Little-endian body builder.
struct Encoder(Vec<u8>);

impl Encoder {
    fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.0.extend_from_slice(&buf);
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, v);
        self.0.extend_from_slice(&buf);
        self
    }

    fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    fn blob(&mut self, data: &[u8]) -> &mut Self {
        self.u32(data.len() as u32);
        self.0.extend_from_slice(data);
        self
    }

    fn noc(&mut self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64) -> &mut Self {
        self.u8(chip).u8(noc_id).u8(x).u8(y).u64(addr)
    }
}

fn truncated(op: u8) -> impl Fn(io::Error) -> CommError {
    move |_| CommError::Protocol(format!("truncated request body for opcode {}", op))
}

fn read_blob(cur: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let mut data = vec![0u8; len];
    cur.read_exact(&mut data)?;
    Ok(data)
}

fn read_string(cur: &mut Cursor<&[u8]>) -> io::Result<String> {
    String::from_utf8(read_blob(cur)?).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl Request {
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match self {
            Request::Ping => PING,
            Request::PciRead32 { .. } => PCI_READ32,
            Request::PciWrite32 { .. } => PCI_WRITE32,
            Request::PciRead { .. } => PCI_READ,
            Request::PciWrite { .. } => PCI_WRITE,
            Request::PciRead32Raw { .. } => PCI_READ32_RAW,
            Request::PciWrite32Raw { .. } => PCI_WRITE32_RAW,
            Request::DmaBufferRead32 { .. } => DMA_BUFFER_READ32,
            Request::PciReadTile { .. } => PCI_READ_TILE,
            Request::GetRuntimeData => GET_RUNTIME_DATA,
            Request::GetClusterDescription => GET_CLUSTER_DESCRIPTION,
            Request::GetHarvesterCoordinateTranslation { .. } => GET_HARVESTER_COORDINATE_TRANSLATION,
            Request::GetDeviceIds => GET_DEVICE_IDS,
            Request::GetDeviceArch { .. } => GET_DEVICE_ARCH,
            Request::GetDeviceSocDescription { .. } => GET_DEVICE_SOC_DESCRIPTION,
            Request::ArcMsg { .. } => ARC_MSG,
            Request::JtagRead32 { .. } => JTAG_READ32,
            Request::JtagWrite32 { .. } => JTAG_WRITE32,
            Request::JtagRead32Axi { .. } => JTAG_READ32_AXI,
            Request::JtagWrite32Axi { .. } => JTAG_WRITE32_AXI,
            Request::GetFile { .. } => GET_FILE,
            Request::GetBinary { .. } => GET_BINARY,
            Request::GetRunDirpath => GET_RUN_DIRPATH,
        }
    }

    /// Operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::PciRead32 { .. } => "pci_read32",
            Request::PciWrite32 { .. } => "pci_write32",
            Request::PciRead { .. } => "pci_read",
            Request::PciWrite { .. } => "pci_write",
            Request::PciRead32Raw { .. } => "pci_read32_raw",
            Request::PciWrite32Raw { .. } => "pci_write32_raw",
            Request::DmaBufferRead32 { .. } => "dma_buffer_read32",
            Request::PciReadTile { .. } => "pci_read_tile",
            Request::GetRuntimeData => "get_runtime_data",
            Request::GetClusterDescription => "get_cluster_description",
            Request::GetHarvesterCoordinateTranslation { .. } => "get_harvester_coordinate_translation",
            Request::GetDeviceIds => "get_device_ids",
            Request::GetDeviceArch { .. } => "get_device_arch",
            Request::GetDeviceSocDescription { .. } => "get_device_soc_description",
            Request::ArcMsg { .. } => "arc_msg",
            Request::JtagRead32 { .. } => "jtag_read32",
            Request::JtagWrite32 { .. } => "jtag_write32",
            Request::JtagRead32Axi { .. } => "jtag_read32_axi",
            Request::JtagWrite32Axi { .. } => "jtag_write32_axi",
            Request::GetFile { .. } => "get_file",
            Request::GetBinary { .. } => "get_binary",
            Request::GetRunDirpath => "get_run_dirpath",
        }
    }

    /// Serialize into a request body (without the frame length).
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder(Vec::with_capacity(16));
        e.u8(self.opcode());
        match self {
            Request::Ping
            | Request::GetRuntimeData
            | Request::GetClusterDescription
            | Request::GetDeviceIds
            | Request::GetRunDirpath => {}
            Request::PciRead32 { chip, noc_id, x, y, addr } => {
                e.noc(*chip, *noc_id, *x, *y, *addr);
            }
            Request::PciWrite32 { chip, noc_id, x, y, addr, data } => {
                e.noc(*chip, *noc_id, *x, *y, *addr).u32(*data);
            }
            Request::PciRead { chip, noc_id, x, y, addr, size } => {
                e.noc(*chip, *noc_id, *x, *y, *addr).u32(*size);
            }
            Request::PciWrite { chip, noc_id, x, y, addr, data } => {
                e.noc(*chip, *noc_id, *x, *y, *addr).blob(data);
            }
            Request::PciRead32Raw { chip, addr } => {
                e.u8(*chip).u64(*addr);
            }
            Request::PciWrite32Raw { chip, addr, data } => {
                e.u8(*chip).u64(*addr).u32(*data);
            }
            Request::DmaBufferRead32 { chip, addr, channel } => {
                e.u8(*chip).u64(*addr).u32(*channel);
            }
            Request::PciReadTile { chip, noc_id, x, y, addr, size, data_format } => {
                e.noc(*chip, *noc_id, *x, *y, *addr).u32(*size).u8(*data_format);
            }
            Request::GetHarvesterCoordinateTranslation { chip }
            | Request::GetDeviceArch { chip }
            | Request::GetDeviceSocDescription { chip } => {
                e.u8(*chip);
            }
            Request::ArcMsg { chip, msg_code, wait_for_done, arg0, arg1, timeout_ms } => {
                e.u8(*chip)
                    .u32(*msg_code)
                    .bool(*wait_for_done)
                    .u32(*arg0)
                    .u32(*arg1)
                    .u32(*timeout_ms);
            }
            Request::JtagRead32 { chip, x, y, addr } => {
                e.u8(*chip).u8(*x).u8(*y).u64(*addr);
            }
            Request::JtagWrite32 { chip, x, y, addr, data } => {
                e.u8(*chip).u8(*x).u8(*y).u64(*addr).u32(*data);
            }
            Request::JtagRead32Axi { chip, addr } => {
                e.u8(*chip).u64(*addr);
            }
            Request::JtagWrite32Axi { chip, addr, data } => {
                e.u8(*chip).u64(*addr).u32(*data);
            }
            Request::GetFile { path } | Request::GetBinary { path } => {
                e.blob(path.as_bytes());
            }
        }
        e.0
    }

    /// Parse a request body. Unknown opcodes, short bodies and trailing
    /// bytes are all protocol errors.
    pub fn decode(body: &[u8]) -> Result<Request, CommError> {
        use opcode::*;

        let mut cur = Cursor::new(body);
        let op = cur
            .read_u8()
            .map_err(|_| CommError::Protocol("empty request body".into()))?;
        let t = truncated(op);

        let request = match op {
            PING => Request::Ping,
            PCI_READ32 | PCI_WRITE32 | PCI_READ | PCI_WRITE | PCI_READ_TILE => {
                let chip = cur.read_u8().map_err(&t)?;
                let noc_id = cur.read_u8().map_err(&t)?;
                let x = cur.read_u8().map_err(&t)?;
                let y = cur.read_u8().map_err(&t)?;
                let addr = cur.read_u64::<LittleEndian>().map_err(&t)?;
                match op {
                    PCI_READ32 => Request::PciRead32 { chip, noc_id, x, y, addr },
                    PCI_WRITE32 => {
                        let data = cur.read_u32::<LittleEndian>().map_err(&t)?;
                        Request::PciWrite32 { chip, noc_id, x, y, addr, data }
                    }
                    PCI_READ => {
                        let size = cur.read_u32::<LittleEndian>().map_err(&t)?;
                        Request::PciRead { chip, noc_id, x, y, addr, size }
                    }
                    PCI_WRITE => {
                        let data = read_blob(&mut cur).map_err(&t)?;
                        Request::PciWrite { chip, noc_id, x, y, addr, data }
                    }
                    _ => {
                        let size = cur.read_u32::<LittleEndian>().map_err(&t)?;
                        let data_format = cur.read_u8().map_err(&t)?;
                        Request::PciReadTile { chip, noc_id, x, y, addr, size, data_format }
                    }
                }
            }
            PCI_READ32_RAW | PCI_WRITE32_RAW | DMA_BUFFER_READ32 | JTAG_READ32_AXI
            | JTAG_WRITE32_AXI => {
                let chip = cur.read_u8().map_err(&t)?;
                let addr = cur.read_u64::<LittleEndian>().map_err(&t)?;
                match op {
                    PCI_READ32_RAW => Request::PciRead32Raw { chip, addr },
                    JTAG_READ32_AXI => Request::JtagRead32Axi { chip, addr },
                    _ => {
                        let word = cur.read_u32::<LittleEndian>().map_err(&t)?;
                        match op {
                            PCI_WRITE32_RAW => Request::PciWrite32Raw { chip, addr, data: word },
                            DMA_BUFFER_READ32 => Request::DmaBufferRead32 { chip, addr, channel: word },
                            _ => Request::JtagWrite32Axi { chip, addr, data: word },
                        }
                    }
                }
            }
            GET_RUNTIME_DATA => Request::GetRuntimeData,
            GET_CLUSTER_DESCRIPTION => Request::GetClusterDescription,
            GET_DEVICE_IDS => Request::GetDeviceIds,
            GET_RUN_DIRPATH => Request::GetRunDirpath,
            GET_HARVESTER_COORDINATE_TRANSLATION | GET_DEVICE_ARCH | GET_DEVICE_SOC_DESCRIPTION => {
                let chip = cur.read_u8().map_err(&t)?;
                match op {
                    GET_HARVESTER_COORDINATE_TRANSLATION => {
                        Request::GetHarvesterCoordinateTranslation { chip }
                    }
                    GET_DEVICE_ARCH => Request::GetDeviceArch { chip },
                    _ => Request::GetDeviceSocDescription { chip },
                }
            }
            ARC_MSG => Request::ArcMsg {
                chip: cur.read_u8().map_err(&t)?,
                msg_code: cur.read_u32::<LittleEndian>().map_err(&t)?,
                wait_for_done: cur.read_u8().map_err(&t)? != 0,
                arg0: cur.read_u32::<LittleEndian>().map_err(&t)?,
                arg1: cur.read_u32::<LittleEndian>().map_err(&t)?,
                timeout_ms: cur.read_u32::<LittleEndian>().map_err(&t)?,
            },
            JTAG_READ32 | JTAG_WRITE32 => {
                let chip = cur.read_u8().map_err(&t)?;
                let x = cur.read_u8().map_err(&t)?;
                let y = cur.read_u8().map_err(&t)?;
                let addr = cur.read_u64::<LittleEndian>().map_err(&t)?;
                if op == JTAG_READ32 {
                    Request::JtagRead32 { chip, x, y, addr }
                } else {
                    let data = cur.read_u32::<LittleEndian>().map_err(&t)?;
                    Request::JtagWrite32 { chip, x, y, addr, data }
                }
            }
            GET_FILE => Request::GetFile { path: read_string(&mut cur).map_err(&t)? },
            GET_BINARY => Request::GetBinary { path: read_string(&mut cur).map_err(&t)? },
            other => return Err(CommError::Protocol(format!("unknown opcode {}", other))),
        };

        if (cur.position() as usize) != body.len() {
            return Err(CommError::Protocol(format!(
                "{} trailing bytes after {} request",
                body.len() - cur.position() as usize,
                request.name()
            )));
        }
        Ok(request)
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(body.len() as u32)?;
    writer.write_all(body)?;
    writer.flush()
}

/// Read one frame. Returns `None` when the peer closed the stream cleanly
/// between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit", len),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

// ============================================================================
// Reply payloads
// ============================================================================

pub fn encode_word(value: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

pub fn decode_word(reply: &[u8]) -> Result<u32, CommError> {
    if reply.len() != 4 {
        return Err(CommError::Protocol(format!(
            "expected a 4-byte word, got {} bytes",
            reply.len()
        )));
    }
    Ok(LittleEndian::read_u32(reply))
}

pub fn encode_words(words: &[u32]) -> Vec<u8> {
    let mut e = Encoder(Vec::with_capacity(4 + 4 * words.len()));
    e.u32(words.len() as u32);
    for &w in words {
        e.u32(w);
    }
    e.0
}

pub fn decode_words(reply: &[u8]) -> Result<Vec<u32>, CommError> {
    let mut cur = Cursor::new(reply);
    let bad = |_| CommError::Protocol("malformed word list".into());
    let count = cur.read_u32::<LittleEndian>().map_err(bad)? as usize;
    if reply.len() != 4 + 4 * count {
        return Err(CommError::Protocol(format!(
            "word list of {} entries in {} bytes",
            count,
            reply.len()
        )));
    }
    (0..count)
        .map(|_| cur.read_u32::<LittleEndian>().map_err(bad))
        .collect()
}

pub fn encode_blob(data: &[u8]) -> Vec<u8> {
    let mut e = Encoder(Vec::with_capacity(4 + data.len()));
    e.blob(data);
    e.0
}

pub fn decode_blob(mut reply: Vec<u8>) -> Result<Vec<u8>, CommError> {
    if reply.len() < 4 {
        return Err(CommError::Protocol("blob reply shorter than its length".into()));
    }
    let len = LittleEndian::read_u32(&reply[..4]) as usize;
    if reply.len() != 4 + len {
        return Err(CommError::Protocol(format!(
            "blob of {} bytes in a {}-byte reply",
            len,
            reply.len()
        )));
    }
    Ok(reply.split_off(4))
}

pub fn decode_text(reply: Vec<u8>) -> Result<String, CommError> {
    String::from_utf8(decode_blob(reply)?)
        .map_err(|e| CommError::Protocol(format!("reply is not UTF-8: {}", e)))
}

/// Map sentinel replies to their errors.
pub fn check_reply(op: &str, reply: Vec<u8>) -> Result<Vec<u8>, CommError> {
    if reply == BAD_REQUEST {
        Err(CommError::BadRequest)
    } else if reply == NOT_SUPPORTED {
        Err(CommError::not_supported(op))
    } else {
        Ok(reply)
    }
}
