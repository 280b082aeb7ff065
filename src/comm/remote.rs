//! TCP client for a debug server.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use super::protocol::{self, Request, PONG};
use super::{CommError, Communicator};

/// Communicator forwarding every call to a [`Server`](super::Server).
///
/// Calls are strictly request/reply. The stream sits behind a mutex, so
/// concurrent callers queue rather than interleave frames.
pub struct RemoteCommunicator {
    address: String,
    stream: Mutex<TcpStream>,
}

impl RemoteCommunicator {
    /// Connect and check the server answers a ping.
    pub fn connect<A: ToSocketAddrs + std::fmt::Display>(address: A) -> Result<Self, CommError> {
        let stream = TcpStream::connect(&address)?;
        stream.set_nodelay(true)?;
        let remote = Self {
            address: address.to_string(),
            stream: Mutex::new(stream),
        };
        let reply = remote.call(&Request::Ping)?;
        if reply != PONG {
            return Err(CommError::Protocol(format!(
                "unexpected ping reply from {}: {:?}",
                remote.address,
                String::from_utf8_lossy(&reply)
            )));
        }
        log::info!("Connected to debug server at {}", remote.address);
        Ok(remote)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request and wait for its reply.
    fn call(&self, request: &Request) -> Result<Vec<u8>, CommError> {
        let body = request.encode();
        let mut stream = self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::trace!("remote: {} ({} bytes)", request.name(), body.len());
        protocol::write_frame(&mut *stream, &body)?;
        let reply = protocol::read_frame(&mut *stream)?.ok_or_else(|| {
            CommError::Connection(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                format!("{} closed the connection", self.address),
            ))
        })?;
        protocol::check_reply(request.name(), reply)
    }

    fn call_word(&self, request: Request) -> Result<u32, CommError> {
        protocol::decode_word(&self.call(&request)?)
    }

    fn call_unit(&self, request: Request) -> Result<(), CommError> {
        self.call(&request).map(|_| ())
    }

    fn call_text(&self, request: Request) -> Result<String, CommError> {
        protocol::decode_text(self.call(&request)?)
    }
}

impl Communicator for RemoteCommunicator {
    fn pci_read32(&self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.call_word(Request::PciRead32 { chip, noc_id, x, y, addr })
    }

    fn pci_write32(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: u32,
    ) -> Result<(), CommError> {
        self.call_unit(Request::PciWrite32 { chip, noc_id, x, y, addr, data })
    }

    fn pci_read(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
    ) -> Result<Vec<u8>, CommError> {
        let reply = self.call(&Request::PciRead { chip, noc_id, x, y, addr, size })?;
        let data = protocol::decode_blob(reply)?;
        if data.len() != size as usize {
            return Err(CommError::Protocol(format!(
                "pci_read asked for {} bytes, got {}",
                size,
                data.len()
            )));
        }
        Ok(data)
    }

    fn pci_write(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        data: &[u8],
    ) -> Result<(), CommError> {
        self.call_unit(Request::PciWrite { chip, noc_id, x, y, addr, data: data.to_vec() })
    }

    fn pci_read32_raw(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.call_word(Request::PciRead32Raw { chip, addr })
    }

    fn pci_write32_raw(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call_unit(Request::PciWrite32Raw { chip, addr, data })
    }

    fn dma_buffer_read32(&self, chip: u8, addr: u64, channel: u32) -> Result<u32, CommError> {
        self.call_word(Request::DmaBufferRead32 { chip, addr, channel })
    }

    fn pci_read_tile(
        &self,
        chip: u8,
        noc_id: u8,
        x: u8,
        y: u8,
        addr: u64,
        size: u32,
        data_format: u8,
    ) -> Result<String, CommError> {
        self.call_text(Request::PciReadTile { chip, noc_id, x, y, addr, size, data_format })
    }

    fn runtime_data(&self) -> Result<String, CommError> {
        self.call_text(Request::GetRuntimeData)
    }

    fn cluster_description(&self) -> Result<String, CommError> {
        self.call_text(Request::GetClusterDescription)
    }

    fn harvester_coordinate_translation(&self, chip: u8) -> Result<String, CommError> {
        self.call_text(Request::GetHarvesterCoordinateTranslation { chip })
    }

    fn device_ids(&self) -> Result<Vec<u8>, CommError> {
        protocol::decode_blob(self.call(&Request::GetDeviceIds)?)
    }

    fn device_arch(&self, chip: u8) -> Result<String, CommError> {
        self.call_text(Request::GetDeviceArch { chip })
    }

    fn device_soc_description(&self, chip: u8) -> Result<String, CommError> {
        self.call_text(Request::GetDeviceSocDescription { chip })
    }

    fn arc_msg(
        &self,
        chip: u8,
        msg_code: u32,
        wait_for_done: bool,
        arg0: u32,
        arg1: u32,
        timeout_ms: u32,
    ) -> Result<Vec<u32>, CommError> {
        let reply = self.call(&Request::ArcMsg { chip, msg_code, wait_for_done, arg0, arg1, timeout_ms })?;
        protocol::decode_words(&reply)
    }

    fn jtag_read32(&self, chip: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.call_word(Request::JtagRead32 { chip, x, y, addr })
    }

    fn jtag_write32(&self, chip: u8, x: u8, y: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call_unit(Request::JtagWrite32 { chip, x, y, addr, data })
    }

    fn jtag_read32_axi(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.call_word(Request::JtagRead32Axi { chip, addr })
    }

    fn jtag_write32_axi(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.call_unit(Request::JtagWrite32Axi { chip, addr, data })
    }

    fn get_file(&self, path: &str) -> Result<String, CommError> {
        self.call_text(Request::GetFile { path: path.to_string() })
    }

    fn get_binary(&self, path: &str) -> Result<Vec<u8>, CommError> {
        protocol::decode_blob(self.call(&Request::GetBinary { path: path.to_string() })?)
    }

    fn run_dirpath(&self) -> Result<Option<String>, CommError> {
        let path = self.call_text(Request::GetRunDirpath)?;
        Ok(if path.is_empty() { None } else { Some(path) })
    }
}
