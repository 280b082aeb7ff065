//! Debug server: exposes a communicator over the frame protocol.
//!
//! The server is backend-agnostic. Wrapping local hardware gives remote
//! access to a lab machine; wrapping a replayed cache serves a recording
//! to clients that never see the device.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use super::protocol::{
    self, encode_blob, encode_word, encode_words, Request, BAD_REQUEST, NOT_SUPPORTED, PONG,
};
use super::{CommError, Communicator};

pub struct Server {
    listener: TcpListener,
    comm: Arc<dyn Communicator>,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(address: A, comm: Arc<dyn Communicator>) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        log::info!("Debug server listening on {}", listener.local_addr()?);
        Ok(Self { listener, comm })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one client and serve it until it disconnects.
    pub fn accept_and_serve(&self) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        log::info!("Client connected from {}", peer);
        match self.serve_client(stream) {
            Ok(count) => log::info!("Client {} disconnected after {} requests", peer, count),
            Err(e) => log::warn!("Error serving client {}: {}", peer, e),
        }
        Ok(())
    }

    /// Serve clients one after another, forever.
    pub fn run(&self) -> io::Result<()> {
        loop {
            self.accept_and_serve()?;
        }
    }

    fn serve_client(&self, mut stream: TcpStream) -> io::Result<usize> {
        stream.set_nodelay(true)?;
        let mut count = 0;
        while let Some(body) = protocol::read_frame(&mut stream)? {
            let reply = handle_request(self.comm.as_ref(), &body);
            protocol::write_frame(&mut stream, &reply)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Decode one request body, run it, and build the reply body.
pub fn handle_request(comm: &dyn Communicator, body: &[u8]) -> Vec<u8> {
    let request = match Request::decode(body) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Rejecting request: {}", e);
            return BAD_REQUEST.to_vec();
        }
    };
    log::trace!("server: {:?}", request);

    match dispatch(comm, request) {
        Ok(reply) => reply,
        Err(CommError::NotSupported { op }) => {
            log::debug!("'{}' not supported by the backend", op);
            NOT_SUPPORTED.to_vec()
        }
        Err(e) => {
            log::warn!("Request failed: {}", e);
            BAD_REQUEST.to_vec()
        }
    }
}

fn dispatch(comm: &dyn Communicator, request: Request) -> Result<Vec<u8>, CommError> {
    let unit = |_: ()| Vec::new();
    let reply = match request {
        Request::Ping => PONG.to_vec(),
        Request::PciRead32 { chip, noc_id, x, y, addr } => {
            encode_word(comm.pci_read32(chip, noc_id, x, y, addr)?)
        }
        Request::PciWrite32 { chip, noc_id, x, y, addr, data } => {
            unit(comm.pci_write32(chip, noc_id, x, y, addr, data)?)
        }
        Request::PciRead { chip, noc_id, x, y, addr, size } => {
            encode_blob(&comm.pci_read(chip, noc_id, x, y, addr, size)?)
        }
        Request::PciWrite { chip, noc_id, x, y, addr, data } => {
            unit(comm.pci_write(chip, noc_id, x, y, addr, &data)?)
        }
        Request::PciRead32Raw { chip, addr } => encode_word(comm.pci_read32_raw(chip, addr)?),
        Request::PciWrite32Raw { chip, addr, data } => unit(comm.pci_write32_raw(chip, addr, data)?),
        Request::DmaBufferRead32 { chip, addr, channel } => {
            encode_word(comm.dma_buffer_read32(chip, addr, channel)?)
        }
        Request::PciReadTile { chip, noc_id, x, y, addr, size, data_format } => {
            encode_blob(comm.pci_read_tile(chip, noc_id, x, y, addr, size, data_format)?.as_bytes())
        }
        Request::GetRuntimeData => encode_blob(comm.runtime_data()?.as_bytes()),
        Request::GetClusterDescription => encode_blob(comm.cluster_description()?.as_bytes()),
        Request::GetHarvesterCoordinateTranslation { chip } => {
            encode_blob(comm.harvester_coordinate_translation(chip)?.as_bytes())
        }
        Request::GetDeviceIds => encode_blob(&comm.device_ids()?),
        Request::GetDeviceArch { chip } => encode_blob(comm.device_arch(chip)?.as_bytes()),
        Request::GetDeviceSocDescription { chip } => {
            encode_blob(comm.device_soc_description(chip)?.as_bytes())
        }
        Request::ArcMsg { chip, msg_code, wait_for_done, arg0, arg1, timeout_ms } => {
            encode_words(&comm.arc_msg(chip, msg_code, wait_for_done, arg0, arg1, timeout_ms)?)
        }
        Request::JtagRead32 { chip, x, y, addr } => encode_word(comm.jtag_read32(chip, x, y, addr)?),
        Request::JtagWrite32 { chip, x, y, addr, data } => {
            unit(comm.jtag_write32(chip, x, y, addr, data)?)
        }
        Request::JtagRead32Axi { chip, addr } => encode_word(comm.jtag_read32_axi(chip, addr)?),
        Request::JtagWrite32Axi { chip, addr, data } => {
            unit(comm.jtag_write32_axi(chip, addr, data)?)
        }
        Request::GetFile { path } => encode_blob(comm.get_file(&path)?.as_bytes()),
        Request::GetBinary { path } => encode_blob(&comm.get_binary(&path)?),
        Request::GetRunDirpath => encode_blob(comm.run_dirpath()?.unwrap_or_default().as_bytes()),
    };
    Ok(reply)
}
