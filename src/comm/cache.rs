//! Record and replay of communicator sessions.
//!
//! [`CachedCommunicator`] wraps another backend and memoizes every
//! read-type call by `(operation, arguments)`. Write-type calls always go
//! to the device and are never stored. The store is written as JSON on
//! [`CachedCommunicator::save`] and when the communicator is dropped.
//!
//! A replaying communicator has no backend at all. It answers reads from
//! the file, reports unrecorded reads as [`CommError::CacheMiss`], and
//! refuses writes with [`CommError::ReadOnlyReplay`].
//!
//! # File format
//!
//! ```text
//! { "entries": [ { "key": { "op": "pci_read32", "args": [0, 0, 1, 1, 4289798280] },
//!                  "value": { "word": 1 } } ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{CommError, Communicator};

/// How a cache file is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Call through to a real backend and store read results.
    Record,
    /// Answer only from the stored results.
    Replay,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(CacheMode::Record),
            "replay" => Ok(CacheMode::Replay),
            other => Err(format!("unknown cache mode '{}' (expected record or replay)", other)),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Record => write!(f, "record"),
            CacheMode::Replay => write!(f, "replay"),
        }
    }
}

/// One argument of a cached call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheArg {
    Int(u64),
    Str(String),
    Bool(bool),
}

impl From<u8> for CacheArg {
    fn from(v: u8) -> Self {
        CacheArg::Int(v as u64)
    }
}

impl From<u32> for CacheArg {
    fn from(v: u32) -> Self {
        CacheArg::Int(v as u64)
    }
}

impl From<u64> for CacheArg {
    fn from(v: u64) -> Self {
        CacheArg::Int(v)
    }
}

impl From<bool> for CacheArg {
    fn from(v: bool) -> Self {
        CacheArg::Bool(v)
    }
}

impl From<&str> for CacheArg {
    fn from(v: &str) -> Self {
        CacheArg::Str(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub op: String,
    pub args: Vec<CacheArg>,
}

/// A stored call result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheValue {
    Word(u32),
    Bytes(Vec<u8>),
    Text(String),
    Words(Vec<u32>),
    MaybeText(Option<String>),
}

/// Conversion between call results and stored values.
trait Cacheable: Sized + Clone {
    fn into_value(self) -> CacheValue;
    fn from_value(value: CacheValue) -> Option<Self>;
}

impl Cacheable for u32 {
    fn into_value(self) -> CacheValue {
        CacheValue::Word(self)
    }
    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Word(w) => Some(w),
            _ => None,
        }
    }
}

impl Cacheable for Vec<u8> {
    fn into_value(self) -> CacheValue {
        CacheValue::Bytes(self)
    }
    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl Cacheable for String {
    fn into_value(self) -> CacheValue {
        CacheValue::Text(self)
    }
    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Cacheable for Vec<u32> {
    fn into_value(self) -> CacheValue {
        CacheValue::Words(self)
    }
    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Words(w) => Some(w),
            _ => None,
        }
    }
}

impl Cacheable for Option<String> {
    fn into_value(self) -> CacheValue {
        CacheValue::MaybeText(self)
    }
    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::MaybeText(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: CacheKey,
    value: CacheValue,
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFileContents {
    entries: Vec<CacheEntry>,
}

/// Communicator that records another backend or replays a recording.
pub struct CachedCommunicator {
    /// Backend being recorded; `None` while replaying.
    inner: Option<Arc<dyn Communicator>>,
    path: PathBuf,
    store: Mutex<BTreeMap<CacheKey, CacheValue>>,
}

impl CachedCommunicator {
    /// Record calls of `inner` into `path`. An existing file is loaded
    /// first, so the recording only grows.
    pub fn record(inner: Arc<dyn Communicator>, path: impl AsRef<Path>) -> Result<Self, CommError> {
        let path = path.as_ref().to_path_buf();
        let store = if path.exists() { load_store(&path)? } else { BTreeMap::new() };
        log::info!("Recording session into {} ({} entries)", path.display(), store.len());
        Ok(Self { inner: Some(inner), path, store: Mutex::new(store) })
    }

    /// Replay a recording. The file must exist.
    pub fn replay(path: impl AsRef<Path>) -> Result<Self, CommError> {
        let path = path.as_ref().to_path_buf();
        let store = load_store(&path)?;
        log::info!("Replaying session from {} ({} entries)", path.display(), store.len());
        Ok(Self { inner: None, path, store: Mutex::new(store) })
    }

    pub fn mode(&self) -> CacheMode {
        if self.inner.is_some() {
            CacheMode::Record
        } else {
            CacheMode::Replay
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the store to disk. Replay sessions have nothing to write.
    pub fn save(&self) -> Result<(), CommError> {
        if self.mode() == CacheMode::Replay {
            return Ok(());
        }
        let contents = CacheFileContents {
            entries: self
                .store()
                .iter()
                .map(|(key, value)| CacheEntry { key: key.clone(), value: value.clone() })
                .collect(),
        };
        let file = File::create(&self.path).map_err(|e| cache_file_error(&self.path, e))?;
        serde_json::to_writer(BufWriter::new(file), &contents)
            .map_err(|e| cache_file_error(&self.path, e))?;
        log::debug!("Saved {} cache entries to {}", contents.entries.len(), self.path.display());
        Ok(())
    }

    fn store(&self) -> MutexGuard<'_, BTreeMap<CacheKey, CacheValue>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run or replay a read-type call.
    fn read<T: Cacheable>(
        &self,
        op: &str,
        args: Vec<CacheArg>,
        call: impl FnOnce(&dyn Communicator) -> Result<T, CommError>,
    ) -> Result<T, CommError> {
        let key = CacheKey { op: op.to_string(), args };
        match &self.inner {
            Some(inner) => {
                let result = call(inner.as_ref())?;
                log::trace!("cache: recorded {}{:?}", key.op, key.args);
                self.store().insert(key, result.clone().into_value());
                Ok(result)
            }
            None => {
                let stored = self.store().get(&key).cloned();
                match stored {
                    Some(value) => {
                        log::trace!("cache: hit {}{:?}", key.op, key.args);
                        T::from_value(value).ok_or_else(|| CommError::CacheFile {
                            path: self.path.display().to_string(),
                            reason: format!("stored result of {} has the wrong type", key.op),
                        })
                    }
                    None => {
                        log::debug!("cache: miss {}{:?}", key.op, key.args);
                        Err(CommError::CacheMiss { op: key.op, args: key.args })
                    }
                }
            }
        }
    }

    /// Pass a write-type call through, or refuse it while replaying.
    fn write(
        &self,
        op: &str,
        call: impl FnOnce(&dyn Communicator) -> Result<(), CommError>,
    ) -> Result<(), CommError> {
        match &self.inner {
            Some(inner) => call(inner.as_ref()),
            None => Err(CommError::ReadOnlyReplay { op: op.to_string() }),
        }
    }
}

impl Drop for CachedCommunicator {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save cache: {}", e);
        }
    }
}

fn cache_file_error(path: &Path, e: impl fmt::Display) -> CommError {
    CommError::CacheFile { path: path.display().to_string(), reason: e.to_string() }
}

fn load_store(path: &Path) -> Result<BTreeMap<CacheKey, CacheValue>, CommError> {
    let file = File::open(path).map_err(|e| cache_file_error(path, e))?;
    let contents: CacheFileContents =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| cache_file_error(path, e))?;
    Ok(contents.entries.into_iter().map(|e| (e.key, e.value)).collect())
}

impl Communicator for CachedCommunicator {
    fn pci_read32(&self, chip: u8, noc_id: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.read(
            "pci_read32",
            vec![chip.into(), noc_id.into(), x.into(), y.into(), addr.into()],
            |c| c.pci_read32(chip, noc_id, x, y, addr),
        )
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
        self.write("pci_write32", |c| c.pci_write32(chip, noc_id, x, y, addr, data))
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
        self.read(
            "pci_read",
            vec![chip.into(), noc_id.into(), x.into(), y.into(), addr.into(), size.into()],
            |c| c.pci_read(chip, noc_id, x, y, addr, size),
        )
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
        self.write("pci_write", |c| c.pci_write(chip, noc_id, x, y, addr, data))
    }

    fn pci_read32_raw(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.read("pci_read32_raw", vec![chip.into(), addr.into()], |c| {
            c.pci_read32_raw(chip, addr)
        })
    }

    fn pci_write32_raw(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.write("pci_write32_raw", |c| c.pci_write32_raw(chip, addr, data))
    }

    fn dma_buffer_read32(&self, chip: u8, addr: u64, channel: u32) -> Result<u32, CommError> {
        self.read(
            "dma_buffer_read32",
            vec![chip.into(), addr.into(), channel.into()],
            |c| c.dma_buffer_read32(chip, addr, channel),
        )
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
        self.read(
            "pci_read_tile",
            vec![
                chip.into(),
                noc_id.into(),
                x.into(),
                y.into(),
                addr.into(),
                size.into(),
                data_format.into(),
            ],
            |c| c.pci_read_tile(chip, noc_id, x, y, addr, size, data_format),
        )
    }

    fn runtime_data(&self) -> Result<String, CommError> {
        self.read("get_runtime_data", Vec::new(), |c| c.runtime_data())
    }

    fn cluster_description(&self) -> Result<String, CommError> {
        self.read("get_cluster_description", Vec::new(), |c| c.cluster_description())
    }

    fn harvester_coordinate_translation(&self, chip: u8) -> Result<String, CommError> {
        self.read("get_harvester_coordinate_translation", vec![chip.into()], |c| {
            c.harvester_coordinate_translation(chip)
        })
    }

    fn device_ids(&self) -> Result<Vec<u8>, CommError> {
        self.read("get_device_ids", Vec::new(), |c| c.device_ids())
    }

    fn device_arch(&self, chip: u8) -> Result<String, CommError> {
        self.read("get_device_arch", vec![chip.into()], |c| c.device_arch(chip))
    }

    fn device_soc_description(&self, chip: u8) -> Result<String, CommError> {
        self.read("get_device_soc_description", vec![chip.into()], |c| {
            c.device_soc_description(chip)
        })
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
        // ARC messages change firmware state, so they are never replayed.
        match &self.inner {
            Some(inner) => inner.arc_msg(chip, msg_code, wait_for_done, arg0, arg1, timeout_ms),
            None => Err(CommError::ReadOnlyReplay { op: "arc_msg".to_string() }),
        }
    }

    fn jtag_read32(&self, chip: u8, x: u8, y: u8, addr: u64) -> Result<u32, CommError> {
        self.read(
            "jtag_read32",
            vec![chip.into(), x.into(), y.into(), addr.into()],
            |c| c.jtag_read32(chip, x, y, addr),
        )
    }

    fn jtag_write32(&self, chip: u8, x: u8, y: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.write("jtag_write32", |c| c.jtag_write32(chip, x, y, addr, data))
    }

    fn jtag_read32_axi(&self, chip: u8, addr: u64) -> Result<u32, CommError> {
        self.read("jtag_read32_axi", vec![chip.into(), addr.into()], |c| {
            c.jtag_read32_axi(chip, addr)
        })
    }

    fn jtag_write32_axi(&self, chip: u8, addr: u64, data: u32) -> Result<(), CommError> {
        self.write("jtag_write32_axi", |c| c.jtag_write32_axi(chip, addr, data))
    }

    fn get_file(&self, path: &str) -> Result<String, CommError> {
        self.read("get_file", vec![path.into()], |c| c.get_file(path))
    }

    fn get_binary(&self, path: &str) -> Result<Vec<u8>, CommError> {
        self.read("get_binary", vec![path.into()], |c| c.get_binary(path))
    }

    fn run_dirpath(&self) -> Result<Option<String>, CommError> {
        self.read("get_run_dirpath", Vec::new(), |c| c.run_dirpath())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_parsing() {
        assert_eq!("Record".parse::<CacheMode>().unwrap(), CacheMode::Record);
        assert_eq!("replay".parse::<CacheMode>().unwrap(), CacheMode::Replay);
        assert!("rewind".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_key_json_shape() {
        let key = CacheKey {
            op: "get_file".into(),
            args: vec![CacheArg::Int(3), CacheArg::from("a.txt"), CacheArg::Bool(true)],
        };
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"op":"get_file","args":[3,"a.txt",true]}"#);
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_value_type_checks() {
        assert_eq!(u32::from_value(CacheValue::Word(5)), Some(5));
        assert_eq!(u32::from_value(CacheValue::Text("5".into())), None);
        assert_eq!(
            <Option<String>>::from_value(CacheValue::MaybeText(None)),
            Some(None)
        );
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CachedCommunicator::replay(dir.path().join("absent.json"));
        assert!(matches!(result, Err(CommError::CacheFile { .. })));
    }

    #[test]
    fn test_empty_replay_misses_and_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"entries":[]}"#).unwrap();
        let comm = CachedCommunicator::replay(&path).unwrap();
        assert_eq!(comm.mode(), CacheMode::Replay);
        assert!(comm.is_empty());
        match comm.pci_read32(0, 0, 1, 1, 0x10) {
            Err(CommError::CacheMiss { op, args }) => {
                assert_eq!(op, "pci_read32");
                assert_eq!(args.len(), 5);
            }
            other => panic!("expected cache miss, got {:?}", other),
        }
        assert!(matches!(
            comm.pci_write32(0, 0, 1, 1, 0x10, 1),
            Err(CommError::ReadOnlyReplay { .. })
        ));
    }
}
