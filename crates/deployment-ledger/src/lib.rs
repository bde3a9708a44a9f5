//! A durable record of deployed contract addresses.
//!
//! The ledger is a nested JSON object, one file per network. Leaves are
//! checksummed addresses; inner objects group parameterized families such
//! as rate models keyed by their coefficients. Every mutation rewrites the
//! whole snapshot, so an interrupted run loses at most the step that was in
//! flight.

mod key;

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use ethers::{types::Address, utils::to_checksum};
pub use key::LedgerKey;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("missing dependency: no address recorded at `{0}`")]
    MissingDependency(LedgerKey),
    #[error("`{key}` was already set to {existing:#x} in this run; refusing to overwrite with {new:#x}")]
    Conflict {
        key: LedgerKey,
        existing: Address,
        new: Address,
    },
    #[error("ledger entry `{0}` is not an address")]
    InvalidEntry(LedgerKey),
    #[error("ledger keys must have at least one segment")]
    EmptyKey,
    #[error("failed to parse ledger at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to access ledger at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger lock poisoned")]
    Poisoned,
}

struct State {
    root: Map<String, Value>,
    /// Keys written by this process. These may not be silently redirected.
    written: HashSet<LedgerKey>,
}

/// The deployment ledger for a single network.
///
/// All mutations go through one mutex which is held across the
/// mutate-then-persist sequence, so concurrent steps never race on the
/// snapshot file.
pub struct Ledger {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl Ledger {
    /// Loads the ledger persisted at `path`. A missing file is a fresh start.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let root = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Map::new(),
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(root)) => root,
                Ok(_) => {
                    return Err(LedgerError::Malformed {
                        path,
                        source: serde::de::Error::custom("expected a JSON object"),
                    })
                }
                Err(source) => return Err(LedgerError::Malformed { path, source }),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no ledger found, starting fresh");
                Map::new()
            }
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(State {
                root,
                written: HashSet::new(),
            }),
        })
    }

    /// Moves the ledger file at `path` aside as `<file>.<unix secs>.bak` so
    /// the next load starts empty. Returns the backup path, or `None` when
    /// there was no file. Existing backups are never overwritten.
    pub fn archive(path: &Path) -> Result<Option<PathBuf>, LedgerError> {
        if !path.exists() {
            return Ok(None);
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let mut backup = path.with_file_name(format!("{name}.{stamp}.bak"));
        let mut attempt = 1;
        while backup.exists() {
            backup = path.with_file_name(format!("{name}.{stamp}-{attempt}.bak"));
            attempt += 1;
        }
        fs::rename(path, &backup).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(from = %path.display(), to = %backup.display(), "ledger archived");
        Ok(Some(backup))
    }

    /// A ledger with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State {
                root: Map::new(),
                written: HashSet::new(),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolves the address at `key`, failing if any segment is absent.
    pub fn get(&self, key: &LedgerKey) -> Result<Address, LedgerError> {
        self.try_get(key)?
            .ok_or_else(|| LedgerError::MissingDependency(key.clone()))
    }

    pub fn try_get(&self, key: &LedgerKey) -> Result<Option<Address>, LedgerError> {
        let state = self.lock()?;
        match lookup(&state.root, key) {
            None => Ok(None),
            Some(value) => parse_address(value)
                .map(Some)
                .ok_or_else(|| LedgerError::InvalidEntry(key.clone())),
        }
    }

    pub fn contains(&self, key: &LedgerKey) -> bool {
        matches!(self.try_get(key), Ok(Some(_)))
    }

    /// Records `address` at `key` and persists the snapshot.
    ///
    /// Writing the value that is already recorded is a no-op. Redirecting a
    /// key written earlier in this run is a `Conflict`; redirecting a key
    /// from a previous run is allowed since that is how a failed deployment
    /// gets redone.
    pub fn set(&self, key: &LedgerKey, address: Address) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        let existing = match lookup(&state.root, key) {
            Some(value) => {
                Some(parse_address(value).ok_or_else(|| LedgerError::InvalidEntry(key.clone()))?)
            }
            None => None,
        };
        match existing {
            Some(existing) if existing == address => return Ok(()),
            Some(existing) if state.written.contains(key) => {
                return Err(LedgerError::Conflict {
                    key: key.clone(),
                    existing,
                    new: address,
                })
            }
            Some(existing) => warn!(
                %key,
                previous = ?existing,
                new = ?address,
                "overwriting address recorded by a previous run"
            ),
            None => {}
        }
        insert(&mut state.root, key, address)?;
        state.written.insert(key.clone());
        self.persist(&state.root)
    }

    /// Records `address` at `key` regardless of what was there before and
    /// returns the previous address. Used when an upgrade intentionally
    /// replaces a component.
    pub fn replace(&self, key: &LedgerKey, address: Address) -> Result<Option<Address>, LedgerError> {
        let mut state = self.lock()?;
        let previous = lookup(&state.root, key).and_then(parse_address);
        insert(&mut state.root, key, address)?;
        state.written.insert(key.clone());
        self.persist(&state.root)?;
        Ok(previous)
    }

    /// Removes the entry at `key`, pruning parents that become empty.
    pub fn remove(&self, key: &LedgerKey) -> Result<Option<Address>, LedgerError> {
        let mut state = self.lock()?;
        let removed = remove(&mut state.root, key.segments());
        if removed.is_none() {
            return Ok(None);
        }
        state.written.remove(key);
        self.persist(&state.root)?;
        Ok(removed.as_ref().and_then(parse_address))
    }

    /// Every recorded address, flattened and sorted by key.
    pub fn entries(&self) -> Result<Vec<(LedgerKey, Address)>, LedgerError> {
        let state = self.lock()?;
        let mut entries = vec![];
        flatten(&state.root, &mut vec![], &mut entries);
        Ok(entries)
    }

    /// The raw snapshot, as it would be written to disk.
    pub fn snapshot(&self) -> Result<Value, LedgerError> {
        Ok(Value::Object(self.lock()?.root.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Writes the snapshot to a sibling temp file and renames it into place
    /// so readers never observe a partial write.
    fn persist(&self, root: &Map<String, Value>) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut contents = serde_json::to_string_pretty(root).map_err(|source| {
            LedgerError::Malformed {
                path: path.clone(),
                source,
            }
        })?;
        contents.push('\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!(path = %path.display(), "ledger persisted");
        Ok(())
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, key: &LedgerKey) -> Option<&'a Value> {
    let (last, parents) = key.segments().split_last()?;
    let mut map = root;
    for segment in parents {
        map = map.get(segment)?.as_object()?;
    }
    map.get(last)
}

fn insert(root: &mut Map<String, Value>, key: &LedgerKey, address: Address) -> Result<(), LedgerError> {
    let (last, parents) = key.segments().split_last().ok_or(LedgerError::EmptyKey)?;
    let mut map = root;
    for segment in parents {
        map = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| LedgerError::InvalidEntry(key.clone()))?;
    }
    if map.get(last).is_some_and(Value::is_object) {
        return Err(LedgerError::InvalidEntry(key.clone()));
    }
    map.insert(last.clone(), Value::String(to_checksum(&address, None)));
    Ok(())
}

fn remove(map: &mut Map<String, Value>, segments: &[String]) -> Option<Value> {
    match segments {
        [] => None,
        [last] => map.remove(last),
        [first, rest @ ..] => {
            let child = map.get_mut(first)?.as_object_mut()?;
            let removed = remove(child, rest);
            if child.is_empty() {
                map.remove(first);
            }
            removed
        }
    }
}

fn flatten(map: &Map<String, Value>, prefix: &mut Vec<String>, out: &mut Vec<(LedgerKey, Address)>) {
    for (segment, value) in map {
        prefix.push(segment.clone());
        match value {
            Value::Object(child) => flatten(child, prefix, out),
            other => {
                if let Some(address) = parse_address(other) {
                    out.push((LedgerKey::new(prefix.iter().cloned()), address));
                }
            }
        }
        prefix.pop();
    }
}

fn parse_address(value: &Value) -> Option<Address> {
    value.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use eyre::Result;
    use tempfile::tempdir;

    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn test_missing_file_is_a_fresh_start() -> Result<()> {
        let dir = tempdir()?;
        let ledger = Ledger::load(dir.path().join("metis.json"))?;
        assert!(ledger.entries()?.is_empty());
        assert!(matches!(
            ledger.get(&"Unitroller".into()),
            Err(LedgerError::MissingDependency(_))
        ));
        Ok(())
    }

    #[test]
    fn test_archive_keeps_every_backup() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("localhost.json");
        assert_eq!(Ledger::archive(&path)?, None);

        Ledger::load(&path)?.set(&"Unitroller".into(), addr(1))?;
        let first = Ledger::archive(&path)?.ok_or_else(|| eyre::eyre!("nothing archived"))?;
        assert!(!path.exists());
        assert!(Ledger::load(&path)?.entries()?.is_empty());

        // A second archive within the same second gets its own file.
        Ledger::load(&path)?.set(&"Unitroller".into(), addr(2))?;
        let second = Ledger::archive(&path)?.ok_or_else(|| eyre::eyre!("nothing archived"))?;
        assert_ne!(first, second);
        assert_eq!(Ledger::load(&first)?.get(&"Unitroller".into())?, addr(1));
        assert_eq!(Ledger::load(&second)?.get(&"Unitroller".into())?, addr(2));
        Ok(())
    }

    #[test]
    fn test_set_persists_immediately() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("deployments").join("kovan.json");

        // Write a top-level component and a nested family member.
        let ledger = Ledger::load(&path)?;
        ledger.set(&"Unitroller".into(), addr(1))?;
        ledger.set(&["IRModels", "JumpRateModelV2", "2102400", "0__80__50__1000"].into(), addr(2))?;

        // A second instance sees both without any explicit flush.
        let reloaded = Ledger::load(&path)?;
        assert_eq!(reloaded.get(&"Unitroller".into())?, addr(1));
        assert_eq!(
            reloaded.get(&["IRModels", "JumpRateModelV2", "2102400", "0__80__50__1000"].into())?,
            addr(2)
        );

        // The file is pretty JSON with checksummed addresses.
        let contents = fs::read_to_string(&path)?;
        assert!(contents.contains(&format!("\"Unitroller\": \"{}\"", to_checksum(&addr(1), None))));
        assert!(!path.with_extension("json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_missing_intermediate_level() -> Result<()> {
        let ledger = Ledger::in_memory();
        ledger.set(&["IRModels", "2__20"].into(), addr(3))?;
        for key in [
            LedgerKey::from(["IRModels", "5__20"]),
            LedgerKey::from(["IRModels", "JumpRateModelV2", "2102400"]),
            LedgerKey::from(["Prices", "tMetis"]),
        ] {
            assert!(matches!(ledger.get(&key), Err(LedgerError::MissingDependency(k)) if k == key));
        }

        // A family map is not an address.
        assert!(matches!(
            ledger.get(&"IRModels".into()),
            Err(LedgerError::InvalidEntry(_))
        ));
        Ok(())
    }

    #[test]
    fn test_overwrite_rules() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("metis.json");
        fs::write(&path, format!(r#"{{ "Unitroller": "{:#x}" }}"#, addr(1)))?;

        let ledger = Ledger::load(&path)?;

        // Rewriting the same value is a no-op.
        ledger.set(&"Unitroller".into(), addr(1))?;

        // Redirecting a key from a previous run is allowed.
        ledger.set(&"Unitroller".into(), addr(2))?;
        assert_eq!(ledger.get(&"Unitroller".into())?, addr(2));

        // Redirecting it again in the same run is not.
        let err = ledger.set(&"Unitroller".into(), addr(3)).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { existing, new, .. } if existing == addr(2) && new == addr(3)));
        assert_eq!(Ledger::load(&path)?.get(&"Unitroller".into())?, addr(2));

        // An explicit replace goes through.
        assert_eq!(ledger.replace(&"Unitroller".into(), addr(3))?, Some(addr(2)));
        assert_eq!(ledger.get(&"Unitroller".into())?, addr(3));
        Ok(())
    }

    #[test]
    fn test_remove_prunes_empty_families() -> Result<()> {
        let ledger = Ledger::in_memory();
        ledger.set(&"PendingComptroller".into(), addr(7))?;
        ledger.set(&["Listed", "tMetis"].into(), addr(8))?;

        assert_eq!(ledger.remove(&"PendingComptroller".into())?, Some(addr(7)));
        assert_eq!(ledger.remove(&"PendingComptroller".into())?, None);
        assert_eq!(ledger.remove(&["Listed", "tMetis"].into())?, Some(addr(8)));
        assert_eq!(ledger.snapshot()?, serde_json::json!({}));
        Ok(())
    }

    #[test]
    fn test_malformed_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("metis.json");
        fs::write(&path, "{ not json")?;
        assert!(matches!(Ledger::load(&path), Err(LedgerError::Malformed { .. })));
        fs::write(&path, "[]")?;
        assert!(matches!(Ledger::load(&path), Err(LedgerError::Malformed { .. })));
        Ok(())
    }

    #[test]
    fn test_concurrent_writers() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("localhost.json");
        let ledger = Arc::new(Ledger::load(&path)?);

        // Several markets land at the same time.
        let handles = (0..8u64)
            .map(|i| {
                let ledger = ledger.clone();
                thread::spawn(move || ledger.set(&format!("cToken{i}").into(), addr(100 + i)))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().map_err(|_| eyre::eyre!("writer panicked"))??;
        }

        let reloaded = Ledger::load(&path)?;
        assert_eq!(reloaded.entries()?.len(), 8);
        for i in 0..8u64 {
            assert_eq!(reloaded.get(&format!("cToken{i}").into())?, addr(100 + i));
        }
        Ok(())
    }
}
