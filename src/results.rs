use crate::error::EngineError;
use crate::models::{EquityPoint, TradeRecord};
use crate::preset_store::{artifact_path, commit_staged, stage_document, FileLockGuard};
use log::{error, info, warn};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub const EQUITY_FILE_NAME: &str = "equity.json";
pub const TRADES_FILE_NAME: &str = "trades.json";

/// Results location holding the latest equity curve and trade ledger.
///
/// Publishes are serialised in-process by a mutex and across processes by an
/// advisory lock taken next to `equity.json`.
#[derive(Clone)]
pub struct ResultStore {
    dir: PathBuf,
    publish_lock: Arc<Mutex<()>>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn equity_path(&self) -> PathBuf {
        self.dir.join(EQUITY_FILE_NAME)
    }

    pub fn trades_path(&self) -> PathBuf {
        self.dir.join(TRADES_FILE_NAME)
    }

    /// Stages both documents before renaming either. If the trades rename
    /// fails the previous equity document is put back, so the pair on disk
    /// always comes from the same run.
    pub fn publish(&self, equity: &[EquityPoint], trades: &[TradeRecord]) -> Result<(), EngineError> {
        let equity_path = self.equity_path();
        let trades_path = self.trades_path();
        let equity_doc = to_document(&equity_path, equity)?;
        let trades_doc = to_document(&trades_path, trades)?;

        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLockGuard::acquire(&equity_path)?;

        let equity_tmp = stage_document(&equity_path, &equity_doc)?;
        let trades_tmp = match stage_document(&trades_path, &trades_doc) {
            Ok(path) => path,
            Err(err) => {
                let _ = fs::remove_file(&equity_tmp);
                return Err(err);
            }
        };
        let previous_equity = match back_up(&equity_path) {
            Ok(backup) => backup,
            Err(err) => {
                let _ = fs::remove_file(&equity_tmp);
                let _ = fs::remove_file(&trades_tmp);
                return Err(err);
            }
        };

        if let Err(err) = commit_staged(&equity_tmp, &equity_path) {
            let _ = fs::remove_file(&trades_tmp);
            discard(previous_equity.as_deref());
            return Err(err);
        }
        if let Err(err) = commit_staged(&trades_tmp, &trades_path) {
            restore(&equity_path, previous_equity.as_deref());
            return Err(err);
        }
        discard(previous_equity.as_deref());

        info!(
            "Published {} equity points and {} trades to {}",
            equity.len(),
            trades.len(),
            self.dir.display()
        );
        Ok(())
    }

    pub fn equity_document(&self) -> Result<Value, EngineError> {
        read_results_document(&self.equity_path())
    }

    pub fn trades_document(&self) -> Result<Value, EngineError> {
        read_results_document(&self.trades_path())
    }
}

/// Copies the current document aside; `None` when there is nothing to keep.
fn back_up(path: &Path) -> Result<Option<PathBuf>, EngineError> {
    let backup = artifact_path(path, "bak");
    match fs::copy(path, &backup) {
        Ok(_) => Ok(Some(backup)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            let _ = fs::remove_file(&backup);
            Err(EngineError::io(path, err))
        }
    }
}

fn restore(path: &Path, backup: Option<&Path>) {
    let restored = match backup {
        Some(backup) => commit_staged(backup, path),
        None => fs::remove_file(path).map_err(|err| EngineError::io(path, err)),
    };
    match restored {
        Ok(()) => warn!("Rolled back {} after a failed publish", path.display()),
        Err(err) => error!("Could not roll back {}: {}", path.display(), err),
    }
}

fn discard(backup: Option<&Path>) {
    if let Some(backup) = backup {
        let _ = fs::remove_file(backup);
    }
}

fn to_document<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<Value, EngineError> {
    serde_json::to_value(rows)
        .map_err(|err| EngineError::io(path, io::Error::new(io::ErrorKind::InvalidData, err)))
}

/// Absent or unreadable documents read as an empty array.
fn read_results_document(path: &Path) -> Result<Value, EngineError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Value::Array(Vec::new())),
        Err(err) => {
            warn!("Treating unreadable results document {} as empty: {}", path.display(), err);
            return Ok(Value::Array(Vec::new()));
        }
    };
    serde_json::from_str(&text).map_err(|err| EngineError::CorruptStore {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeSide;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::thread;

    fn run_at(value: f64) -> (Vec<EquityPoint>, Vec<TradeRecord>) {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap();
        (
            vec![EquityPoint { time, value }],
            vec![TradeRecord {
                date: time,
                side: TradeSide::Buy,
                price: value,
                pnl: 0.0,
            }],
        )
    }

    fn staging_leftovers(store: &ResultStore) -> Vec<PathBuf> {
        fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "tmp" || ext == "bak")
            })
            .collect()
    }

    #[test]
    fn absent_documents_default_to_empty_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("data"));
        assert_eq!(store.equity_document().unwrap(), json!([]));
        assert_eq!(store.trades_document().unwrap(), json!([]));
    }

    #[test]
    fn publish_writes_both_documents_in_contract_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("data"));
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap();

        store
            .publish(
                &[EquityPoint { time, value: 98.5 }],
                &[TradeRecord {
                    date: time,
                    side: TradeSide::Sell,
                    price: 99.0,
                    pnl: -1.5,
                }],
            )
            .unwrap();

        assert_eq!(
            store.equity_document().unwrap(),
            json!([{"time": "2024-01-02T03:04:00Z", "value": 98.5}])
        );
        assert_eq!(
            store.trades_document().unwrap(),
            json!([{"date": "2024-01-02T03:04:00Z", "type": "sell", "price": 99.0, "pnl": -1.5}])
        );

        assert!(staging_leftovers(&store).is_empty());
    }

    #[test]
    fn documents_are_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        fs::write(store.trades_path(), r#"[{"date":"x","type":"buy","price":1,"pnl":0,"extra":true}]"#).unwrap();
        assert_eq!(store.trades_document().unwrap()[0]["extra"], json!(true));
    }

    #[test]
    fn unparseable_document_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        fs::write(store.equity_path(), "[{").unwrap();
        assert!(matches!(
            store.equity_document(),
            Err(EngineError::CorruptStore { .. })
        ));
    }

    #[test]
    fn failed_trades_rename_restores_previous_equity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let (equity, trades) = run_at(100.0);
        store.publish(&equity, &trades).unwrap();
        let published = store.equity_document().unwrap();

        fs::remove_file(store.trades_path()).unwrap();
        fs::create_dir(store.trades_path()).unwrap();

        let (equity, trades) = run_at(250.0);
        assert!(store.publish(&equity, &trades).is_err());
        assert_eq!(store.equity_document().unwrap(), published);
        assert!(staging_leftovers(&store).is_empty());
    }

    #[test]
    fn failed_first_publish_leaves_no_equity_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        fs::create_dir(store.trades_path()).unwrap();

        let (equity, trades) = run_at(100.0);
        assert!(store.publish(&equity, &trades).is_err());
        assert!(!store.equity_path().exists());
        assert_eq!(store.equity_document().unwrap(), json!([]));
    }

    #[test]
    fn concurrent_publishers_leave_a_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        const PUBLISHERS: usize = 8;

        thread::scope(|threads| {
            for publisher in 0..PUBLISHERS {
                let root = dir.path();
                threads.spawn(move || {
                    let store = ResultStore::new(root);
                    for round in 0..10 {
                        let (equity, trades) = run_at((publisher * 100 + round) as f64);
                        store.publish(&equity, &trades).expect("publish");
                    }
                });
            }
        });

        let store = ResultStore::new(dir.path());
        let equity = store.equity_document().unwrap();
        let trades = store.trades_document().unwrap();
        assert_eq!(equity[0]["value"], trades[0]["price"]);
        assert!(staging_leftovers(&store).is_empty());
    }
}
