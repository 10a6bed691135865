//! Write-once asynchronous cell.
//!
//! The per-run data table maps every data node to one of these. The single
//! producer (a module, the inline-transform evaluator, or the input seeder)
//! writes once; any number of readers either poll with `try_get` or suspend
//! in `get` until the value lands. Writes happen-before reads of the same
//! cell.

use thiserror::Error;
use tokio::sync::watch;

/// Second write attempted on a one-shot cell
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cell already written")]
pub struct CellAlreadySet;

/// A cell holding at most one value, ever.
#[derive(Debug)]
pub struct OneShotCell<T: Clone> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> OneShotCell<T> {
    /// Empty cell
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        OneShotCell { tx }
    }

    /// Fill the cell. Fails if it already holds a value.
    pub fn set(&self, value: T) -> Result<(), CellAlreadySet> {
        let mut result = Ok(());
        self.tx.send_modify(|slot| {
            if slot.is_some() {
                result = Err(CellAlreadySet);
            } else {
                *slot = Some(value);
            }
        });
        result
    }

    /// Non-blocking read
    pub fn try_get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// True once the cell holds a value
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait for the value. Returns `None` only if the cell is torn down
    /// while waiting (the writer will never write); tasks parked here are
    /// released rather than leaked on that path.
    pub async fn get(&self) -> Option<T> {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl<T: Clone> Default for OneShotCell<T> {
    fn default() -> Self {
        OneShotCell::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_then_get() {
        let cell = OneShotCell::new();
        cell.set(7).unwrap();
        assert_eq!(cell.try_get(), Some(7));
        assert_eq!(cell.get().await, Some(7));
    }

    #[tokio::test]
    async fn test_double_write_rejected() {
        let cell = OneShotCell::new();
        cell.set(1).unwrap();
        assert_eq!(cell.set(2), Err(CellAlreadySet));
        assert_eq!(cell.try_get(), Some(1));
    }

    #[tokio::test]
    async fn test_readers_wake_on_write() {
        let cell = Arc::new(OneShotCell::new());
        let mut readers = Vec::new();
        for _ in 0..4 {
            let cell = Arc::clone(&cell);
            readers.push(tokio::spawn(async move { cell.get().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        cell.set("ready".to_string()).unwrap();

        for reader in readers {
            assert_eq!(reader.await.unwrap(), Some("ready".to_string()));
        }
    }

    #[tokio::test]
    async fn test_empty_cell_try_get() {
        let cell: OneShotCell<i64> = OneShotCell::new();
        assert_eq!(cell.try_get(), None);
        assert!(!cell.is_set());
    }
}
