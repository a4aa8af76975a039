use anyhow::Result;
use redb::{
    Database, ReadOnlyTable, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table,
    TableDefinition,
};
use std::sync::Arc;

/// Table layout shared by every storage: string keys, opaque byte values.
pub type RawTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Byte-level key-value operations over a single redb table.
///
/// Implementors supply the table and the database handle. Each write runs in
/// one redb write transaction, and redb commits with immediate durability,
/// so a write that returns `Ok` is already on disk and readers never see it
/// half applied.
pub trait SimpleStorage: Send + Sync {
    const TABLE: RawTable;

    fn db(&self) -> &Arc<Database>;

    /// Run `read` against a read-only snapshot of the table.
    fn with_read<T>(
        &self,
        read: impl FnOnce(&ReadOnlyTable<&'static str, &'static [u8]>) -> Result<T>,
    ) -> Result<T> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(Self::TABLE)?;
        read(&table)
    }

    /// Run `write` inside a write transaction. The closure returns its value
    /// plus whether to commit; on `false` or on error nothing is written.
    fn with_write<T>(
        &self,
        write: impl FnOnce(&mut Table<'_, &'static str, &'static [u8]>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let txn = self.db().begin_write()?;
        let (value, commit) = {
            let mut table = txn.open_table(Self::TABLE)?;
            write(&mut table)?
        };
        if commit {
            txn.commit()?;
        } else {
            txn.abort()?;
        }
        Ok(value)
    }

    /// Store bytes under `id`, replacing any previous value.
    fn put_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        self.with_write(|table| {
            table.insert(id, data)?;
            Ok(((), true))
        })
    }

    /// Store bytes only when `id` is free. Returns false if it was taken.
    fn insert_new_raw(&self, id: &str, data: &[u8]) -> Result<bool> {
        self.with_write(|table| {
            if table.get(id)?.is_some() {
                return Ok((false, false));
            }
            table.insert(id, data)?;
            Ok((true, true))
        })
    }

    /// Replace the bytes under `id` with `apply(current)` atomically.
    ///
    /// Returns the new bytes, or `None` without writing when `id` is absent.
    /// An error from `apply` leaves the stored value untouched.
    fn update_raw<F>(&self, id: &str, apply: F) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        self.with_write(|table| {
            let current = table.get(id)?.map(|guard| guard.value().to_vec());
            let Some(current) = current else {
                return Ok((None, false));
            };
            let next = apply(&current)?;
            table.insert(id, next.as_slice())?;
            Ok((Some(next), true))
        })
    }

    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.with_read(|table| Ok(table.get(id)?.map(|guard| guard.value().to_vec())))
    }

    /// Every entry as `(id, bytes)`, in key order.
    fn list_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.with_read(|table| {
            table
                .iter()?
                .map(|entry| -> Result<(String, Vec<u8>)> {
                    let (key, value) = entry?;
                    Ok((key.value().to_string(), value.value().to_vec()))
                })
                .collect()
        })
    }

    /// Remove `id`. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool> {
        self.with_write(|table| {
            let existed = table.remove(id)?.is_some();
            Ok((existed, existed))
        })
    }

    fn exists(&self, id: &str) -> Result<bool> {
        self.with_read(|table| Ok(table.get(id)?.is_some()))
    }

    fn count(&self) -> Result<usize> {
        self.with_read(|table| Ok(table.len()? as usize))
    }
}

/// Declare a storage struct bound to one table.
///
/// The generated type has a `new(db)` constructor that creates the table if
/// needed; its operations come from [`SimpleStorage`], which callers bring
/// into scope.
#[macro_export]
macro_rules! define_simple_storage {
    ( $(#[$meta:meta])* $vis:vis struct $name:ident { table: $table_name:literal } ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            db: std::sync::Arc<redb::Database>,
        }

        impl $name {
            pub fn new(db: std::sync::Arc<redb::Database>) -> anyhow::Result<Self> {
                let write_txn = db.begin_write()?;
                write_txn.open_table(<Self as $crate::SimpleStorage>::TABLE)?;
                write_txn.commit()?;
                Ok(Self { db })
            }
        }

        impl $crate::SimpleStorage for $name {
            const TABLE: $crate::simple_storage::RawTable =
                redb::TableDefinition::new($table_name);

            fn db(&self) -> &std::sync::Arc<redb::Database> {
                &self.db
            }
        }
    };
}
