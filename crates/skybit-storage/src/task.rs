//! Task storage - byte-level API for task definition and outcome persistence.

use crate::define_simple_storage;

define_simple_storage! {
    /// Low-level task storage with byte-level API
    pub struct TaskStorage { table: "tasks" }
}
