//! Module-owned metadata bag attached to `User`/`Channel` (component I):
//! a string key maps to a typed cell, namespaced by the owning module so two
//! modules can never collide on a bare name.

use std::any::Any;
use std::collections::HashMap;

#[derive(Default)]
pub struct Extensible {
    cells: HashMap<(String, String), Box<dyn Any + Send + Sync>>,
}

impl Extensible {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, module: &str, name: &str, value: T) {
        self.cells
            .insert((module.to_string(), name.to_string()), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, module: &str, name: &str) -> Option<&T> {
        self.cells
            .get(&(module.to_string(), name.to_string()))
            .and_then(|cell| cell.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, module: &str, name: &str) -> Option<&mut T> {
        self.cells
            .get_mut(&(module.to_string(), name.to_string()))
            .and_then(|cell| cell.downcast_mut::<T>())
    }

    pub fn remove(&mut self, module: &str, name: &str) {
        self.cells.remove(&(module.to_string(), name.to_string()));
    }

    /// Revoke every cell owned by `module`, used when a module unloads.
    pub fn revoke_module(&mut self, module: &str) {
        self.cells.retain(|(owner, _), _| owner != module);
    }
}

impl std::fmt::Debug for Extensible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensible")
            .field("cell_count", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trips() {
        let mut ext = Extensible::new();
        ext.insert("nickserv", "registered_at", 1234i64);
        assert_eq!(ext.get::<i64>("nickserv", "registered_at"), Some(&1234));
        assert_eq!(ext.get::<i64>("chanserv", "registered_at"), None);
    }

    #[test]
    fn revoke_module_drops_only_its_cells() {
        let mut ext = Extensible::new();
        ext.insert("nickserv", "a", 1i32);
        ext.insert("chanserv", "b", 2i32);
        ext.revoke_module("nickserv");
        assert_eq!(ext.get::<i32>("nickserv", "a"), None);
        assert_eq!(ext.get::<i32>("chanserv", "b"), Some(&2));
    }
}
