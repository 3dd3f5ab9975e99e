//! A design: a set of modules with one designated top.

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::ids::ModuleId;
use crate::module::Module;

/// A module hierarchy rooted at `top`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    /// Every module, referenced by instances through [`ModuleId`].
    pub modules: Arena<ModuleId, Module>,
    /// The root of the hierarchy.
    pub top: ModuleId,
}

impl Design {
    /// Wraps a single module with no children.
    pub fn single(module: Module) -> Self {
        let mut modules = Arena::new();
        let top = modules.alloc(module);
        Self { modules, top }
    }

    /// The top module.
    ///
    /// # Panics
    ///
    /// Panics if `top` does not address a module; checking rejects such designs.
    pub fn top_module(&self) -> &Module {
        &self.modules[self.top]
    }

    /// Looks up a module by name.
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules.position(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_module_is_top() {
        let d = Design::single(Module::new("alu"));
        assert_eq!(d.top_module().name, "alu");
        assert_eq!(d.find_module("alu"), Some(d.top));
        assert_eq!(d.find_module("cpu"), None);
    }
}
