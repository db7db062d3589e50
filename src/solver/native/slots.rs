use indexmap::IndexMap;
use lbmgen_codegen::native::{Param, Type};

use super::error::{GenerationError, SlotScope};

/// A declared parameter: its type and the expression that supplies its value
/// at the call site (C++ in the launcher for kernel slots, Python in the
/// wrapper for launcher slots).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub ty: Type,
    pub source: String,
}

/// Kernel and launcher parameter tables, in declaration order.
///
/// Registration is idempotent: declaring a name again with the same type is a
/// no-op and keeps the first source. A different type is a conflict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotTable {
    kernel: IndexMap<String, Slot>,
    launcher: IndexMap<String, Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, scope: SlotScope) -> &IndexMap<String, Slot> {
        match scope {
            SlotScope::Kernel => &self.kernel,
            SlotScope::Launcher => &self.launcher,
        }
    }

    /// Returns `true` when the slot was newly added.
    pub fn register(
        &mut self,
        scope: SlotScope,
        name: &str,
        ty: Type,
        source: impl Into<String>,
    ) -> Result<bool, GenerationError> {
        let table = match scope {
            SlotScope::Kernel => &mut self.kernel,
            SlotScope::Launcher => &mut self.launcher,
        };
        if let Some(existing) = table.get(name) {
            if existing.ty != ty {
                return Err(GenerationError::SlotConflict {
                    scope,
                    name: name.to_string(),
                    existing: existing.ty.clone(),
                    requested: ty,
                });
            }
            return Ok(false);
        }
        table.insert(
            name.to_string(),
            Slot {
                ty,
                source: source.into(),
            },
        );
        Ok(true)
    }

    pub fn contains(&self, scope: SlotScope, name: &str) -> bool {
        self.table(scope).contains_key(name)
    }

    pub fn get(&self, scope: SlotScope, name: &str) -> Option<&Slot> {
        self.table(scope).get(name)
    }

    pub fn iter(&self, scope: SlotScope) -> impl Iterator<Item = (&str, &Slot)> {
        self.table(scope)
            .iter()
            .map(|(name, slot)| (name.as_str(), slot))
    }

    pub fn len(&self, scope: SlotScope) -> usize {
        self.table(scope).len()
    }

    pub fn kernel_params(&self) -> Vec<Param> {
        self.kernel
            .iter()
            .map(|(name, slot)| Param::new(name.clone(), slot.ty.clone()))
            .collect()
    }

    /// Launcher slot whose host expression is exactly `source`.
    pub fn launcher_by_source(&self, source: &str) -> Option<&str> {
        self.launcher
            .iter()
            .find(|(_, slot)| slot.source == source)
            .map(|(name, _)| name.as_str())
    }
}
