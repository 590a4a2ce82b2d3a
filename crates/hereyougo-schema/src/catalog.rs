//! Explicit list of entity classes the updater knows about.

use hereyougo_core::{Entity, EntityClass};

/// Entity classes to synchronize, in registration order.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    classes: Vec<EntityClass>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `E`; registering a class twice keeps the first entry.
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.register_class(EntityClass::of::<E>())
    }

    pub fn register_class(&mut self, class: EntityClass) -> &mut Self {
        if !self.classes.contains(&class) {
            self.classes.push(class);
        }
        self
    }

    /// Builder form of [`EntityCatalog::register`].
    pub fn with<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn classes(&self) -> &[EntityClass] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
