//! Per-class storage models.
//!
//! A [`Declaration`] is what an entity class says about itself: table name,
//! properties and relation sides. [`Models`] turns declarations into
//! validated [`Model`]s, adding properties contributed by extension hooks
//! and the foreign-key columns synthesized for every `has one` relation.
//! Models are built once per class and memoized until [`Models::clear`].

use crate::converter::{Converter, ConverterRegistry};
use crate::entity::{Entity, EntityClass};
use crate::error::{Error, Result};
use crate::property::{Property, PropertyDef};
use crate::relationship::{RelationKind, Side};
use crate::validate::is_identifier;
use crate::value::Value;
use heck::ToSnakeCase;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum DeclaredProperty {
    Typed(PropertyDef),
    Annotated {
        name: String,
        definition: String,
        default: Value,
    },
}

/// Declared storage shape of an entity class.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    table: Option<String>,
    properties: Vec<DeclaredProperty>,
    relations: Vec<(EntityClass, Side)>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the table name (class name in snake case plus `s` otherwise).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(DeclaredProperty::Typed(def));
        self
    }

    /// Declare a property with a definition string, e.g. `"string size=64 primary"`.
    pub fn property_str(
        mut self,
        name: impl Into<String>,
        definition: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.properties.push(DeclaredProperty::Annotated {
            name: name.into(),
            definition: definition.into(),
            default: default.into(),
        });
        self
    }

    /// `has one O`: this class stores the key of one `O`.
    pub fn has_one<O: Entity>(self) -> Self {
        self.has(Side::One, EntityClass::of::<O>())
    }

    /// `has many O`
    pub fn has_many<O: Entity>(self) -> Self {
        self.has(Side::Many, EntityClass::of::<O>())
    }

    pub fn has(mut self, side: Side, other: EntityClass) -> Self {
        self.relations.push((other, side));
        self
    }
}

/// Validated storage shape of one entity class.
#[derive(Debug, Clone)]
pub struct Model {
    class: EntityClass,
    table: String,
    relations: BTreeMap<&'static str, (EntityClass, Side)>,
    own: Vec<Property>,
    extension: Vec<Property>,
    relation: Vec<Property>,
}

impl Model {
    pub fn class(&self) -> EntityClass {
        self.class
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared relations, ordered by related class name.
    pub fn relations(&self) -> impl Iterator<Item = (EntityClass, Side)> + '_ {
        self.relations.values().copied()
    }

    /// Side this class declared towards `other`.
    pub fn relation_side(&self, other: &str) -> Option<Side> {
        self.relations.get(other).map(|(_, side)| *side)
    }

    pub fn own_properties(&self) -> &[Property] {
        &self.own
    }

    pub fn extension_properties(&self) -> &[Property] {
        &self.extension
    }

    /// Synthesized foreign-key properties.
    pub fn relation_properties(&self) -> &[Property] {
        &self.relation
    }

    /// Own and extension properties, plus relation properties when asked.
    pub fn data_map(&self, with_relations: bool) -> Vec<&Property> {
        let relation: &[Property] = if with_relations { &self.relation } else { &[] };
        self.own
            .iter()
            .chain(self.extension.iter())
            .chain(relation.iter())
            .collect()
    }

    pub fn primary_keys(&self) -> Vec<&Property> {
        self.data_map(false)
            .into_iter()
            .filter(|p| p.primary())
            .collect()
    }

    pub fn auto_increment(&self) -> Option<&Property> {
        self.data_map(false)
            .into_iter()
            .find(|p| p.auto_increment())
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.data_map(true).into_iter().find(|p| p.name() == name)
    }

    pub fn property_by_column(&self, column: &str) -> Option<&Property> {
        self.data_map(true)
            .into_iter()
            .find(|p| p.column() == column)
    }

    /// Column name -> property.
    pub fn columns(&self) -> BTreeMap<&str, &Property> {
        self.data_map(true)
            .into_iter()
            .map(|p| (p.column(), p))
            .collect()
    }

    /// Relation properties referencing `other`'s primary key.
    pub fn relation_properties_for(&self, other: &str) -> Vec<&Property> {
        self.relation
            .iter()
            .filter(|p| p.related_class() == Some(other))
            .collect()
    }

    /// Resolve the relation kind between this class and `other`.
    ///
    /// `None` when neither side declares a relation. A one-sided
    /// declaration and ONE/ONE are `Broken`.
    pub fn relation_with(&self, other: &Model) -> Result<Option<RelationKind>> {
        let this_to_other = self.relation_side(other.class.name());
        let other_to_this = other.relation_side(self.class.name());
        match (this_to_other, other_to_this) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(Error::broken(
                self.class.name(),
                format!("has no relation with {}", other.class),
            )),
            (Some(_), None) => Err(Error::broken(
                other.class.name(),
                format!("has no relation with {}", self.class),
            )),
            (Some(a), Some(b)) => RelationKind::resolve(a, b).map(Some).ok_or_else(|| {
                Error::broken(
                    self.class.name(),
                    format!("cannot have one to one relation with {}", other.class),
                )
            }),
        }
    }

    /// Junction table name: both table names sorted and concatenated.
    pub fn relation_table_with(&self, other: &Model) -> String {
        let mut tables = [self.table.as_str(), other.table.as_str()];
        tables.sort_unstable();
        tables.concat()
    }

    /// Junction table shape for a many-to-many relation with `other`.
    pub fn junction_with(&self, other: &Model) -> Result<Junction> {
        if self.relation_with(other)? != Some(RelationKind::ManyToMany) {
            return Err(Error::broken(
                self.class.name(),
                format!("has no many to many relation with {}", other.class),
            ));
        }

        let side = |model: &Model| {
            let index = model.class.name().to_snake_case();
            let keys = model
                .primary_keys()
                .into_iter()
                .map(|pk| pk.relation_property().junction_property(&index))
                .collect::<Vec<_>>();
            (model.class, keys)
        };
        let mut sides = [side(self), side(other)];
        sides.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Junction {
            table: self.relation_table_with(other),
            sides,
        })
    }

    fn validate(&self) -> Result<()> {
        let what = self.class.name();
        let mut indexes: BTreeMap<&str, bool> = BTreeMap::new();
        let mut columns: BTreeMap<&str, &str> = BTreeMap::new();
        let mut auto_increment = 0;

        for property in self.data_map(true) {
            for (index, unique) in property.indexes() {
                match indexes.get(index.as_str()) {
                    Some(previous) if previous != unique => {
                        return Err(Error::broken(
                            what,
                            "index cannot be unique and not unique at the same time",
                        ));
                    }
                    _ => {
                        indexes.insert(index, *unique);
                    }
                }
            }
            if let Some(previous) = columns.insert(property.column(), property.name()) {
                return Err(Error::broken(
                    what,
                    format!(
                        "column {} is claimed by both {} and {}",
                        property.column(),
                        previous,
                        property.name()
                    ),
                ));
            }
            if property.auto_increment() {
                auto_increment += 1;
            }
        }

        if auto_increment > 1 {
            return Err(Error::broken(
                what,
                "cannot have more than one auto increment column",
            ));
        }
        if self.primary_keys().is_empty() {
            return Err(Error::broken(what, "has no primary key"));
        }
        Ok(())
    }
}

/// Shape of a many-to-many junction table.
#[derive(Debug, Clone)]
pub struct Junction {
    table: String,
    sides: [(EntityClass, Vec<Property>); 2],
}

impl Junction {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// All key columns, grouped by referenced class in name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.sides.iter().flat_map(|(_, keys)| keys.iter())
    }

    /// Key columns referencing `class`.
    pub fn keys_for(&self, class: &str) -> &[Property] {
        self.sides
            .iter()
            .find(|(c, _)| c.name() == class)
            .map_or(&[], |(_, keys)| keys.as_slice())
    }
}

/// Extension hook contributing extra properties to a class.
pub type DataMapHook = Box<dyn Fn(&EntityClass) -> Result<Vec<PropertyDef>> + Send + Sync>;

/// Model registry for one unit of work.
pub struct Models {
    converters: ConverterRegistry,
    hooks: Vec<DataMapHook>,
    base: HashMap<&'static str, Arc<Model>>,
    full: HashMap<&'static str, Arc<Model>>,
}

impl Default for Models {
    fn default() -> Self {
        Self::new()
    }
}

impl Models {
    /// Registry with the standard converters.
    pub fn new() -> Self {
        Self::with_converters(ConverterRegistry::standard())
    }

    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self {
            converters,
            hooks: Vec::new(),
            base: HashMap::new(),
            full: HashMap::new(),
        }
    }

    /// Register a converter available to every class.
    pub fn register_converter(&mut self, converter: Arc<dyn Converter>) {
        self.converters.register(converter);
        self.clear();
    }

    /// Register an extension hook, asked once per class for extra properties.
    pub fn on_data_map<F>(&mut self, hook: F)
    where
        F: Fn(&EntityClass) -> Result<Vec<PropertyDef>> + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
        self.clear();
    }

    /// Forget every built model.
    pub fn clear(&mut self) {
        self.base.clear();
        self.full.clear();
    }

    pub fn model_of<E: Entity>(&mut self) -> Result<Arc<Model>> {
        self.model(EntityClass::of::<E>())
    }

    /// The complete model of `class`, relation properties included.
    pub fn model(&mut self, class: EntityClass) -> Result<Arc<Model>> {
        if let Some(model) = self.full.get(class.name()) {
            return Ok(Arc::clone(model));
        }

        let base = self.base(class)?;
        let mut model = (*base).clone();
        for (other, side) in base.relations() {
            let other = self.base(other)?;
            base.relation_with(&other)?;
            if side == Side::Many {
                continue;
            }
            for key in other.primary_keys() {
                let property = key.relation_property();
                if model.property(property.name()).is_some() {
                    return Err(Error::broken(
                        class.name(),
                        format!(
                            "relation key name {} is already reserved for another property",
                            property.name()
                        ),
                    ));
                }
                model.relation.push(property);
            }
        }
        model.validate()?;

        tracing::debug!(
            class = class.name(),
            table = %model.table,
            properties = model.data_map(true).len(),
            "Built model"
        );

        let model = Arc::new(model);
        self.full.insert(class.name(), Arc::clone(&model));
        Ok(model)
    }

    /// Own and extension properties only.
    pub fn base(&mut self, class: EntityClass) -> Result<Arc<Model>> {
        if let Some(model) = self.base.get(class.name()) {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(self.build_base(class)?);
        self.base.insert(class.name(), Arc::clone(&model));
        Ok(model)
    }

    fn build_base(&self, class: EntityClass) -> Result<Model> {
        let name = class.name();
        let declaration = class.declare();
        let resolve = |converter: &str| {
            self.converters
                .get(converter)
                .or_else(|| class.converter(converter))
        };

        let table = declaration
            .table
            .unwrap_or_else(|| format!("{}s", name.to_snake_case()));
        if !is_identifier(&table) {
            return Err(Error::broken(name, format!("malformed table name {}", table)));
        }

        let mut relations = BTreeMap::new();
        for (other, side) in declaration.relations {
            if other == class {
                return Err(Error::broken(name, "cannot have a relation with itself"));
            }
            if let Some((_, previous)) = relations.insert(other.name(), (other, side)) {
                if previous != side {
                    return Err(Error::broken(
                        name,
                        format!("conflicting relation declarations with {}", other),
                    ));
                }
            }
        }

        let mut own: Vec<Property> = Vec::new();
        for declared in declaration.properties {
            let property = match declared {
                DeclaredProperty::Typed(def) => Property::build(name, def, &resolve)?,
                DeclaredProperty::Annotated {
                    name: property,
                    definition,
                    default,
                } => Property::parse(name, &property, &definition, default, &resolve)?,
            };
            if own.iter().any(|p| p.name() == property.name()) {
                return Err(Error::broken(
                    name,
                    format!("property {} is declared twice", property.name()),
                ));
            }
            own.push(property);
        }

        let mut extension: Vec<Property> = Vec::new();
        for hook in &self.hooks {
            for def in hook(&class)? {
                let property = Property::build(name, def, &resolve)?;
                let taken = own
                    .iter()
                    .chain(extension.iter())
                    .any(|p| p.name() == property.name());
                if taken {
                    return Err(Error::broken(
                        name,
                        format!(
                            "extension property name {} is already reserved for another property",
                            property.name()
                        ),
                    ));
                }
                extension.push(property);
            }
        }

        Ok(Model {
            class,
            table,
            relations,
            own,
            extension,
            relation: Vec::new(),
        })
    }
}

impl fmt::Debug for Models {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut built: Vec<&&str> = self.full.keys().collect();
        built.sort();
        f.debug_struct("Models")
            .field("converters", &self.converters)
            .field("hooks", &self.hooks.len())
            .field("built", &built)
            .finish()
    }
}
