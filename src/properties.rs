use crate::error::CadmiumError;
use crate::palette::Palette;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// Compares two names ignoring case and punctuation, so `"Trace Log"`,
/// `"traceLog"` and `"trace-log"` all address the same property.
pub(crate) fn fuzzy_compare(a: &str, b: &str) -> bool {
    let mut ai = a.chars().filter(|c| c.is_ascii_alphanumeric());
    let mut bi = b.chars().filter(|c| c.is_ascii_alphanumeric());
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x.eq_ignore_ascii_case(&y) => {}
            _ => return false,
        }
    }
}

/// Derives the lower-camel JSON key from a display name, e.g.
/// `"Instructions per frame"` becomes `"instructionsPerFrame"`.
pub fn make_json_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_upper = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_upper && !key.is_empty() {
                key.push(c.to_ascii_uppercase());
            } else {
                key.push(c.to_ascii_lowercase());
            }
            pending_upper = false;
        } else {
            pending_upper = true;
        }
    }
    key
}

/// Visibility and mutability of a property towards the host UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyAccess {
    ReadOnly,
    Writable,
    Invisible,
}

/// A bounded integer property value.
#[derive(Clone, Debug)]
pub struct IntegerValue {
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

impl IntegerValue {
    pub fn new(value: i32, min: i32, max: i32) -> Self {
        IntegerValue { value, min, max }
    }
}

/// A selection out of an ordered option list.
#[derive(Clone, Debug)]
pub struct ComboValue {
    pub index: usize,
    pub options: Vec<String>,
}

impl ComboValue {
    pub fn new<S: Into<String>>(options: Vec<S>) -> Self {
        ComboValue { index: 0, options: options.into_iter().map(Into::into).collect() }
    }

    pub fn selected_text(&self) -> &str {
        self.options.get(self.index).map(String::as_str).unwrap_or("")
    }

    /// Selects the option fuzzy-matching `text`; unknown text selects index 0.
    pub fn set_selected_text(&mut self, text: &str) {
        self.index = 0;
        for (i, opt) in self.options.iter().enumerate() {
            if fuzzy_compare(opt, text) {
                self.index = i;
            }
        }
    }
}

/// The typed payload of a [Property].
#[derive(Clone, Debug)]
pub enum PropertyValue {
    None,
    Bool(bool),
    Int(IntegerValue),
    String(String),
    Combo(ComboValue),
}

impl PropertyValue {
    /// Structural equality: integers compare by value only (not bounds), combos
    /// by selected index only.
    fn matches(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::None, PropertyValue::None) => true,
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.value == b.value,
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            (PropertyValue::Combo(a), PropertyValue::Combo(b)) => a.index == b.index,
            _ => false,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            PropertyValue::None => JsonValue::Null,
            PropertyValue::Bool(b) => json!(b),
            PropertyValue::Int(i) => json!(i.value),
            PropertyValue::String(s) => json!(s),
            PropertyValue::Combo(c) => json!(c.selected_text()),
        }
    }
}

/// A named, typed, documented configuration value.
#[derive(Clone, Debug)]
pub struct Property {
    name: String,
    json_key: String,
    description: String,
    additional_info: String,
    access: PropertyAccess,
    value: PropertyValue,
}

impl Property {
    pub fn new<S: Into<String>>(
        name: S,
        value: PropertyValue,
        description: S,
        access: PropertyAccess,
    ) -> Self {
        let name = name.into();
        let json_key = make_json_key(&name);
        Property {
            name,
            json_key,
            description: description.into(),
            additional_info: String::new(),
            access,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_key(&self) -> &str {
        &self.json_key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn additional_info(&self) -> &str {
        &self.additional_info
    }

    pub fn set_additional_info<S: Into<String>>(&mut self, info: S) {
        self.additional_info = info.into();
    }

    pub fn access(&self) -> PropertyAccess {
        self.access
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn get_bool(&self) -> bool {
        matches!(self.value, PropertyValue::Bool(true))
    }

    pub fn set_bool(&mut self, val: bool) {
        self.value = PropertyValue::Bool(val);
    }

    pub fn get_int(&self) -> i32 {
        match &self.value {
            PropertyValue::Int(i) => i.value,
            _ => 0,
        }
    }

    /// Sets the integer value, clamped to the property's bounds.
    pub fn set_int(&mut self, val: i32) {
        if let PropertyValue::Int(i) = &mut self.value {
            i.value = val.clamp(i.min, i.max);
        }
    }

    pub fn get_string(&self) -> &str {
        match &self.value {
            PropertyValue::String(s) => s,
            _ => "",
        }
    }

    pub fn set_string<S: Into<String>>(&mut self, val: S) {
        if let PropertyValue::String(s) = &mut self.value {
            *s = val.into();
        }
    }

    pub fn selected_text(&self) -> &str {
        match &self.value {
            PropertyValue::Combo(c) => c.selected_text(),
            _ => "",
        }
    }

    pub fn selected_index(&self) -> usize {
        match &self.value {
            PropertyValue::Combo(c) => c.index,
            _ => 0,
        }
    }

    pub fn set_selected_index(&mut self, idx: usize) {
        if let PropertyValue::Combo(c) = &mut self.value {
            c.index = idx.min(c.options.len().saturating_sub(1));
        }
    }

    pub fn set_selected_text(&mut self, text: &str) {
        if let PropertyValue::Combo(c) = &mut self.value {
            c.set_selected_text(text);
        }
    }

    /// Applies a JSON value of the matching shape onto this property.
    fn apply_json(&mut self, val: &JsonValue) -> Result<(), CadmiumError> {
        match (&mut self.value, val) {
            (PropertyValue::Bool(b), JsonValue::Bool(v)) => *b = *v,
            (PropertyValue::Int(_), JsonValue::Number(n)) => {
                self.set_int(n.as_i64().unwrap_or(0) as i32)
            }
            (PropertyValue::String(s), JsonValue::String(v)) => *s = v.clone(),
            (PropertyValue::Combo(c), JsonValue::String(v)) => c.set_selected_text(v),
            _ => {
                return Err(CadmiumError::PropertyTypeMismatch { name: self.name.clone() });
            }
        }
        Ok(())
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.value.matches(&other.value)
    }
}

/// A sparse difference between two [Properties] of the same class; only changed
/// JSON keys are carried. The class travels along so that applying a diff to a
/// foreign class fails loudly.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertiesDiff {
    pub class: String,
    pub values: Map<String, JsonValue>,
}

impl PropertiesDiff {
    pub fn to_json(&self) -> JsonValue {
        json!({ "class": self.class, "values": JsonValue::Object(self.values.clone()) })
    }

    pub fn from_json(val: &JsonValue) -> Result<Self, CadmiumError> {
        let class = val
            .get("class")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CadmiumError::PropertyClassMismatch {
                expected: String::new(),
                found: String::new(),
            })?
            .to_string();
        let values = val
            .get("values")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(PropertiesDiff { class, values })
    }
}

/// A named class of ordered, typed configuration values; the sole vehicle for
/// configuring a core.
///
/// Two `Properties` are equal iff their class matches and all values match,
/// regardless of how either was constructed.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    class: String,
    order: Vec<String>,
    map: HashMap<String, Property>,
    palette: Palette,
}

impl Properties {
    pub fn new<S: Into<String>>(class: S) -> Self {
        Properties {
            class: class.into(),
            order: Vec::new(),
            map: HashMap::new(),
            palette: Palette::default(),
        }
    }

    pub fn property_class(&self) -> &str {
        &self.class
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Adds a property; a second registration under the same name is ignored so
    /// prototypes stay canonical.
    pub fn register_property(&mut self, prop: Property) {
        if !self.map.contains_key(prop.name()) {
            self.order.push(prop.name().to_string());
            self.map.insert(prop.name().to_string(), prop);
        }
    }

    /// Ordered iteration, as registered (stable for menu rendering).
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.order.iter().filter_map(move |name| self.map.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn contains_fuzzy(&self, name: &str) -> bool {
        self.map.keys().any(|k| fuzzy_compare(k, name))
    }

    /// Exact-name access.
    pub fn get(&self, name: &str) -> Result<&Property, CadmiumError> {
        self.map
            .get(name)
            .ok_or_else(|| CadmiumError::UnknownProperty { name: name.to_string() })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Property, CadmiumError> {
        self.map
            .get_mut(name)
            .ok_or_else(|| CadmiumError::UnknownProperty { name: name.to_string() })
    }

    /// Case- and punctuation-insensitive access.
    pub fn at(&self, name: &str) -> Result<&Property, CadmiumError> {
        self.map
            .iter()
            .find(|(k, _)| fuzzy_compare(k, name))
            .map(|(_, v)| v)
            .ok_or_else(|| CadmiumError::UnknownProperty { name: name.to_string() })
    }

    pub fn at_mut(&mut self, name: &str) -> Result<&mut Property, CadmiumError> {
        self.map
            .iter_mut()
            .find(|(k, _)| fuzzy_compare(k, name))
            .map(|(_, v)| v)
            .ok_or_else(|| CadmiumError::UnknownProperty { name: name.to_string() })
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut Palette {
        &mut self.palette
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
    }

    /// Returns the name of the first property whose value differs from the
    /// memento, walking in registration order.
    pub fn changed_property(&self, memento: &Properties) -> Option<&str> {
        for name in &self.order {
            if let (Some(a), Some(b)) = (self.map.get(name), memento.map.get(name)) {
                if a != b {
                    return Some(name.as_str());
                }
            }
        }
        None
    }

    /// Serialises the values only (no metadata) as a flat JSON object keyed by
    /// the derived JSON keys, plus the palette when non-empty.
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        for prop in self.iter() {
            obj.insert(prop.json_key().to_string(), prop.value().to_json());
        }
        if !self.palette.is_empty() {
            obj.insert("palette".into(), serde_json::to_value(&self.palette).unwrap_or_default());
        }
        JsonValue::Object(obj)
    }

    /// Applies a flat JSON value object onto this instance; unknown keys are
    /// preserved-by-ignoring, as hand-edited documents may carry extras.
    pub fn apply_json(&mut self, val: &JsonValue) -> Result<(), CadmiumError> {
        let Some(obj) = val.as_object() else { return Ok(()) };
        for name in self.order.clone() {
            let key = self.map[&name].json_key().to_string();
            if let Some(v) = obj.get(&key) {
                self.map.get_mut(&name).unwrap().apply_json(v)?;
            }
        }
        if let Some(pal) = obj.get("palette") {
            if let Ok(p) = serde_json::from_value::<Palette>(pal.clone()) {
                self.palette = p;
            }
        }
        Ok(())
    }

    /// Produces the sparse diff that, applied to `self`, yields `other`.
    pub fn create_diff(&self, other: &Properties) -> PropertiesDiff {
        let mut values = Map::new();
        for name in &self.order {
            if let (Some(a), Some(b)) = (self.map.get(name), other.map.get(name)) {
                if a != b {
                    values.insert(a.json_key().to_string(), b.value().to_json());
                }
            }
        }
        PropertiesDiff { class: self.class.clone(), values }
    }

    /// Applies a diff produced by [Properties::create_diff]; the diff's class
    /// must match this instance's class.
    pub fn apply_diff(&mut self, diff: &PropertiesDiff) -> Result<(), CadmiumError> {
        if diff.class != self.class {
            return Err(CadmiumError::PropertyClassMismatch {
                expected: self.class.clone(),
                found: diff.class.clone(),
            });
        }
        for name in self.order.clone() {
            let key = self.map[&name].json_key().to_string();
            if let Some(v) = diff.values.get(&key) {
                self.map.get_mut(&name).unwrap().apply_json(v)?;
            }
        }
        Ok(())
    }
}

impl PartialEq for Properties {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.order.len() == other.order.len()
            && self
                .order
                .iter()
                .all(|name| match (self.map.get(name), other.map.get(name)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                })
            && self.palette == other.palette
    }
}

/// The prototype registry: class name to canonical [Properties] template, so any
/// two instances of a class start out identical.
///
/// This is a plain value owned by the application context; it has to outlive the
/// cores configured from it, nothing more.
#[derive(Default)]
pub struct PropertyRegistry {
    prototypes: HashMap<String, Properties>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        PropertyRegistry::default()
    }

    /// Returns the prototype for `class`, creating it through `init` on first
    /// use.
    pub fn prototype_or_init<F>(&mut self, class: &str, init: F) -> &Properties
    where
        F: FnOnce() -> Properties,
    {
        self.prototypes.entry(class.to_string()).or_insert_with(init)
    }

    /// Fuzzy prototype lookup.
    pub fn prototype(&self, class: &str) -> Option<&Properties> {
        self.prototypes
            .iter()
            .find(|(k, _)| fuzzy_compare(k, class))
            .map(|(_, v)| v)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_properties() -> Properties {
        let mut props = Properties::new("TEST-CLASS");
        props.register_property(Property::new(
            "Trace Log",
            PropertyValue::Bool(false),
            "Enable trace log",
            PropertyAccess::Writable,
        ));
        props.register_property(Property::new(
            "Instructions per frame",
            PropertyValue::Int(IntegerValue::new(15, 0, 1_000_000)),
            "Instructions per frame",
            PropertyAccess::Writable,
        ));
        props.register_property(Property::new(
            "Memory",
            PropertyValue::Combo(ComboValue::new(vec!["2048", "4096"])),
            "Size of ram in bytes",
            PropertyAccess::Writable,
        ));
        props
    }

    #[test]
    fn test_json_key_derivation() {
        assert_eq!(make_json_key("Instructions per frame"), "instructionsPerFrame");
        assert_eq!(make_json_key("Trace Log"), "traceLog");
        assert_eq!(make_json_key("CPU"), "cpu");
    }

    #[test]
    fn test_fuzzy_compare() {
        assert!(fuzzy_compare("Trace Log", "traceLog"));
        assert!(fuzzy_compare("trace-log", "TRACELOG"));
        assert!(!fuzzy_compare("Trace Log", "traceLo"));
    }

    #[test]
    fn test_structural_equality() {
        let a = setup_test_properties();
        let b = setup_test_properties();
        assert_eq!(a, b);
    }

    #[test]
    fn test_changed_property() {
        let a = setup_test_properties();
        let mut b = setup_test_properties();
        b.at_mut("instructionsPerFrame").unwrap().set_int(30);
        assert_eq!(b.changed_property(&a), Some("Instructions per frame"));
        assert_eq!(a.changed_property(&a), None);
    }

    #[test]
    fn test_diff_round_trip() {
        let p = setup_test_properties();
        let mut q = setup_test_properties();
        q.at_mut("traceLog").unwrap().set_bool(true);
        q.at_mut("memory").unwrap().set_selected_text("4096");
        let diff = p.create_diff(&q);
        assert_eq!(diff.values.len(), 2);
        let mut applied = p.clone();
        applied.apply_diff(&diff).unwrap();
        assert_eq!(applied, q);
    }

    #[test]
    fn test_diff_class_mismatch() {
        let p = setup_test_properties();
        let q = setup_test_properties();
        let mut diff = p.create_diff(&q);
        diff.class = "OTHER".into();
        let mut target = setup_test_properties();
        assert!(matches!(
            target.apply_diff(&diff),
            Err(CadmiumError::PropertyClassMismatch { .. })
        ));
    }

    #[test]
    fn test_value_json_round_trip() {
        let mut p = setup_test_properties();
        p.at_mut("traceLog").unwrap().set_bool(true);
        let json = p.to_json();
        let mut q = setup_test_properties();
        q.apply_json(&json).unwrap();
        assert_eq!(p, q);
        assert_eq!(p.to_json(), q.to_json());
    }

    #[test]
    fn test_int_clamping() {
        let mut p = setup_test_properties();
        p.at_mut("instructionsPerFrame").unwrap().set_int(-5);
        assert_eq!(p.at("instructionsPerFrame").unwrap().get_int(), 0);
    }

    #[test]
    fn test_registry_prototype_identity() {
        let mut reg = PropertyRegistry::new();
        reg.prototype_or_init("TEST-CLASS", setup_test_properties);
        let one = reg.prototype("TEST-CLASS").unwrap().clone();
        let two = reg.prototype("test class").unwrap().clone();
        assert_eq!(one, two);
    }
}
