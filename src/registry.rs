//! The factory map from property class to core constructor, plus the preset
//! catalogue the host renders its menus from.

use crate::chip8::variants::Chip8Variant;
use crate::chip8::{Chip8GenericCore, Chip8Options, Chip8Preset, PROP_CLASS_GENERIC};
use crate::core::EmulationCore;
use crate::error::CadmiumError;
use crate::hybrid::dream6800::{Dream6800, Dream6800Options, PROP_CLASS_DREAM6800};
use crate::hybrid::eti660::{Eti660, Eti660Options, PROP_CLASS_ETI660};
use crate::hybrid::vip::{CosmacVip, VipOptions, PROP_CLASS_COSMAC_VIP};
use crate::properties::{fuzzy_compare, Properties, PropertyRegistry};
use std::collections::HashMap;

/// One selectable machine configuration.
pub struct Preset {
    pub name: String,
    pub description: String,
    /// Semicolon-separated default file extensions, e.g. `".ch8;.c8"`.
    pub default_extensions: String,
    pub variants: Chip8Variant,
    pub properties: Properties,
}

/// A constructor for one property class of cores.
pub trait CoreFactory {
    fn class_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Short prefix used when composing variant names for display.
    fn prefix(&self) -> &'static str;
    fn presets(&self, registry: &mut PropertyRegistry) -> Vec<Preset>;
    fn create(
        &self,
        registry: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<Box<dyn EmulationCore>, CadmiumError>;
}

struct GenericChip8Factory;

impl CoreFactory for GenericChip8Factory {
    fn class_name(&self) -> &'static str {
        PROP_CLASS_GENERIC
    }

    fn description(&self) -> &'static str {
        "Quirk-parameterised CHIP-8 interpreter"
    }

    fn prefix(&self) -> &'static str {
        "CHIP8"
    }

    fn presets(&self, registry: &mut PropertyRegistry) -> Vec<Preset> {
        let entries: [(Chip8Preset, &str, &str); 8] = [
            (Chip8Preset::Chip8, "The classic interpreter semantics", ".ch8;.c8"),
            (Chip8Preset::Chip8X, "CHIP-8 with the VP-590 colour extensions", ".c8x"),
            (Chip8Preset::Chip48, "The HP48 re-implementation", ".ch48;.c48"),
            (Chip8Preset::SChip10, "SUPER-CHIP 1.0 for the HP48S", ".sc8"),
            (Chip8Preset::SChip11, "SUPER-CHIP 1.1 for the HP48SX", ".sc8"),
            (Chip8Preset::SChipC, "SUPER-CHIP with compatibility fixes", ".scc;.sc8"),
            (Chip8Preset::MegaChip, "MEGA-CHIP with 256x192 colour", ".mc8"),
            (Chip8Preset::XoChip, "Octo's XO-CHIP extensions", ".xo8"),
        ];
        entries
            .iter()
            .map(|(preset, description, extensions)| Preset {
                name: preset.name().to_string(),
                description: description.to_string(),
                default_extensions: extensions.to_string(),
                variants: preset.variant(),
                properties: Chip8Options::for_preset(*preset).as_properties(registry),
            })
            .collect()
    }

    fn create(
        &self,
        registry: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<Box<dyn EmulationCore>, CadmiumError> {
        Ok(Box::new(Chip8GenericCore::new(registry, props)?))
    }
}

struct CosmacVipFactory;

impl CoreFactory for CosmacVipFactory {
    fn class_name(&self) -> &'static str {
        PROP_CLASS_COSMAC_VIP
    }

    fn description(&self) -> &'static str {
        "Hardware emulation of an RCA COSMAC VIP"
    }

    fn prefix(&self) -> &'static str {
        "VIP"
    }

    fn presets(&self, registry: &mut PropertyRegistry) -> Vec<Preset> {
        let mut chip8 = VipOptions::default();
        chip8.start_address = 0x200;
        let mut tpd = VipOptions::default();
        tpd.start_address = 0x260;
        let mut raw = VipOptions::default();
        raw.start_address = 0x000;
        vec![
            Preset {
                name: "CHIP-8".into(),
                description: "CHIP-8 on a COSMAC VIP".into(),
                default_extensions: ".ch8;.c8".into(),
                variants: Chip8Variant::CHIP_8_VIP,
                properties: chip8.as_properties(registry),
            },
            Preset {
                name: "CHIP-8-TPD".into(),
                description: "Two-page-display CHIP-8 on a COSMAC VIP".into(),
                default_extensions: ".c8tp".into(),
                variants: Chip8Variant::CHIP_8_VIP,
                properties: tpd.as_properties(registry),
            },
            Preset {
                name: "NONE".into(),
                description: "Raw COSMAC VIP".into(),
                default_extensions: ".bin;.ram;.vip".into(),
                variants: Chip8Variant::CHIP_8_VIP,
                properties: raw.as_properties(registry),
            },
        ]
    }

    fn create(
        &self,
        registry: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<Box<dyn EmulationCore>, CadmiumError> {
        Ok(Box::new(CosmacVip::new(registry, props)?))
    }
}

struct Dream6800Factory;

impl CoreFactory for Dream6800Factory {
    fn class_name(&self) -> &'static str {
        PROP_CLASS_DREAM6800
    }

    fn description(&self) -> &'static str {
        "Hardware emulation of a DREAM6800"
    }

    fn prefix(&self) -> &'static str {
        "DREAM"
    }

    fn presets(&self, registry: &mut PropertyRegistry) -> Vec<Preset> {
        let mut raw = Dream6800Options::default();
        raw.start_address = 0;
        raw.ram_size = 2048;
        let chipos = Dream6800Options::default();
        let mut chiposlo = Dream6800Options::default();
        chiposlo.rom_name = "CHIPOSLO".into();
        vec![
            Preset {
                name: "NONE".into(),
                description: "Raw DREAM6800".into(),
                default_extensions: ".bin;.hex;.ram;.raw".into(),
                variants: Chip8Variant::CHIP_8_D6800,
                properties: raw.as_properties(registry),
            },
            Preset {
                name: "CHIP-8".into(),
                description: "CHIP-8 DREAM6800".into(),
                default_extensions: ".ch8".into(),
                variants: Chip8Variant::CHIP_8_D6800,
                properties: chipos.as_properties(registry),
            },
            Preset {
                name: "CHIP-8-LOP".into(),
                description: "CHIP-8 with logical operators on DREAM6800".into(),
                default_extensions: ".ch8".into(),
                variants: Chip8Variant::CHIP_8_D6800,
                properties: chiposlo.as_properties(registry),
            },
        ]
    }

    fn create(
        &self,
        registry: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<Box<dyn EmulationCore>, CadmiumError> {
        Ok(Box::new(Dream6800::new(registry, props)?))
    }
}

struct Eti660Factory;

impl CoreFactory for Eti660Factory {
    fn class_name(&self) -> &'static str {
        PROP_CLASS_ETI660
    }

    fn description(&self) -> &'static str {
        "Hardware emulation of an ETI660"
    }

    fn prefix(&self) -> &'static str {
        "ETI"
    }

    fn presets(&self, registry: &mut PropertyRegistry) -> Vec<Preset> {
        vec![Preset {
            name: "CHIP-8".into(),
            description: "CHIP-8 on an ETI-660".into(),
            default_extensions: ".ch8;.c8e".into(),
            variants: Chip8Variant::CHIP_8_ETI660,
            properties: Eti660Options::default().as_properties(registry),
        }]
    }

    fn create(
        &self,
        registry: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<Box<dyn EmulationCore>, CadmiumError> {
        Ok(Box::new(Eti660::new(registry, props)?))
    }
}

/// The registry itself. Preset and factory iteration order is the registration
/// order, so menus stay stable; class lookup is fuzzy (case and punctuation
/// insensitive).
pub struct CoreRegistry {
    order: Vec<&'static str>,
    factories: HashMap<&'static str, Box<dyn CoreFactory>>,
}

impl Default for CoreRegistry {
    fn default() -> Self {
        CoreRegistry::new()
    }
}

impl CoreRegistry {
    /// A registry with all built-in cores registered.
    pub fn new() -> Self {
        let mut registry = CoreRegistry { order: Vec::new(), factories: HashMap::new() };
        registry.register_factory(Box::new(GenericChip8Factory));
        registry.register_factory(Box::new(CosmacVipFactory));
        registry.register_factory(Box::new(Dream6800Factory));
        registry.register_factory(Box::new(Eti660Factory));
        registry
    }

    pub fn register_factory(&mut self, factory: Box<dyn CoreFactory>) {
        let class = factory.class_name();
        if !self.factories.contains_key(class) {
            self.order.push(class);
            self.factories.insert(class, factory);
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.order.iter().copied()
    }

    /// Fuzzy class lookup.
    pub fn factory(&self, class: &str) -> Option<&dyn CoreFactory> {
        self.order
            .iter()
            .find(|name| fuzzy_compare(name, class))
            .and_then(|name| self.factories.get(name))
            .map(Box::as_ref)
    }

    /// All presets of all factories, in registration order.
    pub fn presets(&self, properties: &mut PropertyRegistry) -> Vec<(&'static str, Preset)> {
        let mut result = Vec::new();
        for class in &self.order {
            for preset in self.factories[class].presets(properties) {
                result.push((*class, preset));
            }
        }
        result
    }

    /// First preset claiming the given file extension (leading dot included).
    pub fn properties_for_extension(
        &self,
        properties: &mut PropertyRegistry,
        extension: &str,
    ) -> Option<Properties> {
        let needle = extension.to_ascii_lowercase();
        for (_, preset) in self.presets(properties) {
            if preset
                .default_extensions
                .split(';')
                .any(|ext| ext.eq_ignore_ascii_case(&needle))
            {
                return Some(preset.properties);
            }
        }
        None
    }

    /// Identity-matches `props` against the preset templates, returning the
    /// preset name when one matches structurally.
    pub fn preset_for_properties(
        &self,
        properties: &mut PropertyRegistry,
        props: &Properties,
    ) -> Option<String> {
        for (_, preset) in self.presets(properties) {
            if &preset.properties == props {
                return Some(preset.name);
            }
        }
        None
    }

    /// Constructs a core for the given properties. An unrecognised property
    /// class is a hard error, never a silent fallback.
    pub fn create(
        &self,
        properties: &mut PropertyRegistry,
        props: &Properties,
    ) -> Result<(String, Box<dyn EmulationCore>), CadmiumError> {
        let factory = self.factory(props.property_class()).ok_or_else(|| {
            CadmiumError::UnknownPropertyClass { class: props.property_class().to_string() }
        })?;
        let variant_name = self
            .preset_for_properties(properties, props)
            .map(|preset| format!("{}-{}", factory.prefix(), preset))
            .unwrap_or_else(|| factory.class_name().to_string());
        let core = factory.create(properties, props)?;
        Ok((variant_name, core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_class_is_fatal() {
        let registry = CoreRegistry::new();
        let mut props_reg = PropertyRegistry::new();
        let props = Properties::new("NO-SUCH-CORE");
        assert!(matches!(
            registry.create(&mut props_reg, &props),
            Err(CadmiumError::UnknownPropertyClass { .. })
        ));
    }

    #[test]
    fn test_fuzzy_class_lookup() {
        let registry = CoreRegistry::new();
        assert!(registry.factory("chip8generic").is_some());
        assert!(registry.factory("dream 6800").is_some());
        assert!(registry.factory("eti-660").is_some());
    }

    #[test]
    fn test_preset_order_is_stable() {
        let registry = CoreRegistry::new();
        let mut props_reg = PropertyRegistry::new();
        let presets = registry.presets(&mut props_reg);
        let generic: Vec<&str> = presets
            .iter()
            .filter(|(class, _)| *class == PROP_CLASS_GENERIC)
            .map(|(_, p)| p.name.as_str())
            .collect();
        assert_eq!(
            generic,
            ["CHIP-8", "CHIP-8X", "CHIP-48", "SCHIP-1.0", "SCHIP-1.1", "SCHIPC", "MEGACHIP", "XO-CHIP"]
        );
    }

    #[test]
    fn test_preset_for_properties_round_trip() {
        let registry = CoreRegistry::new();
        let mut props_reg = PropertyRegistry::new();
        let props = Chip8Options::for_preset(Chip8Preset::SChip11).as_properties(&mut props_reg);
        assert_eq!(
            registry.preset_for_properties(&mut props_reg, &props).as_deref(),
            Some("SCHIP-1.1")
        );
    }

    #[test]
    fn test_properties_for_extension() {
        let registry = CoreRegistry::new();
        let mut props_reg = PropertyRegistry::new();
        let props = registry.properties_for_extension(&mut props_reg, ".xo8").unwrap();
        assert_eq!(props.property_class(), PROP_CLASS_GENERIC);
        assert!(registry.properties_for_extension(&mut props_reg, ".nope").is_none());
    }

    #[test]
    fn test_create_generic_core() {
        let registry = CoreRegistry::new();
        let mut props_reg = PropertyRegistry::new();
        let props = Chip8Options::for_preset(Chip8Preset::Chip8).as_properties(&mut props_reg);
        let (variant, core) = registry.create(&mut props_reg, &props).unwrap();
        assert_eq!(variant, "CHIP8-CHIP-8");
        assert_eq!(core.name(), "GenericChip8");
    }
}
