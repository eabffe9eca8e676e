use crate::{
    runtime::{ModuleInstance, StaticCatalog},
    selection::{CodeSelector, MemoryConfig, SelectorConfig},
};

// Module catalog shared by the unit tests
pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_module("M", 0x1000, 0x100)
        .with_module("libc", 0x7000, 0x1000)
}

// Module M selected in every context, libc selected differently in contexts A and B
pub fn scenario_config() -> MemoryConfig {
    MemoryConfig::new()
        .with_selection("m_entry", "M", None, &[(0x00, 0x10)], &[(0x08, 0x10)])
        .with_selection("libc_a", "libc", Some("A"), &[(0x000, 0x010)], &[])
        .with_selection("libc_b", "libc", Some("B"), &[(0x800, 0x810)], &[])
}

pub fn scenario_selector() -> CodeSelector {
    CodeSelector::initialize(&scenario_config(), &catalog(), SelectorConfig::sequential())
}

pub fn module_m() -> ModuleInstance {
    ModuleInstance::new("M", "P", 0x1000, 0x100)
}

pub fn libc_in(context: &str) -> ModuleInstance {
    ModuleInstance::new("libc", context, 0x7000, 0x1000)
}
