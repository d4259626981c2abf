//! The process-wide module registry and its scoped patches.
//!
//! The registry is this crate's import mechanism: code under test resolves
//! named modules through [`import`], and tests reshape what resolution sees
//! with four patches — [`MaskModules`] (names become unresolvable),
//! [`StubModules`] (auto-vivifying stand-ins), [`ModuleExists`] (dotted
//! paths guaranteed present), and [`ResetModules`] (entries temporarily
//! popped). Every patch restores the registry byte-for-byte: entries that
//! were absent before a scope are absent after it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{PatchError, Result};
use crate::mock::Mock;
use crate::scope::{state_lock, Scope, StateGuard};
use crate::values::{json_is_falsy, AttrTarget};

/// Attribute slot of a [`Module`]: a submodule link, a mock, or a plain
/// value.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    /// A child module wired into its parent.
    Module(Module),
    /// A mock, usually auto-vivified on a stub module.
    Mock(Mock),
    /// A plain value, e.g. a module-level constant.
    Value(Value),
}

impl Attr {
    /// The module behind this attribute, if it is one.
    pub fn as_module(&self) -> Option<&Module> {
        match self {
            Attr::Module(module) => Some(module),
            _ => None,
        }
    }

    /// The mock behind this attribute, if it is one.
    pub fn as_mock(&self) -> Option<&Mock> {
        match self {
            Attr::Mock(mock) => Some(mock),
            _ => None,
        }
    }

    /// The plain value behind this attribute, if it is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attr::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Module> for Attr {
    fn from(module: Module) -> Self {
        Attr::Module(module)
    }
}

impl From<Mock> for Attr {
    fn from(mock: Mock) -> Self {
        Attr::Mock(mock)
    }
}

impl From<Value> for Attr {
    fn from(value: Value) -> Self {
        Attr::Value(value)
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Attr::Value(Value::from(value))
    }
}

struct ModuleInner {
    name: String,
    stub: bool,
    attrs: Mutex<HashMap<String, Attr>>,
}

/// Cheap-clone module handle.
///
/// Identity is the allocation: a registry entry restored after a patch
/// compares equal to the handle that was saved from it, and clones observe
/// the same attribute table.
#[derive(Clone)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

impl Module {
    /// Create a plain module: undefined attributes read as `None`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), false)
    }

    /// Create a stub module: undefined attributes auto-vivify into cached
    /// [`Mock`]s.
    pub fn stub(name: impl Into<String>) -> Self {
        Self::build(name.into(), true)
    }

    fn build(name: String, stub: bool) -> Self {
        Self {
            inner: Arc::new(ModuleInner {
                name,
                stub,
                attrs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The module's registered name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether undefined attribute reads auto-vivify.
    pub fn is_stub(&self) -> bool {
        self.inner.stub
    }

    /// Read an attribute.
    ///
    /// On stub modules an undefined name creates a fresh [`Mock`], caches
    /// it, and returns it — the same mock on every later read.
    pub fn attr(&self, name: &str) -> Option<Attr> {
        let mut attrs = self.inner.attrs.lock();
        if let Some(attr) = attrs.get(name) {
            return Some(attr.clone());
        }
        if self.inner.stub {
            let attr = Attr::Mock(Mock::named(format!("{}.{}", self.inner.name, name)));
            attrs.insert(name.to_string(), attr.clone());
            return Some(attr);
        }
        None
    }

    /// Read an attribute without auto-vivifying stub entries.
    pub fn get(&self, name: &str) -> Option<Attr> {
        self.inner.attrs.lock().get(name).cloned()
    }

    /// Install an attribute.
    pub fn set(&self, name: impl Into<String>, attr: impl Into<Attr>) {
        self.inner.attrs.lock().insert(name.into(), attr.into());
    }

    /// Remove an attribute, returning what was there.
    pub fn remove(&self, name: &str) -> Option<Attr> {
        self.inner.attrs.lock().remove(name)
    }
}

impl PartialEq for Module {
    /// Modules compare by identity, not by name.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Module {}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.inner.name)
            .field("stub", &self.inner.stub)
            .finish()
    }
}

impl AttrTarget for Module {
    type Value = Attr;

    fn target_name(&self) -> String {
        format!("module '{}'", self.inner.name)
    }

    fn get_attr(&self, name: &str) -> Option<Attr> {
        self.get(name)
    }

    fn set_attr(&self, name: &str, value: Attr) {
        self.set(name, value);
    }

    fn remove_attr(&self, name: &str) -> Option<Attr> {
        self.remove(name)
    }

    fn is_falsy(value: &Attr) -> bool {
        match value {
            Attr::Value(value) => json_is_falsy(value),
            Attr::Mock(_) | Attr::Module(_) => false,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    modules: HashMap<String, Module>,
    masked: HashSet<String>,
}

static REGISTRY: Lazy<ModuleRegistry> = Lazy::new(|| ModuleRegistry {
    inner: Mutex::new(RegistryInner::default()),
});

/// The single process-wide registry instance.
pub fn registry() -> &'static ModuleRegistry {
    &REGISTRY
}

/// Resolve a registered module by name; see [`ModuleRegistry::import`].
pub fn import(name: &str) -> Result<Module> {
    registry().import(name)
}

/// Process-wide module table with a masked-name set consulted first.
pub struct ModuleRegistry {
    inner: Mutex<RegistryInner>,
}

impl ModuleRegistry {
    /// Resolve a registered module.
    ///
    /// Masked names fail with [`PatchError::ModuleNotFound`] even while an
    /// entry is registered; handles bound before masking are unaffected.
    pub fn import(&self, name: &str) -> Result<Module> {
        let inner = self.inner.lock();
        if inner.masked.contains(name) {
            return Err(PatchError::not_found(name));
        }
        inner
            .modules
            .get(name)
            .cloned()
            .ok_or_else(|| PatchError::not_found(name))
    }

    /// Register a module under its name, returning any displaced entry.
    pub fn register(&self, module: Module) -> Option<Module> {
        self.inner
            .lock()
            .modules
            .insert(module.name().to_string(), module)
    }

    /// Remove an entry, returning it.
    pub fn remove(&self, name: &str) -> Option<Module> {
        self.inner.lock().modules.remove(name)
    }

    /// Whether an entry is registered, masked or not.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().modules.contains_key(name)
    }

    fn mask(&self, names: &[String]) -> Vec<String> {
        let mut inner = self.inner.lock();
        names
            .iter()
            .filter(|name| inner.masked.insert((*name).clone()))
            .cloned()
            .collect()
    }

    fn unmask(&self, names: &[String]) {
        let mut inner = self.inner.lock();
        for name in names {
            inner.masked.remove(name);
        }
    }
}

/// Resolve a dotted or colon-separated symbol path through the registry.
///
/// `"amqp.channel.Channel"` resolves module `amqp.channel` attribute
/// `Channel`; `"amqp.channel:Channel"` makes the split explicit; a bare
/// name resolves to the module itself.
pub fn lookup(path: &str) -> Result<Attr> {
    let (module_name, attr_name) = if let Some((module, attr)) = path.split_once(':') {
        (module, Some(attr))
    } else if let Some((module, attr)) = path.rsplit_once('.') {
        (module, Some(attr))
    } else {
        (path, None)
    };
    let module = registry().import(module_name)?;
    match attr_name {
        None => Ok(Attr::Module(module)),
        Some(attr_name) => module
            .attr(attr_name)
            .ok_or_else(|| PatchError::symbol_not_found(path)),
    }
}

fn into_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// Expand dotted names to include every ancestor, deduplicated and sorted
/// so parents precede their children.
fn expand_ancestors(names: &[String]) -> Vec<String> {
    let mut expanded = HashSet::new();
    for name in names {
        let mut prefix = String::new();
        for part in name.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            expanded.insert(prefix.clone());
        }
    }
    let mut expanded: Vec<String> = expanded.into_iter().collect();
    expanded.sort();
    expanded
}

struct MaskSaved {
    newly_masked: Vec<String>,
    _lock: StateGuard,
}

/// Make names unresolvable through [`import`] for the duration of the
/// scope.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{registry, scope::with};
///
/// registry::registry().register(registry::Module::new("doc.masked"));
/// with(registry::MaskModules::new(["doc.masked"]), |_| {
///     assert!(registry::import("doc.masked").is_err());
/// })
/// .unwrap();
/// assert!(registry::import("doc.masked").is_ok());
/// ```
pub struct MaskModules {
    names: Vec<String>,
    saved: Option<MaskSaved>,
}

impl MaskModules {
    /// Mask each of `names`.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: into_names(names),
            saved: None,
        }
    }
}

impl Scope for MaskModules {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let lock = state_lock();
        let newly_masked = registry().mask(&self.names);
        tracing::debug!(masked = ?newly_masked, "module mask installed");
        self.saved = Some(MaskSaved {
            newly_masked,
            _lock: lock,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            registry().unmask(&saved.newly_masked);
            tracing::debug!(masked = ?saved.newly_masked, "module mask released");
        }
        Ok(())
    }
}

struct StubSaved {
    prior: Vec<(String, Option<Module>)>,
    _lock: StateGuard,
}

/// Install auto-vivifying stub modules under the given names.
///
/// Dotted names are expanded to include every ancestor, and child stubs
/// are wired into their parent's attribute table, so both
/// `import("foo.bar")` and `lookup("foo.bar")` resolve to the same stub.
/// Prior registrations are put back on release; names with no prior
/// registration are removed again.
pub struct StubModules {
    names: Vec<String>,
    saved: Option<StubSaved>,
}

impl StubModules {
    /// Stub each of `names` (plus ancestors of dotted names).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = into_names(names);
        Self {
            names: expand_ancestors(&names),
            saved: None,
        }
    }
}

impl Scope for StubModules {
    /// The installed stubs, in name order.
    type Handle = Vec<Module>;

    fn acquire(&mut self) -> Result<Vec<Module>> {
        let lock = state_lock();
        let mut prior = Vec::with_capacity(self.names.len());
        let mut installed: HashMap<String, Module> = HashMap::new();
        let mut stubs = Vec::with_capacity(self.names.len());

        for name in &self.names {
            let stub = Module::stub(name.clone());
            prior.push((name.clone(), registry().register(stub.clone())));
            if let Some((parent, leaf)) = name.rsplit_once('.') {
                // Ancestors sort before children, so the parent stub is
                // already in `installed`.
                if let Some(parent) = installed.get(parent) {
                    parent.set(leaf, stub.clone());
                }
            }
            installed.insert(name.clone(), stub.clone());
            stubs.push(stub);
        }

        tracing::debug!(names = ?self.names, "stub modules installed");
        self.saved = Some(StubSaved { prior, _lock: lock });
        Ok(stubs)
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            for (name, prior) in saved.prior {
                match prior {
                    Some(module) => {
                        registry().register(module);
                    }
                    None => {
                        registry().remove(&name);
                    }
                }
            }
            tracing::debug!(names = ?self.names, "stub modules released");
        }
        Ok(())
    }
}

struct ExistsSaved {
    entries: Vec<(String, Option<Module>)>,
    parent_attrs: Vec<(Module, String, Option<Attr>)>,
    _lock: StateGuard,
}

/// Guarantee dotted module paths exist for the duration of the scope.
///
/// Missing path components are created as plain modules, parents first,
/// and each child is wired into its parent's attribute table. Release
/// unwinds the wiring and the registrations in reverse creation order,
/// restoring whatever was there before.
pub struct ModuleExists {
    paths: Vec<String>,
    saved: Option<ExistsSaved>,
}

impl ModuleExists {
    /// Ensure each of `paths` resolves.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: into_names(paths),
            saved: None,
        }
    }
}

impl Scope for ModuleExists {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let lock = state_lock();
        let mut entries = Vec::new();
        let mut parent_attrs = Vec::new();

        for path in &self.paths {
            let mut parent: Option<Module> = None;
            let mut prefix = String::new();
            for part in path.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(part);

                let module = match registry().import(&prefix) {
                    Ok(existing) => existing,
                    Err(_) => {
                        let created = Module::new(prefix.clone());
                        entries.push((prefix.clone(), registry().register(created.clone())));
                        created
                    }
                };
                if let Some(parent) = parent {
                    parent_attrs.push((parent.clone(), part.to_string(), parent.get(part)));
                    parent.set(part, module.clone());
                }
                parent = Some(module);
            }
        }

        tracing::debug!(paths = ?self.paths, "module existence patch installed");
        self.saved = Some(ExistsSaved {
            entries,
            parent_attrs,
            _lock: lock,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            for (parent, name, prior) in saved.parent_attrs.into_iter().rev() {
                match prior {
                    Some(attr) => parent.set(name, attr),
                    None => {
                        parent.remove(&name);
                    }
                }
            }
            for (name, prior) in saved.entries.into_iter().rev() {
                match prior {
                    Some(module) => {
                        registry().register(module);
                    }
                    None => {
                        registry().remove(&name);
                    }
                }
            }
            tracing::debug!(paths = ?self.paths, "module existence patch released");
        }
        Ok(())
    }
}

struct ResetSaved {
    removed: Vec<(String, Module)>,
    _lock: StateGuard,
}

/// Pop registry entries so code under test observes a cold registry, then
/// put the saved entries back on release.
///
/// Entries the protected code registered under the same names are
/// displaced by the restore; entries under other names are left alone.
pub struct ResetModules {
    names: Vec<String>,
    saved: Option<ResetSaved>,
}

impl ResetModules {
    /// Pop each of `names` that is currently registered.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: into_names(names),
            saved: None,
        }
    }
}

impl Scope for ResetModules {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let lock = state_lock();
        let mut removed = Vec::new();
        for name in &self.names {
            if let Some(module) = registry().remove(name) {
                removed.push((name.clone(), module));
            }
        }
        tracing::debug!(names = ?self.names, "module reset installed");
        self.saved = Some(ResetSaved {
            removed,
            _lock: lock,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            for (_, module) in saved.removed {
                registry().register(module);
            }
            tracing::debug!(names = ?self.names, "module reset released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::with;
    use serde_json::json;

    #[test]
    fn import_fails_for_unregistered_names() {
        let error = import("regtest.never_registered").unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn masked_names_fail_and_recover() {
        let _serial = state_lock();
        registry().register(Module::new("regtest.maskable"));

        with(MaskModules::new(["regtest.maskable"]), |_| {
            assert!(import("regtest.maskable").is_err());
        })
        .unwrap();
        assert!(import("regtest.maskable").is_ok());

        registry().remove("regtest.maskable");
    }

    #[test]
    fn masking_does_not_affect_already_bound_handles() {
        let _serial = state_lock();
        let module = Module::new("regtest.bound");
        module.set("constant", json!(1));
        registry().register(module.clone());

        with(MaskModules::new(["regtest.bound"]), |_| {
            assert_eq!(module.get("constant"), Some(Attr::Value(json!(1))));
        })
        .unwrap();

        registry().remove("regtest.bound");
    }

    #[test]
    fn stacked_masks_unmask_only_their_own_names() {
        let _serial = state_lock();
        with(MaskModules::new(["regtest.shared"]), |_| {
            with(MaskModules::new(["regtest.shared"]), |_| {
                assert!(import("regtest.shared").is_err());
            })
            .unwrap();
            // Outer mask still holds after the inner scope releases.
            assert!(import("regtest.shared").is_err());
        })
        .unwrap();
    }

    #[test]
    fn stub_attr_access_creates_and_caches_mocks() {
        let stub = Module::stub("regtest.stubby");
        let first = stub.attr("anything").unwrap();
        let second = stub.attr("anything").unwrap();
        assert_eq!(first, second);
        assert!(first.as_mock().is_some());
    }

    #[test]
    fn plain_modules_do_not_vivify() {
        let module = Module::new("regtest.plain");
        assert_eq!(module.attr("anything"), None);
    }

    #[test]
    fn stub_scope_expands_dotted_names_and_restores() {
        let _serial = state_lock();
        let original = Module::new("regtest.outer");
        registry().register(original.clone());

        with(StubModules::new(["regtest.outer.inner"]), |stubs| {
            // "regtest", "regtest.outer", "regtest.outer.inner"
            assert_eq!(stubs.len(), 3);
            let inner = import("regtest.outer.inner").unwrap();
            assert!(inner.is_stub());
            // The installed stub displaced the prior registration.
            assert_ne!(import("regtest.outer").unwrap(), original);
        })
        .unwrap();

        assert_eq!(import("regtest.outer").unwrap(), original);
        assert!(import("regtest.outer.inner").is_err());
        assert!(import("regtest").is_err());

        registry().remove("regtest.outer");
    }

    #[test]
    fn stub_parents_link_to_child_stubs() {
        let _serial = state_lock();
        with(StubModules::new(["regtest.pkg.child"]), |_| {
            let parent = import("regtest.pkg").unwrap();
            let child = import("regtest.pkg.child").unwrap();
            assert_eq!(parent.attr("child"), Some(Attr::Module(child)));
        })
        .unwrap();
    }

    #[test]
    fn lookup_resolves_modules_and_attributes() {
        let _serial = state_lock();
        let module = Module::new("regtest.lookup");
        module.set("Frobulator", json!("class"));
        registry().register(module.clone());

        assert!(lookup("regtest.lookup").unwrap_err().is_not_found());
        // "regtest.lookup" splits into module "regtest" + attr "lookup";
        // the explicit colon form names the module directly.
        assert_eq!(
            lookup("regtest.lookup:Frobulator").unwrap(),
            Attr::Value(json!("class"))
        );
        assert!(lookup("regtest.lookup:Missing").unwrap_err().is_not_found());

        registry().remove("regtest.lookup");
    }

    #[test]
    fn lookup_splits_on_last_dot() {
        let _serial = state_lock();
        let module = Module::new("regtest");
        module.set("answer", json!(42));
        registry().register(module);

        assert_eq!(lookup("regtest.answer").unwrap(), Attr::Value(json!(42)));
        assert_eq!(
            lookup("regtest").unwrap().as_module().unwrap().name(),
            "regtest"
        );

        registry().remove("regtest");
    }

    #[test]
    fn exists_scope_creates_parents_and_unwinds() {
        let _serial = state_lock();
        with(ModuleExists::new(["regtest.deep.pkg.leaf"]), |_| {
            let pkg = import("regtest.deep.pkg").unwrap();
            let leaf = import("regtest.deep.pkg.leaf").unwrap();
            assert!(!leaf.is_stub());
            assert_eq!(pkg.attr("leaf"), Some(Attr::Module(leaf)));
        })
        .unwrap();
        assert!(import("regtest.deep").is_err());
        assert!(import("regtest.deep.pkg.leaf").is_err());
    }

    #[test]
    fn exists_scope_keeps_preexisting_modules() {
        let _serial = state_lock();
        let existing = Module::new("regtest.kept");
        existing.set("marker", json!(true));
        registry().register(existing.clone());

        with(ModuleExists::new(["regtest.kept.child"]), |_| {
            assert_eq!(import("regtest.kept").unwrap(), existing);
        })
        .unwrap();

        let restored = import("regtest.kept").unwrap();
        assert_eq!(restored, existing);
        // The child link added during the scope is unwound.
        assert_eq!(restored.get("child"), None);
        assert_eq!(restored.get("marker"), Some(Attr::Value(json!(true))));

        registry().remove("regtest.kept");
    }

    #[test]
    fn reset_scope_pops_and_restores_entries() {
        let _serial = state_lock();
        let module = Module::new("regtest.resettable");
        registry().register(module.clone());

        with(ResetModules::new(["regtest.resettable"]), |_| {
            assert!(import("regtest.resettable").is_err());
            // Code under test may register a replacement; restore wins.
            registry().register(Module::new("regtest.resettable"));
        })
        .unwrap();

        assert_eq!(import("regtest.resettable").unwrap(), module);
        registry().remove("regtest.resettable");
    }

    #[test]
    fn replace_value_on_module_attributes() {
        let _serial = state_lock();
        let module = Module::new("regtest.constants");
        module.set("TIMEOUT", json!(30));

        with(
            crate::values::ReplaceValue::new(module.clone(), "TIMEOUT", json!(1)),
            |_| {
                assert_eq!(module.get("TIMEOUT"), Some(Attr::Value(json!(1))));
            },
        )
        .unwrap();
        assert_eq!(module.get("TIMEOUT"), Some(Attr::Value(json!(30))));
    }
}
