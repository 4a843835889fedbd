//! Name resolution for material functions
//!
//! Host material systems flatten a function's parameters into the namespace
//! of every top-level material that (directly or transitively) calls it,
//! one namespace per parameter category plus a generic namespace shared by
//! all categories. Two parameters with the same name arriving in the same
//! flattened namespace would silently alias, so parameter names are
//! resolved before any material object is built.
//!
//! The algorithm is order-dependent on purpose: the function list is
//! ordered leaves-first and processed back to front, so the scopes nearest
//! the top-level materials claim their names first and deeper functions
//! get renamed on conflict. Do not replace it with a global rename pass -
//! renaming closest to the leaves keeps top-level materials stable, which
//! is what persisted material references depend on.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use vesper_scene::{ParamCategory, SceneDescription};

/// Mints names that are unique within one namespace.
///
/// Also used for actor display labels, which hosts require to be unique
/// per imported scene.
#[derive(Debug, Default)]
pub struct UniqueNameProvider {
    known: HashSet<String>,
}

impl UniqueNameProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name that is already taken
    pub fn add_existing(&mut self, name: &str) {
        self.known.insert(name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Return `base` if free, otherwise `base_1`, `base_2`, ... The result
    /// is registered before returning.
    pub fn generate_unique(&mut self, base: &str) -> String {
        if !self.known.contains(base) {
            self.known.insert(base.to_string());
            return base.to_string();
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if !self.known.contains(&candidate) {
                self.known.insert(candidate.clone());
                return candidate;
            }
            counter += 1;
        }
    }
}

/// `(function material index, direct referencer indices)` pairs, ordered so
/// a function always precedes the materials that reference it
pub type FunctionList = Vec<(u32, Vec<u32>)>;

/// Collect every material used as a function by another material, paired
/// with its direct referencers in declaration order, leaves first.
///
/// Dangling function names are logged and skipped; reference cycles are
/// broken at the point of re-entry.
pub fn ordered_function_list(scene: &SceneDescription) -> FunctionList {
    let mut referencers: HashMap<u32, Vec<u32>> = HashMap::new();
    for (index, material) in scene.materials.iter().enumerate() {
        for function_name in &material.functions {
            match scene.material_index(function_name) {
                Some(function) => referencers
                    .entry(function)
                    .or_default()
                    .push(index as u32),
                None => log::warn!(
                    "material `{}` references unknown function `{}`",
                    material.name,
                    function_name
                ),
            }
        }
    }

    let mut order: Vec<u32> = Vec::new();
    let mut emitted: HashSet<u32> = HashSet::new();
    let mut visiting: HashSet<u32> = HashSet::new();
    for index in 0..scene.materials.len() as u32 {
        visit_functions(scene, index, &mut order, &mut emitted, &mut visiting);
    }

    // Leaves-first means every referencer sits later in the list than the
    // function it references. A referencer at or before it is a cycle back
    // edge; keeping it would make the name walk circular.
    let position: HashMap<u32, usize> = order
        .iter()
        .enumerate()
        .map(|(at, function)| (*function, at))
        .collect();
    order
        .into_iter()
        .map(|function| {
            let mut refs = referencers.remove(&function).unwrap_or_default();
            refs.retain(|referencer| match position.get(referencer) {
                Some(at) => *at > position[&function],
                None => true,
            });
            (function, refs)
        })
        .collect()
}

fn visit_functions(
    scene: &SceneDescription,
    material: u32,
    order: &mut Vec<u32>,
    emitted: &mut HashSet<u32>,
    visiting: &mut HashSet<u32>,
) {
    if !visiting.insert(material) {
        log::warn!(
            "material function cycle through `{}`",
            scene.materials[material as usize].name
        );
        return;
    }
    for function_name in &scene.materials[material as usize].functions {
        if let Some(function) = scene.material_index(function_name) {
            visit_functions(scene, function, order, emitted, visiting);
            if emitted.insert(function) {
                order.push(function);
            }
        }
    }
    visiting.remove(&material);
}

/// Final parameter names chosen by the resolver. Only renamed parameters
/// appear; everything else keeps its original name.
#[derive(Debug, Default)]
pub struct ResolvedNames {
    names: HashMap<(u32, u32), String>,
}

impl ResolvedNames {
    /// The name the material importer must use for this parameter
    pub fn final_name<'a>(&'a self, material: u32, parameter: u32, original: &'a str) -> &'a str {
        self.names
            .get(&(material, parameter))
            .map(String::as_str)
            .unwrap_or(original)
    }

    /// Number of parameters that had to be renamed
    pub fn renamed(&self) -> usize {
        self.names.len()
    }
}

type NameSet = Rc<HashSet<(String, ParamCategory)>>;

struct ResolverState {
    /// Function index -> position in the list; filled as the reverse walk
    /// reaches each entry
    index_of: HashMap<u32, usize>,
    /// Name sets visible to each top-level material, accumulated from
    /// every processed scope below it
    top_level_names: HashMap<u32, Vec<NameSet>>,
    providers: HashMap<ParamCategory, UniqueNameProvider>,
    visited: HashSet<u32>,
    resolved: HashMap<(u32, u32), String>,
}

/// Choose collision-free parameter names for every function scope.
///
/// The IR is never mutated; the result maps `(material, parameter)` to the
/// replacement name. Deterministic for a fixed description and list.
pub fn resolve_function_parameter_names(
    scene: &SceneDescription,
    functions: &FunctionList,
) -> ResolvedNames {
    let mut state = ResolverState {
        index_of: HashMap::new(),
        top_level_names: HashMap::new(),
        providers: HashMap::new(),
        visited: HashSet::new(),
        resolved: HashMap::new(),
    };

    for position in (0..functions.len()).rev() {
        let (function, referencers) = &functions[position];
        state.index_of.insert(*function, position);

        // Referencers first: their names are closer to the root and win
        for &referencer in referencers {
            if state.visited.contains(&referencer) {
                continue;
            }
            let used = process_scope(scene, referencer, functions, &mut state);
            state.visited.insert(referencer);
            push_used_names(used, referencer, functions, &mut state);
        }

        let used = process_scope(scene, *function, functions, &mut state);
        state.visited.insert(*function);
        push_used_names(used, *function, functions, &mut state);
    }

    ResolvedNames {
        names: state.resolved,
    }
}

/// Walk one scope's parameters in order, keeping or renaming each
fn process_scope(
    scene: &SceneDescription,
    material: u32,
    functions: &FunctionList,
    state: &mut ResolverState,
) -> NameSet {
    let mut used: HashSet<(String, ParamCategory)> = HashSet::new();
    let record = &scene.materials[material as usize];

    for (index, parameter) in record.parameters.iter().enumerate() {
        let category = parameter.category;
        let collides = name_is_used(material, &parameter.name, category, functions, state);

        let provider = state.providers.entry(category).or_default();
        let final_name = if collides {
            let renamed = provider.generate_unique(&parameter.name);
            log::debug!(
                "material `{}`: parameter `{}` renamed to `{}`",
                record.name,
                parameter.name,
                renamed
            );
            state
                .resolved
                .insert((material, index as u32), renamed.clone());
            renamed
        } else {
            provider.add_existing(&parameter.name);
            parameter.name.clone()
        };

        used.insert((final_name.clone(), category));
        if category != ParamCategory::Generic {
            // Typed names also occupy the generic namespace
            state
                .providers
                .entry(ParamCategory::Generic)
                .or_default()
                .add_existing(&final_name);
            used.insert((final_name, ParamCategory::Generic));
        }
    }

    Rc::new(used)
}

/// Is `name` already taken in any namespace that can see `material`?
///
/// For a function scope this walks up every referencer chain; for a
/// top-level material it tests the sets accumulated so far. A scope's own
/// in-progress set is deliberately not consulted - source scopes carry
/// unique names per scope.
fn name_is_used(
    material: u32,
    name: &str,
    category: ParamCategory,
    functions: &FunctionList,
    state: &ResolverState,
) -> bool {
    if let Some(&position) = state.index_of.get(&material) {
        return functions[position]
            .1
            .iter()
            .any(|&referencer| name_is_used(referencer, name, category, functions, state));
    }
    let key = (name.to_string(), category);
    state
        .top_level_names
        .get(&material)
        .map(|sets| sets.iter().any(|set| set.contains(&key)))
        .unwrap_or(false)
}

/// Record a completed scope's names against every top-level material that
/// can see it
fn push_used_names(
    used: NameSet,
    material: u32,
    functions: &FunctionList,
    state: &mut ResolverState,
) {
    if let Some(&position) = state.index_of.get(&material) {
        let referencers = functions[position].1.clone();
        for referencer in referencers {
            push_used_names(used.clone(), referencer, functions, state);
        }
    } else {
        state
            .top_level_names
            .entry(material)
            .or_default()
            .push(used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_scene::{MaterialParameter, MaterialRecord, ParamValue};

    fn scene_with(materials: Vec<MaterialRecord>) -> SceneDescription {
        let mut scene = SceneDescription::new("naming");
        scene.materials = materials;
        scene
    }

    #[test]
    fn provider_mints_suffixes_in_order() {
        let mut provider = UniqueNameProvider::new();
        assert_eq!(provider.generate_unique("base"), "base");
        assert_eq!(provider.generate_unique("base"), "base_1");
        assert_eq!(provider.generate_unique("base"), "base_2");
        provider.add_existing("other_1");
        provider.add_existing("other");
        assert_eq!(provider.generate_unique("other"), "other_2");
    }

    #[test]
    fn function_list_is_leaves_first() {
        // top -> mid -> leaf
        let scene = scene_with(vec![
            MaterialRecord::new("top", "pbr").with_function("mid"),
            MaterialRecord::new("mid", "pbr").with_function("leaf"),
            MaterialRecord::new("leaf", "pbr"),
        ]);

        let list = ordered_function_list(&scene);
        let order: Vec<&str> = list
            .iter()
            .map(|(f, _)| scene.materials[*f as usize].name.as_str())
            .collect();
        assert_eq!(order, vec!["leaf", "mid"]);

        // leaf's referencer is mid, mid's referencer is top
        assert_eq!(list[0].1, vec![1]);
        assert_eq!(list[1].1, vec![0]);
    }

    #[test]
    fn top_level_names_win_ties() {
        // Both the top material and the leaf function carry a scalar
        // parameter named "roughness"; the function must yield.
        let scene = scene_with(vec![
            MaterialRecord::new("top", "pbr")
                .with_function("fn")
                .with_parameter(MaterialParameter::scalar("roughness", 0.5)),
            MaterialRecord::new("fn", "pbr")
                .with_parameter(MaterialParameter::scalar("roughness", 1.0)),
        ]);

        let list = ordered_function_list(&scene);
        let resolved = resolve_function_parameter_names(&scene, &list);

        let function = scene.material_index("fn").unwrap();
        let top = scene.material_index("top").unwrap();
        assert_eq!(resolved.final_name(top, 0, "roughness"), "roughness");
        assert_eq!(resolved.final_name(function, 0, "roughness"), "roughness_1");
    }

    #[test]
    fn categories_do_not_collide_but_generic_does() {
        // Same name in different typed categories is fine; a generic
        // parameter collides with any typed name above it.
        let scene = scene_with(vec![
            MaterialRecord::new("top", "pbr")
                .with_function("fn")
                .with_parameter(MaterialParameter::scalar("tint", 1.0)),
            MaterialRecord::new("fn", "pbr")
                .with_parameter(MaterialParameter::color("tint", [1.0, 0.0, 0.0]))
                .with_parameter(MaterialParameter::new(
                    "tint",
                    ParamCategory::Generic,
                    ParamValue::Float(0.25),
                )),
        ]);

        let list = ordered_function_list(&scene);
        let resolved = resolve_function_parameter_names(&scene, &list);

        let function = scene.material_index("fn").unwrap();
        // Color "tint" does not clash with the scalar "tint" above it
        assert_eq!(resolved.final_name(function, 0, "tint"), "tint");
        // Generic "tint" clashes with the typed names already claimed
        assert_eq!(resolved.final_name(function, 1, "tint"), "tint_1");
    }

    #[test]
    fn shared_function_sees_every_referencer_chain() {
        // shared is called by both materials; a name used by either
        // referencer is off limits.
        let scene = scene_with(vec![
            MaterialRecord::new("wall", "pbr")
                .with_function("shared")
                .with_parameter(MaterialParameter::scalar("amount", 0.1)),
            MaterialRecord::new("floor", "pbr")
                .with_function("shared")
                .with_parameter(MaterialParameter::scalar("level", 0.2)),
            MaterialRecord::new("shared", "pbr")
                .with_parameter(MaterialParameter::scalar("amount", 0.3))
                .with_parameter(MaterialParameter::scalar("level", 0.4)),
        ]);

        let list = ordered_function_list(&scene);
        let resolved = resolve_function_parameter_names(&scene, &list);

        let shared = scene.material_index("shared").unwrap();
        assert_eq!(resolved.final_name(shared, 0, "amount"), "amount_1");
        assert_eq!(resolved.final_name(shared, 1, "level"), "level_1");
    }

    #[test]
    fn resolution_is_deterministic() {
        let scene = scene_with(vec![
            MaterialRecord::new("a", "pbr")
                .with_function("f")
                .with_parameter(MaterialParameter::scalar("x", 1.0)),
            MaterialRecord::new("b", "pbr")
                .with_function("g")
                .with_parameter(MaterialParameter::scalar("x", 2.0)),
            MaterialRecord::new("f", "pbr")
                .with_function("g")
                .with_parameter(MaterialParameter::scalar("x", 3.0)),
            MaterialRecord::new("g", "pbr")
                .with_parameter(MaterialParameter::scalar("x", 4.0)),
        ]);

        let list = ordered_function_list(&scene);
        let first = resolve_function_parameter_names(&scene, &list);
        for _ in 0..10 {
            let again = resolve_function_parameter_names(&scene, &list);
            assert_eq!(first.names, again.names);
        }
    }
}
