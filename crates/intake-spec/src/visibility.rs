use crate::registry::Registry;
use crate::spec::schema::SchemaSpec;

/// Field path to whether the field currently applies.
pub type VisibilityMap = std::collections::BTreeMap<String, bool>;

/// Evaluates every `appliesWhen` against the registry's current values.
/// Fields without a condition always apply.
pub fn resolve_visibility(schema: &SchemaSpec, registry: &Registry) -> VisibilityMap {
    let mut map = VisibilityMap::new();
    for path in schema.paths() {
        let applies = schema
            .field(&path)
            .and_then(|field| field.applies_when.as_ref())
            .is_none_or(|condition| condition.evaluate(registry));
        map.insert(path, applies);
    }
    map
}
