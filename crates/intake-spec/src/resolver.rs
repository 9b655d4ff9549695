//! Turns a field's declared effects into concrete actions against the registry.

use tracing::trace;

use crate::config::Config;
use crate::registry::{Collaborators, Registry};
use crate::spec::field::{Effect, FieldSpec};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    Clear(String),
    Populate { target: String, options: Vec<String> },
    Revalidate(String),
}

/// Actions for `spec` given the registry state right after its validation.
pub(crate) fn plan(spec: &FieldSpec, path: &str, registry: &Registry, config: &Config) -> Vec<Action> {
    let mut actions = Vec::new();
    for effect in &spec.effects {
        match effect {
            Effect::Clear { when, targets } => {
                if when.as_ref().is_none_or(|condition| condition.evaluate(registry)) {
                    actions.extend(targets.iter().cloned().map(Action::Clear));
                }
            }
            Effect::PopulateOptions { target, hierarchy } => {
                let selected = registry
                    .value(path)
                    .and_then(|value| value.as_text())
                    .map(|text| text.into_owned());
                let options = selected
                    .as_deref()
                    .and_then(|parent| config.children_of(hierarchy, parent))
                    .map(<[String]>::to_vec)
                    .unwrap_or_default();
                trace!(field = path, target = %target, count = options.len(), "populating options");
                actions.push(Action::Populate {
                    target: target.clone(),
                    options,
                });
            }
            Effect::Revalidate { targets } => {
                actions.extend(targets.iter().cloned().map(Action::Revalidate));
            }
        }
    }
    actions
}
