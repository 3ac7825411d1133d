//! Property-based test generators using proptest.
//!
//! Edit scripts address blocks by slot. A slot holds at most one live block
//! at a time; creating into a live slot and editing an empty one are no-ops,
//! so every generated script is meaningful.

use proptest::prelude::*;
use std::collections::BTreeMap;

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStep {
    /// Create a block in the slot.
    Create {
        /// Slot index.
        slot: usize,
        /// Initial content.
        content: String,
    },
    /// Replace the content of the slot's block.
    Update {
        /// Slot index.
        slot: usize,
        /// New content.
        content: String,
    },
    /// Delete the slot's block.
    Delete {
        /// Slot index.
        slot: usize,
    },
    /// Send everything that is ready.
    Flush,
}

/// Strategy for generating block content.
pub fn content_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{0,16}").expect("Invalid regex")
}

/// Strategy for generating one edit step over `slots` slots.
pub fn edit_step_strategy(slots: usize) -> impl Strategy<Value = EditStep> {
    let slots = slots.max(1);
    prop_oneof![
        3 => (0..slots, content_strategy())
            .prop_map(|(slot, content)| EditStep::Create { slot, content }),
        5 => (0..slots, content_strategy())
            .prop_map(|(slot, content)| EditStep::Update { slot, content }),
        1 => (0..slots).prop_map(|slot| EditStep::Delete { slot }),
        1 => Just(EditStep::Flush),
    ]
}

/// Strategy for generating an edit script.
pub fn edit_script_strategy(
    slots: usize,
    min_steps: usize,
    max_steps: usize,
) -> impl Strategy<Value = Vec<EditStep>> {
    prop::collection::vec(edit_step_strategy(slots), min_steps..max_steps)
}

/// Returns the content every live slot holds once the script is applied.
pub fn expected_contents(script: &[EditStep]) -> BTreeMap<usize, String> {
    let mut live = BTreeMap::new();
    for step in script {
        match step {
            EditStep::Create { slot, content } => {
                live.entry(*slot).or_insert_with(|| content.clone());
            }
            EditStep::Update { slot, content } => {
                if let Some(current) = live.get_mut(slot) {
                    *current = content.clone();
                }
            }
            EditStep::Delete { slot } => {
                live.remove(slot);
            }
            EditStep::Flush => {}
        }
    }
    live
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
