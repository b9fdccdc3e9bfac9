//! Experiment Chains
//!
//! Builds the total run order for experiments that declare chained
//! experiments. Each chain entry clones its target experiment into a
//! uniquely named child, rooted under the parent's run directory. Cycles
//! are detected with an ancestors-on-stack set during the iterative DFS.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{RambleError, Result};
use crate::keywords;
use crate::value::Value;

use super::set::ExperimentSet;
use super::types::{validate_chain_order, ChainEntry};

impl ExperimentSet {
    /// Build chains for every primary experiment, in insertion order.
    pub fn build_experiment_chains(&mut self) -> Result<()> {
        let roots: Vec<String> = self.experiments.keys().cloned().collect();
        for root in roots {
            self.create_experiment_chain(&root)?;
        }
        Ok(())
    }

    fn create_experiment_chain(&mut self, root_name: &str) -> Result<()> {
        let root = self
            .experiments
            .get(root_name)
            .ok_or_else(|| RambleError::UnknownExperiment {
                name: root_name.to_string(),
            })?;
        let chained_defs = root.chained_experiments.clone();

        if chained_defs.is_empty() || root.is_template {
            if let Some(exp) = self.experiments.get_mut(root_name) {
                exp.chain_order = vec![root_name.to_string()];
            }
            return Ok(());
        }

        let parent_run_dir = root.expander().experiment_run_dir()?;

        // Seed the stack from the root's own entries, reversed so the first
        // declared entry is processed first.
        let mut in_stack: HashSet<String> = HashSet::new();
        in_stack.insert(root_name.to_string());
        let mut stack: Vec<(String, ChainEntry)> = Vec::new();
        for entry in chained_defs.iter().rev() {
            let pattern = require_name(root_name, entry)?;
            for exp_name in self.search_primary_experiments(&pattern) {
                if in_stack.contains(&exp_name) {
                    return Err(RambleError::ChainCycle {
                        root: root_name.to_string(),
                        child: exp_name,
                    });
                }
                stack.push((exp_name, entry.clone()));
            }
        }

        let mut chain_idx = 0usize;
        let mut chain_prepend: Vec<String> = Vec::new();
        let mut chain_append: Vec<String> = Vec::new();
        let mut chain_commands: IndexMap<String, String> = IndexMap::new();

        while let Some((cur_name, cur_def)) = stack.last().cloned() {
            if let Some(order) = &cur_def.order {
                validate_chain_order(root_name, order)?;
            }
            let command = cur_def.command.clone().ok_or_else(|| RambleError::InvalidChain {
                root: root_name.to_string(),
                reason: "\"command\" keyword must be defined".to_string(),
            })?;

            if in_stack.contains(&cur_name) && cur_name != root_name {
                // Second visit: the child's own chains are resolved, so the
                // child itself can be cloned and registered.
                stack.pop();
                in_stack.remove(&cur_name);

                let order = cur_def.order.as_deref().unwrap_or("after_root");
                let chained_name = format!("{}.{}", chain_idx, cur_name);
                let new_name = format!("{}.chain.{}", root_name, chained_name);
                let new_run_dir =
                    format!("{}/chained_experiments/{}", parent_run_dir, chained_name);

                match order {
                    "before_chain" => chain_prepend.insert(0, new_name.clone()),
                    "before_root" => chain_prepend.push(new_name.clone()),
                    "after_root" => chain_append.insert(0, new_name.clone()),
                    _ => chain_append.push(new_name.clone()),
                }

                let base = self.get_experiment(&cur_name).ok_or_else(|| {
                    RambleError::UnknownExperiment {
                        name: cur_name.clone(),
                    }
                })?;
                let mut child = base.clone_for_chain();
                for (var, value) in &cur_def.variables {
                    child.variables.insert(var.clone(), value.clone());
                }
                child.namespace = new_name.clone();
                child.set_variable(keywords::EXPERIMENT_RUN_DIR, Value::from(new_run_dir));
                child.set_variable(keywords::EXPERIMENT_NAME, Value::from(new_name.clone()));
                child.set_variable("experiment_namespace", Value::from(new_name.clone()));

                let chain_cmd = child.expander().expand_var(&command, None, true)?;
                chain_commands.insert(new_name.clone(), chain_cmd);

                self.add_chained_experiment(new_name, child);
                chain_idx += 1;
            } else {
                // First visit: push the child's own chain entries so they
                // resolve before the child does.
                let base_chained = self
                    .get_experiment(&cur_name)
                    .map(|e| e.chained_experiments.clone())
                    .unwrap_or_default();
                for entry in base_chained.iter().rev() {
                    let pattern = require_name(root_name, entry)?;
                    for exp_name in self.search_primary_experiments(&pattern) {
                        if in_stack.contains(&exp_name) {
                            return Err(RambleError::ChainCycle {
                                root: root_name.to_string(),
                                child: cur_name.clone(),
                            });
                        }
                        stack.push((exp_name, entry.clone()));
                    }
                }
                in_stack.insert(cur_name);
            }
        }

        let mut chain_order = chain_prepend.clone();
        chain_order.push(root_name.to_string());
        chain_order.extend(chain_append.iter().cloned());

        // Every chained child observes the same total order.
        for name in chain_prepend.iter().chain(chain_append.iter()) {
            if let Some(child) = self.chained_experiments.get_mut(name) {
                child.chain_order = chain_order.clone();
            }
        }

        if let Some(root) = self.experiments.get_mut(root_name) {
            root.chain_order = chain_order;
            root.chain_prepend = chain_prepend;
            root.chain_append = chain_append;
            root.chain_commands = chain_commands;
        }

        Ok(())
    }
}

fn require_name(root: &str, entry: &ChainEntry) -> Result<String> {
    entry.name.clone().ok_or_else(|| RambleError::InvalidChain {
        root: root.to_string(),
        reason: "\"name\" keyword must be defined".to_string(),
    })
}
