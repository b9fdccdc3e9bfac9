//! Experiment Rendering
//!
//! Turns one experiment declaration into the concrete set of variable
//! bindings it describes. Vector variables are discovered by list
//! expansion, grouped into implicit and explicit zips, multiplied through
//! matrices, and filtered by exclusion rules.

use indexmap::IndexMap;

use crate::error::{RambleError, Result};
use crate::expander::Expander;
use crate::expr::eval_expression;
use crate::keywords;
use crate::value::{Value, VariableMap};

use super::types::Exclusions;

/// One surviving render: the expanded experiment name and its bindings.
#[derive(Debug, Clone)]
pub struct RenderedExperiment {
    pub name: String,
    pub variables: VariableMap,
}

/// A group of vector variables iterated in lock-step.
#[derive(Debug, Clone)]
struct ZipUnit {
    vars: Vec<String>,
    length: usize,
}

/// Render the experiment declaration into concrete bindings.
///
/// The render universe is the Cartesian product of every matrix entry,
/// every explicit zip not consumed by a matrix, and the implicit zip of the
/// remaining vector variables.
pub fn render_experiments(
    name_template: &str,
    merged: &VariableMap,
    zips: &IndexMap<String, Vec<String>>,
    matrices: &[Vec<String>],
    excludes: &Exclusions,
) -> Result<Vec<RenderedExperiment>> {
    // Discover vectors by expanding each binding into a list if possible.
    let mut base = merged.clone();
    for value in base.values_mut() {
        *value = Expander::expand_lists(value);
    }

    let var_to_zip = validate_zips(name_template, &base, zips)?;

    let mut units: Vec<ZipUnit> = Vec::new();
    let mut consumed_zips: Vec<&str> = Vec::new();
    let mut consumed_vars: Vec<&str> = Vec::new();

    // Matrix entries name zips or bare vector variables.
    for matrix in matrices {
        for entry in matrix {
            if let Some(zip_vars) = zips.get(entry) {
                units.push(zip_unit(zip_vars, &base));
                consumed_zips.push(entry.as_str());
            } else {
                match base.get(entry) {
                    Some(Value::Sequence(items)) if !var_to_zip.contains_key(entry.as_str()) => {
                        units.push(ZipUnit {
                            vars: vec![entry.clone()],
                            length: items.len(),
                        });
                        consumed_vars.push(entry.as_str());
                    }
                    _ => {
                        return Err(RambleError::UnknownMatrixVariable {
                            experiment: name_template.to_string(),
                            name: entry.clone(),
                        })
                    }
                }
            }
        }
    }

    // Explicit zips not named by any matrix iterate on their own.
    for (zip_name, zip_vars) in zips {
        if !consumed_zips.contains(&zip_name.as_str()) {
            units.push(zip_unit(zip_vars, &base));
        }
    }

    // Everything else vectorized joins the implicit zip; lengths must agree.
    let mut implicit: Vec<(String, usize)> = Vec::new();
    for (name, value) in &base {
        if let Value::Sequence(items) = value {
            if !var_to_zip.contains_key(name.as_str()) && !consumed_vars.contains(&name.as_str()) {
                implicit.push((name.clone(), items.len()));
            }
        }
    }
    if !implicit.is_empty() {
        let first_len = implicit[0].1;
        if implicit.iter().any(|(_, len)| *len != first_len) {
            return Err(RambleError::VectorLengthMismatch {
                experiment: name_template.to_string(),
                lengths: implicit,
            });
        }
        log::debug!(
            "Implicit zip over variables: {:?}",
            implicit.iter().map(|(n, _)| n).collect::<Vec<_>>()
        );
        units.push(ZipUnit {
            vars: implicit.into_iter().map(|(n, _)| n).collect(),
            length: first_len,
        });
    }

    let excluded_combos = excluded_combinations(name_template, excludes)?;

    // An empty vector anywhere empties the whole product.
    if units.iter().any(|unit| unit.length == 0) {
        return Ok(Vec::new());
    }

    // Walk the Cartesian product of all units with an odometer.
    let mut rendered = Vec::new();
    let mut indices = vec![0usize; units.len()];
    loop {
        let mut variables = base.clone();
        for (unit, idx) in units.iter().zip(indices.iter()) {
            for var in &unit.vars {
                if let Some(Value::Sequence(items)) = base.get(var) {
                    variables.insert(var.clone(), items[*idx].clone());
                }
            }
        }

        compute_mpi_vars(&mut variables);

        if !is_excluded(&variables, excludes, &excluded_combos)? {
            let expander = Expander::new(&variables);
            let name = expander.expand_var(name_template, None, true)?;
            rendered.push(RenderedExperiment { name, variables });
        }

        // Advance the odometer, rightmost unit fastest.
        let mut done = true;
        for i in (0..units.len()).rev() {
            indices[i] += 1;
            if indices[i] < units[i].length {
                done = false;
                break;
            }
            indices[i] = 0;
        }
        if done || units.is_empty() {
            break;
        }
    }

    Ok(rendered)
}

fn zip_unit(zip_vars: &[String], base: &VariableMap) -> ZipUnit {
    let length = zip_vars
        .first()
        .and_then(|v| base.get(v))
        .and_then(|v| v.as_sequence())
        .map(|s| s.len())
        .unwrap_or(0);
    ZipUnit {
        vars: zip_vars.to_vec(),
        length,
    }
}

/// Validate explicit zips and return the variable-to-zip membership map.
fn validate_zips<'a>(
    name_template: &str,
    base: &VariableMap,
    zips: &'a IndexMap<String, Vec<String>>,
) -> Result<IndexMap<&'a str, &'a str>> {
    let mut var_to_zip: IndexMap<&str, &str> = IndexMap::new();

    for (zip_name, zip_vars) in zips {
        let mut lengths: Vec<(String, usize)> = Vec::new();

        for var in zip_vars {
            if var_to_zip.insert(var.as_str(), zip_name.as_str()).is_some() {
                return Err(RambleError::ZipMembership {
                    variable: var.clone(),
                });
            }

            match base.get(var) {
                None => {
                    return Err(RambleError::UndefinedZipVariable {
                        zip: zip_name.clone(),
                        variable: var.clone(),
                    })
                }
                Some(Value::Sequence(items)) => lengths.push((var.clone(), items.len())),
                Some(_) => {
                    return Err(RambleError::NonVectorZipVariable {
                        zip: zip_name.clone(),
                        variable: var.clone(),
                    })
                }
            }
        }

        let first_len = lengths.first().map(|(_, len)| *len).unwrap_or(0);
        if lengths.iter().any(|(_, len)| *len != first_len) {
            return Err(RambleError::ZipLengthMismatch {
                zip: zip_name.clone(),
                experiment: name_template.to_string(),
                lengths,
            });
        }
    }

    Ok(var_to_zip)
}

/// Expand an exclusion's `variables` map into the set of excluded value
/// combinations. Variables named in the exclusion's `matrix` multiply;
/// the rest are zipped positionally.
fn excluded_combinations(
    name_template: &str,
    excludes: &Exclusions,
) -> Result<Vec<IndexMap<String, String>>> {
    if excludes.variables.is_empty() {
        return Ok(Vec::new());
    }

    let mut product_vars: Vec<(&String, Vec<String>)> = Vec::new();
    let mut zipped_vars: Vec<(&String, Vec<String>)> = Vec::new();

    for (var, values) in &excludes.variables {
        let rendered: Vec<String> = values.iter().map(|v| v.render()).collect();
        if excludes.matrix.contains(var) {
            product_vars.push((var, rendered));
        } else {
            zipped_vars.push((var, rendered));
        }
    }

    if let Some((_, first)) = zipped_vars.first() {
        let first_len = first.len();
        if zipped_vars.iter().any(|(_, vals)| vals.len() != first_len) {
            return Err(RambleError::VectorLengthMismatch {
                experiment: name_template.to_string(),
                lengths: zipped_vars
                    .iter()
                    .map(|(var, vals)| ((*var).clone(), vals.len()))
                    .collect(),
            });
        }
    }

    let zip_len = zipped_vars.first().map(|(_, vals)| vals.len()).unwrap_or(1);
    let mut combos = Vec::new();
    for zip_idx in 0..zip_len {
        let mut combo = IndexMap::new();
        for (var, vals) in &zipped_vars {
            combo.insert((*var).clone(), vals[zip_idx].clone());
        }
        expand_product(&product_vars, 0, combo, &mut combos);
    }

    Ok(combos)
}

fn expand_product(
    product_vars: &[(&String, Vec<String>)],
    depth: usize,
    current: IndexMap<String, String>,
    out: &mut Vec<IndexMap<String, String>>,
) {
    if depth == product_vars.len() {
        out.push(current);
        return;
    }
    let (var, values) = &product_vars[depth];
    for value in values {
        let mut next = current.clone();
        next.insert((*var).clone(), value.clone());
        expand_product(product_vars, depth + 1, next, out);
    }
}

/// Test one render against the exclusion rules.
fn is_excluded(
    variables: &VariableMap,
    excludes: &Exclusions,
    combos: &[IndexMap<String, String>],
) -> Result<bool> {
    for combo in combos {
        let matches = combo.iter().all(|(var, excluded)| {
            variables
                .get(var)
                .map(|v| v.render() == *excluded)
                .unwrap_or(false)
        });
        if matches {
            return Ok(true);
        }
    }

    if !excludes.where_clauses.is_empty() {
        let expander = Expander::new(variables);
        for clause in &excludes.where_clauses {
            let expanded = expander.expand_var(clause, None, true)?;
            let truthy = eval_expression(&expanded, None)
                .map(|v| v.is_truthy())
                .unwrap_or(false);
            if truthy {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Fill in whichever of `n_ranks`, `n_nodes`, `processes_per_node` can be
/// derived from the others. A user-specified node count smaller than the
/// derived one is kept, with a warning.
pub fn compute_mpi_vars(variables: &mut VariableMap) {
    let (n_ranks, n_nodes, ppn) = {
        let expander = Expander::new(variables);
        let read_int = |name: &str| -> Option<i64> {
            if !variables.contains_key(name) {
                return None;
            }
            expander
                .expand_var_name(name, None, true)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
        };
        (
            read_int(keywords::N_RANKS),
            read_int(keywords::N_NODES),
            read_int(keywords::PROCESSES_PER_NODE),
        )
    };

    match (n_ranks, n_nodes, ppn) {
        (Some(ranks), nodes, Some(ppn)) if ppn > 0 => {
            let derived_nodes = (ranks + ppn - 1) / ppn;
            match nodes {
                Some(nodes) if nodes < derived_nodes => {
                    log::warn!(
                        "n_nodes = {} is too small for {} ranks at {} processes per node",
                        nodes,
                        ranks,
                        ppn
                    );
                }
                Some(_) => {}
                None => {
                    variables.insert(keywords::N_NODES.to_string(), Value::int(derived_nodes));
                }
            }
        }
        (Some(ranks), Some(nodes), None) if nodes > 0 => {
            let derived_ppn = (ranks + nodes - 1) / nodes;
            variables.insert(
                keywords::PROCESSES_PER_NODE.to_string(),
                Value::int(derived_ppn),
            );
        }
        (None, Some(_), Some(_)) => {
            if !variables.contains_key(keywords::N_RANKS) {
                variables.insert(
                    keywords::N_RANKS.to_string(),
                    Value::from("{processes_per_node}*{n_nodes}"),
                );
            }
        }
        _ => {
            log::debug!("Cannot derive MPI variables from the available bindings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::variable_map;

    fn base_vars() -> VariableMap {
        variable_map([
            ("processes_per_node", Value::from("2")),
            ("n_ranks", Value::from("{processes_per_node}*{n_nodes}")),
        ])
    }

    fn no_zips() -> IndexMap<String, Vec<String>> {
        IndexMap::new()
    }

    fn names(rendered: &[RenderedExperiment]) -> Vec<String> {
        rendered.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_scalar_render() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::from("2"));
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &Exclusions::default(),
        )
        .unwrap();
        assert_eq!(names(&rendered), vec!["series1_4"]);
    }

    #[test]
    fn test_vector_render() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &Exclusions::default(),
        )
        .unwrap();
        assert_eq!(names(&rendered), vec!["series1_4", "series1_8"]);
    }

    #[test]
    fn test_implicit_zip_length_mismatch() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert("wl_var2".to_string(), Value::sequence(["2"]));
        let err = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &Exclusions::default(),
        )
        .unwrap_err();
        match err {
            RambleError::VectorLengthMismatch { lengths, .. } => {
                assert!(lengths.contains(&("n_nodes".to_string(), 2)));
                assert!(lengths.contains(&("wl_var2".to_string(), 1)));
            }
            other => panic!("Expected length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_implicit_zip_locksteps() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert(
            "processes_per_node".to_string(),
            Value::sequence(["2", "4"]),
        );
        let rendered = render_experiments(
            "series1_{n_ranks}_{processes_per_node}",
            &vars,
            &no_zips(),
            &[],
            &Exclusions::default(),
        )
        .unwrap();
        assert_eq!(names(&rendered), vec!["series1_4_2", "series1_16_4"]);
    }

    #[test]
    fn test_matrix_product() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert(
            "processes_per_node".to_string(),
            Value::sequence(["1", "4", "6"]),
        );
        let matrices = vec![vec![
            "n_nodes".to_string(),
            "processes_per_node".to_string(),
        ]];
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &matrices,
            &Exclusions::default(),
        )
        .unwrap();
        let got = names(&rendered);
        for expected in ["series1_2", "series1_8", "series1_12", "series1_4", "series1_16", "series1_24"] {
            assert!(got.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(got.len(), 6);
    }

    #[test]
    fn test_matrix_times_implicit_zip() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "3"]));
        vars.insert(
            "processes_per_node".to_string(),
            Value::sequence(["2", "4"]),
        );
        let matrices = vec![vec!["n_nodes".to_string()]];
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &matrices,
            &Exclusions::default(),
        )
        .unwrap();
        let got = names(&rendered);
        for expected in ["series1_4", "series1_8", "series1_6", "series1_12"] {
            assert!(got.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_matrix_unknown_variable() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "3"]));
        let matrices = vec![vec!["n_nodes".to_string()], vec!["foo".to_string()]];
        let err = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &matrices,
            &Exclusions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RambleError::UnknownMatrixVariable { name, .. } if name == "foo"));
    }

    #[test]
    fn test_explicit_zip_validation() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));

        let mut zips = IndexMap::new();
        zips.insert("test_zip".to_string(), vec!["foo".to_string()]);
        let err = render_experiments("e", &vars, &zips, &[], &Exclusions::default()).unwrap_err();
        assert!(matches!(err, RambleError::UndefinedZipVariable { .. }));

        let mut zips = IndexMap::new();
        zips.insert(
            "test_zip".to_string(),
            vec!["processes_per_node".to_string()],
        );
        let err = render_experiments("e", &vars, &zips, &[], &Exclusions::default()).unwrap_err();
        assert!(matches!(err, RambleError::NonVectorZipVariable { .. }));

        let mut zips = IndexMap::new();
        zips.insert("zip1".to_string(), vec!["n_nodes".to_string()]);
        zips.insert("zip2".to_string(), vec!["n_nodes".to_string()]);
        let err = render_experiments("e", &vars, &zips, &[], &Exclusions::default()).unwrap_err();
        assert!(matches!(err, RambleError::ZipMembership { .. }));
    }

    #[test]
    fn test_zip_length_mismatch() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert("exp_var2".to_string(), Value::sequence(["2"]));
        let mut zips = IndexMap::new();
        zips.insert(
            "test_zip".to_string(),
            vec!["n_nodes".to_string(), "exp_var2".to_string()],
        );
        let err = render_experiments("e", &vars, &zips, &[], &Exclusions::default()).unwrap_err();
        assert!(matches!(err, RambleError::ZipLengthMismatch { .. }));
    }

    #[test]
    fn test_zip_in_matrix_crosses_implicit() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert("exp_var1".to_string(), Value::sequence(["1", "a", "3"]));
        vars.insert("exp_var2".to_string(), Value::sequence(["2", "b", "4"]));
        let mut zips = IndexMap::new();
        zips.insert(
            "test_zip".to_string(),
            vec!["exp_var1".to_string(), "exp_var2".to_string()],
        );
        let matrices = vec![vec!["test_zip".to_string()]];
        let rendered = render_experiments(
            "series1_{n_ranks}_{exp_var1}",
            &vars,
            &zips,
            &matrices,
            &Exclusions::default(),
        )
        .unwrap();
        let got = names(&rendered);
        for expected in [
            "series1_4_1",
            "series1_4_a",
            "series1_4_3",
            "series1_8_1",
            "series1_8_a",
            "series1_8_3",
        ] {
            assert!(got.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(got.len(), 6);
    }

    #[test]
    fn test_unconsumed_zip_crosses_matrix() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        vars.insert("exp_var1".to_string(), Value::sequence(["1", "a", "3"]));
        vars.insert("exp_var2".to_string(), Value::sequence(["2", "b", "4"]));
        let mut zips = IndexMap::new();
        zips.insert(
            "test_zip".to_string(),
            vec!["exp_var1".to_string(), "exp_var2".to_string()],
        );
        let matrices = vec![vec!["n_nodes".to_string()]];
        let rendered = render_experiments(
            "series1_{n_ranks}_{exp_var1}",
            &vars,
            &zips,
            &matrices,
            &Exclusions::default(),
        )
        .unwrap();
        assert_eq!(rendered.len(), 6);
    }

    #[test]
    fn test_variable_excludes() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::sequence(["2", "4"]));
        let mut excludes = Exclusions::default();
        excludes
            .variables
            .insert("n_nodes".to_string(), vec![Value::from("4")]);
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &excludes,
        )
        .unwrap();
        assert_eq!(names(&rendered), vec!["series1_4"]);
    }

    #[test]
    fn test_where_excludes() {
        let mut vars = base_vars();
        vars.insert(
            "n_nodes".to_string(),
            Value::sequence(["1", "2", "3", "4", "5"]),
        );
        let mut excludes = Exclusions::default();
        excludes
            .where_clauses
            .push("{n_nodes} > 2 and {n_nodes} < 5".to_string());
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &excludes,
        )
        .unwrap();
        assert_eq!(
            names(&rendered),
            vec!["series1_2", "series1_4", "series1_10"]
        );
    }

    #[test]
    fn test_multi_where_excludes() {
        let mut vars = base_vars();
        vars.insert(
            "n_nodes".to_string(),
            Value::sequence(["1", "2", "3", "4", "5"]),
        );
        let mut excludes = Exclusions::default();
        excludes.where_clauses.push("{n_nodes} < 2".to_string());
        excludes.where_clauses.push("{n_nodes} > 4".to_string());
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &excludes,
        )
        .unwrap();
        assert_eq!(
            names(&rendered),
            vec!["series1_4", "series1_6", "series1_8"]
        );
    }

    #[test]
    fn test_range_template_becomes_vector() {
        let mut vars = base_vars();
        vars.insert("n_nodes".to_string(), Value::from("range(1, 4)"));
        let rendered = render_experiments(
            "series1_{n_ranks}",
            &vars,
            &no_zips(),
            &[],
            &Exclusions::default(),
        )
        .unwrap();
        assert_eq!(
            names(&rendered),
            vec!["series1_2", "series1_4", "series1_6"]
        );
    }

    #[test]
    fn test_mpi_defaults_derive_nodes() {
        let mut vars = variable_map([
            ("n_ranks", Value::from("4")),
            ("processes_per_node", Value::from("2")),
        ]);
        compute_mpi_vars(&mut vars);
        assert_eq!(vars.get("n_nodes"), Some(&Value::int(2)));
    }

    #[test]
    fn test_mpi_defaults_derive_ppn() {
        let mut vars = variable_map([
            ("n_ranks", Value::from("6")),
            ("n_nodes", Value::from("3")),
        ]);
        compute_mpi_vars(&mut vars);
        assert_eq!(vars.get("processes_per_node"), Some(&Value::int(2)));
    }

    #[test]
    fn test_mpi_defaults_derive_ranks() {
        let mut vars = variable_map([
            ("n_nodes", Value::from("2")),
            ("processes_per_node", Value::from("4")),
        ]);
        compute_mpi_vars(&mut vars);
        let expander = Expander::new(&vars);
        assert_eq!(
            expander.expand_var_name(keywords::N_RANKS, None, true).unwrap(),
            "8"
        );
    }
}
