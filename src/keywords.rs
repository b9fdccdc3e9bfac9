//! Engine Keywords
//!
//! Identifiers with special meaning to the engine. Reserved keywords may
//! never be defined in a user scope; required keywords must be bound by the
//! time an experiment is materialized.

use std::collections::HashSet;

pub const APPLICATION_NAME: &str = "application_name";
pub const WORKLOAD_NAME: &str = "workload_name";
pub const EXPERIMENT_NAME: &str = "experiment_name";
pub const ENV_NAME: &str = "env_name";

pub const APPLICATION_RUN_DIR: &str = "application_run_dir";
pub const APPLICATION_INPUT_DIR: &str = "application_input_dir";
pub const WORKLOAD_RUN_DIR: &str = "workload_run_dir";
pub const WORKLOAD_INPUT_DIR: &str = "workload_input_dir";
pub const EXPERIMENT_RUN_DIR: &str = "experiment_run_dir";

pub const COMMAND: &str = "command";
pub const SPACK_ENV: &str = "spack_env";
pub const INPUT_NAME: &str = "input_name";
pub const LOG_DIR: &str = "log_dir";

pub const BATCH_SUBMIT: &str = "batch_submit";
pub const MPI_COMMAND: &str = "mpi_command";

pub const N_RANKS: &str = "n_ranks";
pub const N_NODES: &str = "n_nodes";
pub const PROCESSES_PER_NODE: &str = "processes_per_node";

pub const WORKSPACE_NAME: &str = "workspace_name";
pub const WORKSPACE_RUN_DIR: &str = "workspace_run_dir";
pub const WORKSPACE_INPUT_DIR: &str = "workspace_input_dir";

lazy_static::lazy_static! {
    /// Keywords a user scope may never define. The engine binds these itself.
    static ref RESERVED_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert(COMMAND);
        s.insert(SPACK_ENV);
        s.insert(APPLICATION_NAME);
        s.insert(WORKLOAD_NAME);
        s.insert(EXPERIMENT_NAME);
        s.insert(APPLICATION_RUN_DIR);
        s.insert(APPLICATION_INPUT_DIR);
        s.insert(WORKLOAD_RUN_DIR);
        s.insert(WORKLOAD_INPUT_DIR);
        s.insert(EXPERIMENT_RUN_DIR);
        s.insert(INPUT_NAME);
        s.insert(LOG_DIR);
        s
    };

    /// Keywords that must be bound before an experiment can be materialized.
    static ref REQUIRED_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert(BATCH_SUBMIT);
        s.insert(MPI_COMMAND);
        s
    };
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_KEYS.contains(name)
}

pub fn is_required(name: &str) -> bool {
    REQUIRED_KEYS.contains(name)
}

/// Iterator over the required keywords, in a stable order.
pub fn required_keys() -> impl Iterator<Item = &'static str> {
    [BATCH_SUBMIT, MPI_COMMAND].into_iter()
}
