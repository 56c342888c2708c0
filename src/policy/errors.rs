use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(contextperm::policy::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(contextperm::policy::invalid_policy),
        help("Each policy file may contain `group`, `user` and `console` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Invalid permission node: {0}")]
    #[diagnostic(
        code(contextperm::policy::invalid_node),
        help("Node syntax: allow \"some.node\" world=\"nether\" (every property is a required context)")
    )]
    InvalidNode(String),

    #[error("Undefined group `{0}`")]
    #[diagnostic(
        code(contextperm::policy::undefined_group),
        help("Define the group with: group \"<name>\" {{ allow \"...\" }}")
    )]
    UndefinedGroup(String),

    #[error("Cyclic group inheritance detected: {0}")]
    #[diagnostic(
        code(contextperm::policy::cyclic_groups),
        help("Check the `parent` entries in your group definitions for circular references")
    )]
    CyclicInheritance(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(contextperm::policy::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(contextperm::policy::io))]
    Io(#[from] std::io::Error),
}
