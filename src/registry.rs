//! The pass registry resolves a requested optimisation level into an
//! ordered chain of passes.
//!
//! Every pass advertises an identifier plus input and output IR-level
//! tags. Resolution starts at the requested terminal pass and walks
//! backwards, at each step looking for a pass whose output feeds the
//! chain's current input requirement, until the chain starts at raw
//! IR. Externally supplied descriptors shadow the built-in ones when
//! identifiers collide.

use crate::bfir::RawInstr;
use crate::collapse::{self, CollapseInstr};
use crate::flow::{self, FlowInstr};
use crate::state::{self, StateInstr};
use thiserror::Error;
use tracing::debug;

/// Identifier that resolves to the empty chain.
pub const NO_OPTIMISATION: &str = "none";

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum IrLevel {
    Raw,
    Collapsed,
    Flow,
    State,
}

/// A whole program at some IR level, handed from pass to pass by
/// ownership transfer.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Program {
    Raw(Vec<RawInstr>),
    Collapsed(Vec<CollapseInstr>),
    Flow(Vec<FlowInstr>),
    State(Vec<StateInstr>),
}

impl Program {
    pub fn level(&self) -> IrLevel {
        match self {
            Program::Raw(_) => IrLevel::Raw,
            Program::Collapsed(_) => IrLevel::Collapsed,
            Program::Flow(_) => IrLevel::Flow,
            Program::State(_) => IrLevel::State,
        }
    }
}

#[derive(Debug)]
pub struct PassDescriptor {
    pub identifier: &'static str,
    pub input: IrLevel,
    pub output: IrLevel,
    pub apply: fn(Program) -> Program,
}

fn apply_collapse(program: Program) -> Program {
    match program {
        Program::Raw(instrs) => Program::Collapsed(collapse::optimise(instrs)),
        other => panic!("collapse pass fed {:?} input", other.level()),
    }
}

fn apply_flow(program: Program) -> Program {
    match program {
        Program::Collapsed(instrs) => Program::Flow(flow::optimise(instrs)),
        other => panic!("flow pass fed {:?} input", other.level()),
    }
}

fn apply_state(program: Program) -> Program {
    match program {
        Program::Flow(instrs) => Program::State(state::optimise(instrs)),
        other => panic!("state pass fed {:?} input", other.level()),
    }
}

fn builtin_passes() -> Vec<PassDescriptor> {
    vec![
        PassDescriptor {
            identifier: "collapse",
            input: IrLevel::Raw,
            output: IrLevel::Collapsed,
            apply: apply_collapse,
        },
        PassDescriptor {
            identifier: "flow",
            input: IrLevel::Collapsed,
            output: IrLevel::Flow,
            apply: apply_flow,
        },
        PassDescriptor {
            identifier: "state",
            input: IrLevel::Flow,
            output: IrLevel::State,
            apply: apply_state,
        },
    ]
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("optimisation '{0}' not found")]
    PassNotFound(String),
    #[error("optimisation chain for '{0}' never reaches raw input")]
    UnreachableChain(String),
}

pub struct Registry {
    external: Vec<PassDescriptor>,
    builtin: Vec<PassDescriptor>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::with_external(Vec::new())
    }

    /// A registry extended with caller-supplied passes, which win
    /// over built-ins on identifier collisions.
    pub fn with_external(external: Vec<PassDescriptor>) -> Registry {
        Registry {
            external,
            builtin: builtin_passes(),
        }
    }

    fn find_by_identifier(&self, identifier: &str) -> Option<&PassDescriptor> {
        self.external
            .iter()
            .chain(self.builtin.iter())
            .find(|pass| pass.identifier.eq_ignore_ascii_case(identifier))
    }

    fn find_by_output(&self, output: IrLevel) -> Option<&PassDescriptor> {
        self.external
            .iter()
            .chain(self.builtin.iter())
            .find(|pass| pass.output == output)
    }

    /// Resolve the full chain ending at the requested pass. Fails
    /// before any compilation starts if a link is missing.
    pub fn resolve(&self, requested: &str) -> Result<Vec<&PassDescriptor>, RegistryError> {
        if requested.eq_ignore_ascii_case(NO_OPTIMISATION) {
            return Ok(Vec::new());
        }

        let terminal = self
            .find_by_identifier(requested)
            .ok_or_else(|| RegistryError::PassNotFound(requested.to_owned()))?;

        let mut chain = vec![terminal];
        let mut required = terminal.input;
        let total = self.external.len() + self.builtin.len();

        while required != IrLevel::Raw {
            if chain.len() > total {
                return Err(RegistryError::UnreachableChain(requested.to_owned()));
            }
            let link = self
                .find_by_output(required)
                .ok_or_else(|| RegistryError::PassNotFound(requested.to_owned()))?;
            chain.insert(0, link);
            required = link.input;
        }

        debug!(
            chain = ?chain.iter().map(|pass| pass.identifier).collect::<Vec<_>>(),
            "resolved optimisation chain"
        );
        Ok(chain)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

/// Apply a resolved chain to a program by ownership transfer.
pub fn run_chain(chain: &[&PassDescriptor], program: Program) -> Program {
    chain
        .iter()
        .fold(program, |program, pass| (pass.apply)(program))
}
