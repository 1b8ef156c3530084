#![warn(trivial_numeric_casts)]

//! bfoc is an optimizing BF compiler built around a staged
//! intermediate representation. Source text parses into raw IR, then
//! a chain of passes lowers it: run-length collapsing, loop-idiom
//! recognition, and an abstract interpreter that pre-computes every
//! tape effect it can prove. Whatever level the chain stops at, the
//! backend emits a C translation unit from it.

pub use bfir::{parse, Cell, ParseError, RawInstr, TAPE_SIZE, TAPE_START};
pub use codegen::{emit_program, generate_c, CSource, Emitter};
pub use collapse::CollapseInstr;
pub use execution::interpret;
pub use flow::{FlowInstr, Target};
pub use registry::{
    run_chain, IrLevel, PassDescriptor, Program, Registry, RegistryError, NO_OPTIMISATION,
};
pub use state::StateInstr;

pub mod bfir;
pub mod codegen;
pub mod collapse;
pub mod diagnostics;
pub mod execution;
pub mod flow;
pub mod registry;
pub mod state;
