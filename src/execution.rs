//! A direct in-process interpreter over flow IR.
//!
//! The state pass uses it to pre-evaluate programs that never read
//! input: their whole output is deterministic, so running them at
//! compile time is cheaper and simpler than folding them. The step
//! budget keeps compilation total when handed a divergent program.

use crate::bfir::{Cell, TAPE_SIZE, TAPE_START};
use crate::flow::FlowInstr;
use std::num::Wrapping;

struct ExecutionState {
    tape: Vec<Cell>,
    pointer: usize,
    output: Vec<u8>,
    steps_left: u64,
}

impl ExecutionState {
    fn new(max_steps: u64) -> ExecutionState {
        ExecutionState {
            tape: vec![Wrapping(0); TAPE_SIZE],
            pointer: TAPE_START,
            output: Vec::new(),
            steps_left: max_steps,
        }
    }

    fn step(&mut self) -> bool {
        if self.steps_left == 0 {
            return false;
        }
        self.steps_left -= 1;
        true
    }
}

/// Interpret a read-free flow program, returning its complete
/// output, or `None` if the step budget runs out first.
pub fn interpret(instrs: &[FlowInstr], max_steps: u64) -> Option<Vec<u8>> {
    let mut state = ExecutionState::new(max_steps);
    if run(instrs, &mut state) {
        Some(state.output)
    } else {
        None
    }
}

fn run(instrs: &[FlowInstr], state: &mut ExecutionState) -> bool {
    for instr in instrs {
        if !state.step() {
            return false;
        }
        match instr {
            FlowInstr::Modify { amount } => state.tape[state.pointer] += *amount,
            FlowInstr::Set { value } => state.tape[state.pointer] = *value,
            FlowInstr::Move { amount } => {
                state.pointer = state.pointer.wrapping_add_signed(*amount)
            }
            FlowInstr::Transfer { targets } => {
                let value = state.tape[state.pointer];
                if value.0 != 0 {
                    for target in targets {
                        let index = state.pointer.wrapping_add_signed(target.offset);
                        state.tape[index] += value * target.multiplier;
                    }
                    state.tape[state.pointer] = Wrapping(0);
                }
            }
            FlowInstr::FindZero { step } => {
                while state.tape[state.pointer].0 != 0 {
                    if !state.step() {
                        return false;
                    }
                    state.pointer = state.pointer.wrapping_add_signed(*step);
                }
            }
            FlowInstr::Loop { body, .. } => {
                while state.tape[state.pointer].0 != 0 {
                    if !state.step() || !run(body, state) {
                        return false;
                    }
                }
            }
            FlowInstr::Write => state.output.push(state.tape[state.pointer].0),
            FlowInstr::Read => {
                unreachable!("the pre-evaluation interpreter only runs read-free programs")
            }
        }
    }
    true
}
