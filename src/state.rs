//! The state pass walks flow IR with an abstract interpreter: a
//! shadow tape and pointer mirror what the compiled program would
//! compute, and as long as the current cell's value is still known
//! at compile time, arithmetic folds into the shadow tape instead of
//! being emitted. Writes of known bytes batch into `Print`, pending
//! cell changes batch into `BulkSet`, and pointer motion batches
//! into `PointerSet`, all materialized only when tracking has to
//! yield to runtime uncertainty.
//!
//! A `Read` makes the current cell's value unknowable ("infected").
//! Infection spreads monotonically; once the pointer itself is
//! infected the rest of the traversal is translated one-to-one with
//! no further folding.
//!
//! Loops over known cells are unrolled one logical iteration at a
//! time against a snapshot of the abstract state; an iteration that
//! infects the pointer is rolled back and the loop is emitted
//! literally from the snapshot instead.

use crate::bfir::{Cell, TAPE_START};
use crate::execution;
use crate::flow::{FlowInstr, Target};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::Wrapping;
use tracing::debug;

/// Budget for compile-time evaluation, shared by pre-evaluation and
/// loop unrolling. Exhausting it degrades to literal emission rather
/// than hanging the compiler on a divergent program.
pub const MAX_STEPS: u64 = 1_000_000;

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum StateInstr {
    Modify { amount: Cell },
    Set { value: Cell },
    Move { amount: isize },
    Transfer { targets: Vec<Target> },
    Loop { body: Vec<StateInstr>, name: String },
    FindZero { step: isize },
    Read,
    Write,
    /// Solidified literal output bytes, never re-examined.
    Print { bytes: Vec<u8> },
    /// A batch of compile-time-known cell writes at absolute indices.
    BulkSet { entries: Vec<(usize, Cell)> },
    /// Materializes accumulated pointer motion as one absolute store.
    PointerSet { index: usize },
}

fn fmt_with_indent(instr: &StateInstr, indent: i32, f: &mut fmt::Formatter) {
    for _ in 0..indent {
        let _ = write!(f, "  ");
    }

    match instr {
        StateInstr::Loop { body, name } => {
            let _ = write!(f, "Loop {}", name);

            for loop_instr in body {
                let _ = writeln!(f);
                fmt_with_indent(loop_instr, indent + 1, f);
            }
        }
        StateInstr::Print { bytes } => {
            let _ = write!(f, "Print({:?})", String::from_utf8_lossy(bytes));
        }
        instr => {
            let _ = write!(f, "{:?}", instr);
        }
    }
}

impl fmt::Display for StateInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_with_indent(self, 0, f);
        Ok(())
    }
}

/// Compile-time shadow of the runtime, private to one traversal.
///
/// The tape is sparse (untouched cells are zero) so that cloning a
/// snapshot before a loop-unrolling attempt costs only as much as
/// the program has actually touched. Cloning takes a deep,
/// alias-free copy; a rolled-back attempt can't corrupt the state
/// it started from.
#[derive(Clone)]
struct AbstractState {
    tape: HashMap<usize, Cell>,
    pointer: usize,
    /// Once true, constant tracking is over for good.
    pointer_infected: bool,
    /// Absolute indices whose runtime value is unknowable.
    infected: HashSet<usize>,
    /// Accumulated delta per touched index since the last flush.
    pending: HashMap<usize, Cell>,
    /// Pointer motion since the last flush.
    drift: isize,
    fuel: u64,
}

impl AbstractState {
    fn new() -> AbstractState {
        AbstractState {
            tape: HashMap::new(),
            pointer: TAPE_START,
            pointer_infected: false,
            infected: HashSet::new(),
            pending: HashMap::new(),
            drift: 0,
            fuel: MAX_STEPS,
        }
    }

    fn pointer_safe(&self) -> bool {
        !self.pointer_infected
    }

    fn infected_here(&self) -> bool {
        self.infected.contains(&self.pointer)
    }

    fn infect(&mut self, index: usize) {
        self.infected.insert(index);
    }

    fn value_at(&self, index: usize) -> Cell {
        self.tape.get(&index).copied().unwrap_or(Wrapping(0))
    }

    fn value_here(&self) -> Cell {
        self.value_at(self.pointer)
    }

    fn move_pointer(&mut self, amount: isize) {
        self.pointer = self.pointer.wrapping_add_signed(amount);
        self.drift += amount;
    }

    fn set_pointer(&mut self, index: usize) {
        self.drift += index as isize - self.pointer as isize;
        self.pointer = index;
    }

    fn set_here(&mut self, value: Cell) {
        let old = self.value_here();
        if old == value {
            return;
        }
        *self.pending.entry(self.pointer).or_insert(Wrapping(0)) += value - old;
        self.tape.insert(self.pointer, value);
    }

    fn modify_here(&mut self, amount: Cell) {
        if amount.0 == 0 {
            return;
        }
        *self.pending.entry(self.pointer).or_insert(Wrapping(0)) += amount;
        let value = self.value_here() + amount;
        self.tape.insert(self.pointer, value);
    }

    /// Materialize everything the runtime is behind on: one `BulkSet`
    /// holding the shadow value of every changed cell, and a
    /// `PointerSet` whenever the pointer has drifted. Cells are only
    /// infected after they've been flushed, so every pending entry is
    /// still known here.
    fn flush(&mut self, output: &mut Vec<StateInstr>) {
        let entries: Vec<(usize, Cell)> = self
            .pending
            .iter()
            .filter(|(_, delta)| delta.0 != 0)
            .map(|(&index, _)| (index, self.value_at(index)))
            .sorted_by_key(|&(index, _)| index)
            .collect();
        self.pending.clear();

        if !entries.is_empty() {
            output.push(StateInstr::BulkSet { entries });
        }
        if self.drift != 0 {
            output.push(StateInstr::PointerSet {
                index: self.pointer,
            });
            self.drift = 0;
        }
    }

    fn step(&mut self) -> bool {
        if self.fuel == 0 {
            return false;
        }
        self.fuel -= 1;
        true
    }
}

/// Run the abstract interpreter over a flow program.
///
/// A program with no reads anywhere is fully determined at compile
/// time and collapses to a single `Print` of its entire output.
pub fn optimise(input: Vec<FlowInstr>) -> Vec<StateInstr> {
    if !contains_read(&input) {
        match execution::interpret(&input, MAX_STEPS) {
            Some(bytes) => {
                debug!(bytes = bytes.len(), "pre-evaluated read-free program");
                if bytes.is_empty() {
                    return vec![];
                }
                return vec![StateInstr::Print { bytes }];
            }
            None => {
                debug!("pre-evaluation ran out of steps, falling back to folding");
            }
        }
    }

    let mut state = AbstractState::new();
    let mut output = Vec::new();
    optimise_seq(&input, &mut state, &mut output);
    output
}

fn contains_read(instrs: &[FlowInstr]) -> bool {
    instrs.iter().any(|instr| match instr {
        FlowInstr::Read => true,
        FlowInstr::Loop { body, .. } => contains_read(body),
        _ => false,
    })
}

/// Append a committed unrolling attempt, merging a leading `Print`
/// into a trailing one so contiguous known output stays one batch.
fn extend_merging(output: &mut Vec<StateInstr>, attempt: Vec<StateInstr>) {
    let mut attempt = attempt.into_iter();
    if let Some(first) = attempt.next() {
        match (output.last_mut(), first) {
            (Some(StateInstr::Print { bytes }), StateInstr::Print { bytes: more }) => {
                bytes.extend(more);
            }
            (_, first) => output.push(first),
        }
        output.extend(attempt);
    }
}

fn optimise_seq(input: &[FlowInstr], state: &mut AbstractState, output: &mut Vec<StateInstr>) {
    for instr in input {
        if !state.pointer_safe() {
            output.push(translate(instr));
            continue;
        }
        if !state.step() {
            // Out of budget: materialize what we know and stop
            // folding for the rest of the traversal.
            state.pointer_infected = true;
            state.flush(output);
            output.push(translate(instr));
            continue;
        }

        match instr {
            FlowInstr::Read => {
                // Flush first: at end of input the read leaves the
                // cell alone, so its pre-read value is observable.
                state.flush(output);
                state.infect(state.pointer);
                output.push(StateInstr::Read);
            }
            FlowInstr::Write => {
                if state.infected_here() {
                    state.flush(output);
                    output.push(StateInstr::Write);
                } else {
                    let byte = state.value_here().0;
                    if let Some(StateInstr::Print { bytes }) = output.last_mut() {
                        bytes.push(byte);
                    } else {
                        output.push(StateInstr::Print { bytes: vec![byte] });
                    }
                }
            }
            FlowInstr::Move { amount } => state.move_pointer(*amount),
            FlowInstr::Modify { amount } => {
                if state.infected_here() {
                    state.flush(output);
                    output.push(StateInstr::Modify { amount: *amount });
                } else {
                    state.modify_here(*amount);
                }
            }
            FlowInstr::Set { value } => {
                if state.infected_here() {
                    state.flush(output);
                    output.push(StateInstr::Set { value: *value });
                } else {
                    state.set_here(*value);
                }
            }
            FlowInstr::FindZero { step } => {
                let start = state.pointer;
                let mut exhausted = false;
                while !state.infected_here() && state.value_here().0 != 0 {
                    if !state.step() {
                        exhausted = true;
                        break;
                    }
                    state.move_pointer(*step);
                }
                if exhausted || state.infected_here() {
                    // The scan ran into unknowable territory; rewind
                    // to where it started and leave it to the runtime.
                    state.pointer_infected = true;
                    state.set_pointer(start);
                    state.flush(output);
                    output.push(StateInstr::FindZero { step: *step });
                }
            }
            FlowInstr::Transfer { targets } => {
                if state.infected_here() {
                    state.flush(output);
                    for target in targets {
                        state.infect(state.pointer.wrapping_add_signed(target.offset));
                    }
                    output.push(StateInstr::Transfer {
                        targets: targets.clone(),
                    });
                    continue;
                }

                let value = state.value_here();
                if value.0 == 0 {
                    // Transferring nothing is a no-op.
                    continue;
                }

                for target in targets {
                    state.move_pointer(target.offset);
                    if state.infected_here() {
                        // The flush re-synchronizes the runtime
                        // pointer onto this target first.
                        state.flush(output);
                        output.push(StateInstr::Modify {
                            amount: value * target.multiplier,
                        });
                    } else {
                        state.modify_here(value * target.multiplier);
                    }
                    state.move_pointer(-target.offset);
                }
                state.set_here(Wrapping(0));
            }
            FlowInstr::Loop { body, name } => loop {
                let stalled = state.infected_here();
                if !stalled && state.value_here().0 == 0 {
                    // Dead loop, or fully unrolled.
                    break;
                }
                if stalled || !state.step() {
                    state.pointer_infected = true;
                    state.flush(output);
                    output.push(StateInstr::Loop {
                        body: translate_seq(body),
                        name: name.clone(),
                    });
                    break;
                }

                // One optimistic iteration against a snapshot.
                let snapshot = state.clone();
                let mut attempt = Vec::new();
                optimise_seq(body, state, &mut attempt);

                if state.pointer_safe() {
                    extend_merging(output, attempt);
                } else {
                    // The folding this iteration assumed turned out
                    // invalid; discard the attempt and emit the loop
                    // literally from the snapshot.
                    *state = snapshot;
                    state.pointer_infected = true;
                    state.flush(output);
                    output.push(StateInstr::Loop {
                        body: translate_seq(body),
                        name: name.clone(),
                    });
                    break;
                }
            },
        }
    }
}

/// One-to-one lowering with no constant propagation, used once the
/// pointer is infected.
fn translate_seq(input: &[FlowInstr]) -> Vec<StateInstr> {
    input.iter().map(translate).collect()
}

pub(crate) fn translate(instr: &FlowInstr) -> StateInstr {
    match instr {
        FlowInstr::Read => StateInstr::Read,
        FlowInstr::Write => StateInstr::Write,
        FlowInstr::Move { amount } => StateInstr::Move { amount: *amount },
        FlowInstr::Modify { amount } => StateInstr::Modify { amount: *amount },
        FlowInstr::Set { value } => StateInstr::Set { value: *value },
        FlowInstr::Transfer { targets } => StateInstr::Transfer {
            targets: targets.clone(),
        },
        FlowInstr::FindZero { step } => StateInstr::FindZero { step: *step },
        FlowInstr::Loop { body, name } => StateInstr::Loop {
            body: translate_seq(body),
            name: name.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use crate::{collapse, flow};
    use pretty_assertions::assert_eq;

    fn state_src(src: &str) -> Vec<StateInstr> {
        optimise(flow::optimise(collapse::optimise(parse(src).unwrap())))
    }

    // The canonical 13-cascading-loop hello world.
    const HELLO_WORLD: &str = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";

    #[test]
    fn read_free_program_collapses_to_print() {
        assert_eq!(
            state_src(HELLO_WORLD),
            [StateInstr::Print {
                bytes: b"Hello World!\n".to_vec()
            }]
        );
    }

    #[test]
    fn empty_program_compiles_to_nothing() {
        assert_eq!(state_src(""), []);
    }

    #[test]
    fn known_writes_batch_into_one_print() {
        assert_eq!(
            state_src("+++...."),
            [StateInstr::Print {
                bytes: vec![3, 3, 3, 3]
            }]
        );
    }

    #[test]
    fn read_stays_a_runtime_instruction() {
        assert_eq!(state_src(","), [StateInstr::Read]);
    }

    #[test]
    fn write_of_read_cell_stays_runtime() {
        assert_eq!(state_src(",."), [StateInstr::Read, StateInstr::Write]);
    }

    #[test]
    fn known_changes_flush_before_read() {
        assert_eq!(
            state_src("+>,"),
            [
                StateInstr::BulkSet {
                    entries: vec![(TAPE_START, Wrapping(1))]
                },
                StateInstr::PointerSet {
                    index: TAPE_START + 1
                },
                StateInstr::Read
            ]
        );
    }

    #[test]
    fn pending_change_at_read_cell_is_flushed() {
        // At end of input the read leaves the cell alone, so the +1
        // has to reach the runtime tape before the read happens.
        assert_eq!(
            state_src("+,"),
            [
                StateInstr::BulkSet {
                    entries: vec![(TAPE_START, Wrapping(1))]
                },
                StateInstr::Read
            ]
        );
    }

    #[test]
    fn set_at_infected_cell_is_emitted() {
        assert_eq!(
            state_src(",[-]."),
            [
                StateInstr::Read,
                StateInstr::Set { value: Wrapping(0) },
                StateInstr::Write
            ]
        );
    }

    #[test]
    fn modify_at_infected_cell_is_emitted() {
        assert_eq!(
            state_src(",+"),
            [
                StateInstr::Read,
                StateInstr::Modify {
                    amount: Wrapping(1)
                }
            ]
        );
    }

    #[test]
    fn dead_loop_is_dropped() {
        // Cell is still zero when the loop is reached.
        assert_eq!(
            state_src("[.]++.."),
            [StateInstr::Print { bytes: vec![2, 2] }]
        );
    }

    #[test]
    fn transfer_of_zero_is_dropped() {
        // The transfer's origin is known to hold zero, so only the
        // pointer sync and the read survive.
        assert_eq!(
            state_src("[->+<]>,"),
            [
                StateInstr::PointerSet {
                    index: TAPE_START + 1
                },
                StateInstr::Read
            ]
        );
    }

    #[test]
    fn transfer_into_read_cell_is_emitted_as_modify() {
        // ,>++[<+>-] : the transfer target was read, so its share is
        // emitted as a literal Modify at the synced pointer.
        assert_eq!(
            state_src(",>++[<+>-]"),
            [
                StateInstr::Read,
                StateInstr::BulkSet {
                    entries: vec![(TAPE_START + 1, Wrapping(2))]
                },
                StateInstr::Modify {
                    amount: Wrapping(2)
                }
            ]
        );
    }

    #[test]
    fn loop_unrolls_at_compile_time() {
        // The loop runs twice over known cells; its writes fold into
        // one Print and no Loop instruction survives.
        assert_eq!(
            state_src(",>++[.-]"),
            [StateInstr::Read, StateInstr::Print { bytes: vec![2, 1] }]
        );
    }

    #[test]
    fn loop_over_read_cell_is_emitted_literally() {
        let output = state_src(",[-.]");
        assert_eq!(output[0], StateInstr::Read);
        match &output[1] {
            StateInstr::Loop { body, .. } => {
                assert_eq!(
                    body.as_slice(),
                    [
                        StateInstr::Modify {
                            amount: Wrapping(255)
                        },
                        StateInstr::Write
                    ]
                );
            }
            other => panic!("expected a literal loop, got {:?}", other),
        }
        assert_eq!(output.len(), 2);
    }

    #[test]
    fn cell_infection_does_not_stop_tracking_elsewhere() {
        // The read only poisons its own cell; the neighbour is still
        // folded all the way into a Print.
        assert_eq!(
            state_src(",[-]>+."),
            [
                StateInstr::Read,
                StateInstr::Set { value: Wrapping(0) },
                StateInstr::Print { bytes: vec![1] }
            ]
        );
    }

    #[test]
    fn scan_folds_over_known_cells() {
        // Cells right of the start are still zero, so the scan lands
        // on the neighbour at compile time.
        assert_eq!(state_src("++[>]."), [StateInstr::Print { bytes: vec![0] }]);
    }

    #[test]
    fn scan_into_read_cell_is_emitted() {
        // The scan starts on a known nonzero cell but would cross a
        // read cell, so it has to happen at runtime.
        let output = state_src("+>,<[>]");
        assert!(
            output.contains(&StateInstr::FindZero { step: 1 }),
            "expected a literal FindZero in {:?}",
            output
        );
    }

    #[test]
    fn divergent_read_free_program_still_compiles() {
        // +[] never terminates; the budget has to run out and leave a
        // literal loop behind instead of hanging the compiler.
        let output = state_src("+[]");
        assert!(
            output
                .iter()
                .any(|instr| matches!(instr, StateInstr::Loop { .. })),
            "expected a literal loop in {:?}",
            output
        );
    }
}
