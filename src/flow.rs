//! The flow pass recognizes closed-form loop idioms in collapsed IR
//! and rewrites them into single instructions:
//!
//! - `[-]` and friends become `Set(0)`,
//! - multiply-accumulate-and-clear loops like `[->++<]` become
//!   `Transfer`,
//! - move-only loops like `[>]` become `FindZero`.
//!
//! Loops that match no idiom survive as generic `Loop`s with a fresh
//! identity name, which out-of-line backends may use as a routine
//! name. A `Modify` directly behind a `Set`, `Loop` or `Transfer`
//! folds into a `Set`, since all three leave the current cell at a
//! statically known value.

use crate::bfir::Cell;
use crate::collapse::CollapseInstr;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::num::Wrapping;
use uuid::Uuid;

/// One destination of a `Transfer`: the origin's value, scaled by
/// `multiplier`, is added to the cell at `offset`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Target {
    pub offset: isize,
    pub multiplier: Cell,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum FlowInstr {
    Modify { amount: Cell },
    Set { value: Cell },
    Move { amount: isize },
    Transfer { targets: Vec<Target> },
    Loop { body: Vec<FlowInstr>, name: String },
    FindZero { step: isize },
    Read,
    Write,
}

impl FlowInstr {
    /// Build a `Transfer`, normalizing target order. Zero offsets and
    /// zero multipliers are contract violations, not data.
    pub fn transfer(targets: Vec<Target>) -> FlowInstr {
        assert!(!targets.is_empty(), "transfer must have targets");
        for target in &targets {
            assert!(target.offset != 0, "transfer target offset can't be 0");
            assert!(target.multiplier.0 != 0, "transfer multiplier can't be 0");
        }
        let targets = targets
            .into_iter()
            .sorted_by_key(|target| target.offset)
            .collect();
        FlowInstr::Transfer { targets }
    }

    pub fn anonymous_loop(body: Vec<FlowInstr>) -> FlowInstr {
        FlowInstr::Loop {
            body,
            name: fresh_loop_name(),
        }
    }
}

pub(crate) fn fresh_loop_name() -> String {
    format!("loop_{}", Uuid::new_v4().simple())
}

fn fmt_with_indent(instr: &FlowInstr, indent: i32, f: &mut fmt::Formatter) {
    for _ in 0..indent {
        let _ = write!(f, "  ");
    }

    match instr {
        FlowInstr::Loop { body, name } => {
            let _ = write!(f, "Loop {}", name);

            for loop_instr in body {
                let _ = writeln!(f);
                fmt_with_indent(loop_instr, indent + 1, f);
            }
        }
        instr => {
            let _ = write!(f, "{:?}", instr);
        }
    }
}

impl fmt::Display for FlowInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_with_indent(self, 0, f);
        Ok(())
    }
}

/// Rewrite collapsed IR into flow IR, depth-first.
pub fn optimise(input: Vec<CollapseInstr>) -> Vec<FlowInstr> {
    let mut output: Vec<FlowInstr> = Vec::with_capacity(input.len());

    for instr in input {
        let flow = match instr {
            CollapseInstr::Write { .. } => FlowInstr::Write,
            CollapseInstr::Read { .. } => FlowInstr::Read,
            CollapseInstr::Move { amount, .. } => FlowInstr::Move { amount },
            CollapseInstr::Modify { amount, .. } => match output.last() {
                Some(FlowInstr::Set { value }) => {
                    let value = *value + amount;
                    output.pop();
                    FlowInstr::Set { value }
                }
                // Both idioms leave the current cell at zero, so the
                // modify amount is the cell's new value.
                Some(FlowInstr::Loop { .. }) | Some(FlowInstr::Transfer { .. }) => {
                    FlowInstr::Set { value: amount }
                }
                _ => FlowInstr::Modify { amount },
            },
            CollapseInstr::Loop { body, .. } => rewrite_loop(optimise(body)),
        };
        output.push(flow);
    }

    output
}

/// Classify an already-optimized loop body against the three closed
/// forms, falling back to a generic loop.
fn rewrite_loop(body: Vec<FlowInstr>) -> FlowInstr {
    if !is_arithmetic(&body) {
        return FlowInstr::anonymous_loop(body);
    }

    let net = net_movement(&body);
    if net == 0 {
        let deltas = accumulated_deltas(&body);
        let origin = deltas.get(&0).copied().unwrap_or(Wrapping(0));

        if origin.0 != 0 {
            if deltas.len() == 1 {
                // The loop only spins its own cell to zero.
                return FlowInstr::Set { value: Wrapping(0) };
            }
            if origin == Wrapping(u8::MAX) {
                let targets: Vec<Target> = deltas
                    .into_iter()
                    .filter(|(offset, multiplier)| *offset != 0 && multiplier.0 != 0)
                    .map(|(offset, multiplier)| Target { offset, multiplier })
                    .collect();
                if targets.is_empty() {
                    // Every other touched offset cancelled out, so
                    // this is a plain clear loop after all.
                    return FlowInstr::Set { value: Wrapping(0) };
                }
                return FlowInstr::transfer(targets);
            }
            // Origin delta with magnitude > 1 next to other targets:
            // the iteration count isn't the origin's value, so the
            // idiom doesn't apply.
        }
    } else if accumulated_deltas(&body)
        .values()
        .all(|delta| delta.0 == 0)
    {
        return FlowInstr::FindZero { step: net };
    }

    FlowInstr::anonymous_loop(body)
}

fn is_arithmetic(body: &[FlowInstr]) -> bool {
    body.iter()
        .all(|instr| matches!(instr, FlowInstr::Modify { .. } | FlowInstr::Move { .. }))
}

fn net_movement(body: &[FlowInstr]) -> isize {
    body.iter()
        .map(|instr| match instr {
            FlowInstr::Move { amount } => *amount,
            _ => 0,
        })
        .sum()
}

/// Walk an arithmetic body left to right, accumulating the net
/// modification per relative offset.
fn accumulated_deltas(body: &[FlowInstr]) -> HashMap<isize, Cell> {
    let mut deltas = HashMap::new();
    let mut offset = 0;
    for instr in body {
        match instr {
            FlowInstr::Modify { amount } => {
                *deltas.entry(offset).or_insert(Wrapping(0)) += *amount;
            }
            FlowInstr::Move { amount } => offset += amount,
            _ => unreachable!("accumulated deltas requested for a non-arithmetic body"),
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use crate::collapse;
    use pretty_assertions::assert_eq;

    fn flow_src(src: &str) -> Vec<FlowInstr> {
        optimise(collapse::optimise(parse(src).unwrap()))
    }

    #[test]
    fn clear_loop_becomes_set_zero() {
        assert_eq!(flow_src("[-]"), [FlowInstr::Set { value: Wrapping(0) }]);
        assert_eq!(flow_src("[+]"), [FlowInstr::Set { value: Wrapping(0) }]);
    }

    #[test]
    fn transfer_idiom() {
        assert_eq!(
            flow_src("[->+<]"),
            [FlowInstr::Transfer {
                targets: vec![Target {
                    offset: 1,
                    multiplier: Wrapping(1)
                }]
            }]
        );
    }

    #[test]
    fn transfer_with_multipliers() {
        assert_eq!(
            flow_src("[->++>+++<<]"),
            [FlowInstr::Transfer {
                targets: vec![
                    Target {
                        offset: 1,
                        multiplier: Wrapping(2)
                    },
                    Target {
                        offset: 2,
                        multiplier: Wrapping(3)
                    }
                ]
            }]
        );
    }

    #[test]
    fn transfer_subtracting_target() {
        assert_eq!(
            flow_src("[->-<]"),
            [FlowInstr::Transfer {
                targets: vec![Target {
                    offset: 1,
                    multiplier: Wrapping(255)
                }]
            }]
        );
    }

    #[test]
    fn transfer_targets_sorted_by_offset() {
        // Touches offset 2 before offset 1; targets still come out
        // ascending.
        assert_eq!(
            flow_src("[->>+<+<]"),
            [FlowInstr::Transfer {
                targets: vec![
                    Target {
                        offset: 1,
                        multiplier: Wrapping(1)
                    },
                    Target {
                        offset: 2,
                        multiplier: Wrapping(1)
                    }
                ]
            }]
        );
    }

    #[test]
    fn cancelled_target_reduces_to_clear() {
        assert_eq!(flow_src("[->+-<]"), [FlowInstr::Set { value: Wrapping(0) }]);
    }

    #[test]
    fn scan_idiom() {
        assert_eq!(flow_src("[>]"), [FlowInstr::FindZero { step: 1 }]);
        assert_eq!(flow_src("[<<]"), [FlowInstr::FindZero { step: -2 }]);
    }

    #[test]
    fn scan_with_cancelled_arithmetic() {
        // The +- cancels per offset, leaving a move-only loop.
        assert_eq!(flow_src("[+->]"), [FlowInstr::FindZero { step: 1 }]);
    }

    #[test]
    fn steep_origin_delta_is_not_convertible() {
        // Origin steps by -2 per iteration; the iteration count isn't
        // the cell value, so rewriting to Transfer would be unsound.
        assert!(matches!(
            flow_src("[-->+<]").as_slice(),
            [FlowInstr::Loop { .. }]
        ));
    }

    #[test]
    fn zero_origin_delta_is_not_convertible() {
        assert!(matches!(flow_src("[>+<]").as_slice(), [FlowInstr::Loop { .. }]));
    }

    #[test]
    fn unbalanced_arithmetic_loop_stays_loop() {
        assert!(matches!(
            flow_src("[>-]").as_slice(),
            [FlowInstr::Loop { .. }]
        ));
    }

    #[test]
    fn modify_after_set_folds() {
        assert_eq!(flow_src("[-]+++"), [FlowInstr::Set { value: Wrapping(3) }]);
    }

    #[test]
    fn modify_after_transfer_folds_to_set() {
        assert_eq!(
            flow_src("[->+<]++"),
            [
                FlowInstr::Transfer {
                    targets: vec![Target {
                        offset: 1,
                        multiplier: Wrapping(1)
                    }]
                },
                FlowInstr::Set { value: Wrapping(2) }
            ]
        );
    }

    #[test]
    fn modify_after_generic_loop_folds_to_set() {
        let flow = flow_src("[,]--");
        assert!(matches!(&flow[0], FlowInstr::Loop { .. }));
        assert_eq!(flow[1], FlowInstr::Set { value: Wrapping(254) });
    }

    #[test]
    fn set_folding_applies_inside_loop_bodies() {
        let flow = flow_src("[.[-]+]");
        match &flow[0] {
            FlowInstr::Loop { body, .. } => {
                assert_eq!(
                    body.as_slice(),
                    [FlowInstr::Write, FlowInstr::Set { value: Wrapping(1) }]
                );
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn empty_loop_stays_loop() {
        assert!(matches!(flow_src("[]").as_slice(), [FlowInstr::Loop { .. }]));
    }
}
