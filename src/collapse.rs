//! The collapse pass merges maximal runs of identical-class raw
//! instructions into single counted nodes: `+`/`-` runs become one
//! `Modify`, `<`/`>` runs become one `Move`. Read and write pass
//! through untouched and loop bodies are collapsed depth-first.
//!
//! A run that cancels out entirely (e.g. `+-`) still produces a
//! `Modify(0)`; dropping no-ops is a later pass's business.

use crate::bfir::{Cell, RawInstr};
use crate::diagnostics::{Combine, Position};
use std::fmt;
use std::num::Wrapping;

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum CollapseInstr {
    Modify {
        amount: Cell,
        position: Option<Position>,
    },
    Move {
        amount: isize,
        position: Option<Position>,
    },
    Read {
        position: Option<Position>,
    },
    Write {
        position: Option<Position>,
    },
    Loop {
        body: Vec<CollapseInstr>,
        position: Option<Position>,
    },
}

fn fmt_with_indent(instr: &CollapseInstr, indent: i32, f: &mut fmt::Formatter) {
    for _ in 0..indent {
        let _ = write!(f, "  ");
    }

    match instr {
        CollapseInstr::Loop {
            body: loop_body,
            position,
        } => {
            let _ = write!(f, "Loop position: {:?}", position);

            for loop_instr in loop_body {
                let _ = writeln!(f);
                fmt_with_indent(loop_instr, indent + 1, f);
            }
        }
        instr => {
            let _ = write!(f, "{:?}", instr);
        }
    }
}

impl fmt::Display for CollapseInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_with_indent(self, 0, f);
        Ok(())
    }
}

/// Collapse a raw instruction tree, depth-first.
pub fn optimise(input: Vec<RawInstr>) -> Vec<CollapseInstr> {
    let mut output = Vec::with_capacity(input.len());

    let mut iter = input.into_iter().peekable();
    while let Some(instr) = iter.next() {
        let collapsed = match instr {
            RawInstr::Increment { position } | RawInstr::Decrement { position } => {
                let mut amount = delta_of(&instr);
                let mut position = position;

                while let Some(next) = iter.peek() {
                    match next {
                        RawInstr::Increment { .. } | RawInstr::Decrement { .. } => {
                            amount += delta_of(next);
                            position = position.combine(next.position());
                            iter.next();
                        }
                        _ => break,
                    }
                }

                CollapseInstr::Modify { amount, position }
            }
            RawInstr::MoveLeft { position } | RawInstr::MoveRight { position } => {
                let mut amount = step_of(&instr);
                let mut position = position;

                while let Some(next) = iter.peek() {
                    match next {
                        RawInstr::MoveLeft { .. } | RawInstr::MoveRight { .. } => {
                            amount += step_of(next);
                            position = position.combine(next.position());
                            iter.next();
                        }
                        _ => break,
                    }
                }

                CollapseInstr::Move { amount, position }
            }
            RawInstr::Read { position } => CollapseInstr::Read { position },
            RawInstr::Write { position } => CollapseInstr::Write { position },
            RawInstr::Loop { body, position } => CollapseInstr::Loop {
                body: optimise(body),
                position,
            },
        };
        output.push(collapsed);
    }

    output
}

fn delta_of(instr: &RawInstr) -> Cell {
    match instr {
        RawInstr::Increment { .. } => Wrapping(1),
        RawInstr::Decrement { .. } => Wrapping(u8::MAX),
        _ => Wrapping(0),
    }
}

fn step_of(instr: &RawInstr) -> isize {
    match instr {
        RawInstr::MoveRight { .. } => 1,
        RawInstr::MoveLeft { .. } => -1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use pretty_assertions::assert_eq;
    use quickcheck::quickcheck;

    fn collapse_src(src: &str) -> Vec<CollapseInstr> {
        optimise(parse(src).unwrap())
    }

    fn amounts(instrs: &[CollapseInstr]) -> Vec<(Option<u8>, Option<isize>)> {
        instrs
            .iter()
            .map(|i| match i {
                CollapseInstr::Modify { amount, .. } => (Some(amount.0), None),
                CollapseInstr::Move { amount, .. } => (None, Some(*amount)),
                _ => (None, None),
            })
            .collect()
    }

    #[test]
    fn collapse_increment_run() {
        assert_eq!(amounts(&collapse_src("+++")), [(Some(3), None)]);
    }

    #[test]
    fn collapse_mixed_run_to_noop() {
        // A cancelled run still yields an explicit Modify(0).
        assert_eq!(amounts(&collapse_src("+-")), [(Some(0), None)]);
    }

    #[test]
    fn collapse_decrement_wraps() {
        assert_eq!(amounts(&collapse_src("--")), [(Some(254), None)]);
    }

    #[test]
    fn collapse_move_run() {
        assert_eq!(amounts(&collapse_src("><<")), [(None, Some(-1))]);
    }

    #[test]
    fn collapse_does_not_merge_across_classes() {
        assert_eq!(
            amounts(&collapse_src("++>++")),
            [(Some(2), None), (None, Some(1)), (Some(2), None)]
        );
    }

    #[test]
    fn collapse_recurses_into_loops() {
        let collapsed = collapse_src("[--]");
        match &collapsed[0] {
            CollapseInstr::Loop { body, .. } => {
                assert_eq!(amounts(body), [(Some(254), None)]);
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn collapse_combines_run_positions() {
        let collapsed = collapse_src("+++");
        match &collapsed[0] {
            CollapseInstr::Modify { position, .. } => {
                assert_eq!(*position, Some(Position { start: 0, end: 2 }));
            }
            other => panic!("expected modify, got {:?}", other),
        }
    }

    #[test]
    fn collapse_passes_io_through() {
        let collapsed = collapse_src(",.");
        assert!(matches!(collapsed[0], CollapseInstr::Read { .. }));
        assert!(matches!(collapsed[1], CollapseInstr::Write { .. }));
    }

    quickcheck! {
        /// A whole run of arithmetic glyphs always merges to one Modify
        /// holding the algebraic sum mod 256.
        fn run_merges_to_algebraic_sum(ups: u8, downs: u8) -> bool {
            let src = format!("{}{}", "+".repeat(ups as usize), "-".repeat(downs as usize));
            if src.is_empty() {
                return true;
            }
            let collapsed = collapse_src(&src);
            collapsed.len() == 1
                && matches!(
                    &collapsed[0],
                    CollapseInstr::Modify { amount, .. }
                        if amount.0 == ups.wrapping_sub(downs)
                )
        }

        /// Collapsed output never contains two adjacent nodes of the
        /// same collapsible class.
        fn no_adjacent_same_class(seed: Vec<bool>) -> bool {
            let src: String = seed
                .iter()
                .enumerate()
                .map(|(i, b)| match (i % 4, b) {
                    (0, true) => '+',
                    (0, false) => '-',
                    (1, true) => '>',
                    (1, false) => '<',
                    (2, true) => '+',
                    (2, false) => '>',
                    (_, true) => '-',
                    (_, false) => '<',
                })
                .collect();
            let collapsed = collapse_src(&src);
            collapsed.windows(2).all(|w| {
                !matches!(
                    (&w[0], &w[1]),
                    (CollapseInstr::Modify { .. }, CollapseInstr::Modify { .. })
                        | (CollapseInstr::Move { .. }, CollapseInstr::Move { .. })
                )
            })
        }
    }
}
