//! bfir defines the raw instruction tree for BF. This datastructure
//! represents the original BF source code with position data so we
//! can find the source lines from a portion of the tree.
//!
//! It also provides the parser that builds raw trees from source
//! code, producing good error messages on malformed inputs.

use self::RawInstr::*;
use crate::diagnostics::Position;
use std::fmt;
use std::num::Wrapping;
use thiserror::Error;

#[cfg(test)]
use pretty_assertions::assert_eq;

/// A cell is the fundamental BF datatype that we work with. Cells
/// hold exactly one byte and all arithmetic on them wraps mod 256.
pub type Cell = Wrapping<u8>;

/// Number of cells on the runtime tape.
pub const TAPE_SIZE: usize = 80_000;
/// Index the pointer starts at, the midpoint of the tape.
pub const TAPE_START: usize = 40_000;

/// `RawInstr` is a node in the unoptimized instruction tree, one
/// node per meaningful source glyph.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RawInstr {
    Increment {
        position: Option<Position>,
    },
    Decrement {
        position: Option<Position>,
    },
    MoveLeft {
        position: Option<Position>,
    },
    MoveRight {
        position: Option<Position>,
    },
    Read {
        position: Option<Position>,
    },
    Write {
        position: Option<Position>,
    },
    Loop {
        body: Vec<RawInstr>,
        position: Option<Position>,
    },
}

impl RawInstr {
    pub fn position(&self) -> Option<Position> {
        match *self {
            Increment { position } => position,
            Decrement { position } => position,
            MoveLeft { position } => position,
            MoveRight { position } => position,
            Read { position } => position,
            Write { position } => position,
            Loop { position, .. } => position,
        }
    }
}

fn fmt_with_indent(instr: &RawInstr, indent: i32, f: &mut fmt::Formatter) {
    for _ in 0..indent {
        let _ = write!(f, "  ");
    }

    match instr {
        Loop {
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

impl fmt::Display for RawInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_with_indent(self, 0, f);
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("this ] has no matching [ (position {position:?})")]
    UnbalancedClose { position: Position },
    #[error("this [ has no matching ] (position {position:?})")]
    UnterminatedLoop { position: Position },
}

/// Given a string of BF source code, parse and return our raw
/// instruction tree. Characters that aren't instructions are
/// comments and skipped without complaint.
pub fn parse(source: &str) -> Result<Vec<RawInstr>, ParseError> {
    // Instructions in the current loop (or toplevel).
    let mut instructions = vec![];
    // Contains the instructions of open parent loops (or toplevel),
    // and the starting indices of the loops.
    let mut stack = vec![];

    for (index, c) in source.chars().enumerate() {
        let position = Some(Position {
            start: index,
            end: index,
        });
        match c {
            '+' => instructions.push(Increment { position }),
            '-' => instructions.push(Decrement { position }),
            '<' => instructions.push(MoveLeft { position }),
            '>' => instructions.push(MoveRight { position }),
            ',' => instructions.push(Read { position }),
            '.' => instructions.push(Write { position }),
            '[' => {
                stack.push((instructions, index));
                instructions = vec![];
            }
            ']' => {
                if let Some((mut parent_instr, open_index)) = stack.pop() {
                    parent_instr.push(Loop {
                        body: instructions,
                        position: Some(Position {
                            start: open_index,
                            end: index,
                        }),
                    });
                    instructions = parent_instr;
                } else {
                    return Err(ParseError::UnbalancedClose {
                        position: Position {
                            start: index,
                            end: index,
                        },
                    });
                }
            }
            _ => (),
        }
    }

    if let Some((_, open_index)) = stack.last() {
        return Err(ParseError::UnterminatedLoop {
            position: Position {
                start: *open_index,
                end: *open_index,
            },
        });
    }

    Ok(instructions)
}

#[test]
fn parse_increment() {
    assert_eq!(
        parse("+").unwrap(),
        [Increment {
            position: Some(Position { start: 0, end: 0 }),
        }]
    );
    assert_eq!(
        parse("++").unwrap(),
        [
            Increment {
                position: Some(Position { start: 0, end: 0 }),
            },
            Increment {
                position: Some(Position { start: 1, end: 1 }),
            }
        ]
    );
}

#[test]
fn parse_decrement() {
    assert_eq!(
        parse("-").unwrap(),
        [Decrement {
            position: Some(Position { start: 0, end: 0 }),
        }]
    );
}

#[test]
fn parse_moves() {
    assert_eq!(
        parse(">").unwrap(),
        [MoveRight {
            position: Some(Position { start: 0, end: 0 }),
        }]
    );
    assert_eq!(
        parse("<").unwrap(),
        [MoveLeft {
            position: Some(Position { start: 0, end: 0 }),
        }]
    );
}

#[test]
fn parse_read() {
    assert_eq!(
        parse(",").unwrap(),
        [Read {
            position: Some(Position { start: 0, end: 0 })
        }]
    );
}

#[test]
fn parse_write() {
    assert_eq!(
        parse(".").unwrap(),
        [Write {
            position: Some(Position { start: 0, end: 0 })
        }]
    );
}

#[test]
fn parse_empty_loop() {
    let expected = [Loop {
        body: vec![],
        position: Some(Position { start: 0, end: 1 }),
    }];
    assert_eq!(parse("[]").unwrap(), expected);
}

#[test]
fn parse_simple_loop() {
    let loop_body = vec![Increment {
        position: Some(Position { start: 1, end: 1 }),
    }];
    let expected = [Loop {
        body: loop_body,
        position: Some(Position { start: 0, end: 2 }),
    }];
    assert_eq!(parse("[+]").unwrap(), expected);
}

#[test]
fn parse_complex_loop() {
    let loop_body = vec![
        Read {
            position: Some(Position { start: 2, end: 2 }),
        },
        Increment {
            position: Some(Position { start: 3, end: 3 }),
        },
    ];
    let expected = [
        Write {
            position: Some(Position { start: 0, end: 0 }),
        },
        Loop {
            body: loop_body,
            position: Some(Position { start: 1, end: 4 }),
        },
        Decrement {
            position: Some(Position { start: 5, end: 5 }),
        },
    ];
    assert_eq!(parse(".[,+]-").unwrap(), expected);
}

#[test]
fn parse_unbalanced_loop() {
    assert_eq!(
        parse("]"),
        Err(ParseError::UnbalancedClose {
            position: Position { start: 0, end: 0 }
        })
    );
    assert_eq!(
        parse("["),
        Err(ParseError::UnterminatedLoop {
            position: Position { start: 0, end: 0 }
        })
    );
    assert!(parse("][").is_err());
    assert!(parse("[][").is_err());
}

#[test]
fn parse_comment() {
    assert_eq!(parse("foo! ").unwrap(), []);
}
