//! Code emission. Instructions never touch the target format
//! directly; every variant, at every IR level, lowers through the
//! small capability surface of [`Emitter`]: tape stores, pointer
//! stores, the input/output channel, and loop brackets. A backend
//! may realize a loop in-line or as a call to an out-of-line routine
//! named by the loop's identity; the pipeline doesn't care.
//!
//! The only backend shipped here generates a portable C translation
//! unit.

use crate::bfir::{Cell, RawInstr, TAPE_SIZE, TAPE_START};
use crate::collapse::CollapseInstr;
use crate::flow::{self, FlowInstr, Target};
use crate::registry::Program;
use crate::state::StateInstr;
use std::num::Wrapping;

pub trait Emitter {
    // Tape capabilities.
    fn modify_cell(&mut self, amount: Cell);
    fn set_cell(&mut self, value: Cell);
    fn set_index(&mut self, index: usize, value: Cell);
    fn transfer(&mut self, targets: &[Target]);

    // Pointer capabilities.
    fn move_pointer(&mut self, amount: isize);
    fn set_pointer(&mut self, index: usize);
    fn find_zero(&mut self, step: isize);

    // Loop brackets. `name` identifies the loop for backends that
    // emit bodies out of line.
    fn begin_loop(&mut self, name: &str);
    fn end_loop(&mut self);

    // Input and output channel capabilities.
    fn read_cell(&mut self);
    fn write_cell(&mut self);
    fn print(&mut self, bytes: &[u8]);
}

/// Emit a program at whatever IR level the chain stopped at.
pub fn emit_program<E: Emitter>(program: &Program, emitter: &mut E) {
    match program {
        Program::Raw(instrs) => emit_raw(instrs, emitter),
        Program::Collapsed(instrs) => emit_collapsed(instrs, emitter),
        Program::Flow(instrs) => emit_flow(instrs, emitter),
        Program::State(instrs) => emit_state(instrs, emitter),
    }
}

pub fn emit_raw<E: Emitter>(instrs: &[RawInstr], emitter: &mut E) {
    for instr in instrs {
        match instr {
            RawInstr::Increment { .. } => emitter.modify_cell(Wrapping(1)),
            RawInstr::Decrement { .. } => emitter.modify_cell(Wrapping(u8::MAX)),
            RawInstr::MoveLeft { .. } => emitter.move_pointer(-1),
            RawInstr::MoveRight { .. } => emitter.move_pointer(1),
            RawInstr::Read { .. } => emitter.read_cell(),
            RawInstr::Write { .. } => emitter.write_cell(),
            RawInstr::Loop { body, .. } => {
                emitter.begin_loop(&flow::fresh_loop_name());
                emit_raw(body, emitter);
                emitter.end_loop();
            }
        }
    }
}

pub fn emit_collapsed<E: Emitter>(instrs: &[CollapseInstr], emitter: &mut E) {
    for instr in instrs {
        match instr {
            CollapseInstr::Modify { amount, .. } => emitter.modify_cell(*amount),
            CollapseInstr::Move { amount, .. } => emitter.move_pointer(*amount),
            CollapseInstr::Read { .. } => emitter.read_cell(),
            CollapseInstr::Write { .. } => emitter.write_cell(),
            CollapseInstr::Loop { body, .. } => {
                emitter.begin_loop(&flow::fresh_loop_name());
                emit_collapsed(body, emitter);
                emitter.end_loop();
            }
        }
    }
}

pub fn emit_flow<E: Emitter>(instrs: &[FlowInstr], emitter: &mut E) {
    for instr in instrs {
        match instr {
            FlowInstr::Modify { amount } => emitter.modify_cell(*amount),
            FlowInstr::Set { value } => emitter.set_cell(*value),
            FlowInstr::Move { amount } => emitter.move_pointer(*amount),
            FlowInstr::Transfer { targets } => emitter.transfer(targets),
            FlowInstr::FindZero { step } => emitter.find_zero(*step),
            FlowInstr::Read => emitter.read_cell(),
            FlowInstr::Write => emitter.write_cell(),
            FlowInstr::Loop { body, name } => {
                emitter.begin_loop(name);
                emit_flow(body, emitter);
                emitter.end_loop();
            }
        }
    }
}

pub fn emit_state<E: Emitter>(instrs: &[StateInstr], emitter: &mut E) {
    for instr in instrs {
        match instr {
            StateInstr::Modify { amount } => emitter.modify_cell(*amount),
            StateInstr::Set { value } => emitter.set_cell(*value),
            StateInstr::Move { amount } => emitter.move_pointer(*amount),
            StateInstr::Transfer { targets } => emitter.transfer(targets),
            StateInstr::FindZero { step } => emitter.find_zero(*step),
            StateInstr::Read => emitter.read_cell(),
            StateInstr::Write => emitter.write_cell(),
            StateInstr::Print { bytes } => emitter.print(bytes),
            StateInstr::BulkSet { entries } => {
                for (index, value) in entries {
                    emitter.set_index(*index, *value);
                }
            }
            StateInstr::PointerSet { index } => emitter.set_pointer(*index),
            StateInstr::Loop { body, name } => {
                emitter.begin_loop(name);
                emit_state(body, emitter);
                emitter.end_loop();
            }
        }
    }
}

/// Generate one C translation unit for a program.
pub fn generate_c(program: &Program) -> String {
    let mut backend = CSource::new();
    emit_program(program, &mut backend);
    backend.finish()
}

/// The C backend. Loops are realized in-line as `while` statements,
/// so loop identity names go unused.
pub struct CSource {
    buffer: String,
    indent: usize,
}

impl CSource {
    pub fn new() -> CSource {
        let mut backend = CSource {
            buffer: String::new(),
            indent: 0,
        };
        backend.line("#include <stdio.h>");
        backend.line("");
        backend.line(&format!("static unsigned char tape[{}];", TAPE_SIZE));
        backend.line(&format!("static long pointer = {};", TAPE_START));
        backend.line("");
        backend.line("int main(void) {");
        backend.indent = 1;
        backend
    }

    pub fn finish(mut self) -> String {
        self.indent = 1;
        self.line("return 0;");
        self.indent = 0;
        self.line("}");
        self.buffer
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buffer.push_str("    ");
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    fn offset_expr(offset: isize) -> String {
        if offset < 0 {
            format!("pointer - {}", -offset)
        } else {
            format!("pointer + {}", offset)
        }
    }
}

impl Default for CSource {
    fn default() -> CSource {
        CSource::new()
    }
}

impl Emitter for CSource {
    fn modify_cell(&mut self, amount: Cell) {
        self.line(&format!("tape[pointer] += {};", amount.0));
    }

    fn set_cell(&mut self, value: Cell) {
        self.line(&format!("tape[pointer] = {};", value.0));
    }

    fn set_index(&mut self, index: usize, value: Cell) {
        self.line(&format!("tape[{}] = {};", index, value.0));
    }

    fn transfer(&mut self, targets: &[Target]) {
        self.line("{");
        self.indent += 1;
        self.line("unsigned char value = tape[pointer];");
        for target in targets {
            self.line(&format!(
                "tape[{}] += value * {};",
                CSource::offset_expr(target.offset),
                target.multiplier.0
            ));
        }
        self.line("tape[pointer] = 0;");
        self.indent -= 1;
        self.line("}");
    }

    fn move_pointer(&mut self, amount: isize) {
        if amount < 0 {
            self.line(&format!("pointer -= {};", -amount));
        } else if amount > 0 {
            self.line(&format!("pointer += {};", amount));
        }
    }

    fn set_pointer(&mut self, index: usize) {
        self.line(&format!("pointer = {};", index));
    }

    fn find_zero(&mut self, step: isize) {
        if step < 0 {
            self.line(&format!("while (tape[pointer]) pointer -= {};", -step));
        } else {
            self.line(&format!("while (tape[pointer]) pointer += {};", step));
        }
    }

    fn begin_loop(&mut self, _name: &str) {
        self.line("while (tape[pointer]) {");
        self.indent += 1;
    }

    fn end_loop(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    fn read_cell(&mut self) {
        // The cell is left untouched at end of input.
        self.line("{ int c = getchar(); if (c != EOF) tape[pointer] = (unsigned char)c; }");
    }

    fn write_cell(&mut self) {
        self.line("putchar(tape[pointer]);");
    }

    fn print(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        // Octal escapes are never ambiguous against a following
        // digit the way hex escapes are.
        let escaped: String = bytes.iter().map(|byte| format!("\\{:03o}", byte)).collect();
        self.line(&format!(
            "fwrite(\"{}\", 1, {}, stdout);",
            escaped,
            bytes.len()
        ));
    }
}
