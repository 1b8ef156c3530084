use anyhow::{anyhow, Context, Result};
use bfoc::{diagnostics, generate_c, parse, PassDescriptor, Program, Registry};
use bitflags::bitflags;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

bitflags! {
    /// IR stages the user asked to see on stdout.
    struct DumpFlags: u8 {
        const RAW = 0b0001;
        const COLLAPSED = 0b0010;
        const FLOW = 0b0100;
        const FINAL = 0b1000;
    }
}

struct Options {
    output_dir: PathBuf,
    optimise: String,
    dump: DumpFlags,
    inputs: Vec<PathBuf>,
}

fn usage() -> ! {
    eprintln!(
        "usage:\n  bfoc [-d <dir>] [-o <level>] [--dump <stages>] <input.bf>...\n\noptions:\n  -d <dir>        directory for generated C files (default: .)\n  -o <level>      optimisation level: none, collapse, flow, state (default: state)\n  --dump <stages> comma-separated IR stages to print: raw, collapsed, flow, final"
    );
    process::exit(2);
}

fn parse_dump(stages: &str) -> DumpFlags {
    let mut flags = DumpFlags::empty();
    for stage in stages.split(',') {
        flags |= match stage.trim() {
            "raw" => DumpFlags::RAW,
            "collapsed" => DumpFlags::COLLAPSED,
            "flow" => DumpFlags::FLOW,
            "final" => DumpFlags::FINAL,
            _ => usage(),
        };
    }
    flags
}

fn parse_args() -> Options {
    let mut options = Options {
        output_dir: PathBuf::from("."),
        optimise: "state".to_owned(),
        dump: DumpFlags::empty(),
        inputs: Vec::new(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-d" | "--output-dir" => {
                let dir = args.next().unwrap_or_else(|| usage());
                options.output_dir = PathBuf::from(dir);
            }
            "-o" | "--optimise" => {
                options.optimise = args.next().unwrap_or_else(|| usage());
            }
            "--dump" => {
                let stages = args.next().unwrap_or_else(|| usage());
                options.dump |= parse_dump(&stages);
            }
            "--help" | "-h" => usage(),
            _ if arg.starts_with('-') => usage(),
            _ => options.inputs.push(PathBuf::from(arg)),
        }
    }

    if options.inputs.is_empty() {
        usage();
    }
    options
}

fn fatal(message: &str) -> ! {
    eprintln!("{}", diagnostics::format_error(message));
    process::exit(1);
}

fn dump_program(program: &Program) {
    let stage = match program {
        Program::Raw(_) => "raw",
        Program::Collapsed(_) => "collapsed",
        Program::Flow(_) => "flow",
        Program::State(_) => "final",
    };
    println!("== {} ==", stage);
    match program {
        Program::Raw(instrs) => instrs.iter().for_each(|instr| println!("{}", instr)),
        Program::Collapsed(instrs) => instrs.iter().for_each(|instr| println!("{}", instr)),
        Program::Flow(instrs) => instrs.iter().for_each(|instr| println!("{}", instr)),
        Program::State(instrs) => instrs.iter().for_each(|instr| println!("{}", instr)),
    }
}

fn compile_file(path: &Path, chain: &[&PassDescriptor], options: &Options) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = parse(&source).with_context(|| format!("failed to parse {}", path.display()))?;

    let mut program = Program::Raw(raw);
    if options.dump.contains(DumpFlags::RAW) {
        dump_program(&program);
    }
    for pass in chain {
        program = (pass.apply)(program);
        let wanted = match program {
            Program::Collapsed(_) => DumpFlags::COLLAPSED,
            Program::Flow(_) => DumpFlags::FLOW,
            _ => DumpFlags::empty(),
        };
        if options.dump.intersects(wanted) {
            dump_program(&program);
        }
    }
    if options.dump.contains(DumpFlags::FINAL) {
        dump_program(&program);
    }

    let stem = path
        .file_stem()
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let out_path = options.output_dir.join(stem).with_extension("c");
    std::fs::write(&out_path, generate_c(&program))
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    info!(input = %path.display(), output = %out_path.display(), "compiled");
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bfoc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = parse_args();

    // Output names come from input stems, so two inputs with the same
    // stem would silently clobber each other.
    let clashes: Vec<_> = options
        .inputs
        .iter()
        .map(|path| path.file_stem().unwrap_or_else(|| path.as_os_str()))
        .duplicates()
        .collect();
    if !clashes.is_empty() {
        fatal(&format!(
            "input files would share an output name: {}",
            clashes.iter().map(|stem| stem.to_string_lossy()).join(", ")
        ));
    }

    let registry = Registry::new();
    let chain = match registry.resolve(&options.optimise) {
        Ok(chain) => chain,
        Err(error) => fatal(&error.to_string()),
    };

    for path in &options.inputs {
        if let Err(error) = compile_file(path, &chain, &options) {
            fatal(&format!("{:#}", error));
        }
    }
}
