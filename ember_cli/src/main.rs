use clap::{command, Parser};
use ember::errors::CompilationErrors;
use ember::interpreter::{Value, Vm, VmContext};
use ember::languages::ember::std::{impl_basic, impl_string, impl_vm};
use rustyline::error::ReadlineError;
use std::process::ExitCode;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Options {
    script: Option<String>,

    /// Enter interactive mode after executing 'script'
    #[arg(short)]
    interactive: bool,

    /// Execute string
    #[arg(short)]
    execute: Vec<String>,

    /// Print compiled bytecode before running
    #[arg(long)]
    dump_code: bool,
}

fn main() -> ExitCode {
    match main2() {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn main2() -> Result<(), ()> {
    let options = Options::parse();

    let mut vm = Vm::default();
    let ctx = &mut vm.context();

    impl_basic(ctx).map_err(drop)?;
    impl_string(ctx).map_err(drop)?;
    impl_vm(ctx).map_err(drop)?;

    // default to true
    let mut interactive = true;

    if !options.execute.is_empty() {
        for source in &options.execute {
            execute_source(ctx, "(command line)", source, options.dump_code)?;
        }

        // only interactive if it's explicitly stated when a script is set
        interactive = options.interactive;
    }

    if let Some(path) = &options.script {
        execute_file(ctx, path, options.dump_code)?;

        interactive = options.interactive;
    }

    if interactive {
        repl(&mut vm)?;
    }

    Ok(())
}

fn execute_file(ctx: &mut VmContext, path: &str, dump_code: bool) -> Result<(), ()> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot open {path}: {err}");
            return Err(());
        }
    };

    execute_source(ctx, path, &source, dump_code)
}

fn execute_source(
    ctx: &mut VmContext,
    label: &str,
    source: &str,
    dump_code: bool,
) -> Result<(), ()> {
    if let Err(errors) = ctx.compile_string(source, label) {
        // the failed compile left a nil on the stack
        ctx.pop_count(1);
        eprintln!("{label}:{errors}");
        return Err(());
    }

    if dump_code {
        if let Value::Function(function) = ctx.peek_value(0) {
            if let Some(dump) = ctx.disassemble_function(&function) {
                println!("{dump}");
            }
        }
    }

    if let Err(err) = ctx.pcall(0, 0) {
        // pcall pushed the error value; drop it after reporting
        ctx.pop_count(1);
        eprintln!("{err}");
        return Err(());
    }

    Ok(())
}

fn repl(vm: &mut Vm) -> Result<(), ()> {
    let mut rl = rustyline::DefaultEditor::new().map_err(drop)?;
    let mut input_buffer = String::new();
    let mut request_more = false;

    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    loop {
        let ctx = &mut vm.context();

        let prompt = if request_more { ">> " } else { "> " };
        request_more = false;

        match rl.readline(prompt) {
            Ok(s) => {
                input_buffer += &s;
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                break Ok(());
            }
            Err(err) => {
                eprintln!("error: {err:?}");
                break Err(());
            }
        }

        let _ = rl.add_history_entry(&input_buffer);

        if run_repl_input(ctx, &input_buffer, &mut request_more).is_err() {
            // keep accumulating when the input looks unfinished
            input_buffer.push('\n');
            continue;
        }

        input_buffer.clear();
    }
}

/// Tries the input as an expression first (printing its value), falling
/// back to plain statement form.
fn run_repl_input(
    ctx: &mut VmContext,
    input: &str,
    request_more: &mut bool,
) -> Result<(), ()> {
    let as_expression = format!("print({input})");

    let compiled = match ctx.compile_string(&as_expression, "stdin") {
        Ok(()) => true,
        Err(_) => {
            ctx.pop_count(1);
            false
        }
    };

    if !compiled {
        match ctx.compile_string(input, "stdin") {
            Ok(()) => {}
            Err(errors) => {
                ctx.pop_count(1);

                if looks_unfinished(&errors) {
                    *request_more = true;
                    return Err(());
                }

                eprintln!("stdin:{errors}");
                return Ok(());
            }
        }
    }

    match ctx.pcall(0, 0) {
        Ok(()) => {}
        Err(err) => {
            ctx.pop_count(1);
            eprintln!("{err}");
        }
    }

    Ok(())
}

fn looks_unfinished(errors: &CompilationErrors) -> bool {
    use ember::errors::{CompilationError, SyntaxError};

    matches!(
        errors.first(),
        CompilationError::SyntaxError(SyntaxError::UnexpectedEof)
    )
}
