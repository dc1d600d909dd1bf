use std::process::ExitCode;
use std::sync::Once;

use mallet::interpreter::Interpreter;
use mallet::printer::pr_str;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

static TRACING_INIT: Once = Once::new();

/// Install a log subscriber, only when `RUST_LOG` asks for one
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

fn main() -> ExitCode {
    init_tracing();

    // mallet [FILE [ARGS...]]
    let mut args = std::env::args().skip(1);
    let file = args.next();
    let argv: Vec<String> = args.collect();

    let mut interp = match Interpreter::new(argv) {
        Ok(interp) => interp,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match file {
        Some(path) => run_file(&mut interp, &path),
        None => run_repl(&mut interp),
    }
}

fn run_file(interp: &mut Interpreter, path: &str) -> ExitCode {
    match interp.load_file(path) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_repl(interp: &mut Interpreter) -> ExitCode {
    println!("mallet - a small Lisp with macros and tail calls");
    println!("Enter forms like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        match rl.readline("user> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(interp);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match interp.rep(line) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_help() {
    println!("Commands:");
    println!("  :help        Show this help");
    println!("  :env         List global bindings");
    println!("  :quit        Exit the REPL");
    println!();
    println!("Special forms: def! let* do if fn* quote quasiquote defmacro! macroexpand");
    println!("Load a program with (load-file \"path.mal\")");
}

fn print_environment(interp: &Interpreter) {
    let bindings = interp.env().bindings();
    println!("{} bindings:", bindings.len());
    for (name, value) in bindings {
        println!("  {name} = {}", pr_str(&value, true));
    }
}
