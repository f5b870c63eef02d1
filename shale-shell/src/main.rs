//! The `shale` command-line interface.

mod args;

use std::path::Path;

use clap::Parser;

use args::CommandLineArgs;
use shale_core::Interpreter;
use shale_interactive::InteractiveShell;

fn main() {
    let args = CommandLineArgs::parse();

    init_tracing(&args.debug_targets);

    let exit_code = match run(&args) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            1
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(debug_targets: &[String]) {
    use tracing_subscriber::filter::EnvFilter;

    let mut filter = EnvFilter::try_from_env("SHALE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    for target in debug_targets {
        if let Ok(directive) = format!("{target}=debug").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &CommandLineArgs) -> Result<i32, String> {
    // Inline source via -c.
    if let Some(source) = &args.command {
        let mut interpreter = Interpreter::new(true, &[String::from("shale")]);
        return match interpreter.exec_source(source) {
            Ok(()) => Ok(0),
            Err(err) => {
                eprintln!("{}", shale_core::render_repl_error(&err));
                Ok(1)
            }
        };
    }

    // A script path runs the file with the remaining arguments bound to
    // `args` and `sys.argv`.
    if let Some(script_path) = &args.script_path {
        let mut argv = vec![script_path.clone()];
        argv.extend(args.script_args.iter().cloned());

        let mut interpreter = Interpreter::new(true, &argv);
        return match interpreter.exec_file(Path::new(script_path), &args.script_args) {
            Ok(()) => Ok(0),
            Err(err) => {
                eprint!(
                    "{}",
                    shale_core::render_file_error(&err, Path::new(script_path))
                );
                Ok(1)
            }
        };
    }

    // No arguments: the REPL.
    let interpreter = Interpreter::new(true, &[String::from("shale")]);
    let mut shell =
        InteractiveShell::new(interpreter).map_err(|e| format!("error: {e}"))?;

    shell.run_startup_file();
    shell.run().map_err(|e| format!("error: {e}"))?;

    Ok(0)
}
