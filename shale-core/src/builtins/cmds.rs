//! Native commands registered in the command namespace.

use std::io::Write;

use crate::error::Error;
use crate::interp::Interp;

pub(super) fn cd(interp: &mut Interp, args: &[String]) -> Result<i32, Error> {
    let target = match args.first() {
        Some(dir) => dir.clone(),
        None => std::env::var("HOME").unwrap_or_else(|_| String::from("/")),
    };

    match std::env::set_current_dir(&target) {
        Ok(()) => Ok(0),
        Err(e) => {
            let mut err = interp.open_files.stderr()?;
            writeln!(err, "cd: {target}: {e}")?;
            Ok(1)
        }
    }
}

pub(super) fn exit(_interp: &mut Interp, args: &[String]) -> Result<i32, Error> {
    let code = args
        .first()
        .and_then(|a| a.parse::<i32>().ok())
        .unwrap_or(0);
    std::process::exit(code);
}

pub(super) fn export(interp: &mut Interp, args: &[String]) -> Result<i32, Error> {
    let mut status = 0;

    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => std::env::set_var(name, value),
            None => {
                // Exporting a script variable mirrors it into the process
                // environment.
                match interp.scopes.lookup(arg) {
                    Some(value) => std::env::set_var(arg, value.format()),
                    None => {
                        let mut err = interp.open_files.stderr()?;
                        writeln!(err, "export: {arg}: not found")?;
                        status = 1;
                    }
                }
            }
        }
    }

    Ok(status)
}
