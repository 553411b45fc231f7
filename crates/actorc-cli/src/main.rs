use std::{env, fs, process::ExitCode, time::Instant};

use actorc::{CompileOptions, HostMode, compile_program, ir::Prog};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.json" };
    let json = match read_file(file_path) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let prog: Prog = match serde_json::from_str(&json) {
        Ok(prog) => prog,
        Err(err) => {
            eprintln!("error parsing IR: {err}");
            return ExitCode::FAILURE;
        }
    };

    let options = CompileOptions {
        multi_value: false,
        mode: HostMode::Ic,
        gc: true,
    };

    let start = Instant::now();
    match compile_program(&prog, options) {
        Ok(menv) => {
            let elapsed = start.elapsed();
            eprintln!(
                "success after: {elapsed:?}\n{} functions, {} imports, {} diagnostics",
                menv.funcs().len(),
                menv.imports().len(),
                menv.diagnostics().len()
            );
            for diag in menv.diagnostics() {
                eprintln!("note: {}", diag.message);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    match fs::read_to_string(file_path) {
        Ok(contents) => Ok(contents),
        Err(err) => Err(format!("Error reading file: {err}")),
    }
}
