use crate::error::CompileError;
use log::{debug, warn};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", path.display())]
    Compile {
        path: PathBuf,
        #[source]
        source: CompileError,
    },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}")]
    ToolFailed { command: String, status: ExitStatus },
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Stop once `<stem>.s` is written.
    pub asm_only: bool,
    pub save_temps: bool,
    pub print_ast: bool,
    pub print_tokens: bool,
    pub sysroot: Option<PathBuf>,
}

pub fn asm_path(input: &Path) -> PathBuf {
    input.with_extension("s")
}

pub fn obj_path(input: &Path) -> PathBuf {
    input.with_extension("o")
}

pub fn assemble_command(asm: &Path, obj: &Path) -> Command {
    let mut cmd = Command::new("as");
    cmd.args(["-arch", "arm64", "-o"]).arg(obj).arg(asm);
    cmd
}

pub fn link_command(objs: &[PathBuf], output: &Path, sysroot: Option<&Path>) -> Command {
    let mut cmd = Command::new("ld");
    cmd.args(["-arch", "arm64", "-o"]).arg(output).arg("-lSystem");
    if let Some(sysroot) = sysroot {
        cmd.arg("-syslibroot").arg(sysroot);
    }
    cmd.args(objs);
    cmd
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

fn run_tool(mut cmd: Command) -> Result<(), DriverError> {
    let command = describe(&cmd);
    debug!("running {}", command);
    let status = cmd.status().map_err(|source| DriverError::Spawn {
        program: cmd.get_program().to_string_lossy().into_owned(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(DriverError::ToolFailed { command, status })
    }
}

fn remove_temps(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("could not remove {}: {}", path.display(), err),
        }
    }
}

/// Compiles every input to `<stem>.s`, then assembles and links them into
/// one executable unless stopped earlier by the options. On failure, every
/// file written so far is removed unless temps are kept.
pub fn run(opts: &Options) -> Result<(), DriverError> {
    let mut temps = Vec::new();
    let result = build(opts, &mut temps);
    let keep_asm = opts.asm_only && result.is_ok();
    if !opts.save_temps && !keep_asm {
        remove_temps(&temps);
    }
    result
}

fn build(opts: &Options, temps: &mut Vec<PathBuf>) -> Result<(), DriverError> {
    let mut asm_files = Vec::new();
    for input in &opts.inputs {
        let src = std::fs::read_to_string(input).map_err(|source| DriverError::Io {
            path: input.clone(),
            source,
        })?;
        let compile_err = |source: CompileError| DriverError::Compile {
            path: input.clone(),
            source,
        };

        if opts.print_tokens {
            print!("{}", crate::dump_tokens(&src).map_err(|e| compile_err(e.into()))?);
        }
        if opts.print_ast {
            print!("{}", crate::dump_ast(&src).map_err(|e| compile_err(e.into()))?);
            continue;
        }

        let asm = crate::compile(&src).map_err(compile_err)?;
        let path = asm_path(input);
        std::fs::write(&path, asm).map_err(|source| DriverError::Io {
            path: path.clone(),
            source,
        })?;
        temps.push(path.clone());
        asm_files.push((input.clone(), path));
    }

    if opts.print_ast || opts.asm_only {
        return Ok(());
    }
    assemble_and_link(opts, &asm_files, temps)
}

fn assemble_and_link(
    opts: &Options,
    asm_files: &[(PathBuf, PathBuf)],
    temps: &mut Vec<PathBuf>,
) -> Result<(), DriverError> {
    let mut objs = Vec::new();
    for (input, asm) in asm_files {
        let obj = obj_path(input);
        temps.push(obj.clone());
        run_tool(assemble_command(asm, &obj))?;
        objs.push(obj);
    }
    run_tool(link_command(&objs, &opts.output, opts.sysroot.as_deref()))
}
