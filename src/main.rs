use acc::driver::{self, DriverError, Options};
use anyhow::Context;
use clap::Parser as ClapParser;
use std::path::PathBuf;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(short, long, default_value = "a.out")]
    output: PathBuf,
    /// Only write `<stem>.s` for each input
    #[arg(short = 'S')]
    asm_only: bool,
    /// Keep intermediate `.s` and `.o` files
    #[arg(long)]
    save_temps: bool,
    #[arg(short = 'A', long)]
    print_ast: bool,
    #[arg(short = 'T', long)]
    print_tokens: bool,
    /// Passed to the linker as `-syslibroot`
    #[arg(long, env = "ACC_SYSROOT")]
    sysroot: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let opts = Options {
        inputs: args.inputs,
        output: args.output,
        asm_only: args.asm_only,
        save_temps: args.save_temps,
        print_ast: args.print_ast,
        print_tokens: args.print_tokens,
        sysroot: args.sysroot,
    };

    match driver::run(&opts) {
        Err(DriverError::Compile { path, source }) if source.is_internal() => {
            Err(source).with_context(|| format!("{}: this is a bug in acc", path.display()))
        }
        result => Ok(result?),
    }
}
