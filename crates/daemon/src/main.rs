use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use common::exit_code::ReturnCode;
use vgit_daemon::logging;

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{ModifiedPaths, Mount, Status, Unmount};

crate::command_enum! {
    (Mount, Mount),
    (Status, Status),
    (Unmount, Unmount),
    (ModifiedPaths, ModifiedPaths),
}

#[derive(Parser, Debug)]
#[command(name = "vgit", version, about = "Mount coordination for virtualized git enlistments")]
struct Cli {
    /// Enlistment root (defaults to the current directory)
    #[arg(long, short = 'e', global = true, env = "VGIT_ENLISTMENT")]
    enlistment: Option<PathBuf>,

    /// Control socket, overriding the one in mount.toml
    #[arg(long, global = true, env = "VGIT_SOCKET")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let enlistment_root = match args.enlistment {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Error: failed to read current directory: {}", e);
                return ReturnCode::GenericError.into();
            }
        },
    };
    let ctx = OpContext {
        enlistment_root,
        socket_path: args.socket,
    };

    // The mount logs to its enlistment; client commands only to stderr.
    let _log_guard = match &args.command {
        Command::Mount(_) => match logging::init_mount(&ctx.layout().logs_dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: failed to set up logging: {}", e);
                return ReturnCode::GenericError.into();
            }
        },
        _ => {
            logging::init_console();
            None
        }
    };

    match args.command.execute(&ctx).await {
        Ok(OpOutput::Mount(output)) => {
            println!("{}", output);
            output.code.into()
        }
        Ok(output) => {
            let text = output.to_string();
            if !text.is_empty() {
                println!("{}", text);
            }
            ReturnCode::Success.into()
        }
        Err(e) => {
            let e = anyhow::Error::new(e);
            eprintln!("Error: {:#}", e);
            ReturnCode::GenericError.into()
        }
    }
}
