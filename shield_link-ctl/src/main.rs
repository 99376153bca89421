use exitcode::{self, ExitCode};
use std::process;

use shield_link_lib::command::{Command, Response};
use shield_link_lib::socket;

mod cli;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = cli::parse();

    let cmd: Command = args.command.into();
    let resp = match socket::process_cmd(&args.socket_path, &cmd).await {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("Error processing {}: {}", cmd, e);
            process::exit(exitcode::UNAVAILABLE);
        }
    };

    let exit = if args.json { json_print(&resp) } else { pretty_print(&resp) };
    process::exit(exit);
}

fn json_print(resp: &Response) -> ExitCode {
    match serde_json::to_string_pretty(resp) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing response: {e}");
            return exitcode::SOFTWARE;
        }
    }
    exit_code(resp)
}

fn pretty_print(resp: &Response) -> ExitCode {
    // pretty print for users
    match resp {
        Response::Pong => println!("Service is running"),
        Response::Done => println!("Done"),
        Response::Status(status) => println!("{status}"),
        Response::Failed(reason) => eprintln!("Service failed: {reason}"),
    }
    exit_code(resp)
}

fn exit_code(resp: &Response) -> ExitCode {
    match resp {
        Response::Pong | Response::Done | Response::Status(_) => exitcode::OK,
        Response::Failed(_) => exitcode::SOFTWARE,
    }
}
