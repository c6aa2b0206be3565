use core::error::Error;

use clap::Parser;
use tcphold::{
    cfg::Config,
    cmd::Cmd,
    tune::{LogSink, PlatformTuner},
    Engine,
};
use tokio::runtime::Builder;

pub fn main() {
    let cmd = Cmd::parse();
    if let Err(err) = tcphold::logging::init(cmd.verbose as usize) {
        eprintln!("ERROR: failed to initialize logging: {err}");
    }

    if let Err(err) = run(cmd) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cmd: Cmd) -> Result<(), Box<dyn Error>> {
    let json = cmd.json();
    let cfg: Config = cmd.try_into()?;

    if let Err(err) = tcphold::rlimit::raise_nofile() {
        log::warn!("failed to raise open file limit: {err}");
    }

    // Init I/O runtime.
    let result = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .thread_name("runtime")
        .build()?
        .block_on(async {
            let engine = Engine::new(cfg, PlatformTuner::new(LogSink));
            let stop = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    core::future::pending::<()>().await;
                }
            };

            engine.run(stop).await
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }

    Ok(())
}
